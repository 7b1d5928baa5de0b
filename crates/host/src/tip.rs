//! Chain tip discovery and startup reconciliation

use std::time::Duration;

use purchase_core::{BlockHeight, Hash, NULL_HASH};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::contract::LedgerContract;
use crate::error::{ContractError, ProducerError, StorageError};
use crate::pool::TransactionPool;
use crate::storage::Storage;

/// Hash and height of the most recent block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: Hash,
    pub height: BlockHeight,
}

impl ChainTip {
    /// Parent of the first block
    pub const GENESIS: Self = Self {
        hash: NULL_HASH,
        height: 0,
    };

    pub fn new(hash: Hash, height: BlockHeight) -> Self {
        Self { hash, height }
    }
}

impl Default for ChainTip {
    fn default() -> Self {
        Self::GENESIS
    }
}

/// Last block in the local database
pub fn tip_from_storage(storage: &Storage) -> Result<Option<ChainTip>, StorageError> {
    let Some(height) = storage.last_height()? else {
        return Ok(None);
    };
    Ok(storage
        .block_by_height(height)?
        .map(|record| ChainTip::new(record.cur_block, record.height)))
}

/// Last block anchored on chain; `None` while the ledger is empty
pub async fn tip_from_contract(
    ledger: &dyn LedgerContract,
) -> Result<Option<ChainTip>, ContractError> {
    let height = ledger.last_height().await?;
    if height == 0 {
        return Ok(None);
    }
    let record = ledger.block_by_height(height).await?;
    Ok(Some(ChainTip::new(record.cur_block, height)))
}

/// The higher of the two tips; the chain wins ties
pub fn resolve_tip(local: Option<ChainTip>, chain: Option<ChainTip>) -> ChainTip {
    match (local, chain) {
        (Some(local), Some(chain)) if local.height > chain.height => local,
        (_, Some(chain)) => chain,
        (Some(local), None) => local,
        (None, None) => ChainTip::GENESIS,
    }
}

/// Result of startup reconciliation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub tip: ChainTip,
    /// Local block rows were discarded because of a gap
    pub cleared: bool,
}

/// Compare the local database with the ledger and pick the producer's starting tip.
///
/// When the database is ahead of the chain but some row between the chain
/// height and the local height is missing, the local rows can never be
/// published in order. They are dropped and the chain becomes the tip. Pooled
/// transactions are dropped too only when `clear_pool_on_gap` is set.
///
/// An unreachable ledger is not fatal: the local tip is used and no local
/// rows are discarded, since the pruned heights below it cannot be told
/// apart from a gap.
pub async fn reconcile(
    storage: &Storage,
    pool: &TransactionPool,
    ledger: &dyn LedgerContract,
    clear_pool_on_gap: bool,
    io_timeout: Duration,
) -> Result<Reconciliation, ProducerError> {
    // `None` when the ledger could not be read; `Some(None)` when it is empty
    let chain = match timeout(io_timeout, tip_from_contract(ledger)).await {
        Ok(Ok(tip)) => Some(tip),
        Ok(Err(e)) => {
            warn!(error = %e, "Could not read ledger tip, using local database only");
            None
        }
        Err(_) => {
            warn!("Timed out reading ledger tip, using local database only");
            None
        }
    };

    let mut cleared = false;
    match (storage.last_height()?, chain) {
        (None, _) => info!("No blocks stored in the local database"),
        (Some(local_height), None) => {
            warn!(local_height, "Ledger height unknown, keeping local blocks unchecked");
        }
        (Some(local_height), Some(chain_tip)) => {
            let chain_height = chain_tip.map_or(0, |tip| tip.height);
            info!(chain_height, local_height, "Latest heights on chain and in the database");
            if local_height > chain_height && has_gap(storage, chain_height, local_height)? {
                error!(
                    chain_height,
                    local_height, "Blocks missing between chain and database, discarding local blocks"
                );
                storage.clear_blocks()?;
                if clear_pool_on_gap {
                    pool.clear()?;
                    warn!("Transaction pool cleared");
                }
                cleared = true;
            }
        }
    }

    let tip = resolve_tip(tip_from_storage(storage)?, chain.flatten());
    info!(height = tip.height, hash = %tip.hash, "Chain tip initialized");
    Ok(Reconciliation { tip, cleared })
}

/// Whether any height in `(chain_height, local_height]` has no row
fn has_gap(
    storage: &Storage,
    chain_height: BlockHeight,
    local_height: BlockHeight,
) -> Result<bool, StorageError> {
    for height in chain_height + 1..=local_height {
        if storage.block_by_height(height)?.is_none() {
            return Ok(true);
        }
    }
    Ok(false)
}
