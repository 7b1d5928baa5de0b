//! Durable transaction pool

use std::sync::Arc;

use purchase_core::{Hash, Hashable, Transaction};

use crate::error::StorageError;
use crate::storage::{PoolRow, Storage};

/// Staging area between admission and block production.
///
/// `get` only peeks; transactions leave the pool through `remove` once the
/// block that contains them has been stored.
#[derive(Clone, Debug)]
pub struct TransactionPool {
    storage: Arc<Storage>,
}

impl TransactionPool {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Add one transaction; re-adding the same content hash keeps a single entry
    pub fn add(&self, tx: &Transaction) -> Result<Hash, StorageError> {
        let row = to_row(tx)?;
        let hash = row.hash;
        self.storage.pool_upsert(&[row])?;
        Ok(hash)
    }

    /// Add a transaction only if its sequence follows the last admitted one.
    /// Fails with [`StorageError::SequenceMismatch`] on a gap or a repeat.
    pub fn admit(&self, tx: &Transaction) -> Result<Hash, StorageError> {
        let row = to_row(tx)?;
        let hash = row.hash;
        self.storage.pool_admit(&row)?;
        Ok(hash)
    }

    pub fn add_all(&self, txs: &[Transaction]) -> Result<(), StorageError> {
        let rows = txs.iter().map(to_row).collect::<Result<Vec<_>, _>>()?;
        self.storage.pool_upsert(&rows)
    }

    /// Up to `max_count` transactions in ascending sequence order
    pub fn get(&self, max_count: usize) -> Result<Vec<Transaction>, StorageError> {
        self.storage
            .pool_select(max_count)?
            .into_iter()
            .map(|row| -> Result<Transaction, StorageError> {
                Ok(serde_json::from_str(&row.contents)?)
            })
            .collect()
    }

    pub fn remove(&self, tx: &Transaction) -> Result<(), StorageError> {
        self.storage.pool_delete(&[tx.hash()])?;
        Ok(())
    }

    pub fn remove_all(&self, txs: &[Transaction]) -> Result<usize, StorageError> {
        let hashes: Vec<Hash> = txs.iter().map(|tx| tx.hash()).collect();
        self.storage.pool_delete(&hashes)
    }

    pub fn length(&self) -> Result<u64, StorageError> {
        self.storage.pool_count()
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.pool_clear()
    }
}

fn to_row(tx: &Transaction) -> Result<PoolRow, StorageError> {
    Ok(PoolRow {
        hash: tx.hash(),
        sequence: tx.sequence(),
        contents: serde_json::to_string(tx)?,
    })
}
