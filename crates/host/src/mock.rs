//! In-memory collaborators for tests and local runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use purchase_core::{Block, BlockHeight, BlockRecord, NULL_HASH};
use tracing::info;

use crate::blob::BlobStorage;
use crate::contract::LedgerContract;
use crate::error::{BlobError, ContractError};
use crate::externalizer::BlockExternalizer;
use crate::scheduler::Clock;

/// Key-addressed in-memory blob store with switchable failure
#[derive(Debug, Default)]
pub struct MemoryBlobStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `add` fail until switched back
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, blob_id: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(blob_id).cloned()
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn add(&self, data: &[u8], key: &str) -> Result<String, BlobError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable);
        }
        self.blobs
            .lock()
            .map_err(|_| BlobError::Unavailable)?
            .insert(key.to_string(), data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(key.to_string())
    }

    async fn exists(&self, blob_id: &str) -> Result<bool, BlobError> {
        Ok(self
            .blobs
            .lock()
            .map_err(|_| BlobError::Unavailable)?
            .contains_key(blob_id))
    }
}

/// Ledger that enforces the contract's append rules in memory
#[derive(Debug, Default)]
pub struct MockLedger {
    headers: Mutex<Vec<BlockRecord>>,
    fail: AtomicBool,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with [`ContractError::Unavailable`]
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// All anchored headers, lowest height first
    pub fn headers(&self) -> Vec<BlockRecord> {
        self.headers.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<(), ContractError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ContractError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerContract for MockLedger {
    async fn last_height(&self) -> Result<BlockHeight, ContractError> {
        self.check()?;
        let headers = self.headers.lock().map_err(|_| ContractError::Unavailable)?;
        Ok(headers.last().map_or(0, |h| h.height))
    }

    async fn block_by_height(&self, height: BlockHeight) -> Result<BlockRecord, ContractError> {
        self.check()?;
        let headers = self.headers.lock().map_err(|_| ContractError::Unavailable)?;
        headers
            .iter()
            .find(|h| h.height == height)
            .cloned()
            .ok_or_else(|| ContractError::reverted("3003"))
    }

    async fn add(&self, record: &BlockRecord) -> Result<String, ContractError> {
        self.check()?;
        let mut headers = self.headers.lock().map_err(|_| ContractError::Unavailable)?;
        let (last_height, last_hash) = headers
            .last()
            .map_or((0, NULL_HASH), |h| (h.height, h.cur_block));

        if record.height != last_height + 1 {
            return Err(ContractError::reverted("3001"));
        }
        if record.prev_block != last_hash {
            return Err(ContractError::reverted("3002"));
        }
        headers.push(record.clone());
        info!(height = record.height, "Mock ledger appended header");
        Ok(format!("{:#x}", record.cur_block))
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Externalizer that keeps every notification
#[derive(Debug, Default)]
pub struct RecordingExternalizer {
    events: Mutex<Vec<(Block, String)>>,
}

impl RecordingExternalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Block, String)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl BlockExternalizer for RecordingExternalizer {
    fn on_block_committed(&self, block: &Block, blob_id: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((block.clone(), blob_id.to_string()));
        }
    }
}

/// Signing key of the publishing authority used across tests
#[cfg(test)]
pub(crate) const AUTHORITY_KEY: &str =
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

/// Signed purchases (every third one a cancellation) with the given sequences
#[cfg(test)]
pub(crate) fn sample_transactions(sequences: std::ops::Range<u64>) -> Vec<purchase_core::Transaction> {
    use purchase_core::{
        keccak256, signing_key_from_hex, Address, Bytes, CancelTransaction, NewTransaction,
        PurchaseDetail, Transaction, U256,
    };

    let key = signing_key_from_hex(AUTHORITY_KEY).unwrap();
    let sender: Address = "0x4501F7aF010Cef3DcEaAfbc7Bfb2B39dE57df54d".parse().unwrap();

    sequences
        .map(|sequence| {
            let mut tx = if sequence % 3 == 2 {
                Transaction::Cancel(CancelTransaction {
                    sequence,
                    purchase_id: format!("P{:06}", sequence - 1),
                    timestamp: 1_700_000_000 + sequence,
                    waiting: 0,
                    sender,
                    purchase_signature: Bytes::new(),
                    signer: Address::ZERO,
                    signature: Bytes::new(),
                })
            } else {
                let amount = U256::from(1_000 * (sequence + 1)) * U256::from(10u64).pow(U256::from(18u64));
                Transaction::New(NewTransaction {
                    sequence,
                    purchase_id: format!("P{sequence:06}"),
                    timestamp: 1_700_000_000 + sequence,
                    waiting: 86_400,
                    total_amount: amount,
                    cash_amount: amount,
                    loyalty_value: amount / U256::from(100u64),
                    currency: "php".to_string(),
                    shop_id: keccak256(b"shop-0001"),
                    user_account: Address::ZERO,
                    user_phone_hash: keccak256(b"+639170000000"),
                    details: vec![PurchaseDetail::new("PID001", amount, U256::from(100u64))],
                    sender,
                    purchase_signature: Bytes::new(),
                    signer: Address::ZERO,
                    signature: Bytes::new(),
                })
            };
            tx.sign(&key).unwrap();
            tx
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use purchase_core::Hash;

    fn record(height: BlockHeight, prev: Hash) -> BlockRecord {
        BlockRecord {
            height,
            cur_block: Hash::repeat_byte(height as u8),
            prev_block: prev,
            merkle_root: Hash::ZERO,
            timestamp: 0,
            blob_id: format!("b{height}"),
        }
    }

    #[tokio::test]
    async fn test_mock_ledger_enforces_order() {
        let ledger = MockLedger::new();
        assert_eq!(ledger.last_height().await.unwrap(), 0);

        ledger.add(&record(1, NULL_HASH)).await.unwrap();
        assert!(matches!(
            ledger.add(&record(3, Hash::repeat_byte(1))).await,
            Err(ContractError::Reverted { code: Some(3001), .. })
        ));
        assert!(matches!(
            ledger.add(&record(2, Hash::repeat_byte(9))).await,
            Err(ContractError::Reverted { code: Some(3002), .. })
        ));
        ledger.add(&record(2, Hash::repeat_byte(1))).await.unwrap();

        assert_eq!(ledger.last_height().await.unwrap(), 2);
        assert_eq!(ledger.block_by_height(1).await.unwrap().blob_id, "b1");
    }

    #[tokio::test]
    async fn test_memory_blob_failure_switch() {
        let blobs = MemoryBlobStorage::new();
        blobs.set_fail(true);
        assert!(blobs.add(b"x", "k").await.is_err());
        blobs.set_fail(false);
        assert_eq!(blobs.add(b"x", "k").await.unwrap(), "k");
        assert_eq!(blobs.writes(), 1);
        assert!(blobs.exists("k").await.unwrap());
    }
}
