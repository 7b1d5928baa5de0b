//! Block producer
//!
//! Once per `interval` bucket the producer drains up to `max_txs` pooled
//! transactions into a block and commits it in a fixed order:
//!
//! 1. write the JSON payload to blob storage, keyed by the block hash
//! 2. insert the block row into the local database
//! 3. advance the chain tip
//! 4. remove the included transactions from the pool
//! 5. notify the externalizer
//!
//! A failure in step 1 or 2 aborts the cycle with the pool and the tip
//! untouched, so the same block is rebuilt on the next attempt.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use purchase_core::{Address, Block, BlockRecord, Hash, Hashable, SigningKey, Transaction};
use purchase_trace::{LifecycleEvent, LifecycleTracer};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::blob::BlobStorage;
use crate::config::NodeConfig;
use crate::error::{ProducerError, StorageError};
use crate::externalizer::{BlockExternalizer, NoopExternalizer};
use crate::metrics::{gauge_value, Metrics};
use crate::pool::TransactionPool;
use crate::scheduler::{should_act, Clock, Job};
use crate::storage::Storage;
use crate::tip::ChainTip;

#[derive(Clone, Copy, Debug)]
pub struct ProducerSettings {
    /// Seconds per production bucket
    pub interval: u64,
    pub max_txs: usize,
    pub io_timeout: Duration,
}

impl From<&NodeConfig> for ProducerSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            interval: config.interval,
            max_txs: config.max_txs,
            io_timeout: config.io_timeout(),
        }
    }
}

pub struct BlockProducer {
    settings: ProducerSettings,
    storage: Arc<Storage>,
    pool: TransactionPool,
    blobs: Arc<dyn BlobStorage>,
    externalizer: Arc<dyn BlockExternalizer>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    tracer: LifecycleTracer,
    signer: Option<SigningKey>,
    tip: ChainTip,
    old_time_stamp: u64,
}

impl fmt::Debug for BlockProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockProducer")
            .field("settings", &self.settings)
            .field("tip", &self.tip)
            .field("old_time_stamp", &self.old_time_stamp)
            .finish_non_exhaustive()
    }
}

impl BlockProducer {
    pub fn new(
        settings: ProducerSettings,
        storage: Arc<Storage>,
        blobs: Arc<dyn BlobStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let old_time_stamp = clock.now();
        Self {
            settings,
            pool: TransactionPool::new(storage.clone()),
            storage,
            blobs,
            externalizer: Arc::new(NoopExternalizer),
            clock,
            metrics: Arc::new(Metrics::new()),
            tracer: LifecycleTracer::disabled(),
            signer: None,
            tip: ChainTip::GENESIS,
            old_time_stamp,
        }
    }

    pub fn with_externalizer(mut self, externalizer: Arc<dyn BlockExternalizer>) -> Self {
        self.externalizer = externalizer;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_tracer(mut self, tracer: LifecycleTracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Key of the publishing authority, used to countersign unsigned transactions
    pub fn with_signer(mut self, signer: SigningKey) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Starting tip, normally the result of [`crate::tip::reconcile`]
    pub fn with_tip(mut self, tip: ChainTip) -> Self {
        self.tip = tip;
        self.metrics.block_height.set(gauge_value(tip.height));
        self
    }

    pub fn tip(&self) -> ChainTip {
        self.tip
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    /// Admit a transaction into the pool.
    ///
    /// Unsigned transactions are countersigned with the configured key. The
    /// signature must verify against the authority address when a key is
    /// configured, otherwise against the embedded signer. The sequence must
    /// be exactly one past the last admitted one.
    pub fn receive(&self, mut tx: Transaction) -> Result<Hash, ProducerError> {
        let sequence = tx.sequence();
        if !tx.is_signed() {
            let key = self.signer.as_ref().ok_or(ProducerError::Unsigned(sequence))?;
            tx.sign(key)?;
        }
        let authority = self.signer.as_ref().map(Address::from_private_key);
        if !tx.verify(authority) {
            return Err(ProducerError::InvalidSignature(sequence));
        }

        let hash = match self.pool.admit(&tx) {
            Ok(hash) => hash,
            Err(StorageError::SequenceMismatch { expected, got }) => {
                warn!(expected, got, "Transaction out of sequence");
                return Err(ProducerError::SequenceMismatch { expected, got });
            }
            Err(e) => return Err(e.into()),
        };
        self.metrics.pool_size.set(gauge_value(self.pool.length()?));
        self.metrics.last_sequence.set(gauge_value(sequence));
        self.tracer.log_transaction(hash, LifecycleEvent::TxAdmitted, sequence);
        debug!(sequence, %hash, "Transaction admitted");
        Ok(hash)
    }

    /// Run one production cycle now, regardless of the interval.
    ///
    /// Returns the committed block, or `None` when the pool was empty.
    pub async fn produce(&mut self) -> Result<Option<Block>, ProducerError> {
        let result = self.try_produce().await;
        if let Err(e) = &result {
            self.metrics.block_failures.inc();
            error!(height = self.tip.height + 1, error = %e, "Block production failed");
        }
        result
    }

    async fn try_produce(&mut self) -> Result<Option<Block>, ProducerError> {
        let txs = self.pool.get(self.settings.max_txs)?;
        if txs.is_empty() {
            debug!("Transaction pool is empty");
            return Ok(None);
        }

        let block = Block::create_at(self.tip.hash, self.tip.height, txs, self.clock.now())?;
        let block_hash = block.hash();
        let height = block.height();
        self.tracer.log_block(block_hash, height, LifecycleEvent::BlockBuilt);

        let payload = block.to_json()?;
        let blob_id = timeout(self.settings.io_timeout, self.blobs.add(&payload, &block_hash.to_string()))
            .await
            .map_err(|_| ProducerError::Timeout("blob write"))??;
        self.tracer.log_block(block_hash, height, LifecycleEvent::BlobStored);

        let record = BlockRecord::new(&block, blob_id.clone())?;
        self.storage.insert_block(&record)?;
        self.tracer.log_block(block_hash, height, LifecycleEvent::BlockStored);

        self.tip = ChainTip::new(block_hash, height);

        // The block is durable from here on; a failed removal is reported but not rolled back.
        match self.pool.remove_all(&block.txs) {
            Ok(_) => {}
            Err(e) => error!(height, error = %e, "Failed to remove included transactions from the pool"),
        }

        self.externalizer.on_block_committed(&block, &blob_id);

        self.metrics.blocks_produced.inc();
        self.metrics.txs_included.inc_by(block.tx_count() as u64);
        self.metrics.block_height.set(gauge_value(height));
        if let Ok(length) = self.pool.length() {
            self.metrics.pool_size.set(gauge_value(length));
        }
        self.tracer.log_block(block_hash, height, LifecycleEvent::BlockCommitted);

        info!(
            height,
            hash = %block_hash,
            txs = block.tx_count(),
            blob_id = %blob_id,
            "Block committed"
        );
        Ok(Some(block))
    }
}

#[async_trait]
impl Job for BlockProducer {
    fn name(&self) -> &'static str {
        "block-producer"
    }

    async fn tick(&mut self) {
        let now = self.clock.now();
        if !should_act(self.old_time_stamp, now, self.settings.interval) {
            return;
        }
        self.old_time_stamp = now;
        // failures are logged and counted inside `produce`
        let _ = self.produce().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlobError;
    use crate::mock::{
        sample_transactions, ManualClock, MemoryBlobStorage, RecordingExternalizer, AUTHORITY_KEY,
    };
    use purchase_core::{signing_key_from_hex, Bytes, NULL_HASH};

    struct Harness {
        producer: BlockProducer,
        storage: Arc<Storage>,
        blobs: Arc<MemoryBlobStorage>,
        clock: Arc<ManualClock>,
        externalizer: Arc<RecordingExternalizer>,
        metrics: Arc<Metrics>,
    }

    fn harness(max_txs: usize) -> Harness {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStorage::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let externalizer = Arc::new(RecordingExternalizer::new());
        let metrics = Arc::new(Metrics::new());
        let settings = ProducerSettings {
            interval: 600,
            max_txs,
            io_timeout: Duration::from_millis(200),
        };
        let producer = BlockProducer::new(settings, storage.clone(), blobs.clone(), clock.clone())
            .with_externalizer(externalizer.clone())
            .with_metrics(metrics.clone());
        Harness {
            producer,
            storage,
            blobs,
            clock,
            externalizer,
            metrics,
        }
    }

    fn unsigned(tx: Transaction) -> Transaction {
        match tx {
            Transaction::New(mut inner) => {
                inner.signer = Address::ZERO;
                inner.signature = Bytes::new();
                Transaction::New(inner)
            }
            Transaction::Cancel(mut inner) => {
                inner.signer = Address::ZERO;
                inner.signature = Bytes::new();
                Transaction::Cancel(inner)
            }
        }
    }

    #[tokio::test]
    async fn test_tick_produces_block_from_pool() {
        let mut h = harness(8);
        let txs = sample_transactions(0..8);
        for tx in &txs {
            h.producer.receive(tx.clone()).unwrap();
        }
        assert_eq!(h.producer.pool().length().unwrap(), 8);

        // same bucket: nothing happens
        h.clock.set(1_100);
        h.producer.tick().await;
        assert!(h.externalizer.events().is_empty());

        h.clock.set(1_200);
        h.producer.tick().await;

        let events = h.externalizer.events();
        assert_eq!(events.len(), 1);
        let (block, blob_id) = &events[0];
        assert_eq!(block.height(), 1);
        assert_eq!(block.header.prev_block, NULL_HASH);
        assert_eq!(block.header.timestamp, 1_200);
        assert_eq!(&block.txs, &txs);

        let record = h.storage.block_by_height(1).unwrap().unwrap();
        assert_eq!(record.cur_block, block.hash());
        assert_eq!(&record.blob_id, blob_id);
        assert_eq!(Block::from_json(&h.blobs.get(blob_id).unwrap()).unwrap(), *block);

        assert_eq!(h.producer.pool().length().unwrap(), 0);
        assert_eq!(h.producer.tip(), ChainTip::new(block.hash(), 1));
        assert_eq!(h.metrics.blocks_produced.get(), 1);
        assert_eq!(h.metrics.txs_included.get(), 8);
        assert_eq!(h.metrics.last_sequence.get(), 7);

        // next bucket with an empty pool: no block
        h.clock.set(1_800);
        h.producer.tick().await;
        assert_eq!(h.externalizer.events().len(), 1);
    }

    #[tokio::test]
    async fn test_blob_failure_keeps_state_and_retry_rebuilds_same_block() {
        let mut h = harness(8);
        let txs = sample_transactions(0..8);
        h.producer.pool().add_all(&txs).unwrap();
        let expected = Block::create_at(NULL_HASH, 0, txs, h.clock.now()).unwrap();

        h.blobs.set_fail(true);
        assert!(matches!(
            h.producer.produce().await,
            Err(ProducerError::Blob(BlobError::Unavailable))
        ));
        assert_eq!(h.producer.pool().length().unwrap(), 8);
        assert_eq!(h.producer.tip(), ChainTip::GENESIS);
        assert_eq!(h.storage.last_height().unwrap(), None);
        assert!(h.externalizer.events().is_empty());
        assert_eq!(h.metrics.block_failures.get(), 1);

        h.blobs.set_fail(false);
        let block = h.producer.produce().await.unwrap().unwrap();
        assert_eq!(block.hash(), expected.hash());
        assert_eq!(block, expected);
        assert_eq!(h.producer.pool().length().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_database_failure_keeps_state() {
        let mut h = harness(8);
        let txs = sample_transactions(0..3);
        h.producer.pool().add_all(&txs).unwrap();

        let blocker = BlockRecord {
            height: 1,
            cur_block: Hash::repeat_byte(0xff),
            prev_block: NULL_HASH,
            merkle_root: NULL_HASH,
            timestamp: 0,
            blob_id: "occupied".to_string(),
        };
        h.storage.insert_block(&blocker).unwrap();

        assert!(matches!(
            h.producer.produce().await,
            Err(ProducerError::Storage(StorageError::DuplicateHeight(1)))
        ));
        // the blob was written and is now unreferenced
        assert_eq!(h.blobs.writes(), 1);
        assert_eq!(h.producer.pool().length().unwrap(), 3);
        assert_eq!(h.producer.tip(), ChainTip::GENESIS);

        h.storage.clear_blocks().unwrap();
        let block = h.producer.produce().await.unwrap().unwrap();
        assert_eq!(block.tx_count(), 3);
        assert_eq!(h.storage.block_by_height(1).unwrap().unwrap().cur_block, block.hash());
    }

    #[tokio::test]
    async fn test_blocks_chain_and_respect_max_txs() {
        let mut h = harness(2);
        h.producer.pool().add_all(&sample_transactions(0..5)).unwrap();

        let mut prev = ChainTip::GENESIS;
        let mut sequences = Vec::new();
        for height in 1..=3 {
            let block = h.producer.produce().await.unwrap().unwrap();
            assert_eq!(block.height(), height);
            assert_eq!(block.header.prev_block, prev.hash);
            assert!(block.tx_count() <= 2);
            sequences.extend(block.txs.iter().map(Transaction::sequence));
            prev = h.producer.tip();
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert!(h.producer.produce().await.unwrap().is_none());
        assert_eq!(h.storage.block_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_starts_from_given_tip() {
        let h = harness(8);
        let tip = ChainTip::new(Hash::repeat_byte(4), 41);
        let mut producer = h.producer.with_tip(tip);
        producer.pool().add_all(&sample_transactions(0..1)).unwrap();

        let block = producer.produce().await.unwrap().unwrap();
        assert_eq!(block.height(), 42);
        assert_eq!(block.header.prev_block, tip.hash);
    }

    #[tokio::test]
    async fn test_receive_signing_rules() {
        let h = harness(8);
        let tx = unsigned(sample_transactions(0..1).remove(0));
        assert!(matches!(
            h.producer.receive(tx.clone()),
            Err(ProducerError::Unsigned(0))
        ));

        let key = signing_key_from_hex(AUTHORITY_KEY).unwrap();
        let producer = h.producer.with_signer(key);
        producer.receive(tx).unwrap();
        let pooled = producer.pool().get(1).unwrap().remove(0);
        assert!(pooled.is_signed());
        assert!(pooled.verify(None));

        let mut forged = sample_transactions(1..2).remove(0);
        if let Transaction::New(inner) = &mut forged {
            inner.purchase_id = "tampered".to_string();
        }
        assert!(matches!(
            producer.receive(forged),
            Err(ProducerError::InvalidSignature(1))
        ));
    }

    #[tokio::test]
    async fn test_receive_enforces_sequence_order() {
        let h = harness(8);
        let txs = sample_transactions(0..3);

        // gap: 1 before 0
        let err = h.producer.receive(txs[1].clone()).unwrap_err();
        assert!(matches!(err, ProducerError::SequenceMismatch { expected: 0, got: 1 }));
        assert_eq!(err.code(), Some(3050));
        assert_eq!(h.producer.pool().length().unwrap(), 0);

        h.producer.receive(txs[0].clone()).unwrap();
        h.producer.receive(txs[1].clone()).unwrap();

        // duplicate sequence with different content
        let mut repeat = sample_transactions(1..2).remove(0);
        let key = signing_key_from_hex(AUTHORITY_KEY).unwrap();
        if let Transaction::New(inner) = &mut repeat {
            inner.purchase_id = "P-other".to_string();
            inner.signature = Bytes::new();
        }
        repeat.sign(&key).unwrap();
        assert!(matches!(
            h.producer.receive(repeat),
            Err(ProducerError::SequenceMismatch { expected: 2, got: 1 })
        ));

        h.producer.receive(txs[2].clone()).unwrap();
        assert_eq!(h.producer.pool().length().unwrap(), 3);
        assert_eq!(h.storage.last_received_sequence().unwrap(), Some(2));
        assert_eq!(h.metrics.last_sequence.get(), 2);
    }

    struct StalledBlobs;

    #[async_trait]
    impl BlobStorage for StalledBlobs {
        async fn add(&self, _data: &[u8], key: &str) -> Result<String, BlobError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(key.to_string())
        }

        async fn exists(&self, _blob_id: &str) -> Result<bool, BlobError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_blob_timeout_aborts_cycle() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let settings = ProducerSettings {
            interval: 600,
            max_txs: 8,
            io_timeout: Duration::from_millis(20),
        };
        let mut producer = BlockProducer::new(
            settings,
            storage.clone(),
            Arc::new(StalledBlobs),
            Arc::new(ManualClock::new(0)),
        );
        producer.pool().add_all(&sample_transactions(0..2)).unwrap();

        assert!(matches!(
            producer.produce().await,
            Err(ProducerError::Timeout("blob write"))
        ));
        assert_eq!(producer.pool().length().unwrap(), 2);
        assert_eq!(storage.last_height().unwrap(), None);
    }
}
