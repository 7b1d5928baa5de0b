//! Committed-block notifications

use purchase_core::Block;
use tokio::sync::mpsc;
use tracing::warn;

/// Receives every committed block. Called on the producer's task, so
/// implementations must return promptly.
pub trait BlockExternalizer: Send + Sync {
    fn on_block_committed(&self, block: &Block, blob_id: &str);
}

/// A committed block and where its payload lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedBlock {
    pub block: Block,
    pub blob_id: String,
}

/// Queues notifications on a bounded channel, dropping them when the consumer falls behind
#[derive(Clone, Debug)]
pub struct ChannelExternalizer {
    tx: mpsc::Sender<CommittedBlock>,
}

impl ChannelExternalizer {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CommittedBlock>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl BlockExternalizer for ChannelExternalizer {
    fn on_block_committed(&self, block: &Block, blob_id: &str) {
        let event = CommittedBlock {
            block: block.clone(),
            blob_id: blob_id.to_string(),
        };
        if let Err(e) = self.tx.try_send(event) {
            warn!(height = block.height(), error = %e, "Dropping committed block notification");
        }
    }
}

/// Ignores notifications
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopExternalizer;

impl BlockExternalizer for NoopExternalizer {
    fn on_block_committed(&self, _block: &Block, _blob_id: &str) {}
}
