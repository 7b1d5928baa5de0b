//! Chain publisher
//!
//! Appends locally committed block headers to the ledger contract, one
//! height per tick, and prunes rows the ledger already holds.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use purchase_core::{BlockHeight, BlockRecord};
use purchase_trace::{LifecycleEvent, LifecycleTracer};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::contract::LedgerContract;
use crate::error::{ContractError, PublishError};
use crate::metrics::{gauge_value, Metrics};
use crate::scheduler::{should_act, Clock, Job};
use crate::storage::Storage;

#[derive(Clone, Copy, Debug)]
pub struct PublisherSettings {
    /// Seconds per publishing bucket
    pub send_interval: u64,
    pub io_timeout: Duration,
}

impl From<&NodeConfig> for PublisherSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            send_interval: config.send_interval,
            io_timeout: config.io_timeout(),
        }
    }
}

/// Result of one publishing attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing newer than the ledger in the local database
    Idle,
    /// The row for the next height is not stored yet
    NotReady(BlockHeight),
    Published(BlockRecord),
    /// The contract refused the header; local state is kept for a retry
    Rejected {
        height: BlockHeight,
        code: Option<u32>,
        reason: String,
    },
}

pub struct ChainPublisher {
    settings: PublisherSettings,
    storage: Arc<Storage>,
    ledger: Arc<dyn LedgerContract>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    tracer: LifecycleTracer,
    old_time_stamp: u64,
}

impl fmt::Debug for ChainPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainPublisher")
            .field("settings", &self.settings)
            .field("old_time_stamp", &self.old_time_stamp)
            .finish_non_exhaustive()
    }
}

impl ChainPublisher {
    pub fn new(
        settings: PublisherSettings,
        storage: Arc<Storage>,
        ledger: Arc<dyn LedgerContract>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let old_time_stamp = clock.now();
        Self {
            settings,
            storage,
            ledger,
            clock,
            metrics: Arc::new(Metrics::new()),
            tracer: LifecycleTracer::disabled(),
            old_time_stamp,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_tracer(mut self, tracer: LifecycleTracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Publish at most one block now, regardless of the interval
    pub async fn publish_once(&self) -> Result<PublishOutcome, PublishError> {
        let result = self.try_publish().await;
        match &result {
            Ok(PublishOutcome::Rejected { .. }) => {
                self.metrics.publish_failures.inc();
            }
            Err(e) => {
                self.metrics.publish_failures.inc();
                error!(error = %e, "Block publishing failed");
            }
            Ok(_) => {}
        }
        result
    }

    async fn try_publish(&self) -> Result<PublishOutcome, PublishError> {
        let chain_height = timeout(self.settings.io_timeout, self.ledger.last_height())
            .await
            .map_err(|_| PublishError::Timeout("ledger height"))??;
        self.metrics.published_height.set(gauge_value(chain_height));

        // Rows left behind when a previous prune did not complete
        let stale = self.storage.delete_blocks_up_to(chain_height)?;
        if stale > 0 {
            debug!(chain_height, rows = stale, "Pruned blocks already on chain");
        }

        let local_height = match self.storage.last_height()? {
            Some(height) if height > chain_height => height,
            _ => return Ok(PublishOutcome::Idle),
        };

        let height = chain_height + 1;
        let Some(record) = self.storage.block_by_height(height)? else {
            info!(height, local_height, "Next block is not stored yet");
            return Ok(PublishOutcome::NotReady(height));
        };

        let tx_hash = match timeout(self.settings.io_timeout, self.ledger.add(&record)).await {
            Err(_) => return Err(PublishError::Timeout("ledger append")),
            Ok(Err(ContractError::Reverted { code, message })) => {
                warn!(height, ?code, reason = %message, "Ledger rejected block header");
                return Ok(PublishOutcome::Rejected {
                    height,
                    code,
                    reason: message,
                });
            }
            Ok(result) => result?,
        };

        let pruned = self.storage.delete_blocks_up_to(record.height)?;
        self.metrics.blocks_published.inc();
        self.metrics.published_height.set(gauge_value(record.height));
        self.tracer
            .log_block(record.cur_block, record.height, LifecycleEvent::BlockPublished);
        info!(
            height = record.height,
            hash = %record.cur_block,
            tx_hash = %tx_hash,
            pruned,
            "Block published"
        );
        Ok(PublishOutcome::Published(record))
    }
}

#[async_trait]
impl Job for ChainPublisher {
    fn name(&self) -> &'static str {
        "chain-publisher"
    }

    async fn tick(&mut self) {
        let now = self.clock.now();
        if !should_act(self.old_time_stamp, now, self.settings.send_interval) {
            return;
        }
        self.old_time_stamp = now;
        let _ = self.publish_once().await;
    }
}
