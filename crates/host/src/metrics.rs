//! Prometheus metrics

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Node metrics, registered under the `purchase` prefix
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    pub blocks_produced: Counter,
    pub block_failures: Counter,
    pub txs_included: Counter,
    pub blocks_published: Counter,
    pub publish_failures: Counter,
    pub block_height: Gauge,
    pub last_sequence: Gauge,
    pub pool_size: Gauge,
    pub published_height: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("purchase");

        let blocks_produced = Counter::default();
        let block_failures = Counter::default();
        let txs_included = Counter::default();
        let blocks_published = Counter::default();
        let publish_failures = Counter::default();
        let block_height = Gauge::default();
        let last_sequence = Gauge::default();
        let pool_size = Gauge::default();
        let published_height = Gauge::default();

        registry.register("blocks_produced", "Blocks committed locally", blocks_produced.clone());
        registry.register("block_failures", "Aborted block production cycles", block_failures.clone());
        registry.register("txs_included", "Transactions included in committed blocks", txs_included.clone());
        registry.register("blocks_published", "Block headers appended on chain", blocks_published.clone());
        registry.register("publish_failures", "Failed publishing cycles", publish_failures.clone());
        registry.register("block_height", "Height of the local chain tip", block_height.clone());
        registry.register("last_sequence", "Highest admitted transaction sequence", last_sequence.clone());
        registry.register("pool_size", "Transactions waiting in the pool", pool_size.clone());
        registry.register("published_height", "Last height anchored on chain", published_height.clone());

        Self {
            registry,
            blocks_produced,
            block_failures,
            txs_included,
            blocks_published,
            publish_failures,
            block_height,
            last_sequence,
            pool_size,
            published_height,
        }
    }

    /// Text exposition of every metric
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

/// Clamp a `u64` counter value into the gauge range
pub fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let metrics = Metrics::new();
        metrics.blocks_produced.inc();
        metrics.txs_included.inc_by(8);
        metrics.block_height.set(3);

        let text = metrics.encode().unwrap();
        assert!(text.contains("purchase_blocks_produced_total 1"));
        assert!(text.contains("purchase_txs_included_total 8"));
        assert!(text.contains("purchase_block_height 3"));
        assert!(text.ends_with("# EOF\n"));
    }
}
