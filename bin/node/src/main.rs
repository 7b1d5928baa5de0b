//! Purchase block builder node
//!
//! Reconciles the local database with the ledger, then runs the block
//! producer and the chain publisher until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use purchase_core::signing_key_from_hex;
use purchase_host::{
    reconcile, BlobStorage, BlockProducer, ChainPublisher, ChannelExternalizer, Config,
    FileStorage, IpfsStorage, LedgerContract, Metrics, ProducerSettings, PublisherSettings,
    RpcLedger, Scheduler, SequenceAllocator, Storage, StorageType, SystemClock, TransactionPool,
};
use purchase_trace::LifecycleTracer;

#[derive(Debug, Parser)]
#[command(name = "purchase-node", version, about = "Purchase block builder node")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        interval = config.node.interval,
        max_txs = config.node.max_txs,
        send_interval = config.node.send_interval,
        storage = ?config.node.storage_type,
        database = %config.database.path,
        rpc = %config.contracts.rpc_url,
        "Starting purchase node"
    );

    let storage = Arc::new(Storage::open(&config.database.path).context("opening database")?);
    let pool = TransactionPool::new(storage.clone());
    let sequences = SequenceAllocator::new(storage.clone());
    let metrics = Arc::new(Metrics::new());
    let clock = Arc::new(SystemClock);
    let tracer = LifecycleTracer::new(config.node.trace_enabled, config.node.trace_path.clone());

    let blobs: Arc<dyn BlobStorage> = match config.node.storage_type {
        StorageType::Ipfs => Arc::new(
            IpfsStorage::new(&config.node.ipfs_api_url, config.node.io_timeout())
                .context("creating IPFS client")?,
        ),
        StorageType::File => Arc::new(FileStorage::new(config.node.blob_dir.clone())),
    };

    let contract = config
        .contracts
        .purchase_address
        .ok_or_else(|| anyhow!("contracts.purchase_address is not set"))?;
    let ledger: Arc<dyn LedgerContract> = Arc::new(
        RpcLedger::new(
            &config.contracts.rpc_url,
            contract,
            config.contracts.publisher_address,
            config.node.io_timeout(),
        )
        .context("creating ledger client")?,
    );

    let reconciled = reconcile(
        &storage,
        &pool,
        ledger.as_ref(),
        config.node.clear_pool_on_gap,
        config.node.io_timeout(),
    )
    .await
    .context("reconciling chain tip")?;
    if reconciled.cleared {
        warn!("Local blocks were discarded during reconciliation");
    }
    info!(
        pooled = pool.length()?,
        stored_blocks = storage.block_count()?,
        last_received = ?sequences.last_received()?,
        expected_sequence = sequences.expected()?,
        "Transaction pool loaded"
    );

    let (externalizer, mut committed) = ChannelExternalizer::new(config.node.externalizer_capacity);
    let drain = tokio::spawn(async move {
        while let Some(event) = committed.recv().await {
            info!(
                height = event.block.height(),
                txs = event.block.tx_count(),
                blob_id = %event.blob_id,
                "Block externalized"
            );
        }
    });

    let mut producer = BlockProducer::new(
        ProducerSettings::from(&config.node),
        storage.clone(),
        blobs,
        clock.clone(),
    )
    .with_externalizer(Arc::new(externalizer))
    .with_metrics(metrics.clone())
    .with_tracer(tracer.clone())
    .with_tip(reconciled.tip);
    if let Some(key) = &config.node.signer_key {
        producer = producer.with_signer(signing_key_from_hex(key).context("parsing node.signer_key")?);
    }

    let publisher = ChainPublisher::new(
        PublisherSettings::from(&config.node),
        storage.clone(),
        ledger,
        clock,
    )
    .with_metrics(metrics.clone())
    .with_tracer(tracer.clone());

    let period = config.node.poll_period();
    let producer_handle = Scheduler::spawn(producer, period);
    let publisher_handle = Scheduler::spawn(publisher, period);

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    producer_handle.stop().await;
    publisher_handle.stop().await;
    // the receiver ends once the producer and its externalizer are dropped
    if let Err(e) = drain.await {
        warn!(error = %e, "Externalizer drain task failed");
    }

    if let Err(e) = tracer.sync_all() {
        warn!(error = %e, "Failed to sync lifecycle trace");
    }
    match metrics.encode() {
        Ok(text) => info!("Final metrics\n{text}"),
        Err(e) => warn!(error = %e, "Failed to encode metrics"),
    }
    info!("Purchase node stopped");
    Ok(())
}
