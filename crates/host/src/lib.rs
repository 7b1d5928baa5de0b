//! Host-side logic for the purchase block builder
//!
//! Wires the pure core types to the outside world: the SQLite database,
//! blob storage, the ledger contract, and the two periodic jobs that move
//! purchases from the pool into blocks and block headers onto the chain.

pub mod blob;
pub mod config;
pub mod contract;
pub mod error;
pub mod externalizer;
pub mod metrics;
pub mod mock;
pub mod pool;
pub mod producer;
pub mod publisher;
pub mod scheduler;
pub mod sequence;
pub mod storage;
pub mod tip;

pub use blob::{BlobStorage, FileStorage, IpfsStorage};
pub use config::{Config, StorageType};
pub use contract::{LedgerContract, RpcLedger};
pub use error::{BlobError, ConfigError, ContractError, ProducerError, PublishError, StorageError};
pub use externalizer::{BlockExternalizer, ChannelExternalizer, CommittedBlock, NoopExternalizer};
pub use metrics::Metrics;
pub use pool::TransactionPool;
pub use producer::{BlockProducer, ProducerSettings};
pub use publisher::{ChainPublisher, PublishOutcome, PublisherSettings};
pub use scheduler::{Clock, Job, Scheduler, SchedulerHandle, SystemClock};
pub use sequence::SequenceAllocator;
pub use storage::Storage;
pub use tip::{reconcile, ChainTip, Reconciliation};
