//! Host error types

use purchase_core::{BlockHeight, CoreError, Sequence};
use thiserror::Error;

/// Local database errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("block {0} is already stored")]
    DuplicateHeight(BlockHeight),

    #[error("blob id must not be empty")]
    EmptyBlobId,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("sequence {got} is different from the expected value {expected}")]
    SequenceMismatch { expected: Sequence, got: Sequence },
}

/// Blob storage errors
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid blob key: {0:?}")]
    InvalidKey(String),

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("blob storage unavailable")]
    Unavailable,
}

/// Ledger contract errors
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error: {0}")]
    Rpc(String),

    /// The contract rejected the call; `code` is set when the reason is a known catalog code
    #[error("execution reverted: {message}")]
    Reverted { code: Option<u32>, message: String },

    #[error("abi decoding failed: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("transaction {0} failed")]
    TxFailed(String),

    #[error("no receipt for transaction {0}")]
    NoReceipt(String),

    #[error("missing configuration: {0}")]
    NotConfigured(&'static str),

    #[error("ledger unavailable")]
    Unavailable,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure of one block production cycle
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("blob write failed: {0}")]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("transaction {0} is not signed and no signing key is configured")]
    Unsigned(Sequence),

    #[error("transaction {0} has an invalid signature")]
    InvalidSignature(Sequence),

    #[error("sequence {got} is different from the expected value {expected}")]
    SequenceMismatch { expected: Sequence, got: Sequence },
}

impl ProducerError {
    /// Error catalog code reported to submitters, when one applies
    pub const fn code(&self) -> Option<u32> {
        match self {
            Self::SequenceMismatch { .. } => Some(3050),
            _ => None,
        }
    }
}

/// Failure of one publishing cycle
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("{0} timed out")]
    Timeout(&'static str),
}
