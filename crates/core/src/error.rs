//! Core error types

use thiserror::Error;

use crate::types::Sequence;

/// Errors raised by the pure block-building layer
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transaction {0} is already signed")]
    AlreadySigned(Sequence),

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("blob id must not be empty")]
    EmptyBlobId,

    #[error("block height overflow after {0}")]
    HeightOverflow(u64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
