/// Service name written into every trace line
pub(crate) const SERVICE_NAME: &str = "purchase-node";

/// Stage of the transaction/block lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Transaction admitted into the pool
    TxAdmitted = 3010,

    /// Block assembled from pooled transactions
    BlockBuilt = 3020,

    /// Block payload written to blob storage
    BlobStored = 3022,

    /// Block row inserted into the local database
    BlockStored = 3024,

    /// Chain tip advanced and pool drained
    BlockCommitted = 3026,

    /// Block header appended to the on-chain ledger
    BlockPublished = 3040,
}

impl LifecycleEvent {
    /// Returns the string representation of the event.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TxAdmitted => "tx_admitted",
            Self::BlockBuilt => "block_built",
            Self::BlobStored => "blob_stored",
            Self::BlockStored => "block_stored",
            Self::BlockCommitted => "block_committed",
            Self::BlockPublished => "block_published",
        }
    }

    /// Returns the numeric code of the event.
    pub const fn as_u64(&self) -> u64 {
        *self as u64
    }
}
