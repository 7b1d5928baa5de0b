//! Block structure

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::{HashWriter, Hashable};
use crate::merkle::{build_merkle_tree, merkle_root};
use crate::tx::Transaction;
use crate::types::{u64_string, unix_timestamp, BlockHeight, Hash};

/// Block header, the part anchored on chain
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    /// Hash of the previous header
    pub prev_block: Hash,
    pub merkle_root: Hash,
    #[serde(with = "u64_string")]
    pub height: BlockHeight,
    #[serde(with = "u64_string")]
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn new(prev_block: Hash, merkle_root: Hash, height: BlockHeight, timestamp: u64) -> Self {
        Self {
            prev_block,
            merkle_root,
            height,
            timestamp,
        }
    }
}

impl Hashable for BlockHeader {
    fn hash_into(&self, writer: &mut HashWriter) {
        writer
            .write_hash(&self.prev_block)
            .write_hash(&self.merkle_root)
            .write_u64(self.height)
            .write_u64(self.timestamp);
    }
}

/// Block structure
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub header: BlockHeader,
    /// Transactions in inclusion order
    pub txs: Vec<Transaction>,
    /// Flattened Merkle tree over the transaction hashes
    pub merkle_tree: Vec<Hash>,
}

impl Block {
    /// Assemble the block following `(prev_hash, prev_height)`, stamped with the current time.
    pub fn create(
        prev_hash: Hash,
        prev_height: BlockHeight,
        txs: Vec<Transaction>,
    ) -> Result<Self, CoreError> {
        Self::create_at(prev_hash, prev_height, txs, unix_timestamp())
    }

    /// Assemble a block with an explicit timestamp
    pub fn create_at(
        prev_hash: Hash,
        prev_height: BlockHeight,
        txs: Vec<Transaction>,
        timestamp: u64,
    ) -> Result<Self, CoreError> {
        let height = prev_height
            .checked_add(1)
            .ok_or(CoreError::HeightOverflow(prev_height))?;
        let hashes: Vec<Hash> = txs.iter().map(|tx| tx.hash()).collect();
        let merkle_tree = build_merkle_tree(&hashes);
        let header = BlockHeader::new(prev_hash, merkle_root(&merkle_tree), height, timestamp);

        Ok(Self {
            header,
            txs,
            merkle_tree,
        })
    }

    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    pub fn tx_count(&self) -> usize {
        self.txs.len()
    }

    /// Canonical JSON payload written to blob storage
    pub fn to_json(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, CoreError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// A block hashes as its header
impl Hashable for Block {
    fn hash_into(&self, writer: &mut HashWriter) {
        self.header.hash_into(writer);
    }
}

/// Persisted and anchored form of a block
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    #[serde(with = "u64_string")]
    pub height: BlockHeight,
    pub cur_block: Hash,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    #[serde(with = "u64_string")]
    pub timestamp: u64,
    pub blob_id: String,
}

impl BlockRecord {
    pub fn new(block: &Block, blob_id: impl Into<String>) -> Result<Self, CoreError> {
        let blob_id = blob_id.into();
        if blob_id.is_empty() {
            return Err(CoreError::EmptyBlobId);
        }
        Ok(Self {
            height: block.header.height,
            cur_block: block.hash(),
            prev_block: block.header.prev_block,
            merkle_root: block.header.merkle_root,
            timestamp: block.header.timestamp,
            blob_id,
        })
    }
}
