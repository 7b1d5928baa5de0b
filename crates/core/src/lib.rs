//! Purchase block-building core
//!
//! Pure, I/O free pieces shared by the node:
//! - structural Keccak256 hashing
//! - purchase and cancellation transactions with EIP-191 countersigning
//! - Merkle tree construction
//! - block assembly and the persisted block record

pub mod block;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod tx;
pub mod types;

pub use block::{Block, BlockHeader, BlockRecord};
pub use error::CoreError;
pub use hash::{hash_list, hash_pair, keccak256, HashWriter, Hashable};
pub use merkle::{build_merkle_tree, merkle_root};
pub use tx::{
    signing_key_from_hex, CancelTransaction, NewTransaction, PurchaseDetail, Transaction, TxType,
};
pub use types::*;

pub use k256::ecdsa::SigningKey;
