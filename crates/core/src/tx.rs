//! Purchase and cancellation transactions
//!
//! A transaction is built unsigned by the admission layer, countersigned once
//! by the publishing authority with [`Transaction::sign`], and from then on is
//! treated as an immutable value.

use alloy_primitives::{eip191_hash_message, Signature};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::{HashWriter, Hashable};
use crate::types::{decimal, u64_string, Address, Bytes, Hash, Sequence, U256};

/// Transaction discriminant, hashed as a single byte
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    /// Purchase
    New = 0,
    /// Cancellation of an earlier purchase
    Cancel = 1,
}

/// One product line of a purchase
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseDetail {
    pub product_id: String,
    #[serde(with = "decimal")]
    pub amount: U256,
    /// Loyalty percentage scaled by 100 (300 = 3%)
    #[serde(with = "decimal")]
    pub provide_percent: U256,
}

impl PurchaseDetail {
    pub fn new(product_id: impl Into<String>, amount: U256, provide_percent: U256) -> Self {
        Self {
            product_id: product_id.into(),
            amount,
            provide_percent,
        }
    }
}

impl Hashable for PurchaseDetail {
    fn hash_into(&self, writer: &mut HashWriter) {
        writer
            .write_str(&self.product_id)
            .write_u256(&self.amount)
            .write_u256(&self.provide_percent);
    }
}

/// A purchase recorded by a store
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    #[serde(with = "u64_string")]
    pub sequence: Sequence,
    pub purchase_id: String,
    #[serde(with = "u64_string")]
    pub timestamp: u64,
    /// Seconds to hold before loyalty is granted
    #[serde(with = "u64_string")]
    pub waiting: u64,
    #[serde(with = "decimal")]
    pub total_amount: U256,
    #[serde(with = "decimal")]
    pub cash_amount: U256,
    #[serde(with = "decimal")]
    pub loyalty_value: U256,
    pub currency: String,
    pub shop_id: Hash,
    /// `Address::ZERO` when the buyer is identified by phone hash only
    pub user_account: Address,
    pub user_phone_hash: Hash,
    pub details: Vec<PurchaseDetail>,
    /// Store account that submitted the purchase
    pub sender: Address,
    /// Store-side signature over the purchase message
    #[serde(default)]
    pub purchase_signature: Bytes,
    #[serde(default)]
    pub signer: Address,
    #[serde(default)]
    pub signature: Bytes,
}

/// Cancellation of an earlier purchase
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancelTransaction {
    #[serde(with = "u64_string")]
    pub sequence: Sequence,
    pub purchase_id: String,
    #[serde(with = "u64_string")]
    pub timestamp: u64,
    #[serde(with = "u64_string")]
    pub waiting: u64,
    pub sender: Address,
    #[serde(default)]
    pub purchase_signature: Bytes,
    #[serde(default)]
    pub signer: Address,
    #[serde(default)]
    pub signature: Bytes,
}

impl Hashable for NewTransaction {
    fn hash_into(&self, writer: &mut HashWriter) {
        writer
            .write_u8(TxType::New as u8)
            .write_u64(self.sequence)
            .write_str(&self.purchase_id)
            .write_u64(self.timestamp)
            .write_u64(self.waiting)
            .write_u256(&self.total_amount)
            .write_u256(&self.cash_amount)
            .write_u256(&self.loyalty_value)
            .write_str(&self.currency)
            .write_hash(&self.shop_id)
            .write_address(&self.user_account)
            .write_hash(&self.user_phone_hash)
            .write_list(&self.details)
            .write_address(&self.sender)
            .write_bytes(&self.purchase_signature)
            .write_address(&self.signer);
    }
}

impl Hashable for CancelTransaction {
    fn hash_into(&self, writer: &mut HashWriter) {
        writer
            .write_u8(TxType::Cancel as u8)
            .write_u64(self.sequence)
            .write_str(&self.purchase_id)
            .write_u64(self.timestamp)
            .write_u64(self.waiting)
            .write_address(&self.sender)
            .write_bytes(&self.purchase_signature)
            .write_address(&self.signer);
    }
}

/// Transaction structure
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transaction {
    New(NewTransaction),
    Cancel(CancelTransaction),
}

impl Transaction {
    pub fn tx_type(&self) -> TxType {
        match self {
            Self::New(_) => TxType::New,
            Self::Cancel(_) => TxType::Cancel,
        }
    }

    pub fn sequence(&self) -> Sequence {
        match self {
            Self::New(tx) => tx.sequence,
            Self::Cancel(tx) => tx.sequence,
        }
    }

    pub fn purchase_id(&self) -> &str {
        match self {
            Self::New(tx) => &tx.purchase_id,
            Self::Cancel(tx) => &tx.purchase_id,
        }
    }

    pub fn signer(&self) -> Address {
        match self {
            Self::New(tx) => tx.signer,
            Self::Cancel(tx) => tx.signer,
        }
    }

    pub fn signature(&self) -> &Bytes {
        match self {
            Self::New(tx) => &tx.signature,
            Self::Cancel(tx) => &tx.signature,
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.signature().is_empty()
    }

    fn signer_fields_mut(&mut self) -> (&mut Address, &mut Bytes) {
        match self {
            Self::New(tx) => (&mut tx.signer, &mut tx.signature),
            Self::Cancel(tx) => (&mut tx.signer, &mut tx.signature),
        }
    }

    /// Countersign with the publishing authority's key.
    ///
    /// Sets `signer` to the key's address first, so the signer identity is
    /// part of the signed content hash, then stores an EIP-191 personal-message
    /// signature over that hash. This is the only mutation a transaction
    /// accepts and it may happen once.
    pub fn sign(&mut self, key: &SigningKey) -> Result<Signature, CoreError> {
        if self.is_signed() {
            return Err(CoreError::AlreadySigned(self.sequence()));
        }

        *self.signer_fields_mut().0 = Address::from_private_key(key);
        let digest = eip191_hash_message(self.hash());
        let (sig, recovery_id) = key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| CoreError::Signing(e.to_string()))?;

        let rs = sig.to_bytes();
        let signature = Signature::new(
            U256::from_be_slice(&rs[..32]),
            U256::from_be_slice(&rs[32..]),
            recovery_id.is_y_odd(),
        );
        *self.signer_fields_mut().1 = Bytes::copy_from_slice(&signature.as_bytes());
        Ok(signature)
    }

    /// Recover the signing address and compare it with `expected`, or with the
    /// embedded `signer` when no address is given. Malformed signatures verify
    /// as `false`.
    pub fn verify(&self, expected: Option<Address>) -> bool {
        let Ok(signature) = Signature::try_from(self.signature().as_ref()) else {
            return false;
        };
        match signature.recover_address_from_msg(self.hash()) {
            // Address equality is byte-wise, i.e. case-insensitive on the hex form
            Ok(recovered) => recovered == expected.unwrap_or_else(|| self.signer()),
            Err(_) => false,
        }
    }
}

impl Hashable for Transaction {
    fn hash_into(&self, writer: &mut HashWriter) {
        match self {
            Self::New(tx) => tx.hash_into(writer),
            Self::Cancel(tx) => tx.hash_into(writer),
        }
    }
}

impl From<NewTransaction> for Transaction {
    fn from(tx: NewTransaction) -> Self {
        Self::New(tx)
    }
}

impl From<CancelTransaction> for Transaction {
    fn from(tx: CancelTransaction) -> Self {
        Self::Cancel(tx)
    }
}

/// Parse a hex-encoded secp256k1 private key (with or without `0x`).
pub fn signing_key_from_hex(key: &str) -> Result<SigningKey, CoreError> {
    let bytes = hex::decode(key.trim().trim_start_matches("0x"))
        .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
    SigningKey::from_slice(&bytes).map_err(|e| CoreError::InvalidKey(e.to_string()))
}
