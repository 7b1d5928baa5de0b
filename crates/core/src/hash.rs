//! Keccak256 hashing primitives
//!
//! Every hashed structure is fed field by field into a [`HashWriter`], which
//! fixes the byte encoding of each field type:
//!
//! | field            | encoding                                  |
//! |------------------|-------------------------------------------|
//! | `u8`             | 1 raw byte                                |
//! | `u64`            | 8 bytes, little-endian                    |
//! | `U256`           | 32 bytes, little-endian                   |
//! | `Address`        | 20 raw bytes                              |
//! | `Hash`           | 32 raw bytes                              |
//! | string / bytes   | `u64` length, then the bytes              |
//! | list             | `u64` count, then each element's hash     |
//!
//! Variable-length fields always carry their length, so two different field
//! sequences can never produce the same byte stream.

use alloy_primitives::{Address, U256};
use tiny_keccak::{Hasher, Keccak};

use crate::types::Hash;

/// Incremental structural encoder over a Keccak256 state.
pub struct HashWriter {
    hasher: Keccak,
}

impl std::fmt::Debug for HashWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashWriter").finish_non_exhaustive()
    }
}

impl HashWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { hasher: Keccak::v256() }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.hasher.update(&[value]);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(&value.to_le_bytes());
        self
    }

    pub fn write_u256(&mut self, value: &U256) -> &mut Self {
        self.hasher.update(&value.to_le_bytes::<32>());
        self
    }

    pub fn write_address(&mut self, value: &Address) -> &mut Self {
        self.hasher.update(value.as_slice());
        self
    }

    pub fn write_hash(&mut self, value: &Hash) -> &mut Self {
        self.hasher.update(value.as_slice());
        self
    }

    /// Length-prefixed byte string
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.write_u64(value.len() as u64);
        self.hasher.update(value);
        self
    }

    /// Length-prefixed UTF-8 string
    pub fn write_str(&mut self, value: &str) -> &mut Self {
        self.write_bytes(value.as_bytes())
    }

    /// Element count followed by each element's hash
    pub fn write_list<T: Hashable>(&mut self, items: &[T]) -> &mut Self {
        self.write_u64(items.len() as u64);
        for item in items {
            self.write_hash(&item.hash());
        }
        self
    }

    /// Consume the writer and produce the digest
    pub fn finish(self) -> Hash {
        let mut output = [0u8; 32];
        self.hasher.finalize(&mut output);
        Hash::from(output)
    }
}

impl Default for HashWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// A value with a canonical structural hash.
pub trait Hashable {
    /// Feed every field, in declaration order, into `writer`.
    fn hash_into(&self, writer: &mut HashWriter);

    /// Canonical hash of the whole structure
    fn hash(&self) -> Hash {
        let mut writer = HashWriter::new();
        self.hash_into(&mut writer);
        writer.finish()
    }
}

impl Hashable for Hash {
    fn hash_into(&self, writer: &mut HashWriter) {
        writer.write_hash(self);
    }
}

/// Keccak256 of raw bytes
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    Hash::from(output)
}

/// Parent node of two Merkle children: `keccak256(left || right)`.
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut writer = HashWriter::new();
    writer.write_hash(left).write_hash(right);
    writer.finish()
}

/// Hash of an ordered list: count, then each element's hash.
pub fn hash_list<T: Hashable>(items: &[T]) -> Hash {
    let mut writer = HashWriter::new();
    writer.write_list(items);
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_pair() {
        let left = Hash::repeat_byte(1);
        let right = Hash::repeat_byte(2);
        let hash = hash_pair(&left, &right);
        assert_ne!(hash, Hash::ZERO);
        assert_ne!(hash, hash_pair(&right, &left));

        let mut concat = Vec::new();
        concat.extend_from_slice(left.as_slice());
        concat.extend_from_slice(right.as_slice());
        assert_eq!(hash, keccak256(&concat));
    }

    #[test]
    fn test_strings_are_length_prefixed() {
        let mut a = HashWriter::new();
        a.write_str("ab").write_str("c");
        let mut b = HashWriter::new();
        b.write_str("a").write_str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_list_hash_depends_on_length() {
        let one = [Hash::repeat_byte(7)];
        let two = [Hash::repeat_byte(7), Hash::repeat_byte(7)];
        assert_ne!(hash_list(&one), hash_list(&two));
        assert_ne!(hash_list::<Hash>(&[]), Hash::ZERO);
    }
}
