//! Common types

use serde::{Deserialize, Deserializer, Serializer};

pub use alloy_primitives::{Address, Bytes, U256};

/// 32-byte hash type
pub type Hash = alloy_primitives::B256;

/// Genesis previous-hash (all zero bytes)
pub const NULL_HASH: Hash = Hash::ZERO;

/// Block height type
pub type BlockHeight = u64;

/// Global transaction sequence number
pub type Sequence = u64;

/// Decimal places of fixed-point purchase amounts
pub const AMOUNT_DECIMALS: u32 = 18;

/// Current unix time in seconds
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Serde adapter writing `U256` amounts as decimal strings.
pub mod decimal {
    use super::*;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.trim().parse::<U256>().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter writing `u64` as a decimal string (JSON numbers lose precision above 2^53).
pub mod u64_string {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Str(String),
        Num(u64),
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
            Repr::Num(n) => Ok(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, Deserialize, Debug, PartialEq, Eq)]
    struct Amounts {
        #[serde(with = "decimal")]
        amount: U256,
        #[serde(with = "u64_string")]
        height: u64,
    }

    #[test]
    fn test_amounts_as_decimal_strings() {
        let value = Amounts {
            amount: U256::from(10u64).pow(U256::from(AMOUNT_DECIMALS)),
            height: u64::MAX,
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(
            json,
            format!(r#"{{"amount":"1000000000000000000","height":"{}"}}"#, u64::MAX)
        );
        assert_eq!(serde_json::from_str::<Amounts>(&json).unwrap(), value);

        let numeric: Amounts = serde_json::from_str(r#"{"amount":"5","height":7}"#).unwrap();
        assert_eq!(numeric.height, 7);
    }
}
