//! Text encoding for arbitrary-precision integers inside stored payloads.
//!
//! Operation payloads are kept as plain JSON text. JSON numbers lose precision
//! past 2^53 in most consumers, so every big integer is written as a string
//! tagged with [`BIGINT_PREFIX`] followed by its decimal digits.
//!
//! Use with serde as `#[serde(with = "relay_core::bigint")]`, or
//! `#[serde(with = "relay_core::bigint::option")]` for optional fields.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

pub const BIGINT_PREFIX: &str = "__bigint__";

pub fn encode<T: Display>(value: &T) -> String {
    format!("{BIGINT_PREFIX}{value}")
}

/// Returns `None` if the prefix is missing or the digits do not parse.
pub fn decode<T: FromStr>(text: &str) -> Option<T> {
    let digits = text.strip_prefix(BIGINT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Display,
    S: Serializer,
{
    serializer.serialize_str(&encode(value))
}

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: FromStr,
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    decode(&text).ok_or_else(|| D::Error::custom(format!("invalid encoded integer: {text}")))
}

pub mod option {
    use super::*;

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(&encode(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => decode(&text).map(Some).ok_or_else(|| {
                D::Error::custom(format!("invalid encoded integer: {text}"))
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    #[test]
    fn round_trips_small_and_large_values() {
        let beyond_f64 = U256::from(1u64 << 53) + U256::from(1u64);
        for value in [U256::ZERO, U256::from(1u64), beyond_f64, U256::MAX] {
            let text = encode(&value);
            assert!(text.starts_with(BIGINT_PREFIX));
            assert_eq!(decode::<U256>(&text), Some(value));
        }
        assert_eq!(encode(&beyond_f64), "__bigint__9007199254740993");
    }

    #[test]
    fn rejects_untagged_or_garbled_text() {
        assert_eq!(decode::<U256>("12345"), None);
        assert_eq!(decode::<U256>("__bigint__"), None);
        assert_eq!(decode::<U256>("__bigint__0x10"), None);
        assert_eq!(decode::<u128>("__bigint__-5"), None);
    }
}
