//! Encoding helpers between domain types and SQLite column text.
//!
//! Entities are stored as full JSON payloads next to a few searchable
//! columns. Timestamps are RFC 3339 strings; hashes are lowercase hex.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};

/// RFC 3339 encode.
#[must_use]
pub fn encode_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// RFC 3339 decode.
pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::DateParse(e.to_string()))
}

/// JSON-encode any serializable entity payload.
pub fn encode_payload<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// JSON-decode an entity payload.
pub fn decode_payload<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    Ok(serde_json::from_str(s)?)
}

/// Hex-encode a chain hash.
#[must_use]
pub fn encode_hash(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dt_roundtrip() {
        let now = Utc::now();
        let decoded = decode_dt(&encode_dt(now)).unwrap();
        assert_eq!(decoded.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn bad_dt_is_typed_error() {
        assert!(matches!(decode_dt("not a date"), Err(Error::DateParse(_))));
    }

    #[test]
    fn payload_roundtrip() {
        let fact = kip_test_utils::FactBuilder::new("net", "fw", "ASA").build();
        let decoded: kip_core::Fact = decode_payload(&encode_payload(&fact).unwrap()).unwrap();
        assert_eq!(decoded, fact);
    }
}
