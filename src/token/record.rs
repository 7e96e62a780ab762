//! The authentication record carried inside a carrier image.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
pub const TOKEN_BYTES: usize = 32;

/// Hex length of a well-formed token.
pub const TOKEN_HEX_LEN: usize = TOKEN_BYTES * 2;

/// Placeholder for any signal the context provider could not determine.
pub const UNKNOWN: &str = "Unknown";

/// Placeholder for city and country of loopback clients.
pub const LOCAL: &str = "Local";

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("record token is not 64 lowercase hex characters")]
    InvalidToken,
    #[error("record timestamp `{0}` is not a recognized ISO-8601 instant")]
    InvalidTimestamp(String),
}

/// A signed-by-registry login record.
///
/// Field order is the canonical serialization order. Key names are the ones
/// used by records already in circulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    #[serde(rename = "ip")]
    pub client_address: String,
    pub city: String,
    pub country: String,
    #[serde(rename = "os")]
    pub os_name: String,
    #[serde(rename = "browser")]
    pub browser_name: String,
    #[serde(rename = "timestamp", with = "timestamp")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "user_hash")]
    pub token: String,
}

impl AuthRecord {
    /// Name of the first empty field, if any.
    pub fn first_empty_field(&self) -> Option<&'static str> {
        [
            ("token", &self.token),
            ("client_address", &self.client_address),
            ("city", &self.city),
            ("country", &self.country),
            ("os_name", &self.os_name),
            ("browser_name", &self.browser_name),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }

    /// Canonical UTF-8 JSON encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a record. Inverse of [`AuthRecord::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let record: Self = serde_json::from_slice(bytes)?;
        if let Some(field) = record.first_empty_field() {
            return Err(RecordError::EmptyField(field));
        }
        if !is_well_formed_token(&record.token) {
            return Err(RecordError::InvalidToken);
        }
        Ok(record)
    }
}

/// 64 lowercase hex characters.
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_HEX_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Drop sub-second precision.
pub fn truncate_to_seconds(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(instant.timestamp(), 0)
        .single()
        .unwrap_or(instant)
}

/// Parse an issuance timestamp: RFC 3339, or a naive ISO-8601 instant read as
/// UTC. Fractional seconds are discarded.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RecordError> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(truncate_to_seconds(with_offset.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| truncate_to_seconds(naive.and_utc()))
        .map_err(|_| RecordError::InvalidTimestamp(raw.to_string()))
}

mod timestamp {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(de::Error::custom)
    }
}
