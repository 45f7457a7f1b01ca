//! Timestamp helpers shared by the snapshot model and the event store.
//!
//! The publisher writes times as `YYYY-MM-DDTHH:MM:SS±HHMM` (no colon in the
//! offset) and uses the empty string for "unknown". Everything is normalised
//! to UTC on the way in and written back as RFC 3339.

use chrono::{DateTime, SecondsFormat, Utc};

/// Microseconds since the Unix epoch, the storage unit for every time column.
#[must_use]
pub fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Inverse of [`to_micros`]; `None` when the value is out of chrono's range.
#[must_use]
pub fn from_micros(us: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
}

/// Parse a publisher timestamp. Returns `Ok(None)` for the empty string.
///
/// # Errors
///
/// Returns the chrono parse error when the value is neither the publisher's
/// offset form nor RFC 3339.
pub fn parse_zone_time(raw: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    match DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        Ok(parsed) => Ok(Some(parsed.with_timezone(&Utc))),
        Err(offset_err) => DateTime::parse_from_rfc3339(raw)
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(|_| offset_err),
    }
}

/// Canonical text form used in logs and JSON output.
#[must_use]
pub fn format_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Serde adapter for optional publisher timestamps (`""`/`null` ⇄ `None`).
pub mod zone_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Propagates the serializer's error.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(at) => serializer.serialize_str(&super::format_rfc3339(*at)),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    ///
    /// Fails when the value is a non-empty string that does not parse.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) => super::parse_zone_time(&raw)
                .map_err(|e| serde::de::Error::custom(format!("invalid time {raw:?}: {e}"))),
        }
    }
}
