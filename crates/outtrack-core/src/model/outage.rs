//! Raw outage records as published in one snapshot file.
//!
//! A snapshot is a JSON array of outage objects. Field names follow the
//! publisher (`desc`, `geom`, `cust_a`, `n_out`, ...). Missing fields decode to
//! their defaults; unknown fields are ignored so new publisher fields never
//! break ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::time::zone_time;

/// Affected-customer count, possibly masked by the publisher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomersAffected {
    pub masked: bool,
    pub val: i64,
}

/// Descriptive part of an outage report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutageDesc {
    pub cause: String,
    /// True when this report groups several nearby outages.
    pub cluster: bool,
    pub cust_a: CustomersAffected,
    pub n_out: i64,
    /// Sub-reports of a cluster.
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_empty")]
    pub outages: Vec<OutageDesc>,
    /// Estimated time of restoration.
    #[serde(with = "zone_time")]
    pub etr: Option<DateTime<Utc>>,
    #[serde(with = "zone_time")]
    pub start: Option<DateTime<Utc>>,
}

/// Geometric descriptor plus the fields enrichment derives from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutageGeom {
    /// Encoded area outlines (polyline encoding).
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_empty")]
    pub a: Vec<String>,
    /// Encoded positions (polyline encoding).
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_empty")]
    pub p: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighborhood: Option<String>,
}

impl OutageGeom {
    /// First encoded position, the most granular location the publisher gives.
    #[must_use]
    pub fn encoded_position(&self) -> Option<&str> {
        self.p.first().map(String::as_str).filter(|p| !p.is_empty())
    }

    /// First encoded area outline.
    #[must_use]
    pub fn encoded_area(&self) -> Option<&str> {
        self.a.first().map(String::as_str).filter(|a| !a.is_empty())
    }
}

/// One element of a published snapshot.
///
/// `id` is whatever the publisher calls the outage. It is reused for
/// unrelated outages over time and must never be used to match records
/// across snapshots; see [`super::identity::IdentityKey`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawOutage {
    pub id: String,
    pub title: String,
    pub desc: OutageDesc,
    pub geom: OutageGeom,
}

/// The publisher writes absent lists as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode a snapshot file into its outage records.
///
/// # Errors
///
/// Returns the JSON error when the bytes are not an array of outage objects.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<RawOutage>, serde_json::Error> {
    serde_json::from_slice(bytes)
}
