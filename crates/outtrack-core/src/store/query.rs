//! Read-only queries over the event store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use super::sqlite::{stored_kind, stored_outage, stored_time};
use super::{SqlContext, StoreError};
use crate::model::{EventKind, OutageId, RawOutage};

/// A row of the `outages` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutageRecord {
    pub outage_id: OutageId,
    pub identity_key: String,
    pub source_id: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub county: Option<String>,
    pub neighborhood: Option<String>,
    pub area_polyline: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A row of the `outage_events` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub outage_id: OutageId,
    pub observed_at: DateTime<Utc>,
    pub kind: EventKind,
    pub source_id: String,
    pub cause: String,
    pub customers_affected: i64,
    pub customers_masked: bool,
    pub start: Option<DateTime<Utc>>,
    pub etr: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub snapshot_json: String,
}

impl StoredEvent {
    /// Decode the full record stored alongside this event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the stored JSON is malformed.
    pub fn outage(&self) -> Result<RawOutage, StoreError> {
        stored_outage(self.outage_id.0, &self.snapshot_json)
    }
}

/// Aggregate counters for `outtrack status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub outages: u64,
    pub active: u64,
    pub resolved: u64,
    pub events: u64,
    pub events_by_kind: BTreeMap<String, u64>,
    pub first_observed: Option<DateTime<Utc>>,
    pub checkpoint: Option<DateTime<Utc>>,
}

/// Fetch one outage row.
///
/// # Errors
///
/// Returns an error if the query fails or the row cannot be decoded.
pub fn get_outage(conn: &Connection, id: OutageId) -> Result<Option<OutageRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT outage_id, identity_key, source_id, longitude, latitude,
                    county, neighborhood, area_polyline, created_at_us
             FROM outages
             WHERE outage_id = ?1",
            params![id.0],
            |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, i64>(8)?,
                ))
            },
        )
        .optional()
        .sql_context("query outage")?;

    let Some((identity_key, source_id, longitude, latitude, county, neighborhood, area, created)) =
        row
    else {
        return Ok(None);
    };

    Ok(Some(OutageRecord {
        outage_id: id,
        identity_key,
        source_id,
        longitude,
        latitude,
        county,
        neighborhood,
        area_polyline: area,
        created_at: stored_time(id.0, created)?,
    }))
}

/// Every event of one outage, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails or a row cannot be decoded.
pub fn events_for(conn: &Connection, id: OutageId) -> Result<Vec<StoredEvent>, StoreError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT observed_at_us, event_kind, source_id, cause, cust_aff, cust_masked,
                    start_us, etr_us, snapshot_json
             FROM outage_events
             WHERE outage_id = ?1
             ORDER BY observed_at_us ASC",
        )
        .sql_context("prepare outage events")?;

    let rows = stmt
        .query_map(params![id.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })
        .sql_context("query outage events")?;

    let mut events = Vec::new();
    for row in rows {
        let (observed, kind, source_id, cause, cust, masked, start, etr, snapshot_json) =
            row.sql_context("read outage event row")?;
        events.push(StoredEvent {
            outage_id: id,
            observed_at: stored_time(id.0, observed)?,
            kind: stored_kind(id.0, &kind)?,
            source_id,
            cause,
            customers_affected: cust,
            customers_masked: masked,
            start: start.map(|us| stored_time(id.0, us)).transpose()?,
            etr: etr.map(|us| stored_time(id.0, us)).transpose()?,
            snapshot_json,
        });
    }
    Ok(events)
}

/// Every outage ID in ascending order.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn outage_ids(conn: &Connection) -> Result<Vec<OutageId>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT outage_id FROM outages ORDER BY outage_id")
        .sql_context("prepare outage ids")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0).map(OutageId))
        .sql_context("query outage ids")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql_context("read outage ids")?;
    Ok(ids)
}

/// Counters over the whole store. Active and resolved counts come from the
/// event log, not the summary cache.
///
/// # Errors
///
/// Returns an error if any query fails.
pub fn store_stats(conn: &Connection) -> Result<StoreStats, StoreError> {
    let count = |sql: &str| -> Result<u64, StoreError> {
        let n: i64 = conn
            .query_row(sql, [], |row| row.get(0))
            .sql_context("count store rows")?;
        Ok(u64::try_from(n).unwrap_or_default())
    };

    let outages = count("SELECT COUNT(*) FROM outages")?;
    let resolved = count(
        "SELECT COUNT(*)
         FROM outage_events e
         WHERE e.event_kind = 'Missing'",
    )?;

    let mut events_by_kind = BTreeMap::new();
    let mut stmt = conn
        .prepare("SELECT event_kind, COUNT(*) FROM outage_events GROUP BY event_kind")
        .sql_context("prepare event counts")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .sql_context("query event counts")?;
    for row in rows {
        let (kind, n) = row.sql_context("read event count")?;
        events_by_kind.insert(kind, u64::try_from(n).unwrap_or_default());
    }
    let events = events_by_kind.values().sum();

    let (first, last): (Option<i64>, Option<i64>) = conn
        .query_row(
            "SELECT MIN(observed_at_us), MAX(observed_at_us) FROM outage_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .sql_context("query observation range")?;

    Ok(StoreStats {
        outages,
        active: outages.saturating_sub(resolved),
        resolved,
        events,
        events_by_kind,
        first_observed: first.map(|us| stored_time(0, us)).transpose()?,
        checkpoint: last.map(|us| stored_time(0, us)).transpose()?,
    })
}
