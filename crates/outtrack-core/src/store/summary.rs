//! Per-outage summaries: a cache derived entirely from the event log.
//!
//! The cache is refreshed inside the same transaction as every event write,
//! can be rebuilt from scratch, and can be checked against a replay of the
//! events in Rust.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;

use super::query::{self, OutageRecord, StoredEvent};
use super::sqlite::stored_time;
use super::{SqlContext, StoreError};
use crate::model::time::to_micros;
use crate::model::{EventKind, OutageId};

/// Aggregates of one outage's events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutageSummary {
    pub outage_id: OutageId,
    /// True iff the latest event is `Missing`.
    pub resolved: bool,
    pub first_observed: DateTime<Utc>,
    pub last_observed: DateTime<Utc>,
    pub observations: i64,
    pub min_customers_affected: i64,
    pub max_customers_affected: i64,
    pub min_start: Option<DateTime<Utc>>,
    pub max_etr: Option<DateTime<Utc>>,
    /// Cause carried by the latest event.
    pub last_cause: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub county: Option<String>,
    pub neighborhood: Option<String>,
}

impl OutageSummary {
    /// Recompute the summary from an outage row and its events.
    ///
    /// Returns `None` when there are no events.
    #[must_use]
    pub fn replay(outage: &OutageRecord, events: &[StoredEvent]) -> Option<Self> {
        let latest = events.iter().max_by_key(|e| e.observed_at)?;
        let first_observed = events.iter().map(|e| e.observed_at).min()?;
        let min_customers_affected = events.iter().map(|e| e.customers_affected).min()?;
        let max_customers_affected = events.iter().map(|e| e.customers_affected).max()?;

        Some(Self {
            outage_id: outage.outage_id,
            resolved: latest.kind == EventKind::Missing,
            first_observed,
            last_observed: latest.observed_at,
            observations: i64::try_from(events.len()).unwrap_or(i64::MAX),
            min_customers_affected,
            max_customers_affected,
            min_start: events.iter().filter_map(|e| e.start).min(),
            max_etr: events.iter().filter_map(|e| e.etr).max(),
            last_cause: latest.cause.clone(),
            longitude: outage.longitude,
            latitude: outage.latitude,
            county: outage.county.clone(),
            neighborhood: outage.neighborhood.clone(),
        })
    }
}

/// Recompute the stored summary of one outage from its events.
///
/// # Errors
///
/// Returns an error if the statement fails.
pub fn refresh(conn: &Connection, id: OutageId) -> Result<(), StoreError> {
    conn.prepare_cached(
        "INSERT OR REPLACE INTO outage_summaries (
            outage_id,
            resolved,
            first_observed_us,
            last_observed_us,
            observations,
            min_cust_aff,
            max_cust_aff,
            min_start_us,
            max_etr_us,
            last_cause,
            longitude,
            latitude,
            county,
            neighborhood
        )
        SELECT
            o.outage_id,
            (SELECT latest.event_kind = 'Missing'
             FROM outage_events latest
             WHERE latest.outage_id = o.outage_id
             ORDER BY latest.observed_at_us DESC
             LIMIT 1),
            MIN(e.observed_at_us),
            MAX(e.observed_at_us),
            COUNT(*),
            MIN(e.cust_aff),
            MAX(e.cust_aff),
            MIN(e.start_us),
            MAX(e.etr_us),
            (SELECT latest.cause
             FROM outage_events latest
             WHERE latest.outage_id = o.outage_id
             ORDER BY latest.observed_at_us DESC
             LIMIT 1),
            o.longitude,
            o.latitude,
            o.county,
            o.neighborhood
        FROM outages o
        JOIN outage_events e ON e.outage_id = o.outage_id
        WHERE o.outage_id = ?1
        GROUP BY o.outage_id",
    )
    .and_then(|mut stmt| stmt.execute(params![id.0]))
    .sql_context("refresh outage summary")?;
    Ok(())
}

/// Read the cached summary of one outage.
///
/// # Errors
///
/// Returns an error if the query fails or a stored time is out of range.
pub fn load(conn: &Connection, id: OutageId) -> Result<Option<OutageSummary>, StoreError> {
    let row = conn
        .query_row(
            "SELECT resolved, first_observed_us, last_observed_us, observations,
                    min_cust_aff, max_cust_aff, min_start_us, max_etr_us, last_cause,
                    longitude, latitude, county, neighborhood
             FROM outage_summaries
             WHERE outage_id = ?1",
            params![id.0],
            |row| {
                Ok(SummaryRow {
                    resolved: row.get(0)?,
                    first_observed_us: row.get(1)?,
                    last_observed_us: row.get(2)?,
                    observations: row.get(3)?,
                    min_cust_aff: row.get(4)?,
                    max_cust_aff: row.get(5)?,
                    min_start_us: row.get(6)?,
                    max_etr_us: row.get(7)?,
                    last_cause: row.get(8)?,
                    longitude: row.get(9)?,
                    latitude: row.get(10)?,
                    county: row.get(11)?,
                    neighborhood: row.get(12)?,
                })
            },
        )
        .optional()
        .sql_context("query outage summary")?;

    row.map(|row| row.into_summary(id)).transpose()
}

/// Unresolved outages by most recent observation, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn active(conn: &Connection, limit: usize) -> Result<Vec<OutageSummary>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT outage_id
             FROM outage_summaries
             WHERE resolved = 0
             ORDER BY last_observed_us DESC, outage_id ASC
             LIMIT ?1",
        )
        .sql_context("prepare active summaries")?;
    let ids = stmt
        .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
            row.get::<_, i64>(0).map(OutageId)
        })
        .sql_context("query active summaries")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql_context("read active summaries")?;

    let mut summaries = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(summary) = load(conn, id)? {
            summaries.push(summary);
        }
    }
    Ok(summaries)
}

struct SummaryRow {
    resolved: bool,
    first_observed_us: i64,
    last_observed_us: i64,
    observations: i64,
    min_cust_aff: i64,
    max_cust_aff: i64,
    min_start_us: Option<i64>,
    max_etr_us: Option<i64>,
    last_cause: String,
    longitude: Option<f64>,
    latitude: Option<f64>,
    county: Option<String>,
    neighborhood: Option<String>,
}

impl SummaryRow {
    fn into_summary(self, id: OutageId) -> Result<OutageSummary, StoreError> {
        Ok(OutageSummary {
            outage_id: id,
            resolved: self.resolved,
            first_observed: stored_time(id.0, self.first_observed_us)?,
            last_observed: stored_time(id.0, self.last_observed_us)?,
            observations: self.observations,
            min_customers_affected: self.min_cust_aff,
            max_customers_affected: self.max_cust_aff,
            min_start: self.min_start_us.map(|us| stored_time(id.0, us)).transpose()?,
            max_etr: self.max_etr_us.map(|us| stored_time(id.0, us)).transpose()?,
            last_cause: self.last_cause,
            longitude: self.longitude,
            latitude: self.latitude,
            county: self.county,
            neighborhood: self.neighborhood,
        })
    }
}

// ---------------------------------------------------------------------------
// Rebuild and verify
// ---------------------------------------------------------------------------

/// Result of [`rebuild_summaries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Outages whose summary was recomputed.
    pub outage_count: usize,
    pub elapsed: Duration,
}

/// Drop every cached summary and recompute them from the event log in one
/// transaction.
///
/// # Errors
///
/// Returns an error if any statement fails; the old cache is then kept.
pub fn rebuild_summaries(conn: &mut Connection) -> Result<RebuildReport, StoreError> {
    let start = Instant::now();
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .sql_context("begin summary rebuild")?;

    tx.execute("DELETE FROM outage_summaries", [])
        .sql_context("clear outage summaries")?;
    let ids = query::outage_ids(&tx)?;
    for id in &ids {
        refresh(&tx, *id)?;
    }
    tx.execute(
        "UPDATE store_meta SET last_summary_rebuild_us = ?1 WHERE id = 1",
        params![to_micros(Utc::now())],
    )
    .sql_context("record summary rebuild")?;
    tx.commit().sql_context("commit summary rebuild")?;

    let report = RebuildReport {
        outage_count: ids.len(),
        elapsed: start.elapsed(),
    };
    tracing::info!(
        outages = report.outage_count,
        elapsed_ms = report.elapsed.as_millis(),
        "rebuilt outage summaries"
    );
    Ok(report)
}

/// A cached summary that disagrees with a replay of its events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMismatch {
    pub outage_id: OutageId,
    pub stored: Option<OutageSummary>,
    pub replayed: Option<OutageSummary>,
}

/// Compare every cached summary with a replay of its outage's events.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn verify_summaries(conn: &Connection) -> Result<Vec<SummaryMismatch>, StoreError> {
    let mut mismatches = Vec::new();
    for id in query::outage_ids(conn)? {
        let Some(outage) = query::get_outage(conn, id)? else {
            continue;
        };
        let events = query::events_for(conn, id)?;
        let replayed = OutageSummary::replay(&outage, &events);
        let stored = load(conn, id)?;
        if stored != replayed {
            tracing::warn!(outage_id = %id, "summary differs from event replay");
            mismatches.push(SummaryMismatch {
                outage_id: id,
                stored,
                replayed,
            });
        }
    }
    Ok(mismatches)
}
