//! `rusqlite` implementation of [`OutageStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};

use super::{KnownOutage, Observation, OutageStore, SqlContext, StoreError, open_store, summary};
use crate::model::time::{from_micros, to_micros};
use crate::model::{EventKind, IdentityKey, LifecycleEvent, OutageId, RawOutage, TrackedOutage};

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Event store backed by one SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        open_store(path).map(Self::from_connection)
    }

    /// Wrap a connection that already has the schema applied.
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    pub const fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    #[must_use]
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

impl OutageStore for SqliteStore {
    type Observation<'a> = SqliteObservation<'a>;

    fn load_known(&self) -> Result<Vec<KnownOutage>, StoreError> {
        load_known(&self.conn)
    }

    fn checkpoint(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        checkpoint(&self.conn)
    }

    fn begin_observation(&mut self) -> Result<SqliteObservation<'_>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .sql_context("begin observation transaction")?;
        Ok(SqliteObservation { tx, emitted: 0 })
    }
}

/// One `BEGIN IMMEDIATE` transaction. Rolls back on drop unless committed.
#[derive(Debug)]
pub struct SqliteObservation<'conn> {
    tx: Transaction<'conn>,
    emitted: usize,
}

impl Observation for SqliteObservation<'_> {
    fn emit(&mut self, tracked: &TrackedOutage) -> Result<OutageId, StoreError> {
        let id = emit_tracked(&self.tx, tracked)?;
        self.emitted += 1;
        Ok(id)
    }

    fn commit(self) -> Result<(), StoreError> {
        let emitted = self.emitted;
        self.tx.commit().sql_context("commit observation")?;
        tracing::trace!(emitted, "observation committed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Persist the latest event of `tracked` on `conn`, creating the outage row
/// first if it has no ID, and refresh its summary.
///
/// Runs on whatever transaction `conn` is in.
///
/// # Errors
///
/// Returns an error if `tracked` has no events, a new outage has no identity
/// key, the snapshot cannot be encoded, or SQLite rejects a write (for
/// example a second event at the same instant).
pub fn emit_tracked(conn: &Connection, tracked: &TrackedOutage) -> Result<OutageId, StoreError> {
    let outage = &tracked.outage;
    let event = tracked.latest_event().ok_or_else(|| StoreError::NoEvents {
        outage: outage.id.clone(),
    })?;
    let observed_at_us = to_micros(event.observed_at);

    let id = match tracked.id {
        Some(id) => id,
        None => insert_outage(conn, tracked, observed_at_us)?,
    };

    let snapshot_json = serde_json::to_string(outage).map_err(|source| StoreError::Encode {
        outage: outage.id.clone(),
        source,
    })?;

    conn.prepare_cached(
        "INSERT INTO outage_events (
            outage_id,
            observed_at_us,
            event_kind,
            source_id,
            cause,
            cust_aff,
            cust_masked,
            start_us,
            etr_us,
            snapshot_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .and_then(|mut stmt| {
        stmt.execute(params![
            id.0,
            observed_at_us,
            event.kind.as_str(),
            outage.id,
            outage.desc.cause,
            outage.desc.cust_a.val,
            outage.desc.cust_a.masked,
            outage.desc.start.map(to_micros),
            outage.desc.etr.map(to_micros),
            snapshot_json,
        ])
    })
    .sql_context("append outage event")?;

    summary::refresh(conn, id)?;
    Ok(id)
}

fn insert_outage(
    conn: &Connection,
    tracked: &TrackedOutage,
    created_at_us: i64,
) -> Result<OutageId, StoreError> {
    let outage = &tracked.outage;
    let key = tracked.identity_key().ok_or_else(|| StoreError::NoIdentity {
        outage: outage.id.clone(),
    })?;
    let geom = &outage.geom;

    conn.prepare_cached(
        "INSERT INTO outages (
            identity_key,
            source_id,
            longitude,
            latitude,
            county,
            neighborhood,
            area_polyline,
            created_at_us
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .and_then(|mut stmt| {
        stmt.execute(params![
            key.to_string(),
            outage.id,
            geom.lon,
            geom.lat,
            geom.county,
            geom.neighborhood,
            geom.encoded_area(),
            created_at_us,
        ])
    })
    .sql_context("insert outage")?;

    Ok(OutageId(conn.last_insert_rowid()))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Outages whose latest event is not `Missing`, each carrying its stored
/// identity key, that event and the record it was stored with.
///
/// # Errors
///
/// Returns an error if the query fails or a row cannot be decoded.
pub fn load_known(conn: &Connection) -> Result<Vec<KnownOutage>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT e.outage_id, o.identity_key, e.observed_at_us, e.event_kind, e.snapshot_json
             FROM outage_events e
             JOIN outages o ON o.outage_id = e.outage_id
             WHERE e.observed_at_us = (
                 SELECT MAX(latest.observed_at_us)
                 FROM outage_events latest
                 WHERE latest.outage_id = e.outage_id
             )
             AND e.event_kind <> 'Missing'
             ORDER BY e.outage_id",
        )
        .sql_context("prepare load known outages")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .sql_context("query known outages")?;

    let mut known = Vec::new();
    for row in rows {
        let (outage_id, key, observed_at_us, kind, snapshot_json) =
            row.sql_context("read known outage row")?;
        let event = LifecycleEvent {
            observed_at: stored_time(outage_id, observed_at_us)?,
            kind: stored_kind(outage_id, &kind)?,
        };
        let id = OutageId(outage_id);
        known.push(KnownOutage {
            key: stored_key(outage_id, &key)?,
            tracked: TrackedOutage {
                id: Some(id),
                events: vec![event],
                outage: stored_outage(outage_id, &snapshot_json)?,
            },
        });
    }
    Ok(known)
}

/// Time of the most recent event in the store.
///
/// # Errors
///
/// Returns an error if the query fails or the stored value is out of range.
pub fn checkpoint(conn: &Connection) -> Result<Option<DateTime<Utc>>, StoreError> {
    let latest: Option<i64> = conn
        .query_row("SELECT MAX(observed_at_us) FROM outage_events", [], |row| {
            row.get(0)
        })
        .sql_context("query checkpoint")?;
    latest.map(|us| stored_time(0, us)).transpose()
}

pub(crate) fn stored_time(outage_id: i64, us: i64) -> Result<DateTime<Utc>, StoreError> {
    from_micros(us).ok_or_else(|| StoreError::Corrupt {
        outage_id,
        detail: format!("timestamp {us}us out of range"),
    })
}

pub(crate) fn stored_kind(outage_id: i64, raw: &str) -> Result<EventKind, StoreError> {
    raw.parse().map_err(|e| StoreError::Corrupt {
        outage_id,
        detail: format!("{e}"),
    })
}

pub(crate) fn stored_key(outage_id: i64, raw: &str) -> Result<IdentityKey, StoreError> {
    raw.parse().map_err(|e| StoreError::Corrupt {
        outage_id,
        detail: format!("{e}"),
    })
}

pub(crate) fn stored_outage(outage_id: i64, json: &str) -> Result<RawOutage, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
        outage_id,
        detail: format!("snapshot_json: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CustomersAffected, OutageDesc, OutageGeom};
    use chrono::TimeZone;

    fn store() -> SqliteStore {
        let mut conn = Connection::open_in_memory().expect("open");
        conn.pragma_update(None, "foreign_keys", "ON").expect("fk");
        crate::store::migrations::migrate(&mut conn).expect("migrate");
        SqliteStore::from_connection(conn)
    }

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 18, 19, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn raw(id: &str, p: &str, cust: i64) -> RawOutage {
        RawOutage {
            id: id.into(),
            title: "Outage".into(),
            desc: OutageDesc {
                cause: "Tree contact".into(),
                cust_a: CustomersAffected {
                    masked: false,
                    val: cust,
                },
                ..OutageDesc::default()
            },
            geom: OutageGeom {
                p: vec![p.into()],
                ..OutageGeom::default()
            },
        }
    }

    fn emit_in_observation(store: &mut SqliteStore, tracked: &TrackedOutage) -> OutageId {
        let mut obs = store.begin_observation().expect("begin");
        let id = obs.emit(tracked).expect("emit");
        obs.commit().expect("commit");
        id
    }

    #[test]
    fn emit_assigns_increasing_ids_and_persists_latest_event() {
        let mut store = store();
        let a = TrackedOutage::first_seen(t(0), raw("1", "aaa", 10));
        let b = TrackedOutage::first_seen(t(0), raw("2", "bbb", 20));
        let id_a = emit_in_observation(&mut store, &a);
        let id_b = emit_in_observation(&mut store, &b);
        assert!(id_b > id_a);

        let known = store.load_known().expect("load");
        assert_eq!(known.len(), 2);
        assert_eq!(known[0].key, IdentityKey::Position("aaa".into()));
        let loaded = &known[0].tracked;
        assert_eq!(loaded.id, Some(id_a));
        assert_eq!(loaded.outage, a.outage);
        assert_eq!(loaded.events, a.events);
        assert_eq!(store.checkpoint().expect("checkpoint"), Some(t(0)));
    }

    #[test]
    fn resolved_outages_are_not_loaded() {
        let mut store = store();
        let mut tracked = TrackedOutage::first_seen(t(0), raw("1", "aaa", 10));
        let id = emit_in_observation(&mut store, &tracked);
        tracked.id = Some(id);
        tracked.record(EventKind::Missing, t(5));
        emit_in_observation(&mut store, &tracked);

        assert!(store.load_known().expect("load").is_empty());
        assert_eq!(store.checkpoint().expect("checkpoint"), Some(t(5)));
    }

    #[test]
    fn dropped_observation_rolls_back() {
        let mut store = store();
        {
            let mut obs = store.begin_observation().expect("begin");
            obs.emit(&TrackedOutage::first_seen(t(0), raw("1", "aaa", 10)))
                .expect("emit");
        }
        assert!(store.load_known().expect("load").is_empty());
        assert_eq!(store.checkpoint().expect("checkpoint"), None);
    }

    #[test]
    fn second_event_at_same_instant_is_rejected() {
        let mut store = store();
        let mut tracked = TrackedOutage::first_seen(t(0), raw("1", "aaa", 10));
        let id = emit_in_observation(&mut store, &tracked);
        tracked.id = Some(id);
        tracked.record(EventKind::Update, t(0));

        let mut obs = store.begin_observation().expect("begin");
        assert!(matches!(
            obs.emit(&tracked),
            Err(StoreError::Sqlite { .. })
        ));
    }

    #[test]
    fn outage_without_geometry_cannot_be_created() {
        let mut store = store();
        let tracked = TrackedOutage::first_seen(t(0), RawOutage::default());
        let mut obs = store.begin_observation().expect("begin");
        assert!(matches!(
            obs.emit(&tracked),
            Err(StoreError::NoIdentity { .. })
        ));
    }

    #[test]
    fn corrupt_snapshot_json_is_reported() {
        let mut store = store();
        let id = emit_in_observation(
            &mut store,
            &TrackedOutage::first_seen(t(0), raw("1", "aaa", 10)),
        );
        store
            .connection()
            .execute(
                "UPDATE outage_events SET snapshot_json = 'nope' WHERE outage_id = ?1",
                [id.0],
            )
            .expect("corrupt");
        assert!(matches!(
            store.load_known(),
            Err(StoreError::Corrupt { outage_id, .. }) if outage_id == id.0
        ));
    }

    #[test]
    fn known_outages_keep_their_stored_key() {
        let mut store = store();
        let mut outage = raw("1", "", 10);
        outage.geom = OutageGeom {
            lon: Some(-116.833_615_548_096_13),
            lat: Some(44.5),
            ..OutageGeom::default()
        };
        let tracked = TrackedOutage::first_seen(t(0), outage);
        let created = tracked.identity_key().expect("key");
        emit_in_observation(&mut store, &tracked);

        // A rewritten record must not move the outage to another key.
        store
            .connection()
            .execute(
                "UPDATE outage_events SET snapshot_json =
                     json_set(snapshot_json, '$.geom.lon', 0.0)",
                [],
            )
            .expect("rewrite");

        let known = store.load_known().expect("load");
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].key, created);
    }

    #[test]
    fn malformed_stored_key_is_reported() {
        let mut store = store();
        let id = emit_in_observation(
            &mut store,
            &TrackedOutage::first_seen(t(0), raw("1", "aaa", 10)),
        );
        store
            .connection()
            .execute(
                "UPDATE outages SET identity_key = 'zz:nope' WHERE outage_id = ?1",
                [id.0],
            )
            .expect("corrupt");
        assert!(matches!(
            store.load_known(),
            Err(StoreError::Corrupt { outage_id, .. }) if outage_id == id.0
        ));
    }
}
