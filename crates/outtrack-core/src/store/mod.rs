//! SQLite event store for outage lifecycles.
//!
//! Connections are opened with:
//! - `journal_mode = WAL` so status queries can read while ingestion writes
//! - `busy_timeout = 5s` to ride out short lock contention
//! - `foreign_keys = ON` so events and summaries cannot outlive their outage
//!
//! All writes for one observation go through an [`Observation`]: either every
//! event of the observation is committed, or none is.

pub mod migrations;
pub mod query;
pub mod schema;
pub mod sqlite;
pub mod summary;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};

use crate::model::{IdentityKey, OutageId, TrackedOutage};

pub use sqlite::{SqliteObservation, SqliteStore};
pub use summary::{OutageSummary, SummaryMismatch};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reading or writing the event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("create store directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Sqlite {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("encode snapshot for outage {outage}: {source}")]
    Encode {
        outage: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored row cannot be turned back into domain values.
    #[error("corrupt row for outage {outage_id}: {detail}")]
    Corrupt { outage_id: i64, detail: String },

    /// The caller tried to persist an outage with no events.
    #[error("outage {outage} has no events to persist")]
    NoEvents { outage: String },

    /// The caller tried to persist an outage without a usable identity.
    #[error("outage {outage} has no identity key")]
    NoIdentity { outage: String },

    /// A read-only open found a schema that only a writer could migrate.
    #[error("store schema is version {found}, expected {expected}; run `outtrack ingest` to migrate")]
    SchemaVersion { found: u32, expected: u32 },
}

/// Attach a static context label to `rusqlite` failures.
pub(crate) trait SqlContext<T> {
    fn sql_context(self, context: &'static str) -> Result<T, StoreError>;
}

impl<T> SqlContext<T> for rusqlite::Result<T> {
    fn sql_context(self, context: &'static str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Sqlite { context, source })
    }
}

// ---------------------------------------------------------------------------
// Store capability
// ---------------------------------------------------------------------------

/// An active outage as loaded at startup, with the identity key it was
/// created under.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownOutage {
    pub key: IdentityKey,
    pub tracked: TrackedOutage,
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// One atomic unit of writes covering a single observation.
///
/// Dropping an observation without calling [`Observation::commit`] discards
/// every event emitted through it.
pub trait Observation {
    /// Persist the latest event of `tracked`. An outage without an ID is
    /// created first and its new ID returned; otherwise its existing ID is.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. The observation must then be
    /// abandoned.
    fn emit(&mut self, tracked: &TrackedOutage) -> Result<OutageId, StoreError>;

    /// Make every emitted event durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is then persisted.
    fn commit(self) -> Result<(), StoreError>;
}

/// Durable home for lifecycle events.
pub trait OutageStore {
    type Observation<'a>: Observation
    where
        Self: 'a;

    /// Every outage whose latest event is not `Missing`, rebuilt from that
    /// latest event alone, in ascending ID order. The key is the one stored
    /// at creation, never re-derived from the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load_known(&self) -> Result<Vec<KnownOutage>, StoreError>;

    /// Observation time of the most recent event, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn checkpoint(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Start an observation.
    ///
    /// # Errors
    ///
    /// Returns an error if a write transaction cannot be started.
    fn begin_observation(&mut self) -> Result<Self::Observation<'_>, StoreError>;
}

// ---------------------------------------------------------------------------
// Opening
// ---------------------------------------------------------------------------

/// Open (or create) the store database, apply runtime pragmas and migrate
/// the schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening, configuring or migrating the database fails.
pub fn open_store(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut conn = Connection::open(path).sql_context("open store database")?;
    configure_connection(&conn).sql_context("configure sqlite pragmas")?;
    let version = migrations::migrate(&mut conn).sql_context("apply store migrations")?;
    tracing::debug!(path = %path.display(), schema_version = version, "opened event store");

    Ok(conn)
}

/// Open an existing store for reading only, without creating, configuring
/// or migrating it. Returns `None` if the file does not exist yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be opened, or its schema
/// is not the latest version.
pub fn try_open_store(path: &Path) -> Result<Option<Connection>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    open_store_read_only(path).map(Some)
}

/// Open an existing store for reading only.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or its schema is not
/// the latest version.
pub fn open_store_read_only(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .sql_context("open store database read-only")?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
        .sql_context("configure busy timeout")?;

    let found = migrations::current_schema_version(&conn).sql_context("read schema version")?;
    if found != migrations::LATEST_SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            found,
            expected: migrations::LATEST_SCHEMA_VERSION,
        });
    }
    tracing::debug!(path = %path.display(), schema_version = found, "opened event store read-only");

    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, StoreError, open_store, try_open_store};
    use rusqlite::Connection;
    use crate::store::migrations;
    use tempfile::TempDir;

    fn temp_db_path() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("nested").join("outages.db");
        (dir, path)
    }

    #[test]
    fn open_store_sets_wal_busy_timeout_and_fk() {
        let (_dir, path) = temp_db_path();
        let conn = open_store(&path).expect("open store");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(u128::from(busy_timeout_ms), DEFAULT_BUSY_TIMEOUT.as_millis());

        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("query foreign_keys");
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn open_store_runs_migrations() {
        let (_dir, path) = temp_db_path();
        let conn = open_store(&path).expect("open store");
        assert_eq!(
            migrations::current_schema_version(&conn).expect("version"),
            migrations::LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn try_open_store_skips_missing_file() {
        let (_dir, path) = temp_db_path();
        assert!(try_open_store(&path).expect("missing file").is_none());
        open_store(&path).expect("create");
        assert!(try_open_store(&path).expect("reopen").is_some());
    }

    #[test]
    fn try_open_store_is_read_only() {
        let (_dir, path) = temp_db_path();
        drop(open_store(&path).expect("create"));

        let conn = try_open_store(&path).expect("open").expect("exists");
        let err = conn
            .execute("DELETE FROM outages", [])
            .expect_err("read-only connection must refuse writes");
        assert!(matches!(
            err,
            rusqlite::Error::SqliteFailure(ref e, _) if e.code == rusqlite::ErrorCode::ReadOnly
        ));
    }

    #[test]
    fn try_open_store_does_not_migrate() {
        let (_dir, path) = temp_db_path();
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        drop(Connection::open(&path).expect("create empty db"));

        assert!(matches!(
            try_open_store(&path),
            Err(StoreError::SchemaVersion { found: 0, .. })
        ));
        let conn = Connection::open(&path).expect("reopen");
        assert_eq!(
            migrations::current_schema_version(&conn).expect("version"),
            0
        );
    }
}
