//! SQLite schema for the outage event store.
//!
//! - `outages` holds one row per tracked outage, keyed by the surrogate ID
//!   handed out on its Initial event; location fields are fixed at creation
//! - `outage_events` is the append-only lifecycle log; the latest event of an
//!   outage carries the full record it was last seen with
//! - `outage_summaries` is a derived cache, always recomputable from the log
//! - `store_meta` tracks schema version and summary rebuild bookkeeping

/// Migration v1: core tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS outages (
    outage_id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key TEXT NOT NULL CHECK (length(identity_key) > 0),
    source_id TEXT NOT NULL,
    longitude REAL,
    latitude REAL,
    county TEXT,
    neighborhood TEXT,
    area_polyline TEXT,
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS outage_events (
    outage_id INTEGER NOT NULL REFERENCES outages(outage_id) ON DELETE CASCADE,
    observed_at_us INTEGER NOT NULL,
    event_kind TEXT NOT NULL CHECK (event_kind IN ('Initial', 'Update', 'Missing')),
    source_id TEXT NOT NULL,
    cause TEXT NOT NULL DEFAULT '',
    cust_aff INTEGER NOT NULL DEFAULT 0,
    cust_masked INTEGER NOT NULL DEFAULT 0 CHECK (cust_masked IN (0, 1)),
    start_us INTEGER,
    etr_us INTEGER,
    snapshot_json TEXT NOT NULL,
    PRIMARY KEY (outage_id, observed_at_us)
);

CREATE TABLE IF NOT EXISTS outage_summaries (
    outage_id INTEGER PRIMARY KEY REFERENCES outages(outage_id) ON DELETE CASCADE,
    resolved INTEGER NOT NULL CHECK (resolved IN (0, 1)),
    first_observed_us INTEGER NOT NULL,
    last_observed_us INTEGER NOT NULL,
    observations INTEGER NOT NULL CHECK (observations > 0),
    min_cust_aff INTEGER NOT NULL,
    max_cust_aff INTEGER NOT NULL,
    min_start_us INTEGER,
    max_etr_us INTEGER,
    last_cause TEXT NOT NULL DEFAULT '',
    longitude REAL,
    latitude REAL,
    county TEXT,
    neighborhood TEXT
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_summary_rebuild_us INTEGER NOT NULL DEFAULT 0
);

INSERT INTO store_meta (id, schema_version, last_summary_rebuild_us)
VALUES (1, 1, 0)
ON CONFLICT(id) DO NOTHING;
";

/// Migration v2: read-path indexes for status and resume queries.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_outage_events_observed
    ON outage_events(observed_at_us);

CREATE INDEX IF NOT EXISTS idx_outage_events_kind
    ON outage_events(event_kind, observed_at_us);

CREATE INDEX IF NOT EXISTS idx_outages_identity
    ON outages(identity_key);

CREATE INDEX IF NOT EXISTS idx_outage_summaries_unresolved
    ON outage_summaries(last_observed_us)
    WHERE resolved = 0;
";

/// Indexes that must exist once migrations are applied.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_outage_events_observed",
    "idx_outage_events_kind",
    "idx_outages_identity",
    "idx_outage_summaries_unresolved",
];
