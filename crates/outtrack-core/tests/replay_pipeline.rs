//! Full pipeline against a real git repository: ingest, resume, verify,
//! and refuse a rewritten history.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{IndexEntry, IndexTime, Repository, Signature, Time};
use outtrack_core::config::IngestConfig;
use outtrack_core::error::ErrorCode;
use outtrack_core::ingest;
use outtrack_core::lock::IngestLock;
use outtrack_core::model::{EventKind, OutageId};
use outtrack_core::store::{OutageStore, SqliteStore, query, summary};
use tempfile::TempDir;

use generators::*;

struct Fixture {
    _dir: TempDir,
    repo: Repository,
    config: IngestConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let repo_path = dir.path().join("snapshots");
        let repo = Repository::init(&repo_path).expect("init repo");
        let config = IngestConfig {
            database_file: dir.path().join("db").join("outages.db"),
            repo_path: Some(repo_path),
            lock_timeout_ms: 100,
            ..IngestConfig::default()
        };
        Self {
            _dir: dir,
            repo,
            config,
        }
    }

    fn commit(&self, at: DateTime<Utc>, slots: &[(usize, i64)]) {
        commit_blob(&self.repo, at, &dump(slots));
    }

    fn database(&self) -> &Path {
        &self.config.database_file
    }

    fn store(&self) -> SqliteStore {
        SqliteStore::open(self.database()).expect("open store")
    }
}

fn commit_blob(repo: &Repository, at: DateTime<Utc>, bytes: &[u8]) {
    let oid = repo.blob(bytes).expect("blob");
    let mut index = repo.index().expect("index");
    index
        .add(&IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: 0o100_644,
            uid: 0,
            gid: 0,
            file_size: u32::try_from(bytes.len()).expect("small dump"),
            id: oid,
            flags: 0,
            flags_extended: 0,
            path: TRACKED_PATH.as_bytes().to_vec(),
        })
        .expect("stage dump");
    index.write().expect("write index");
    let tree = repo
        .find_tree(index.write_tree().expect("write tree"))
        .expect("tree");
    let sig = Signature::new("scraper", "scraper@example.com", &Time::new(at.timestamp(), 0))
        .expect("signature");
    let parent = repo.head().ok().map(|h| h.peel_to_commit().expect("head commit"));
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, "scrape", &tree, &parents)
        .expect("commit");
}

fn kinds_of(store: &SqliteStore, id: i64) -> Vec<EventKind> {
    query::events_for(store.connection(), OutageId(id))
        .expect("events")
        .into_iter()
        .map(|e| e.kind)
        .collect()
}

#[test]
fn ingests_git_history_and_resumes() {
    let fixture = Fixture::new();
    fixture.commit(t(0), &[(0, 10)]);
    fixture.commit(t(1), &[(0, 10)]);
    fixture.commit(t(2), &[(0, 8), (1, 30)]);

    let first = ingest::run(&fixture.config).expect("first run");
    assert_eq!(first.resumed_after, None);
    assert_eq!(first.snapshots, 2);
    assert_eq!(first.stream.unchanged, 1);
    assert_eq!((first.initial, first.updated, first.missing), (2, 1, 0));

    fixture.commit(t(3), &[(1, 25)]);
    fixture.commit(t(4), &[(1, 25)]);

    let second = ingest::run(&fixture.config).expect("second run");
    assert_eq!(second.resumed_after, Some(t(2)));
    assert_eq!(second.snapshots, 1);
    assert_eq!((second.initial, second.updated, second.missing), (0, 1, 1));
    assert_eq!(second.active, 1);

    let store = fixture.store();
    assert_eq!(store.checkpoint().expect("checkpoint"), Some(t(3)));
    assert_eq!(
        kinds_of(&store, 1),
        vec![EventKind::Initial, EventKind::Update, EventKind::Missing]
    );
    assert_eq!(kinds_of(&store, 2), vec![EventKind::Initial, EventKind::Update]);
    assert!(summary::verify_summaries(store.connection()).expect("verify").is_empty());

    let third = ingest::run(&fixture.config).expect("nothing new");
    assert_eq!(third.snapshots, 0);
    assert_eq!(third.active, 1);
}

#[test]
fn enrichment_decodes_positions_into_the_store() {
    let fixture = Fixture::new();
    fixture.commit(t(0), &[(4, 3)]);
    ingest::run(&fixture.config).expect("run");

    let store = fixture.store();
    let record = query::get_outage(store.connection(), OutageId(1))
        .expect("query")
        .expect("outage");
    assert_eq!(record.latitude, Some(1.0));
    assert_eq!(record.longitude, Some(1.0));
    assert_eq!(record.identity_key, format!("p:{}", POSITIONS[4]));
}

#[test]
fn rewritten_history_fails_continuity_without_writes() {
    let fixture = Fixture::new();
    fixture.commit(t(0), &[(0, 1)]);
    ingest::run(&fixture.config).expect("first run");

    let rewritten = TempDir::new().expect("tempdir");
    let repo = Repository::init(rewritten.path()).expect("init");
    commit_blob(&repo, t(5), &dump(&[(1, 1)]));

    let config = IngestConfig {
        repo_path: Some(PathBuf::from(rewritten.path())),
        ..fixture.config.clone()
    };
    let err = ingest::run(&config).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CheckpointNotInHistory);

    let stats = query::store_stats(fixture.store().connection()).expect("stats");
    assert_eq!(stats.events, 1);
    assert_eq!(stats.checkpoint, Some(t(0)));
}

#[test]
fn corrupt_snapshot_stops_the_run_after_committed_work() {
    let fixture = Fixture::new();
    fixture.commit(t(0), &[(0, 1)]);
    commit_blob(&fixture.repo, t(1), b"[{\"id\": ");
    fixture.commit(t(2), &[(0, 1), (1, 1)]);

    let err = ingest::run(&fixture.config).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SnapshotDecodeFailed);
    assert_eq!(
        fixture.store().checkpoint().expect("checkpoint"),
        Some(t(0))
    );
}

#[test]
fn concurrent_run_is_refused_by_lock() {
    let fixture = Fixture::new();
    fixture.commit(t(0), &[(0, 1)]);

    let _held = IngestLock::acquire(fixture.database(), std::time::Duration::from_millis(50))
        .expect("hold lock");
    let err = ingest::run(&fixture.config).unwrap_err();
    assert_eq!(err.code(), ErrorCode::LockContention);
}

#[test]
fn missing_repository_is_reported() {
    let fixture = Fixture::new();
    let config = IngestConfig {
        repo_path: Some(fixture.database().with_file_name("no-such-repo")),
        ..fixture.config.clone()
    };
    let err = ingest::run(&config).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RepositoryUnavailable);
}

fn square(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> serde_json::Value {
    serde_json::json!({
        "type": "Polygon",
        "coordinates": [[
            [min_lon, min_lat], [max_lon, min_lat], [max_lon, max_lat],
            [min_lon, max_lat], [min_lon, min_lat]
        ]]
    })
}

#[test]
fn places_file_names_county_and_smallest_neighbourhood() {
    let mut fixture = Fixture::new();
    let places = serde_json::json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"wof:name": "Sierra", "wof:placetype": "county"},
                "geometry": square(-121.0, 38.0, -119.0, 39.0)
            },
            {
                "type": "Feature",
                "properties": {"wof:name": "Outer", "wof:placetype": "neighbourhood"},
                "geometry": square(-120.5, 38.2, -120.0, 38.8)
            },
            {
                "type": "Feature",
                "properties": {"wof:name": "Inner", "wof:placetype": "neighbourhood"},
                "geometry": square(-120.3, 38.4, -120.1, 38.6)
            }
        ]
    });
    let places_file = fixture.database().with_file_name("places.geojson");
    std::fs::create_dir_all(places_file.parent().expect("parent")).expect("mkdir");
    std::fs::write(&places_file, places.to_string()).expect("write places");
    fixture.config.places_file = Some(places_file);

    // POSITIONS[0] decodes to (38.5, -120.2).
    fixture.commit(t(0), &[(0, 3), (1, 4)]);
    ingest::run(&fixture.config).expect("run");

    let store = fixture.store();
    let placed = summary::load(store.connection(), OutageId(1))
        .expect("load")
        .expect("summary");
    assert_eq!(placed.county.as_deref(), Some("Sierra"));
    assert_eq!(placed.neighborhood.as_deref(), Some("Inner"));

    let elsewhere = summary::load(store.connection(), OutageId(2))
        .expect("load")
        .expect("summary");
    assert_eq!(elsewhere.county, None);
    assert_eq!(elsewhere.neighborhood, None);
}

#[test]
fn unreadable_places_file_fails_before_ingesting() {
    let mut fixture = Fixture::new();
    fixture.config.places_file = Some(fixture.database().with_file_name("missing.geojson"));
    fixture.commit(t(0), &[(0, 3)]);

    let err = ingest::run(&fixture.config).unwrap_err();
    assert_eq!(err.code(), ErrorCode::EnrichmentFailed);
    assert_eq!(fixture.store().checkpoint().expect("checkpoint"), None);
}
