//! The ingestion pipeline: history → decode → enrich → track → store.
//!
//! One run consumes every snapshot after the store's checkpoint, strictly in
//! order. The first failure stops the run; snapshots already observed stay
//! committed and the next run resumes after them.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::{ConfigError, HistoryLocation, IngestConfig};
use crate::enrich::{CacheStats, EnrichError, GeoJsonPlaces, PlacesError, Placer, SnapshotEnricher};
use crate::error::ErrorCode;
use crate::history::{
    GitRevisionStore, HistoryError, HistorySource, RevisionId, RevisionStore, StreamStats,
};
use crate::lock::{IngestLock, LockError};
use crate::model::decode_snapshot;
use crate::store::{OutageStore, SqliteStore, StoreError};
use crate::tracker::{OutageTracker, TrackerError};

/// Fatal ingestion failure.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Places(#[from] PlacesError),

    #[error("loading known outages: {0}")]
    Load(#[source] TrackerError),

    #[error("event store: {0}")]
    Store(#[from] StoreError),

    #[error("history: {0}")]
    History(#[from] HistoryError),

    #[error("decoding snapshot {revision} at {observed_at}: {source}")]
    Decode {
        revision: RevisionId,
        observed_at: DateTime<Utc>,
        #[source]
        source: serde_json::Error,
    },

    #[error("enriching snapshot {revision} at {observed_at}: {source}")]
    Enrich {
        revision: RevisionId,
        observed_at: DateTime<Utc>,
        #[source]
        source: EnrichError,
    },

    #[error("observing snapshot {revision} at {observed_at}: {source}")]
    Track {
        revision: RevisionId,
        observed_at: DateTime<Utc>,
        #[source]
        source: TrackerError,
    },
}

impl IngestError {
    /// Machine-readable classification of this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config(e) => e.code(),
            Self::Lock(e) => e.code(),
            Self::Places(_) | Self::Enrich { .. } => ErrorCode::EnrichmentFailed,
            Self::Store(_) => ErrorCode::PersistenceFailed,
            Self::History(HistoryError::Continuity { .. }) => ErrorCode::CheckpointNotInHistory,
            Self::History(_) => ErrorCode::RepositoryUnavailable,
            Self::Load(source) => source.code(),
            Self::Decode { .. } => ErrorCode::SnapshotDecodeFailed,
            Self::Track { source, .. } => source.code(),
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// What one ingestion run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Checkpoint the run resumed after.
    pub resumed_after: Option<DateTime<Utc>>,
    /// Time of the last snapshot observed by this run.
    pub observed_through: Option<DateTime<Utc>>,
    pub snapshots: usize,
    pub initial: usize,
    pub updated: usize,
    pub missing: usize,
    /// Active outages when the run finished.
    pub active: usize,
    pub stream: StreamStats,
    pub elapsed: Duration,
}

/// Feed every snapshot of `tracked_path` after the tracker's checkpoint
/// through `enricher` into `tracker`.
///
/// # Errors
///
/// Returns the first history, decode, enrichment or tracking failure.
/// Snapshots observed before it remain committed.
pub fn ingest_snapshots<R, S, E>(
    history: &HistorySource<R>,
    tracked_path: &str,
    tracker: &mut OutageTracker<S>,
    enricher: &mut E,
) -> Result<IngestReport, IngestError>
where
    R: RevisionStore,
    S: OutageStore,
    E: SnapshotEnricher,
{
    let start = Instant::now();
    let resumed_after = tracker.last_observed();
    let mut report = IngestReport {
        resumed_after,
        active: tracker.known().len(),
        ..IngestReport::default()
    };

    let mut stream = history.stream(tracked_path, resumed_after)?;
    tracing::info!(
        path = tracked_path,
        since = ?resumed_after,
        pending = stream.remaining(),
        "ingest starting"
    );

    for snapshot in stream.by_ref() {
        let snapshot = snapshot?;
        let observed_at = snapshot.observed_at;

        let mut outages =
            decode_snapshot(&snapshot.bytes).map_err(|source| IngestError::Decode {
                revision: snapshot.revision.clone(),
                observed_at,
                source,
            })?;

        enricher
            .enrich(&mut outages)
            .map_err(|source| IngestError::Enrich {
                revision: snapshot.revision.clone(),
                observed_at,
                source,
            })?;

        let observing = outages.len();
        let known = tracker.known().len();
        let observed = tracker
            .observe(observed_at, outages)
            .map_err(|source| IngestError::Track {
                revision: snapshot.revision.clone(),
                observed_at,
                source,
            })?;

        tracing::info!(
            time = %observed_at,
            revision = %snapshot.revision,
            known,
            observing,
            initial = observed.initial,
            updated = observed.updated,
            missing = observed.missing,
            "observed snapshot"
        );

        report.snapshots += 1;
        report.initial += observed.initial;
        report.updated += observed.updated;
        report.missing += observed.missing;
        report.active = observed.active;
        report.observed_through = Some(observed_at);
    }

    report.stream = stream.stats();
    report.elapsed = start.elapsed();
    Ok(report)
}

/// Run a full ingestion as configured: take the writer lock, open the store
/// and the history, and ingest everything after the checkpoint.
///
/// # Errors
///
/// Returns an [`IngestError`] classifying the first failure.
pub fn run(config: &IngestConfig) -> Result<IngestReport, IngestError> {
    config.validate()?;
    let _lock = IngestLock::acquire(&config.database_file, config.lock_timeout())?;

    let store = SqliteStore::open(&config.database_file)?;
    let mut tracker = OutageTracker::load(store).map_err(IngestError::Load)?;

    let history = HistorySource::new(open_history(&config.history_location())?);
    let places = match &config.places_file {
        Some(path) => GeoJsonPlaces::load(path)?,
        None => GeoJsonPlaces::default(),
    };
    let mut placer = Placer::new(places, config.place_cache_capacity()?);

    let report = ingest_snapshots(&history, &config.tracked_path, &mut tracker, &mut placer)?;
    log_finished(&report, placer.stats(), &config.database_file);
    Ok(report)
}

fn open_history(location: &HistoryLocation) -> Result<GitRevisionStore, HistoryError> {
    match location {
        HistoryLocation::Local(path) => GitRevisionStore::open(path),
        HistoryLocation::Remote(url) => GitRevisionStore::clone_remote(url),
    }
}

fn log_finished(report: &IngestReport, cache: CacheStats, database: &Path) {
    tracing::info!(
        database = %database.display(),
        snapshots = report.snapshots,
        initial = report.initial,
        updated = report.updated,
        missing = report.missing,
        active = report.active,
        unchanged = report.stream.unchanged,
        absent = report.stream.absent,
        place_cache_hits = cache.hits,
        place_cache_misses = cache.misses,
        elapsed_ms = report.elapsed.as_millis(),
        "ingest finished"
    );
}
