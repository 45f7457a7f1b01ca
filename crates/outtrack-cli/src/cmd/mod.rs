pub mod completions;
pub mod history;
pub mod ingest;
pub mod rebuild;
pub mod status;
pub mod verify;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use outtrack_core::ErrorCode;
use outtrack_core::config::{ConfigLayer, IngestConfig, resolve_config};
use rusqlite::Connection;

use crate::output::CodedError;

/// Settings overrides shared by every subcommand.
///
/// Each flag also reads an `OUTTRACK_*` environment variable and wins over
/// `outtrack.toml` and the user config file.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    /// SQLite database holding lifecycle events.
    #[arg(long, global = true, env = "OUTTRACK_DATABASE_FILE", value_name = "PATH")]
    pub database_file: Option<PathBuf>,

    /// Local clone of the snapshot repository (wins over a --repo-remote set
    /// alongside it).
    #[arg(long, global = true, env = "OUTTRACK_REPO_PATH", value_name = "PATH")]
    pub repo_path: Option<PathBuf>,

    /// Remote snapshot repository, cloned into a temporary directory.
    /// Replaces a repo_path inherited from a config file.
    #[arg(long, global = true, env = "OUTTRACK_REPO_REMOTE", value_name = "URL")]
    pub repo_remote: Option<String>,

    /// Path of the snapshot file inside the repository.
    #[arg(long, global = true, env = "OUTTRACK_TRACKED_PATH", value_name = "PATH")]
    pub tracked_path: Option<String>,

    /// Number of distinct positions the place lookup cache keeps.
    #[arg(long, global = true, env = "OUTTRACK_PLACE_CACHE_CAPACITY", value_name = "N")]
    pub place_cache_capacity: Option<usize>,

    /// How long to wait for another writer to release the database.
    #[arg(long, global = true, env = "OUTTRACK_LOCK_TIMEOUT_MS", value_name = "MS")]
    pub lock_timeout_ms: Option<u64>,

    /// GeoJSON FeatureCollection used to name each outage's county and
    /// neighbourhood.
    #[arg(long, global = true, env = "OUTTRACK_PLACES_FILE", value_name = "PATH")]
    pub places_file: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            database_file: self.database_file.clone(),
            repo_remote: self.repo_remote.clone(),
            repo_path: self.repo_path.clone(),
            tracked_path: self.tracked_path.clone(),
            place_cache_capacity: self.place_cache_capacity,
            lock_timeout_ms: self.lock_timeout_ms,
            places_file: self.places_file.clone(),
        }
    }

    /// Resolve the effective configuration for `project_root`.
    pub fn resolve(&self, project_root: &Path) -> anyhow::Result<IngestConfig> {
        resolve_config(project_root, self.layer()).context("resolving configuration")
    }
}

fn missing_store(path: &Path) -> anyhow::Error {
    CodedError::new(
        ErrorCode::PersistenceFailed,
        format!("no event store at {}; run `outtrack ingest` first", path.display()),
    )
    .into()
}

/// Open an existing event store read-only, failing if it was never created.
///
/// Readers take no lock; WAL lets them run beside an ingest.
pub fn open_existing_store(config: &IngestConfig) -> anyhow::Result<Connection> {
    let path = &config.database_file;
    outtrack_core::store::try_open_store(path)
        .with_context(|| format!("opening {}", path.display()))?
        .ok_or_else(|| missing_store(path))
}

/// Open an existing event store read/write. The caller holds the writer lock.
pub fn open_existing_store_for_writing(config: &IngestConfig) -> anyhow::Result<Connection> {
    let path = &config.database_file;
    if !path.exists() {
        return Err(missing_store(path));
    }
    outtrack_core::store::open_store(path).with_context(|| format!("opening {}", path.display()))
}
