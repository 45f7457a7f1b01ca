//! Ingestion settings, layered from defaults, a user file, a project file
//! and command-line overrides (which include `OUTTRACK_*` environment
//! variables, resolved by the CLI).

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::enrich::DEFAULT_PLACE_CACHE_CAPACITY;
use crate::error::ErrorCode;

/// Project-local config file name, looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "outtrack.toml";

/// Failure loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParseError
    }
}

/// Fully resolved ingestion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_database_file")]
    pub database_file: PathBuf,
    #[serde(default = "default_repo_remote")]
    pub repo_remote: String,
    /// Local clone to read instead of cloning `repo_remote`.
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
    #[serde(default = "default_tracked_path")]
    pub tracked_path: String,
    #[serde(default = "default_place_cache_capacity")]
    pub place_cache_capacity: usize,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// GeoJSON `FeatureCollection` naming counties and neighbourhoods.
    #[serde(default)]
    pub places_file: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            repo_remote: default_repo_remote(),
            repo_path: None,
            tracked_path: default_tracked_path(),
            place_cache_capacity: default_place_cache_capacity(),
            lock_timeout_ms: default_lock_timeout_ms(),
            places_file: None,
        }
    }
}

/// Where snapshot history is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryLocation {
    Local(PathBuf),
    Remote(String),
}

impl IngestConfig {
    /// Apply `layer` on top of `self`; fields set in `layer` win.
    ///
    /// A layer naming a remote drops any local clone inherited from lower
    /// layers. Within one layer a local clone still wins.
    #[must_use]
    pub fn with(self, layer: ConfigLayer) -> Self {
        let inherited_path = if layer.repo_remote.is_some() {
            None
        } else {
            self.repo_path
        };
        Self {
            database_file: layer.database_file.unwrap_or(self.database_file),
            repo_remote: layer.repo_remote.unwrap_or(self.repo_remote),
            repo_path: layer.repo_path.or(inherited_path),
            tracked_path: layer.tracked_path.unwrap_or(self.tracked_path),
            place_cache_capacity: layer
                .place_cache_capacity
                .unwrap_or(self.place_cache_capacity),
            lock_timeout_ms: layer.lock_timeout_ms.unwrap_or(self.lock_timeout_ms),
            places_file: layer.places_file.or(self.places_file),
        }
    }

    /// A local clone wins over the remote.
    #[must_use]
    pub fn history_location(&self) -> HistoryLocation {
        self.repo_path.as_ref().map_or_else(
            || HistoryLocation::Remote(self.repo_remote.clone()),
            |path| HistoryLocation::Local(path.clone()),
        )
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the capacity is zero.
    pub fn place_cache_capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.place_cache_capacity).ok_or(ConfigError::Invalid {
            field: "place_cache_capacity",
            reason: "must be at least 1",
        })
    }

    /// Check settings that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unusable setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.place_cache_capacity()?;
        if self.tracked_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "tracked_path",
                reason: "must not be empty",
            });
        }
        if self.database_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "database_file",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// One partial source of settings: a config file or command-line overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default)]
    pub database_file: Option<PathBuf>,
    #[serde(default)]
    pub repo_remote: Option<String>,
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
    #[serde(default)]
    pub tracked_path: Option<String>,
    #[serde(default)]
    pub place_cache_capacity: Option<usize>,
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,
    #[serde(default)]
    pub places_file: Option<PathBuf>,
}

/// Load `outtrack.toml` from `project_root`, or an empty layer if absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ConfigLayer, ConfigError> {
    load_layer(&project_root.join(PROJECT_CONFIG_FILE))
}

/// Load `<config_dir>/outtrack/config.toml`, or an empty layer if absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer, ConfigError> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigLayer::default());
    };
    load_layer(&config_dir.join("outtrack/config.toml"))
}

/// Resolve settings: defaults < user file < project file < `overrides`.
///
/// # Errors
///
/// Returns an error if a config file is malformed or the result is invalid.
pub fn resolve_config(
    project_root: &Path,
    overrides: ConfigLayer,
) -> Result<IngestConfig, ConfigError> {
    let config = IngestConfig::default()
        .with(load_user_config()?)
        .with(load_project_config(project_root)?)
        .with(overrides);
    config.validate()?;
    Ok(config)
}

fn load_layer(path: &Path) -> Result<ConfigLayer, ConfigError> {
    if !path.exists() {
        return Ok(ConfigLayer::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let layer = toml::from_str::<ConfigLayer>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "loaded config layer");
    Ok(layer)
}

fn default_database_file() -> PathBuf {
    PathBuf::from("outages.db")
}

fn default_repo_remote() -> String {
    "https://github.com/danp/nspoweroutages.git".to_string()
}

fn default_tracked_path() -> String {
    "data/outages.json".to_string()
}

const fn default_place_cache_capacity() -> usize {
    DEFAULT_PLACE_CACHE_CAPACITY
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}
