//! Application configuration management.
//!
//! Handles loading, saving, and validating proximity configuration:
//! - Merge threshold and default dwell time for the aggregator
//! - Retention window for stored contact events
//! - Data directory for the JSON event store
//! - Ingest queue sizing
//! - HTTP bind address
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables named `PROXIMITY_<SECTION>__<KEY>`
//! (for example `PROXIMITY_AGGREGATION__MERGE_THRESHOLD_SECS=90`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::MergeThreshold;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "PROXIMITY";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be written.
    #[error("Failed to write configuration to {}: {source}", path.display())]
    WriteError {
        /// File that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration source could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} configuration fields are invalid", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),

    /// No platform configuration directory could be determined.
    #[error("Cannot determine configuration directory")]
    NoConfigDirectory,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Session merge policy.
    pub aggregation: AggregationConfig,

    /// Event retention policy.
    pub retention: RetentionConfig,

    /// Event store location.
    pub storage: StorageConfig,

    /// Reading ingest queue sizing.
    pub ingest: IngestConfig,

    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Session merge policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Largest gap, inclusive, between two spans that still counts as one encounter.
    pub merge_threshold_secs: u32,

    /// Duration assigned to an event built from a single reading.
    pub default_dwell_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            merge_threshold_secs: 60,
            default_dwell_secs: 60,
        }
    }
}

impl AggregationConfig {
    /// The merge threshold in the aggregator's units.
    #[must_use]
    pub const fn merge_threshold(&self) -> MergeThreshold {
        MergeThreshold::from_secs(self.merge_threshold_secs)
    }
}

/// Event retention policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Events whose last sample is older than this many days are deleted.
    pub days: u32,

    /// How often the background sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: 28,
            sweep_interval_secs: 3600,
        }
    }
}

impl RetentionConfig {
    /// Retention window as a duration.
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.days))
    }

    /// Interval between background sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Event store location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the event store. Platform default when unset.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// The configured data directory, or the platform default.
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(crate::storage::default_data_dir)
    }
}

/// Reading ingest queue sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Readings accepted but not yet recorded, across all peers.
    pub queue_capacity: usize,

    /// A per-peer worker with no readings for this long shuts down.
    pub peer_idle_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            peer_idle_timeout_secs: 300,
        }
    }
}

impl IngestConfig {
    /// Idle timeout for per-peer workers.
    #[must_use]
    pub const fn peer_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_idle_timeout_secs)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

impl ProximityConfig {
    /// Load configuration from an optional TOML file plus environment overrides.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails validation.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            );
        }
        let config: Self = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`ProximityConfig::load`], but the file must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if there is no file at `path`, or any
    /// error from [`ProximityConfig::load`].
    pub fn load_required(path: &Path) -> ConfigResult<Self> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load(Some(path))
    }

    /// Save configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, reporting all violations at once.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        check(
            self.aggregation.merge_threshold_secs > 0,
            "aggregation.merge_threshold_secs",
            "must be at least 1 second",
        );
        check(
            self.retention.days > 0,
            "retention.days",
            "must be at least 1 day",
        );
        check(
            self.retention.sweep_interval_secs > 0,
            "retention.sweep_interval_secs",
            "must be at least 1 second",
        );
        check(
            self.ingest.queue_capacity > 0,
            "ingest.queue_capacity",
            "must be at least 1",
        );
        check(
            self.ingest.peer_idle_timeout_secs > 0,
            "ingest.peer_idle_timeout_secs",
            "must be at least 1 second",
        );
        check(
            !self.server.bind_address.trim().is_empty(),
            "server.bind_address",
            "must not be empty",
        );

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Get the configuration file path.
///
/// # Errors
///
/// Returns an error if no configuration directory can be determined.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    // On Linux hosts: /etc/proximity/config.toml
    // For development: the platform config dir
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/proximity/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "proximity")
            .ok_or(ConfigError::NoConfigDirectory)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}
