//! Configuration loading and typed config structures for gridsync.
//!
//! The configuration lives in `gridsync.yaml`. This module defines
//! strongly-typed structs that mirror the YAML structure and a loader that
//! reads the file, applies environment overrides and validates the result.
//! Every field has a default, so an empty document is a valid configuration
//! for a local run.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::handler::HandlerConfig;

/// Public table service endpoint.
pub const REMOTE_HOST: &str = "https://cityio.media.mit.edu/";

/// Table service endpoint of a local development server.
pub const LOCAL_HOST: &str = "http://127.0.0.1:5000/";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} in {var}")]
    Env {
        /// The environment variable.
        var: &'static str,
        /// Its rejected value.
        value: String,
    },

    /// A value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GridsyncConfig {
    /// Table service connection.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Polling loop settings.
    #[serde(default)]
    pub handler: HandlerSettings,

    /// Where grid data lives on the service and how gaps are filled.
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Reference values for published records, by record name.
    #[serde(default)]
    pub reference: BTreeMap<String, f64>,

    /// Which bundled indicators the daemon registers.
    #[serde(default)]
    pub indicators: IndicatorToggles,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GridsyncConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `GRIDSYNC_HOST` overrides `remote.host`
    /// - `GRIDSYNC_TABLE` overrides `handler.table`
    /// - `GRIDSYNC_POLL_INTERVAL_MS` overrides `handler.poll_interval_ms`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, and
    /// [`ConfigError::Env`] or [`ConfigError::Invalid`] if the result does
    /// not validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, with environment overrides.
    ///
    /// # Errors
    ///
    /// See [`GridsyncConfig::from_file`].
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GRIDSYNC_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if an override does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("GRIDSYNC_HOST") {
            self.remote.host = Some(val);
        }
        if let Ok(val) = std::env::var("GRIDSYNC_TABLE") {
            self.handler.table = val;
        }
        if let Ok(val) = std::env::var("GRIDSYNC_POLL_INTERVAL_MS") {
            self.handler.poll_interval_ms = val.trim().parse().map_err(|_e| ConfigError::Env {
                var: "GRIDSYNC_POLL_INTERVAL_MS",
                value: val.clone(),
            })?;
        }
        Ok(())
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handler.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "handler.poll_interval_ms must be positive".to_owned(),
            });
        }
        if self.remote.attempts == 0 {
            return Err(ConfigError::Invalid {
                reason: "remote.attempts must be at least 1".to_owned(),
            });
        }
        if self.snapshot.fill_missing && self.snapshot.empty_type.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "snapshot.empty_type must not be empty when fill_missing is set".to_owned(),
            });
        }
        Ok(())
    }

    /// Settings for a [`SyncHandler`](crate::handler::SyncHandler).
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            poll_interval: Duration::from_millis(self.handler.poll_interval_ms),
            empty_type: self
                .snapshot
                .fill_missing
                .then(|| self.snapshot.empty_type.clone()),
            reference: self.reference.clone(),
        }
    }
}

/// Which public endpoint to use when no explicit host is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostMode {
    /// The public service.
    #[default]
    Remote,
    /// A development server on localhost.
    Local,
}

/// Table service connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteConfig {
    /// Endpoint selection when `host` is unset.
    #[serde(default)]
    pub mode: HostMode,

    /// Explicit service base URL; wins over `mode`.
    #[serde(default)]
    pub host: Option<String>,

    /// Tries per GET before giving up.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay between two tries, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Front-end URL template; `{table}` is replaced by the table name.
    #[serde(default = "default_front_end_url")]
    pub front_end_url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            mode: HostMode::Remote,
            host: None,
            attempts: default_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            front_end_url: default_front_end_url(),
        }
    }
}

impl RemoteConfig {
    /// Base URL of the service, always ending in `/`.
    pub fn base_url(&self) -> String {
        let host = self.host.as_deref().unwrap_or(match self.mode {
            HostMode::Remote => REMOTE_HOST,
            HostMode::Local => LOCAL_HOST,
        });
        if host.ends_with('/') {
            host.to_owned()
        } else {
            format!("{host}/")
        }
    }
}

const fn default_attempts() -> u32 {
    5
}

const fn default_retry_delay_ms() -> u64 {
    250
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_front_end_url() -> String {
    "https://cityscope.media.mit.edu/CS_cityscopeJS/?cityscope={table}".to_owned()
}

/// Polling loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HandlerSettings {
    /// Table to serve.
    #[serde(default)]
    pub table: String,

    /// Delay between polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Evaluate once without pushing before the loop starts.
    #[serde(default = "default_true")]
    pub dry_run_on_start: bool,

    /// Withdraw published results when the daemon exits.
    #[serde(default)]
    pub clear_on_exit: bool,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            table: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            dry_run_on_start: true,
            clear_on_exit: false,
        }
    }
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_true() -> bool {
    true
}

/// Where grid data lives on the service and how gaps are filled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotConfig {
    /// Name of the cell list variable.
    #[serde(default = "default_grid_data_var")]
    pub grid_data_var: String,

    /// Name of the geometry/header variable.
    #[serde(default = "default_geometry_var")]
    pub geometry_var: String,

    /// Fill lattice positions the service reports no cell for.
    #[serde(default = "default_true")]
    pub fill_missing: bool,

    /// Type name given to filled positions.
    #[serde(default = "default_empty_type")]
    pub empty_type: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            grid_data_var: default_grid_data_var(),
            geometry_var: default_geometry_var(),
            fill_missing: true,
            empty_type: default_empty_type(),
        }
    }
}

fn default_grid_data_var() -> String {
    "GEOGRIDDATA".to_owned()
}

fn default_geometry_var() -> String {
    "GEOGRID".to_owned()
}

fn default_empty_type() -> String {
    "None".to_owned()
}

/// Bundled indicators the daemon registers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct IndicatorToggles {
    /// Land-use diversity (normalized entropy).
    #[serde(default = "default_true")]
    pub diversity: bool,

    /// Share of each land use.
    #[serde(default = "default_true")]
    pub land_use_mix: bool,

    /// Height statistics.
    #[serde(default = "default_true")]
    pub density: bool,

    /// Neighbourhood noise heatmap (needs geometry).
    #[serde(default)]
    pub noise: bool,

    /// Equal-weight mean of the enabled numeric indicators above.
    #[serde(default = "default_true")]
    pub composite: bool,
}

impl Default for IndicatorToggles {
    fn default() -> Self {
        Self {
            diversity: true,
            land_use_mix: true,
            density: true,
            noise: false,
            composite: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}
