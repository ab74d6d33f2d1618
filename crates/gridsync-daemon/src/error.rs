//! Error types for the daemon binary.
//!
//! [`DaemonError`] wraps every failure that can stop the daemon during
//! startup or shutdown so `main` can propagate with `?`.

/// Top-level error for the daemon binary.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: gridsync_core::config::ConfigError,
    },

    /// No table was configured.
    #[error("no table configured: set handler.table or GRIDSYNC_TABLE")]
    MissingTable,

    /// The HTTP client could not be built.
    #[error("transport error: {source}")]
    Transport {
        /// The underlying transport error.
        #[from]
        source: gridsync_core::TransportError,
    },

    /// A bundled indicator was rejected.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: gridsync_core::RegistryError,
    },

    /// A foreground handler call failed.
    #[error("sync error: {source}")]
    Sync {
        /// The underlying sync error.
        #[from]
        source: gridsync_core::SyncError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {message}")]
    Signal {
        /// Description of the failure.
        message: String,
    },
}
