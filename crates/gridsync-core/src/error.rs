//! Error types shared across the sync core.
//!
//! Registry operations fail with [`RegistryError`], calls to the remote
//! table service fail with [`TransportError`] and indicator code fails with
//! [`ComputationError`]. [`SyncError`] wraps the first two for foreground
//! handler calls that touch both.

/// Errors raised by registration and lookup operations on the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The indicator was rejected at registration time.
    #[error("invalid indicator {name:?}: {reason}")]
    Validation {
        /// Name of the rejected indicator.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No indicator with this name is registered.
    #[error("indicator {name:?} is not registered")]
    NotFound {
        /// The name that was looked up.
        name: String,
    },

    /// The indicator cannot be removed while others depend on it.
    #[error("indicator {name:?} is required by {dependents:?}")]
    Dependency {
        /// The indicator that was to be removed.
        name: String,
        /// Registered composites that declare it as a dependency.
        dependents: Vec<String>,
    },
}

impl RegistryError {
    pub(crate) fn validation(name: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_owned(),
        }
    }
}

/// Errors raised while talking to the remote table service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or no response arrived.
    #[error("request to {url} failed: {message}")]
    Request {
        /// Target URL.
        url: String,
        /// Underlying client error.
        message: String,
    },

    /// The service answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Target URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The service refused the call without reaching the network.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// An indicator failed to compute or to initialize.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ComputationError {
    /// Description of the failure.
    pub message: String,
}

impl ComputationError {
    /// Create a computation error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors returned by foreground [`SyncHandler`](crate::handler::SyncHandler)
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A registry operation failed.
    #[error(transparent)]
    Registry {
        /// The underlying registry error.
        #[from]
        source: RegistryError,
    },

    /// The remote service call failed.
    #[error(transparent)]
    Transport {
        /// The underlying transport error.
        #[from]
        source: TransportError,
    },

    /// The polling loop could not be spawned.
    #[error("no tokio runtime is available to run the sync loop")]
    NoRuntime,
}
