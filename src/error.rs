//! Error types for dashcache.
//!
//! Network failures, durable-store failures and decoding failures all surface
//! through [`Error`]. Most of them never reach a caller of the preload path:
//! the orchestrator absorbs them into typed defaults and the tiered cache
//! self-heals undecodable records.

use std::sync::Arc;
use thiserror::Error;

/// Result type alias for dashcache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for dashcache.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Fetch Errors
    // ========================================================================
    /// A resource endpoint answered, but not with something usable.
    #[error("Failed to fetch resource '{resource}': {message}")]
    Fetch {
        /// Resource name
        resource: String,
        /// Error message
        message: String,
    },

    /// Transport-level HTTP error (connect, status, body decode).
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A resource fetch exceeded its time budget.
    #[error("Fetch of '{key}' timed out after {timeout_ms} ms")]
    Timeout {
        /// Cache key being computed
        key: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Error fanned out to every caller attached to one in-flight computation.
    #[error(transparent)]
    Shared(Arc<Error>),

    // ========================================================================
    // Storage Errors
    // ========================================================================
    /// Durable store read or write failed.
    #[error("Storage error for '{key}': {message}")]
    Storage {
        /// Storage key
        key: String,
        /// Error message
        message: String,
    },

    /// A cached value could not be decoded into the requested type.
    #[error("Failed to decode cached value for '{key}': {message}")]
    Deserialize {
        /// Cache key
        key: String,
        /// Error message
        message: String,
    },

    /// The key names a record the cache keeps for itself.
    #[error("Cache key '{0}' is reserved")]
    ReservedKey(String),

    // ========================================================================
    // Preload Errors
    // ========================================================================
    /// The earliest-order-date prerequisite could not be resolved.
    #[error("Preload prerequisite failed: {0}")]
    Prerequisite(String),

    /// `run` was called twice on the same orchestrator.
    #[error("Preload has already been started")]
    PreloadAlreadyStarted,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new fetch error.
    pub fn fetch(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    pub fn storage(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a new decode error.
    pub fn deserialize(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Deserialize {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error came from talking to the backend, as opposed
    /// to local storage or decoding.
    pub fn is_fetch_failure(&self) -> bool {
        match self {
            Error::Fetch { .. } | Error::Timeout { .. } => true,
            #[cfg(feature = "http")]
            Error::Http(_) => true,
            Error::Shared(inner) => inner.is_fetch_failure(),
            _ => false,
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Prerequisite(_) => 2,
            Error::Storage { .. } | Error::Io(_) => 3,
            Error::Config(_) => 4,
            Error::Shared(inner) => inner.exit_code(),
            _ => 1,
        }
    }
}

impl From<Arc<Error>> for Error {
    fn from(err: Arc<Error>) -> Self {
        Error::Shared(err)
    }
}
