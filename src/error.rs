//! Error types for the Remora library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`RemoraError`] enum. The taxonomy separates errors that are expected and
//! absorbed by the search path (an open gate, a dependency timeout) from
//! errors that must surface to the caller (malformed input, configuration
//! problems).
//!
//! # Examples
//!
//! ```
//! use remora::error::{RemoraError, Result};
//!
//! fn validate(query: &str) -> Result<()> {
//!     if query.is_empty() {
//!         return Err(RemoraError::malformed_query("query is empty"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(validate("").is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Remora operations.
#[derive(Error, Debug)]
pub enum RemoraError {
    /// A circuit breaker is open and the call was rejected without being
    /// attempted. Expected during degradation; the facade absorbs it.
    #[error("gate open for dependency '{dependency}'")]
    GateOpen {
        /// Name of the gated dependency.
        dependency: String,
    },

    /// A gated dependency call exceeded its per-call timeout. Counted as a
    /// gate failure.
    #[error("dependency timeout: {0}")]
    DependencyTimeout(String),

    /// A gated dependency reported itself unavailable (connection refused,
    /// transport failure, and so on). Counted as a gate failure.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The query was rejected at the facade boundary (empty, oversized).
    /// Never silently degraded.
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// An adaptive parameter snapshot failed validation. The read path keeps
    /// serving the last-known-good snapshot.
    #[error("invalid adaptive parameters: {0}")]
    InvalidParameters(String),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// Index-related errors.
    #[error("index error: {0}")]
    Index(String),

    /// I/O errors (corpus loading in the CLI, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("error: {0}")]
    Other(String),

    /// Generic anyhow error.
    #[error("error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with [`RemoraError`].
pub type Result<T> = std::result::Result<T, RemoraError>;

impl RemoraError {
    /// Create a new gate-open error for the given dependency.
    pub fn gate_open<S: Into<String>>(dependency: S) -> Self {
        RemoraError::GateOpen {
            dependency: dependency.into(),
        }
    }

    /// Create a new dependency timeout error.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        RemoraError::DependencyTimeout(msg.into())
    }

    /// Create a new dependency unavailable error.
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        RemoraError::DependencyUnavailable(msg.into())
    }

    /// Create a new malformed query error.
    pub fn malformed_query<S: Into<String>>(msg: S) -> Self {
        RemoraError::MalformedQuery(msg.into())
    }

    /// Create a new invalid parameters error.
    pub fn invalid_parameters<S: Into<String>>(msg: S) -> Self {
        RemoraError::InvalidParameters(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        RemoraError::Config(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        RemoraError::Index(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        RemoraError::Other(msg.into())
    }

    /// Whether this error is absorbed by the degradation path instead of
    /// being surfaced to the caller of `search`.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            RemoraError::GateOpen { .. }
                | RemoraError::DependencyTimeout(_)
                | RemoraError::DependencyUnavailable(_)
        )
    }
}
