//! Error types for cumbre-core.
//!
//! Per Iron Lotus Framework: All errors are explicit, no panics allowed.
//! Individual work-item failures are *not* errors here; they travel as
//! [`crate::Outcome`] values and end up in the metrics.

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the engine itself.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration, rejected at call time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Work submitted to a pool that has been shut down.
    #[error("worker pool is closed")]
    PoolClosed,

    /// A pool was constructed outside of a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Unexpected failure inside the engine (should not occur in production).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the error was caused by the caller's configuration.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
