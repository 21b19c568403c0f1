//! Test error types.

/// Result type alias for test operations.
pub type Result<T> = std::result::Result<T, TestError>;

/// Testing errors.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// Harness misconfiguration.
    #[error("harness error: {0}")]
    Harness(String),

    /// Chaos injection error.
    #[error("chaos injection error: {0}")]
    Chaos(String),

    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] cumbre_core::EngineError),
}

impl TestError {
    /// Creates a harness error.
    #[must_use]
    pub fn harness(msg: impl Into<String>) -> Self {
        Self::Harness(msg.into())
    }

    /// Creates a chaos error.
    #[must_use]
    pub fn chaos(msg: impl Into<String>) -> Self {
        Self::Chaos(msg.into())
    }
}
