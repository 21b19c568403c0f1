//! Work items and their outcomes.
//!
//! A [`WorkItem`] is an opaque unit of work. The engine never inspects what it
//! does; it only times it and classifies the returned [`Outcome`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifier assigned to each submitted work item.
pub type TaskId = u64;

/// Classification of a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No rate-limit permit was granted within the caller's timeout.
    RateLimitTimeout,
    /// The work item exceeded the pool's per-task timeout.
    TaskTimeout,
    /// The work item panicked.
    Panicked,
    /// The work item reported a failure, named after the underlying error type.
    Task(String),
}

impl FailureKind {
    /// Creates a task failure kind from an error type.
    #[must_use]
    pub fn of<E: ?Sized>() -> Self {
        Self::Task(short_type_name::<E>().to_string())
    }

    /// Returns true for failures that never reached the work item.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::RateLimitTimeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimitTimeout => write!(f, "RateLimitTimeout"),
            Self::TaskTimeout => write!(f, "TaskTimeout"),
            Self::Panicked => write!(f, "Panicked"),
            Self::Task(kind) => write!(f, "{kind}"),
        }
    }
}

/// Result of invoking a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The work completed successfully.
    Success,
    /// The work failed.
    Failure {
        /// Failure classification.
        kind: FailureKind,
        /// Human-readable detail.
        message: String,
    },
}

impl Outcome {
    /// Creates a failure outcome.
    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Creates a task failure with a free-form kind name.
    #[must_use]
    pub fn task_failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failure(FailureKind::Task(kind.into()), message)
    }

    /// Classifies an error by its type name.
    #[must_use]
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::failure(FailureKind::of::<E>(), err.to_string())
    }

    /// Returns true if the outcome is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns the failure kind, if any.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<&FailureKind> {
        match self {
            Self::Success => None,
            Self::Failure { kind, .. } => Some(kind),
        }
    }
}

impl<T, E: std::error::Error> From<Result<T, E>> for Outcome {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => Self::from_error(&err),
        }
    }
}

/// Last path segment of a type name, without generic arguments.
fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A unit of work executed by the pool.
///
/// Implementations capture their own arguments; the pool only calls
/// [`WorkItem::invoke`]. CPU-heavy or blocking work should move itself onto
/// `tokio::task::spawn_blocking`.
#[async_trait]
pub trait WorkItem: Send + Sync + 'static {
    /// Runs the work once.
    async fn invoke(&self) -> Outcome;
}

/// Adapter turning an async closure into a [`WorkItem`].
pub struct FnWork<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> WorkItem for FnWork<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn invoke(&self) -> Outcome {
        (self.f)().await
    }
}

/// Wraps an async closure as a shareable work item.
///
/// ```rust,ignore
/// let item = work_fn(|| async { Outcome::Success });
/// pool.submit(item)?;
/// ```
pub fn work_fn<F, Fut>(f: F) -> Arc<dyn WorkItem>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    Arc::new(FnWork { f })
}

/// Record of one completed (or rejected) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Task identifier assigned at submission.
    pub task_id: TaskId,
    /// Wall-clock start of the attempt.
    pub started_at: SystemTime,
    /// Execution time in milliseconds (0 for rejections).
    pub duration_ms: f64,
    /// Outcome classification.
    pub outcome: Outcome,
    /// Optional label (e.g. request path) for per-label breakdowns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ExecutionRecord {
    /// Returns true if the work item succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Returns true if the attempt was rejected before execution.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        self.outcome
            .failure_kind()
            .is_some_and(FailureKind::is_rejection)
    }
}
