//! The system under test.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use cumbre_core::{Outcome, WorkItem};

/// Something a ramp search sends requests to.
///
/// `path` is `None` when the search has no paths configured.
#[async_trait]
pub trait Target: Send + Sync + 'static {
    /// Performs one request.
    async fn hit(&self, path: Option<&str>) -> Outcome;
}

struct FnTarget<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Target for FnTarget<F>
where
    F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn hit(&self, path: Option<&str>) -> Outcome {
        (self.f)(path.map(str::to_owned)).await
    }
}

/// Wraps an async closure as a target.
///
/// ```rust,ignore
/// let target = target_fn(|path| async move {
///     client.get(path.as_deref().unwrap_or("/")).await.into()
/// });
/// ```
pub fn target_fn<F, Fut>(f: F) -> Arc<dyn Target>
where
    F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    Arc::new(FnTarget { f })
}

/// One request against a target, as a pool work item.
pub(crate) struct PathWork {
    pub(crate) target: Arc<dyn Target>,
    pub(crate) path: Option<String>,
}

#[async_trait]
impl WorkItem for PathWork {
    async fn invoke(&self) -> Outcome {
        self.target.hit(self.path.as_deref()).await
    }
}
