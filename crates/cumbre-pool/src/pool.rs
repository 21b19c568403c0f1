//! Bounded worker pool with optional rate limiting and adaptive sizing.
//!
//! # Toyota Way: Just-in-Time (ジャストインタイム)
//! Work is pulled from one shared queue by exactly as many workers as the
//! current size allows.
//!
//! # Implementation
//!
//! Workers belong to a *generation*. Resizing starts a new generation of the
//! requested size and signals the old one to retire: its workers finish the
//! item in hand and exit. Every generation pulls from the same queue, so work
//! that has not started yet simply moves on to the new workers. Each item runs
//! on its own task so a panic is contained and reported as an outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use cumbre_core::{
    AdaptiveConfig, EngineError, ExecutionRecord, FailureKind, MetricsAggregator,
    MetricsSnapshot, Outcome, PoolConfig, Result, TaskId, WorkItem,
};
use cumbre_limiter::RateLimiter;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use crate::controller::{AdjustmentRecord, ConcurrencyController};

struct Job {
    id: TaskId,
    label: Option<String>,
    item: Arc<dyn WorkItem>,
}

struct Generation {
    id: u64,
    size: usize,
    retire: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Generation {
    fn is_live(&self) -> bool {
        self.workers.iter().any(|w| !w.is_finished())
    }
}

struct Generations {
    current: Generation,
    retired: Vec<Generation>,
    next_id: u64,
}

impl Generations {
    fn reap(&mut self) {
        self.retired.retain(Generation::is_live);
    }
}

struct PoolInner {
    config: PoolConfig,
    limiter: Option<Arc<RateLimiter>>,
    aggregator: Arc<MetricsAggregator>,
    runtime: Handle,
    sender: parking_lot::Mutex<Option<mpsc::UnboundedSender<Job>>>,
    queue: AsyncMutex<mpsc::UnboundedReceiver<Job>>,
    next_task: AtomicU64,
    submitted: AtomicU64,
    pending: AtomicUsize,
    changed: Notify,
    records: parking_lot::Mutex<Vec<ExecutionRecord>>,
    generations: parking_lot::Mutex<Option<Generations>>,
    controller: parking_lot::Mutex<Option<ConcurrencyController>>,
    closing: watch::Sender<bool>,
}

/// Worker pool executing [`WorkItem`]s.
///
/// Dropping the pool behaves like `shutdown(false)` without waiting.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

/// Builder for [`WorkerPool`].
#[derive(Default)]
pub struct WorkerPoolBuilder {
    config: PoolConfig,
    limiter: Option<Arc<RateLimiter>>,
    aggregator: Option<Arc<MetricsAggregator>>,
}

impl WorkerPoolBuilder {
    /// Attaches a rate limiter consulted before every execution.
    #[must_use]
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Reports into an existing aggregator instead of a private one.
    #[must_use]
    pub fn aggregator(mut self, aggregator: Arc<MetricsAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Starts the pool's first generation of workers.
    ///
    /// # Errors
    /// Returns [`EngineError::NoRuntime`] outside a tokio runtime, or a
    /// configuration error if the pool config is invalid.
    pub fn build(self) -> Result<WorkerPool> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let (closing, _) = watch::channel(false);
        let size = self.config.max_workers;

        let inner = Arc::new(PoolInner {
            config: self.config,
            limiter: self.limiter,
            aggregator: self.aggregator.unwrap_or_default(),
            runtime,
            sender: parking_lot::Mutex::new(Some(sender)),
            queue: AsyncMutex::new(receiver),
            next_task: AtomicU64::new(1),
            submitted: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            changed: Notify::new(),
            records: parking_lot::Mutex::new(Vec::new()),
            generations: parking_lot::Mutex::new(None),
            controller: parking_lot::Mutex::new(None),
            closing,
        });

        let first = inner.spawn_generation(0, size);
        *inner.generations.lock() = Some(Generations {
            current: first,
            retired: Vec::new(),
            next_id: 1,
        });
        tracing::debug!(workers = size, "worker pool started");
        Ok(WorkerPool { inner })
    }
}

impl WorkerPool {
    /// Creates a pool with its own aggregator and no limiter.
    ///
    /// # Errors
    /// See [`WorkerPoolBuilder::build`].
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Starts building a pool.
    #[must_use]
    pub fn builder(config: PoolConfig) -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            config,
            ..Default::default()
        }
    }

    /// Aggregator receiving every execution record.
    #[must_use]
    pub fn aggregator(&self) -> Arc<MetricsAggregator> {
        Arc::clone(&self.inner.aggregator)
    }

    /// Queues a work item.
    ///
    /// # Errors
    /// Returns [`EngineError::PoolClosed`] after shutdown.
    pub fn submit(&self, item: Arc<dyn WorkItem>) -> Result<TaskId> {
        self.inner.enqueue(None, item)
    }

    /// Queues a work item tagged with a label (typically a request path).
    ///
    /// # Errors
    /// Returns [`EngineError::PoolClosed`] after shutdown.
    pub fn submit_labeled(
        &self,
        label: impl Into<String>,
        item: Arc<dyn WorkItem>,
    ) -> Result<TaskId> {
        self.inner.enqueue(Some(label.into()), item)
    }

    /// Submitted items not yet completed or discarded.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Waits until fewer than `limit` items are pending.
    pub async fn wait_below(&self, limit: usize) {
        let limit = limit.max(1);
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() < limit {
                return;
            }
            notified.await;
        }
    }

    /// Waits until every submitted item has completed (or been discarded) and
    /// returns the records collected since the previous call.
    pub async fn wait_completion(&self) -> Vec<ExecutionRecord> {
        self.wait_below(1).await;
        std::mem::take(&mut *self.inner.records.lock())
    }

    /// Stops accepting work.
    ///
    /// With `drain`, everything already queued still runs and this returns once
    /// all workers have exited. Without it, queued items are discarded, items
    /// waiting for a rate-limit permit are abandoned, and items already
    /// executing finish in the background.
    pub async fn shutdown(&self, drain: bool) {
        let was_open = self.inner.sender.lock().take().is_some();
        if !drain {
            self.inner.closing.send_replace(true);
        }
        if was_open {
            tracing::debug!(drain, pending = self.pending(), "worker pool shutting down");
        }
        if !drain {
            return;
        }

        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.generations.lock();
            match guard.as_mut() {
                Some(generations) => {
                    let mut handles = std::mem::take(&mut generations.current.workers);
                    for retired in &mut generations.retired {
                        handles.append(&mut retired.workers);
                    }
                    generations.retired.clear();
                    handles
                }
                None => Vec::new(),
            }
        };
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "worker exited abnormally");
            }
        }
    }

    /// Returns true once `shutdown` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// Current number of workers in the active generation.
    #[must_use]
    pub fn current_workers(&self) -> usize {
        self.inner
            .generations
            .lock()
            .as_ref()
            .map_or(0, |g| g.current.size)
    }

    /// Resizes the pool. With the adaptive controller enabled the size is
    /// clamped to its bounds.
    ///
    /// # Errors
    /// Returns a configuration error for zero workers, or
    /// [`EngineError::PoolClosed`] after shutdown.
    pub fn set_workers(&self, workers: usize) -> Result<usize> {
        if workers == 0 {
            return Err(EngineError::config("worker count must be at least 1"));
        }
        if self.is_closed() {
            return Err(EngineError::PoolClosed);
        }
        // Held across the resize so a controller tick cannot interleave.
        let mut controller = self.inner.controller.lock();
        let applied = controller
            .as_mut()
            .map_or(workers, |ctrl| ctrl.set_workers(workers));
        self.inner.resize(applied);
        drop(controller);
        Ok(applied)
    }

    /// Enables the adaptive controller.
    ///
    /// The controller is bounded by `config.max_workers`, or the pool's
    /// `max_workers` when unset. A pool currently outside those bounds is
    /// resized into them immediately.
    ///
    /// # Errors
    /// Returns a configuration error if the controller config is invalid.
    pub fn enable_adaptive(&self, config: &AdaptiveConfig) -> Result<()> {
        let mut guard = self.inner.controller.lock();
        let current = self.current_workers();
        let controller = ConcurrencyController::new(
            config,
            self.inner.config.max_workers,
            current,
            Instant::now(),
        )?;
        let start = controller.current_workers();
        tracing::info!(
            min = controller.min_workers(),
            max = controller.max_workers(),
            target_tps = ?config.target_tps,
            workers = start,
            "adaptive concurrency enabled"
        );
        *guard = Some(controller);
        if start != current {
            self.inner.resize(start);
        }
        Ok(())
    }

    /// Disables the adaptive controller, keeping the current size.
    pub fn disable_adaptive(&self) {
        if self.inner.controller.lock().take().is_some() {
            tracing::info!("adaptive concurrency disabled");
        }
    }

    /// Returns true while the adaptive controller is enabled.
    #[must_use]
    pub fn is_adaptive(&self) -> bool {
        self.inner.controller.lock().is_some()
    }

    /// Snapshot of pool state and metrics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (current_workers, live_generations) = {
            let mut guard = self.inner.generations.lock();
            match guard.as_mut() {
                Some(generations) => {
                    generations.reap();
                    (generations.current.size, generations.retired.len() + 1)
                }
                None => (0, 0),
            }
        };
        let (adaptive, adjustments, min_workers, max_workers) = {
            let guard = self.inner.controller.lock();
            match guard.as_ref() {
                Some(ctrl) => (
                    true,
                    ctrl.history(),
                    ctrl.min_workers(),
                    ctrl.max_workers(),
                ),
                None => (false, Vec::new(), 1, self.inner.config.max_workers),
            }
        };

        PoolStats {
            current_workers,
            min_workers,
            max_workers,
            live_generations,
            submitted: self.inner.submitted.load(Ordering::SeqCst),
            pending: self.pending(),
            closed: self.is_closed(),
            adaptive,
            adjustments,
            rate_limited: self.inner.limiter.is_some(),
            metrics: self.inner.aggregator.snapshot(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.sender.lock().take();
        self.inner.closing.send_replace(true);
    }
}

impl PoolInner {
    fn enqueue(&self, label: Option<String>, item: Arc<dyn WorkItem>) -> Result<TaskId> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(EngineError::PoolClosed);
        };
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(Job { id, label, item }).is_err() {
            self.finish_one();
            return Err(EngineError::PoolClosed);
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn spawn_generation(self: &Arc<Self>, id: u64, size: usize) -> Generation {
        let (retire, _) = watch::channel(false);
        let workers = (0..size)
            .map(|_| {
                let inner = Arc::clone(self);
                let retire = retire.subscribe();
                let closing = self.closing.subscribe();
                self.runtime.spawn(inner.work(retire, closing))
            })
            .collect();
        Generation {
            id,
            size,
            retire,
            workers,
        }
    }

    /// Swaps in a new generation of `size` workers.
    fn resize(self: &Arc<Self>, size: usize) {
        if self.sender.lock().is_none() {
            return;
        }
        let mut guard = self.generations.lock();
        let Some(generations) = guard.as_mut() else {
            return;
        };
        let from = generations.current.size;
        if from == size {
            return;
        }
        let id = generations.next_id;
        generations.next_id += 1;
        let next = self.spawn_generation(id, size);
        let old = std::mem::replace(&mut generations.current, next);
        old.retire.send_replace(true);
        tracing::debug!(generation = old.id, workers = old.size, "generation retired");
        generations.retired.push(old);
        generations.reap();
        tracing::info!(
            from,
            to = size,
            generation = id,
            retired = generations.retired.len(),
            "worker pool resized"
        );
    }

    async fn work(
        self: Arc<Self>,
        mut retire: watch::Receiver<bool>,
        mut closing: watch::Receiver<bool>,
    ) {
        loop {
            let job = tokio::select! {
                biased;
                _ = retire.wait_for(|retired| *retired) => break,
                job = self.next_job() => job,
            };
            let Some(job) = job else { break };
            if *closing.borrow() {
                self.finish_one();
                continue;
            }
            self.execute(job, &mut closing).await;
        }
    }

    async fn next_job(&self) -> Option<Job> {
        self.queue.lock().await.recv().await
    }

    async fn execute(self: &Arc<Self>, job: Job, closing: &mut watch::Receiver<bool>) {
        let started_at = SystemTime::now();

        if let Some(limiter) = &self.limiter {
            let granted = tokio::select! {
                granted = limiter.wait(self.config.rate_wait_timeout) => Some(granted),
                _ = closing.wait_for(|closed| *closed) => None,
            };
            match granted {
                None => {
                    self.finish_one();
                    return;
                }
                Some(false) => {
                    self.complete(ExecutionRecord {
                        task_id: job.id,
                        started_at,
                        duration_ms: 0.0,
                        outcome: Outcome::failure(
                            FailureKind::RateLimitTimeout,
                            "no rate limit permit within timeout",
                        ),
                        label: job.label,
                    });
                    return;
                }
                Some(true) => {}
            }
        }

        let started_at = SystemTime::now();
        let start = Instant::now();
        let item = Arc::clone(&job.item);
        let mut handle = tokio::spawn(async move { item.invoke().await });
        let outcome = match self.config.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => classify(joined),
                Err(_) => {
                    handle.abort();
                    Outcome::failure(
                        FailureKind::TaskTimeout,
                        format!("task exceeded {}", humanize(limit)),
                    )
                }
            },
            None => classify(handle.await),
        };
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.complete(ExecutionRecord {
            task_id: job.id,
            started_at,
            duration_ms,
            outcome,
            label: job.label,
        });
    }

    fn complete(self: &Arc<Self>, record: ExecutionRecord) {
        self.aggregator.record(&record);
        if self.config.collect_records {
            self.records.lock().push(record);
        }
        self.tick();
        self.finish_one();
    }

    /// Runs a controller evaluation if one is enabled, due, and not already
    /// running on another worker.
    fn tick(self: &Arc<Self>) {
        let Some(mut guard) = self.controller.try_lock() else {
            return;
        };
        let Some(ctrl) = guard.as_mut() else {
            return;
        };
        let now = Instant::now();
        if !ctrl.is_due(now) {
            return;
        }
        let window = self.aggregator.window(ctrl.window_span());
        if let Some(next) = ctrl.evaluate(now, &window) {
            self.resize(next);
        }
    }

    fn finish_one(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }
}

fn classify(joined: std::result::Result<Outcome, JoinError>) -> Outcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "work item panicked".to_string());
            Outcome::failure(FailureKind::Panicked, message)
        }
        Err(e) => Outcome::failure(FailureKind::of::<JoinError>(), e.to_string()),
    }
}

fn humanize(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Pool state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// Workers in the active generation.
    pub current_workers: usize,
    /// Lower size bound (1 without a controller).
    pub min_workers: usize,
    /// Upper size bound.
    pub max_workers: usize,
    /// Active generation plus retired generations still finishing work.
    pub live_generations: usize,
    /// Items accepted so far.
    pub submitted: u64,
    /// Items not yet completed or discarded.
    pub pending: usize,
    /// Whether the pool has been shut down.
    pub closed: bool,
    /// Whether the adaptive controller is enabled.
    pub adaptive: bool,
    /// Controller resize history.
    pub adjustments: Vec<AdjustmentRecord>,
    /// Whether a rate limiter is attached.
    pub rate_limited: bool,
    /// Aggregated execution metrics.
    pub metrics: MetricsSnapshot,
}
