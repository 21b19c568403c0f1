//! Simulated systems under test.
//!
//! # Toyota Way: Built-in Quality (品質の作り込み)
//! Quality cannot be inspected in; it must be built in. A target with a known
//! breaking point lets every search be checked against the right answer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cumbre_core::{Outcome, WorkItem};
use cumbre_ramp::Target;

use crate::chaos::{ChaosConfig, ChaosInjector};
use crate::error::{Result, TestError};

/// Target with fixed latency and a hard concurrency limit.
///
/// Requests beyond `capacity` in flight fail with `Overloaded`, so a ramp
/// search should settle right at the capacity.
#[derive(Debug)]
pub struct SimulatedTarget {
    latency: Duration,
    path_latency: BTreeMap<String, Duration>,
    capacity: Option<usize>,
    fail_every: Option<u64>,
    chaos: Option<ChaosInjector>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    hits: AtomicU64,
    failures: AtomicU64,
    path_hits: Mutex<BTreeMap<String, u64>>,
}

/// Decrements the in-flight counter even if the request is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedTarget {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> SimulatedTargetBuilder {
        SimulatedTargetBuilder::default()
    }

    /// Target that fails once more than `capacity` requests are in flight.
    ///
    /// # Errors
    /// Returns an error if `capacity` is zero.
    pub fn with_capacity(capacity: usize, latency: Duration) -> Result<Arc<Self>> {
        Self::builder().capacity(capacity).latency(latency).build()
    }

    /// Requests received.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Requests answered with a failure.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent requests observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Requests received per path.
    #[must_use]
    pub fn path_hits(&self) -> BTreeMap<String, u64> {
        self.path_hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wraps the target as a pool work item hitting it without a path.
    #[must_use]
    pub fn work(self: &Arc<Self>) -> Arc<dyn WorkItem> {
        Arc::new(SimulatedWork {
            target: Arc::clone(self),
        })
    }

    fn latency_for(&self, path: Option<&str>) -> Duration {
        path.and_then(|p| self.path_latency.get(p))
            .copied()
            .unwrap_or(self.latency)
    }

    fn fail(&self, kind: &str, message: String) -> Outcome {
        self.failures.fetch_add(1, Ordering::SeqCst);
        Outcome::task_failure(kind, message)
    }
}

#[async_trait]
impl Target for SimulatedTarget {
    #[allow(clippy::panic)] // panic injection is the point
    async fn hit(&self, path: Option<&str>) -> Outcome {
        let n = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(concurrent, Ordering::SeqCst);
        if let Some(path) = path {
            *self
                .path_hits
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(path.to_string())
                .or_insert(0) += 1;
        }

        if let Some(chaos) = &self.chaos {
            chaos.maybe_inject_latency().await;
            if chaos.should_panic() {
                panic!("chaos: injected panic on request {n}");
            }
        }
        tokio::time::sleep(self.latency_for(path)).await;

        if let Some(capacity) = self.capacity {
            if concurrent > capacity {
                return self.fail(
                    "Overloaded",
                    format!("{concurrent} concurrent requests exceed capacity {capacity}"),
                );
            }
        }
        if self.fail_every.is_some_and(|k| n % k == 0) {
            return self.fail("InjectedFailure", format!("request {n} failed by schedule"));
        }
        if self.chaos.as_ref().is_some_and(ChaosInjector::should_inject_error) {
            return self.fail("ChaosError", format!("chaos: injected error on request {n}"));
        }
        Outcome::Success
    }
}

struct SimulatedWork {
    target: Arc<SimulatedTarget>,
}

#[async_trait]
impl WorkItem for SimulatedWork {
    async fn invoke(&self) -> Outcome {
        self.target.hit(None).await
    }
}

/// Builder for [`SimulatedTarget`].
#[derive(Debug, Default)]
pub struct SimulatedTargetBuilder {
    latency: Duration,
    path_latency: BTreeMap<String, Duration>,
    capacity: Option<usize>,
    fail_every: Option<u64>,
    chaos: Option<ChaosConfig>,
}

impl SimulatedTargetBuilder {
    /// Base response time.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Response time for one path.
    #[must_use]
    pub fn path_latency(mut self, path: impl Into<String>, latency: Duration) -> Self {
        self.path_latency.insert(path.into(), latency);
        self
    }

    /// Concurrency above which requests fail.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Fails every `k`-th request deterministically.
    #[must_use]
    pub fn fail_every(mut self, k: u64) -> Self {
        self.fail_every = Some(k);
        self
    }

    /// Enables chaos injection (started immediately).
    #[must_use]
    pub fn chaos(mut self, config: ChaosConfig) -> Self {
        self.chaos = Some(config);
        self
    }

    /// Builds the target.
    ///
    /// # Errors
    /// Returns an error for a zero capacity or period, or invalid chaos config.
    pub fn build(self) -> Result<Arc<SimulatedTarget>> {
        if self.capacity == Some(0) {
            return Err(TestError::harness("capacity must be at least 1"));
        }
        if self.fail_every == Some(0) {
            return Err(TestError::harness("fail_every must be at least 1"));
        }
        let chaos = match self.chaos {
            Some(config) => {
                let injector = ChaosInjector::new(config)?;
                injector.start();
                Some(injector)
            }
            None => None,
        };
        Ok(Arc::new(SimulatedTarget {
            latency: self.latency,
            path_latency: self.path_latency,
            capacity: self.capacity,
            fail_every: self.fail_every,
            chaos,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            path_hits: Mutex::new(BTreeMap::new()),
        }))
    }
}
