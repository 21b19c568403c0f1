//! Permit arithmetic for the two limiting algorithms.
//!
//! Both gates are plain state machines over explicit instants. They never
//! sleep; the limiter asks how long to wait, sleeps, then records the grant.

use std::time::Duration;

use cumbre_core::LimiterMode;
use tokio::time::Instant;

/// Evenly spaced grants: one permit every `window / rate`.
#[derive(Debug, Clone)]
pub(crate) struct FixedInterval {
    spacing: Duration,
    last_grant: Option<Instant>,
}

impl FixedInterval {
    pub(crate) fn new(rate: u32, window: Duration) -> Self {
        Self {
            spacing: window / rate,
            last_grant: None,
        }
    }

    pub(crate) fn wait_for(&self, now: Instant) -> Duration {
        self.last_grant.map_or(Duration::ZERO, |last| {
            self.spacing
                .saturating_sub(now.saturating_duration_since(last))
        })
    }

    pub(crate) fn grant(&mut self, now: Instant) {
        self.last_grant = Some(now);
    }

    pub(crate) fn set_rate(&mut self, rate: u32, window: Duration) {
        self.spacing = window / rate;
    }
}

/// Token bucket refilled continuously at `capacity / window`.
#[derive(Debug, Clone)]
pub(crate) struct TokenBucket {
    capacity: f64,
    tokens: f64,
    window: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    /// A fresh bucket starts full.
    pub(crate) fn new(capacity: u32, window: Duration, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            tokens: capacity,
            window,
            last_refill: now,
        }
    }

    pub(crate) fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let added = elapsed.as_secs_f64() * self.capacity / self.window.as_secs_f64();
        self.tokens = (self.tokens + added).min(self.capacity);
        self.last_refill = now;
    }

    pub(crate) fn wait_for(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let secs = (1.0 - self.tokens) * self.window.as_secs_f64() / self.capacity;
            Duration::from_secs_f64(secs)
        }
    }

    pub(crate) fn grant(&mut self, now: Instant) {
        self.refill(now);
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    pub(crate) fn set_capacity(&mut self, capacity: u32, now: Instant) {
        self.refill(now);
        self.capacity = f64::from(capacity);
        self.tokens = self.tokens.min(self.capacity);
    }

    pub(crate) fn tokens(&self) -> f64 {
        self.tokens
    }

    pub(crate) fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Algorithm-specific state owned by the limiter.
#[derive(Debug, Clone)]
pub(crate) enum Gate {
    Fixed(FixedInterval),
    Bucket(TokenBucket),
}

impl Gate {
    pub(crate) fn new(
        mode: LimiterMode,
        rate: u32,
        capacity: u32,
        window: Duration,
        now: Instant,
    ) -> Self {
        match mode {
            LimiterMode::Fixed => Self::Fixed(FixedInterval::new(rate, window)),
            LimiterMode::TokenBucket => Self::Bucket(TokenBucket::new(capacity, window, now)),
        }
    }

    pub(crate) fn wait_for(&mut self, now: Instant) -> Duration {
        match self {
            Self::Fixed(gate) => gate.wait_for(now),
            Self::Bucket(bucket) => bucket.wait_for(now),
        }
    }

    pub(crate) fn grant(&mut self, now: Instant) {
        match self {
            Self::Fixed(gate) => gate.grant(now),
            Self::Bucket(bucket) => bucket.grant(now),
        }
    }
}
