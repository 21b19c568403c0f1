//! Chaos injection for resilience testing.
//!
//! # Reference
//! Netflix. (2012). Chaos Monkey. GitHub.
//! <https://github.com/Netflix/chaosmonkey>

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;

use crate::error::{Result, TestError};

/// Chaos injection configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaosConfig {
    /// Latency injection: (probability, delay).
    pub latency_injection: Option<(f64, Duration)>,
    /// Error injection probability.
    pub error_injection: Option<f64>,
    /// Panic injection probability.
    pub panic_injection: Option<f64>,
}

impl ChaosConfig {
    /// Latency injection only.
    #[must_use]
    pub fn latency(probability: f64, delay: Duration) -> Self {
        Self {
            latency_injection: Some((probability, delay)),
            ..Default::default()
        }
    }

    /// Error injection only.
    #[must_use]
    pub fn errors(probability: f64) -> Self {
        Self {
            error_injection: Some(probability),
            ..Default::default()
        }
    }

    /// Panic injection only.
    #[must_use]
    pub fn panics(probability: f64) -> Self {
        Self {
            panic_injection: Some(probability),
            ..Default::default()
        }
    }

    /// Checks that every probability lies in `[0, 1]`.
    ///
    /// # Errors
    /// Returns a chaos error naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("latency_injection", self.latency_injection.map(|(p, _)| p)),
            ("error_injection", self.error_injection),
            ("panic_injection", self.panic_injection),
        ];
        for (name, probability) in checks {
            if let Some(p) = probability {
                if !(0.0..=1.0).contains(&p) {
                    return Err(TestError::chaos(format!(
                        "{name} probability {p} is outside [0, 1]"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Decides, per request, whether to inject a fault.
#[derive(Debug)]
pub struct ChaosInjector {
    config: ChaosConfig,
    active: AtomicBool,
}

impl ChaosInjector {
    /// Creates an inactive injector.
    ///
    /// # Errors
    /// Returns an error if the config is invalid.
    pub fn new(config: ChaosConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            active: AtomicBool::new(false),
        })
    }

    /// Starts injecting.
    pub fn start(&self) {
        tracing::warn!(config = ?self.config, "starting chaos injection");
        self.active.store(true, Ordering::SeqCst);
    }

    /// Stops injecting.
    pub fn stop(&self) {
        tracing::info!("stopping chaos injection");
        self.active.store(false, Ordering::SeqCst);
    }

    /// Returns true if injection is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the chaos config.
    #[must_use]
    pub const fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Sleeps for the configured delay, with the configured probability.
    pub async fn maybe_inject_latency(&self) {
        if let Some((probability, delay)) = self.config.latency_injection {
            if self.roll(probability) {
                tracing::debug!(?delay, "injecting latency");
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Returns true if this request should fail.
    #[must_use]
    pub fn should_inject_error(&self) -> bool {
        self.config.error_injection.is_some_and(|p| self.roll(p))
    }

    /// Returns true if this request should panic.
    #[must_use]
    pub fn should_panic(&self) -> bool {
        self.config.panic_injection.is_some_and(|p| self.roll(p))
    }

    fn roll(&self, probability: f64) -> bool {
        self.is_active() && rand::rng().random_bool(probability)
    }
}
