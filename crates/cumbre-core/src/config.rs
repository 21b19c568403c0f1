//! Engine configuration types.
//!
//! Per Iron Lotus Framework: Configuration is validated at load time (Poka-Yoke),
//! with sensible defaults and clear error messages. Durations are written in
//! human-readable form (`"2s"`, `"500ms"`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Complete engine configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rate limiter attached to the pool, if any.
    #[serde(default)]
    pub limiter: Option<RateLimiterConfig>,

    /// Worker pool bounds.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Adaptive concurrency feedback loop, if enabled.
    #[serde(default)]
    pub adaptive: Option<AdaptiveConfig>,

    /// Ramp search parameters.
    #[serde(default)]
    pub ramp: RampConfig,
}

impl EngineConfig {
    /// Validates every section.
    ///
    /// # Errors
    /// Returns an error if any section is invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(limiter) = &self.limiter {
            limiter.validate()?;
        }
        self.pool.validate()?;
        if let Some(adaptive) = &self.adaptive {
            adaptive.validate()?;
        }
        self.ramp.validate()
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// Returns an error if the document cannot be parsed or is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EngineError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("failed to read config: {e}")))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }
}

/// Rate limiting algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterMode {
    /// Exact, evenly spaced grants.
    #[default]
    Fixed,
    /// Bursts up to capacity, refilled continuously.
    TokenBucket,
}

impl fmt::Display for LimiterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::TokenBucket => write!(f, "token_bucket"),
        }
    }
}

impl FromStr for LimiterMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "token_bucket" => Ok(Self::TokenBucket),
            other => Err(EngineError::config(format!(
                "unknown limiter mode '{other}' (expected fixed or token_bucket)"
            ))),
        }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Algorithm.
    #[serde(default)]
    pub mode: LimiterMode,

    /// Permits per window.
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Window the rate applies to.
    #[serde(default = "default_window", with = "duration_serde")]
    pub window: Duration,

    /// Token bucket ceiling; defaults to `rate`.
    #[serde(default)]
    pub burst_capacity: Option<u32>,
}

fn default_rate() -> u32 {
    10
}

fn default_window() -> Duration {
    Duration::from_secs(1)
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            mode: LimiterMode::default(),
            rate: default_rate(),
            window: default_window(),
            burst_capacity: None,
        }
    }
}

impl RateLimiterConfig {
    /// Fixed-interval limiter granting `rate` permits per `window`.
    #[must_use]
    pub fn fixed(rate: u32, window: Duration) -> Self {
        Self {
            mode: LimiterMode::Fixed,
            rate,
            window,
            burst_capacity: None,
        }
    }

    /// Token bucket granting `rate` permits per `window`.
    #[must_use]
    pub fn token_bucket(rate: u32, window: Duration) -> Self {
        Self {
            mode: LimiterMode::TokenBucket,
            rate,
            window,
            burst_capacity: None,
        }
    }

    /// Sets an explicit burst capacity.
    #[must_use]
    pub fn with_burst(mut self, capacity: u32) -> Self {
        self.burst_capacity = Some(capacity);
        self
    }

    /// Effective token bucket capacity.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.burst_capacity.unwrap_or(self.rate)
    }

    /// Validates the limiter settings.
    ///
    /// # Errors
    /// Returns an error if the rate, window or capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(EngineError::config("limiter rate must be greater than 0"));
        }
        if self.window.is_zero() {
            return Err(EngineError::config("limiter window must be non-zero"));
        }
        if self.burst_capacity == Some(0) {
            return Err(EngineError::config(
                "burst_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of parallel workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long a worker waits for a rate-limit permit (unbounded if unset).
    #[serde(default, with = "duration_serde::option")]
    pub rate_wait_timeout: Option<Duration>,

    /// Per-task execution timeout (unbounded if unset).
    #[serde(default, with = "duration_serde::option")]
    pub task_timeout: Option<Duration>,

    /// Keep execution records for `wait_completion`.
    #[serde(default = "default_true")]
    pub collect_records: bool,
}

fn default_max_workers() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            rate_wait_timeout: None,
            task_timeout: None,
            collect_records: default_true(),
        }
    }
}

impl PoolConfig {
    /// Pool with the given number of workers and default settings.
    #[must_use]
    pub fn with_workers(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    /// Validates pool bounds.
    ///
    /// # Errors
    /// Returns an error if the pool would have no workers.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(EngineError::config("max_workers must be greater than 0"));
        }
        if self.task_timeout.is_some_and(|t| t.is_zero()) {
            return Err(EngineError::config("task_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Adaptive concurrency controller parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Throughput the controller steers towards. Without a target only the
    /// error-rate rule applies.
    #[serde(default)]
    pub target_tps: Option<f64>,

    /// Lower worker bound.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Upper worker bound; defaults to the pool's `max_workers`.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Error rate above which the pool shrinks.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,

    /// Minimum time between evaluations.
    #[serde(default = "default_adjustment_interval", with = "duration_serde")]
    pub adjustment_interval: Duration,

    /// Minimum time between two growth steps.
    #[serde(default = "default_growth_cooldown", with = "duration_serde")]
    pub growth_cooldown: Duration,
}

fn default_min_workers() -> usize {
    1
}

fn default_error_threshold() -> f64 {
    0.05
}

fn default_adjustment_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_growth_cooldown() -> Duration {
    Duration::from_secs(10)
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            target_tps: None,
            min_workers: default_min_workers(),
            max_workers: None,
            error_threshold: default_error_threshold(),
            adjustment_interval: default_adjustment_interval(),
            growth_cooldown: default_growth_cooldown(),
        }
    }
}

impl AdaptiveConfig {
    /// Controller steering towards `target_tps` within `[min, max]` workers.
    #[must_use]
    pub fn targeting(target_tps: f64, min_workers: usize, max_workers: usize) -> Self {
        Self {
            target_tps: Some(target_tps),
            min_workers,
            max_workers: Some(max_workers),
            ..Default::default()
        }
    }

    /// Sets the error threshold.
    #[must_use]
    pub fn with_error_threshold(mut self, threshold: f64) -> Self {
        self.error_threshold = threshold;
        self
    }

    /// Sets the adjustment interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.adjustment_interval = interval;
        self
    }

    /// Sets the growth cooldown.
    #[must_use]
    pub fn with_growth_cooldown(mut self, cooldown: Duration) -> Self {
        self.growth_cooldown = cooldown;
        self
    }

    /// Validates controller parameters.
    ///
    /// # Errors
    /// Returns an error if the bounds or thresholds are inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.min_workers == 0 {
            return Err(EngineError::config("min_workers must be at least 1"));
        }
        if let Some(max) = self.max_workers.filter(|max| *max < self.min_workers) {
            return Err(EngineError::config(format!(
                "max_workers ({max}) must be >= min_workers ({})",
                self.min_workers
            )));
        }
        if !(0.0..=1.0).contains(&self.error_threshold) {
            return Err(EngineError::config("error_threshold must be within [0, 1]"));
        }
        if self.adjustment_interval.is_zero() {
            return Err(EngineError::config("adjustment_interval must be non-zero"));
        }
        if self.target_tps.is_some_and(|t| !t.is_finite() || t <= 0.0) {
            return Err(EngineError::config("target_tps must be positive"));
        }
        Ok(())
    }
}

/// Level sequence strategy for ramp search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// `start, start+step, ...`.
    #[default]
    Linear,
    /// Roughly 1.5x growth plus `step`.
    Exponential,
    /// Bracketing level set around the midpoint and powers of two.
    Binary,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Exponential => write!(f, "exponential"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for Strategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            "binary" => Ok(Self::Binary),
            other => Err(EngineError::config(format!(
                "unsupported scaling strategy '{other}'"
            ))),
        }
    }
}

/// Ramp search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RampConfig {
    /// First level to try.
    #[serde(default = "default_start")]
    pub start: u32,

    /// Highest level to try.
    #[serde(default = "default_max_level")]
    pub max: u32,

    /// Increment used by the linear and exponential strategies.
    #[serde(default = "default_step")]
    pub step: u32,

    /// Measured duration of each trial.
    #[serde(default = "default_duration_per_step", with = "duration_serde")]
    pub duration_per_step: Duration,

    /// Highest acceptable error rate.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,

    /// Highest acceptable average latency.
    #[serde(default = "default_response_time_threshold", with = "duration_serde")]
    pub response_time_threshold: Duration,

    /// Level sequence strategy.
    #[serde(default)]
    pub strategy: Strategy,

    /// Paths to spread work across; empty means a single unlabeled target.
    #[serde(default)]
    pub paths: Vec<String>,

    /// Relative path weights. Paths without an entry are never chosen once any
    /// weight is given.
    #[serde(default)]
    pub path_weights: BTreeMap<String, u32>,

    /// Discarded warm-up trial run before each measured trial.
    #[serde(default, with = "duration_serde::option")]
    pub warmup: Option<Duration>,

    /// Pause between levels to let the target recover.
    #[serde(default = "default_cooldown", with = "duration_serde")]
    pub cooldown: Duration,

    /// Adaptive controller enabled inside each trial.
    #[serde(default)]
    pub adaptive: Option<AdaptiveConfig>,

    /// Permit wait timeout for rate-limited trials.
    #[serde(default, with = "duration_serde::option")]
    pub rate_wait_timeout: Option<Duration>,

    /// Per-request timeout inside trials.
    #[serde(default, with = "duration_serde::option")]
    pub task_timeout: Option<Duration>,
}

fn default_start() -> u32 {
    1
}

fn default_max_level() -> u32 {
    100
}

fn default_step() -> u32 {
    1
}

fn default_duration_per_step() -> Duration {
    Duration::from_secs(5)
}

fn default_response_time_threshold() -> Duration {
    Duration::from_millis(2000)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(1)
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            max: default_max_level(),
            step: default_step(),
            duration_per_step: default_duration_per_step(),
            error_threshold: default_error_threshold(),
            response_time_threshold: default_response_time_threshold(),
            strategy: Strategy::default(),
            paths: Vec::new(),
            path_weights: BTreeMap::new(),
            warmup: None,
            cooldown: default_cooldown(),
            adaptive: None,
            rate_wait_timeout: None,
            task_timeout: None,
        }
    }
}

impl RampConfig {
    /// Search over `[start, max]` with the given strategy.
    #[must_use]
    pub fn new(start: u32, max: u32, strategy: Strategy) -> Self {
        Self {
            start,
            max,
            strategy,
            ..Default::default()
        }
    }

    /// Sets the step.
    #[must_use]
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    /// Sets the measured duration per level.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_per_step = duration;
        self
    }

    /// Sets both stopping thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, error_rate: f64, response_time: Duration) -> Self {
        self.error_threshold = error_rate;
        self.response_time_threshold = response_time;
        self
    }

    /// Sets the pause between levels.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Enables a warm-up trial before each level.
    #[must_use]
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = Some(warmup);
        self
    }

    /// Spreads work across weighted paths.
    #[must_use]
    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the weight of one path.
    #[must_use]
    pub fn with_path_weight(mut self, path: impl Into<String>, weight: u32) -> Self {
        self.path_weights.insert(path.into(), weight);
        self
    }

    /// Enables the adaptive controller inside trials.
    #[must_use]
    pub fn with_adaptive(mut self, adaptive: AdaptiveConfig) -> Self {
        self.adaptive = Some(adaptive);
        self
    }

    /// Response time threshold in milliseconds.
    #[must_use]
    pub fn response_time_threshold_ms(&self) -> f64 {
        self.response_time_threshold.as_secs_f64() * 1000.0
    }

    /// Validates the search parameters.
    ///
    /// # Errors
    /// Returns an error if the range, step, thresholds or paths are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.start == 0 {
            return Err(EngineError::config("start must be at least 1"));
        }
        if self.start > self.max {
            return Err(EngineError::config(format!(
                "start ({}) must not exceed max ({})",
                self.start, self.max
            )));
        }
        if self.step == 0 {
            return Err(EngineError::config("step must be greater than 0"));
        }
        if self.duration_per_step.is_zero() {
            return Err(EngineError::config("duration_per_step must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.error_threshold) {
            return Err(EngineError::config("error_threshold must be within [0, 1]"));
        }
        if self.response_time_threshold.is_zero() {
            return Err(EngineError::config(
                "response_time_threshold must be non-zero",
            ));
        }
        for path in self.path_weights.keys() {
            if !self.paths.contains(path) {
                return Err(EngineError::config(format!(
                    "weighted path '{path}' is not in paths"
                )));
            }
        }
        if !self.path_weights.is_empty() && self.path_weights.values().all(|w| *w == 0) {
            return Err(EngineError::config("at least one path weight must be positive"));
        }
        if let Some(adaptive) = &self.adaptive {
            adaptive.validate()?;
        }
        Ok(())
    }
}

/// Serde helper for humantime durations.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a human-readable string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Deserializes a duration from a human-readable string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Same as the parent module, for optional durations.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        /// Serializes an optional duration.
        ///
        /// # Errors
        /// Returns an error if serialization fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => {
                    serializer.serialize_some(&humantime::format_duration(*d).to_string())
                }
                None => serializer.serialize_none(),
            }
        }

        /// Deserializes an optional duration.
        ///
        /// # Errors
        /// Returns an error if the string cannot be parsed.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
