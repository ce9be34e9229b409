//! Configuration for the keyed cache
//!
//! `CacheConfig` holds cache-wide settings. `ReadOptions` holds the policies
//! a single read applies to its key.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-key read policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Refetch when the consuming view regains foreground focus
    pub revalidate_on_focus: bool,

    /// Refetch when the network reconnects
    pub revalidate_on_reconnect: bool,

    /// Suppress duplicate producer invocations for the same key within this window
    pub deduping_interval: Duration,

    /// Whether a stale-marked entry with mounted subscribers refetches on its own
    /// or waits for the next explicit read
    pub revalidate_if_stale: bool,

    /// Retry failed background revalidations
    pub should_retry_on_error: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            revalidate_on_focus: true,
            revalidate_on_reconnect: true,
            deduping_interval: Duration::from_secs(2),
            revalidate_if_stale: true,
            should_retry_on_error: true,
        }
    }
}

impl ReadOptions {
    /// Options that never refetch on their own; only explicit reads hit the producer
    pub fn manual() -> Self {
        Self {
            revalidate_on_focus: false,
            revalidate_on_reconnect: false,
            revalidate_if_stale: false,
            should_retry_on_error: false,
            ..Default::default()
        }
    }

    pub fn revalidate_on_focus(mut self, enable: bool) -> Self {
        self.revalidate_on_focus = enable;
        self
    }

    pub fn revalidate_on_reconnect(mut self, enable: bool) -> Self {
        self.revalidate_on_reconnect = enable;
        self
    }

    pub fn deduping_interval(mut self, interval: Duration) -> Self {
        self.deduping_interval = interval;
        self
    }

    pub fn revalidate_if_stale(mut self, enable: bool) -> Self {
        self.revalidate_if_stale = enable;
        self
    }

    pub fn should_retry_on_error(mut self, enable: bool) -> Self {
        self.should_retry_on_error = enable;
        self
    }
}

/// Configuration for the keyed cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries; the least recently read unmounted entry goes first
    pub max_entries: usize,

    /// Options used when a read does not pass its own
    pub default_options: ReadOptions,

    /// How long an entry with no subscriber is kept before cleanup drops it
    pub gc_idle: Duration,

    /// Enable automatic cleanup of unmounted entries
    pub enable_auto_cleanup: bool,

    /// Interval for automatic cleanup checks
    pub cleanup_interval: Duration,

    /// Base delay before retrying a failed background revalidation
    pub error_retry_interval: Duration,

    /// Maximum retries for a failed background revalidation
    pub error_retry_count: u32,

    /// Retry jitter factor (0.0 - 1.0)
    pub retry_jitter: f64,

    /// Capacity of each key's event channel
    pub event_capacity: usize,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            default_options: ReadOptions::default(),
            gc_idle: Duration::from_secs(300),
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(60),
            error_retry_interval: Duration::from_secs(5),
            error_retry_count: 3,
            retry_jitter: 0.5,
            event_capacity: 16,
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than 0".to_string());
        }

        if self.retry_jitter < 0.0 || self.retry_jitter > 1.0 {
            return Err("retry_jitter must be between 0.0 and 1.0".to_string());
        }

        if self.cleanup_interval.is_zero() {
            return Err("cleanup_interval must be non-zero".to_string());
        }

        Ok(())
    }

    /// Delay before retry number `attempt` (0-based): exponential backoff with jitter
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.error_retry_interval.as_secs_f64() * f64::from(1u32 << attempt.min(8));
        if self.retry_jitter == 0.0 {
            return Duration::from_secs_f64(base);
        }

        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * self.retry_jitter;
        Duration::from_secs_f64((base * (1.0 + jitter)).max(0.0))
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_entries: Option<usize>,
    default_options: Option<ReadOptions>,
    gc_idle: Option<Duration>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    error_retry_interval: Option<Duration>,
    error_retry_count: Option<u32>,
    retry_jitter: Option<f64>,
    event_capacity: Option<usize>,
    enable_metrics: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set the options used by reads that don't pass their own
    pub fn default_options(mut self, options: ReadOptions) -> Self {
        self.default_options = Some(options);
        self
    }

    /// Set how long unmounted entries linger
    pub fn gc_idle(mut self, idle: Duration) -> Self {
        self.gc_idle = Some(idle);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set base retry delay
    pub fn error_retry_interval(mut self, interval: Duration) -> Self {
        self.error_retry_interval = Some(interval);
        self
    }

    /// Set maximum retry count
    pub fn error_retry_count(mut self, count: u32) -> Self {
        self.error_retry_count = Some(count);
        self
    }

    /// Set retry jitter factor (0.0 - 1.0)
    pub fn retry_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = Some(jitter);
        self
    }

    /// Set per-key event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            default_options: self.default_options.unwrap_or(defaults.default_options),
            gc_idle: self.gc_idle.unwrap_or(defaults.gc_idle),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            error_retry_interval: self
                .error_retry_interval
                .unwrap_or(defaults.error_retry_interval),
            error_retry_count: self.error_retry_count.unwrap_or(defaults.error_retry_count),
            retry_jitter: self.retry_jitter.unwrap_or(defaults.retry_jitter),
            event_capacity: self.event_capacity.unwrap_or(defaults.event_capacity),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}

/// Preset configurations
impl CacheConfig {
    /// Configuration for tests and tools: no background work, no retry delay
    pub fn immediate() -> Self {
        Self {
            enable_auto_cleanup: false,
            error_retry_interval: Duration::from_millis(10),
            error_retry_count: 0,
            retry_jitter: 0.0,
            default_options: ReadOptions::default().deduping_interval(Duration::ZERO),
            ..Default::default()
        }
    }

    /// Configuration for memory-constrained devices
    pub fn small() -> Self {
        Self {
            max_entries: 100,
            gc_idle: Duration::from_secs(60),
            ..Default::default()
        }
    }
}
