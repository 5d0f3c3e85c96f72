//! Worker pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

/// Worker pool configuration
///
/// Immutable after the pool is constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Maximum concurrently active workers
    pub max_concurrent: usize,

    /// How often the health monitor sweeps for hung workers
    #[serde(with = "duration_millis")]
    pub health_check_interval: Duration,

    /// Maximum worker lifetime before the health monitor evicts it
    #[serde(with = "duration_millis")]
    pub max_worker_lifetime: Duration,

    /// Whether the health monitor runs at all
    pub auto_evict_hung_workers: bool,

    /// Maximum length of the payload excerpt attached to ERROR events
    pub error_excerpt_len: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            health_check_interval: Duration::from_secs(30),
            max_worker_lifetime: Duration::from_secs(300),
            auto_evict_hung_workers: true,
            error_excerpt_len: 200,
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of concurrently active workers
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the health check interval
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the maximum worker lifetime
    pub fn with_max_worker_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_worker_lifetime = lifetime;
        self
    }

    /// Enable or disable automatic eviction of hung workers
    pub fn with_auto_evict(mut self, enabled: bool) -> Self {
        self.auto_evict_hung_workers = enabled;
        self
    }

    /// Set the payload excerpt length for ERROR events
    pub fn with_error_excerpt_len(mut self, len: usize) -> Self {
        self.error_excerpt_len = len;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(PoolError::Configuration(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if self.auto_evict_hung_workers && self.health_check_interval.is_zero() {
            return Err(PoolError::Configuration(
                "health_check_interval must be non-zero when auto-eviction is enabled".into(),
            ));
        }
        if self.auto_evict_hung_workers && self.max_worker_lifetime.is_zero() {
            return Err(PoolError::Configuration(
                "max_worker_lifetime must be non-zero when auto-eviction is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
