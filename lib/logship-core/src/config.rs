//! Configuration for pools and emitters.
//!
//! All configuration is validated when the owning component is built. A component that constructs
//! successfully never fails at runtime due to misconfiguration.

use std::time::Duration;

use serde::Deserialize;
use snafu::Snafu;

/// Error type for configuration validation failures.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(context(suffix(false)), visibility(pub))]
pub enum ConfigError {
    /// A numeric setting that must be positive was zero.
    #[snafu(display("'{}' must be greater than zero", field))]
    NotPositive {
        /// Name of the offending setting.
        field: &'static str,
    },

    /// The resize factor was outside of the accepted range.
    #[snafu(display("resize_factor must be within (0.0, 1.0], got {}", value))]
    InvalidResizeFactor {
        /// The rejected value.
        value: f64,
    },

    /// The resize policy can never add an element to this pool.
    ///
    /// A policy whose computed increment rounds to zero can never unblock callers waiting on an
    /// empty pool, so the combination is rejected up front.
    #[snafu(display("resize policy yields zero-element increments for pool '{}'", pool_name))]
    IneffectiveResize {
        /// Name of the pool.
        pool_name: String,
    },
}

const fn default_initial_size() -> usize {
    16
}

const fn default_max_retries() -> usize {
    5
}

const fn default_resize_timeout() -> Duration {
    Duration::from_secs(1)
}

const fn default_recycler_initial_delay() -> Duration {
    Duration::from_secs(1)
}

const fn default_recycler_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_pool_name() -> String {
    "item_source_pool".to_string()
}

/// Configuration for an [`ItemSourcePool`][crate::pooling::ItemSourcePool].
#[derive(Clone, Debug, Deserialize)]
pub struct PoolConfig {
    /// Name of the pool, used in logs and metrics.
    ///
    /// Defaults to `item_source_pool`.
    #[serde(default = "default_pool_name")]
    pub name: String,

    /// Number of items created up front.
    ///
    /// May be zero, in which case the first acquisition triggers a resize. Defaults to 16.
    #[serde(default = "default_initial_size")]
    pub initial_size: usize,

    /// How long an acquiring caller waits for an in-flight resize on another task to complete
    /// before retrying.
    ///
    /// Defaults to 1 second.
    #[serde(default = "default_resize_timeout")]
    pub resize_timeout: Duration,

    /// Maximum number of acquisition attempts before the pool reports exhaustion.
    ///
    /// Defaults to 5.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the background recycler makes its first shrink pass.
    ///
    /// Defaults to 1 second.
    #[serde(default = "default_recycler_initial_delay")]
    pub recycler_initial_delay: Duration,

    /// Interval between background recycler shrink passes.
    ///
    /// Defaults to 10 seconds.
    #[serde(default = "default_recycler_interval")]
    pub recycler_interval: Duration,
}

impl PoolConfig {
    /// Creates a `PoolConfig` with the given name and all other settings at their defaults.
    pub fn with_name<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If any setting is out of range, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::NotPositive { field: "max_retries" });
        }
        if self.resize_timeout.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "resize_timeout",
            });
        }
        if self.recycler_interval.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "recycler_interval",
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: default_pool_name(),
            initial_size: default_initial_size(),
            resize_timeout: default_resize_timeout(),
            max_retries: default_max_retries(),
            recycler_initial_delay: default_recycler_initial_delay(),
            recycler_interval: default_recycler_interval(),
        }
    }
}

const fn default_batch_size() -> usize {
    1000
}

const fn default_delivery_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_shutdown_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_emitter_name() -> String {
    "batch_emitter".to_string()
}

/// Configuration for a [`BatchEmitter`][crate::batch::BatchEmitter].
#[derive(Clone, Debug, Deserialize)]
pub struct EmitterConfig {
    /// Name of the emitter, used in logs and metrics.
    ///
    /// Defaults to `batch_emitter`.
    #[serde(default = "default_emitter_name")]
    pub name: String,

    /// Number of items that triggers an immediate batch emission.
    ///
    /// Defaults to 1000.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time items wait before being emitted in a partial batch.
    ///
    /// Defaults to 1 second.
    #[serde(default = "default_delivery_interval")]
    pub delivery_interval: Duration,

    /// Default budget for flushing pending items during shutdown.
    ///
    /// Defaults to 5 seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,

    /// How often shutdown progress is reported while pending items are still being flushed.
    ///
    /// Defaults to 1 second.
    #[serde(default = "default_shutdown_poll_interval")]
    pub shutdown_poll_interval: Duration,
}

impl EmitterConfig {
    /// Creates an `EmitterConfig` with the given batch size and delivery interval, and all other
    /// settings at their defaults.
    pub fn new(batch_size: usize, delivery_interval: Duration) -> Self {
        Self {
            batch_size,
            delivery_interval,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If any setting is out of range, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::NotPositive { field: "batch_size" });
        }
        if self.delivery_interval.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "delivery_interval",
            });
        }
        if self.shutdown_poll_interval.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "shutdown_poll_interval",
            });
        }
        Ok(())
    }
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            name: default_emitter_name(),
            batch_size: default_batch_size(),
            delivery_interval: default_delivery_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            shutdown_poll_interval: default_shutdown_poll_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PoolConfig::default().validate().unwrap();
        EmitterConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_valued_settings_are_rejected() {
        let config = EmitterConfig::new(0, Duration::from_secs(1));
        assert_eq!(config.validate(), Err(ConfigError::NotPositive { field: "batch_size" }));

        let config = EmitterConfig::new(10, Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive {
                field: "delivery_interval"
            })
        );

        let config = PoolConfig {
            max_retries: 0,
            ..PoolConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NotPositive { field: "max_retries" }));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: EmitterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.delivery_interval, Duration::from_secs(1));

        let config: PoolConfig = serde_json::from_str(r#"{"name":"bulk_items","initial_size":4}"#).unwrap();
        assert_eq!(config.name, "bulk_items");
        assert_eq!(config.initial_size, 4);
        assert_eq!(config.max_retries, 5);
    }
}
