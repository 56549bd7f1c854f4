use crate::{
    connect::ConnectPolicy,
    error::OpResult,
    transport::{ConnectOptions, Qos},
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment prefix for overrides, e.g. `NG_THING__CALL__TIMEOUT_MS=5000`.
pub const ENV_PREFIX: &str = "NG_THING";

/// Settings consumed by one [`crate::ThingOp`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThingOpConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub call: CallOptions,
    #[serde(default)]
    pub connect: ConnectPolicy,
    #[serde(default)]
    pub connection: ConnectOptions,
}

impl ThingOpConfig {
    /// Load from an optional file plus `NG_THING__*` environment overrides.
    pub fn load(path: Option<&str>) -> OpResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Sizing of the dispatch pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Worker task count (defaults to twice the available cores)
    #[serde(default = "DispatchConfig::default_workers")]
    pub workers: usize,
    /// Jobs that may wait for a worker before new ones are rejected
    #[serde(default = "DispatchConfig::default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            queue_capacity: Self::default_queue_capacity(),
        }
    }
}

impl DispatchConfig {
    fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(4)
    }

    fn default_queue_capacity() -> usize {
        1024
    }
}

/// Per-call settings of a call-style binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOptions {
    /// Reply deadline in milliseconds
    #[serde(default = "CallOptions::default_timeout_ms")]
    pub timeout_ms: u64,
    /// QoS used for both the reply subscription and request publishes
    #[serde(default)]
    pub qos: Qos,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            qos: Qos::default(),
        }
    }
}

impl CallOptions {
    fn default_timeout_ms() -> u64 {
        30_000
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ThingOpConfig::default();
        assert_eq!(config.call.timeout_ms, 30_000);
        assert_eq!(config.call.qos, Qos::AtLeastOnce);
        assert_eq!(config.connect.limit, None);
        assert_eq!(config.dispatch.queue_capacity, 1024);
        assert!(config.dispatch.workers >= 1);
        assert!(config.connection.clean_session);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: ThingOpConfig = serde_json::from_value(serde_json::json!({
            "call": {"timeout_ms": 100},
            "connect": {"limit": 3, "step_interval_ms": 1000, "max_interval_ms": 5000}
        }))
        .unwrap();
        assert_eq!(config.call.timeout_ms, 100);
        assert_eq!(config.connect, ConnectPolicy::limited(3, 1_000, 5_000));
        assert_eq!(config.connection.keep_alive_secs, 60);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = ThingOpConfig::load(None).unwrap();
        assert_eq!(config.call.timeout_ms, 30_000);
    }
}
