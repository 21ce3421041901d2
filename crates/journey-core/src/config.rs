use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::gateway::RetryPolicy;

/// Tunables for the execution engine.
///
/// All durations are milliseconds so the struct can be deserialized from a
/// flat config file or environment layer without custom parsers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempt cap for retryable side effects (message sends, webhooks)
    pub max_delivery_attempts: u32,

    /// First retry backoff in milliseconds; doubles per attempt
    pub base_backoff_ms: u64,

    /// Upper bound on a single backoff sleep
    pub max_backoff_ms: u64,

    /// Scheduler polling granularity
    pub poll_interval_ms: u64,

    /// How long a worker may hold a run lease or a wake claim before it
    /// becomes reclaimable
    pub lease_ttl_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 30_000,
            poll_interval_ms: 1_000,
            lease_ttl_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Retry policy derived from the delivery tunables
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_delivery_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    /// Lease TTL as a [`Duration`]
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_delivery_attempts, 3);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_partial_deserialization() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"poll_interval_ms": 50}"#).unwrap();
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.lease_ttl_ms, 30_000);
    }
}
