//! Environment-driven configuration for the rule manager.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(key, default_secs))
}

/// Tunables for the rule manager and everything it spawns.
///
/// All knobs come from environment variables with production defaults;
/// call [`load_dotenv`] first when a `.env` file should apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Cadence of the store-polling reconcile loop.
    pub poll_interval: Duration,
    /// Process-wide ingestion-lag offset subtracted from "now" when
    /// computing evaluation windows. Rules may override it individually.
    pub eval_delay: Duration,
    /// Floor for rule evaluation intervals; shorter intervals are rejected
    /// at validation.
    pub min_interval: Duration,
    /// Maximum concurrent backend queries across all rule tasks.
    pub gate_size: usize,
    /// How long `stop()` waits for in-flight evaluations before abandoning
    /// them.
    pub grace_period: Duration,
    /// Consecutive query failures before instances are flagged NoData.
    pub failure_threshold: u32,
    /// Consecutive evaluations a label set may be absent before its alert
    /// instance is pruned.
    pub retention_misses: u32,
    /// How often a sustained-Firing instance is re-notified.
    pub repeat_interval: Duration,
    /// Added to a rule's interval to produce its cache entry TTL.
    pub cache_ttl_margin: Duration,
    /// Bounded capacity of the query result cache.
    pub cache_capacity: usize,
    /// Notification delivery attempts before giving up on a batch.
    pub delivery_attempts: u32,
    /// Base backoff between delivery attempts (doubles each retry).
    pub delivery_backoff: Duration,
}

impl ManagerConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            poll_interval: env_secs("VIGIL_POLL_INTERVAL_SECS", 60),
            eval_delay: env_secs("VIGIL_EVAL_DELAY_SECS", 120),
            min_interval: env_secs("VIGIL_MIN_INTERVAL_SECS", 15),
            gate_size: env_u64("VIGIL_MAX_CONCURRENT_QUERIES", 8) as usize,
            grace_period: env_secs("VIGIL_SHUTDOWN_GRACE_SECS", 15),
            failure_threshold: env_u64("VIGIL_NODATA_AFTER_FAILURES", 3) as u32,
            retention_misses: env_u64("VIGIL_STALE_AFTER_MISSES", 5) as u32,
            repeat_interval: env_secs("VIGIL_REPEAT_INTERVAL_SECS", 4 * 3_600),
            cache_ttl_margin: env_secs("VIGIL_CACHE_TTL_MARGIN_SECS", 30),
            cache_capacity: env_u64("VIGIL_CACHE_CAPACITY", 4_096) as usize,
            delivery_attempts: env_u64("VIGIL_DELIVERY_ATTEMPTS", 5) as u32,
            delivery_backoff: Duration::from_millis(env_u64(
                "VIGIL_DELIVERY_BACKOFF_MS",
                500,
            )),
        }
    }

    /// Print a summary for startup logs (an env var typo shows up here,
    /// not at 3am).
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  scheduling:  poll={:?}, eval_delay={:?}, min_interval={:?}",
            self.poll_interval,
            self.eval_delay,
            self.min_interval
        );
        tracing::info!(
            "  concurrency: gate={}, grace={:?}",
            self.gate_size,
            self.grace_period
        );
        tracing::info!(
            "  alerting:    nodata_after={}, stale_after={}, repeat={:?}",
            self.failure_threshold,
            self.retention_misses,
            self.repeat_interval
        );
        tracing::info!(
            "  cache:       capacity={}, ttl_margin={:?}",
            self.cache_capacity,
            self.cache_ttl_margin
        );
        tracing::info!(
            "  delivery:    attempts={}, backoff={:?}",
            self.delivery_attempts,
            self.delivery_backoff
        );
    }

    /// Compact defaults for tests: short timings, tiny gate.
    pub fn for_tests() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            eval_delay: Duration::ZERO,
            min_interval: Duration::from_millis(10),
            gate_size: 2,
            grace_period: Duration::from_millis(500),
            failure_threshold: 3,
            retention_misses: 5,
            repeat_interval: Duration::from_secs(3_600),
            cache_ttl_margin: Duration::from_secs(30),
            cache_capacity: 64,
            delivery_attempts: 3,
            delivery_backoff: Duration::from_millis(10),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        std::env::set_var("VIGIL_NODATA_AFTER_FAILURES", "7");
        let cfg = ManagerConfig::from_env();
        assert_eq!(cfg.failure_threshold, 7);
        std::env::remove_var("VIGIL_NODATA_AFTER_FAILURES");
    }

    #[test]
    fn unparseable_env_falls_back() {
        std::env::set_var("VIGIL_STALE_AFTER_MISSES", "not-a-number");
        let cfg = ManagerConfig::from_env();
        assert_eq!(cfg.retention_misses, 5);
        std::env::remove_var("VIGIL_STALE_AFTER_MISSES");
    }
}
