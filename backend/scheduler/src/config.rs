//! Scheduler configuration.
//!
//! Explicit, typed construction parameters. How they are loaded (files,
//! environment, a config service) is the host's concern; the scheduler only
//! ever sees this struct.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the trigger engine, the reconcile/sweep cadences, and
/// shutdown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Master switch for the periodic driver loops.
    pub enabled: bool,
    /// Number of task executions that may run concurrently.
    pub pool_size: usize,
    /// Prefix for the worker label attached to each task run's tracing span.
    pub worker_name_prefix: String,
    /// Wait for in-flight runs when shutting down.
    pub wait_for_tasks_on_shutdown: bool,
    /// Upper bound on the shutdown wait, in seconds.
    pub await_termination_secs: u64,
    /// Interval between reconcile passes, in milliseconds.
    pub refresh_interval_ms: u64,
    /// Cron expression driving the invalid-task sweep.
    pub clean_invalid_tasks_cron: String,
    /// Per-provider fetch timeout, in milliseconds.
    pub provider_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool_size: 10,
            worker_name_prefix: "task-scheduler-".to_string(),
            wait_for_tasks_on_shutdown: true,
            await_termination_secs: 60,
            refresh_interval_ms: 60_000,
            clean_invalid_tasks_cron: "0 0/10 * * * ?".to_string(),
            provider_timeout_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn await_termination(&self) -> Duration {
        Duration::from_secs(self.await_termination_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.clean_invalid_tasks_cron, "0 0/10 * * * ?");
        assert_eq!(config.await_termination(), Duration::from_secs(60));
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"refreshIntervalMs": 5000, "poolSize": 2}"#).unwrap();
        assert_eq!(config.refresh_interval(), Duration::from_millis(5000));
        assert_eq!(config.pool_size, 2);
        assert!(config.wait_for_tasks_on_shutdown);
        assert_eq!(config.worker_name_prefix, "task-scheduler-");
    }
}
