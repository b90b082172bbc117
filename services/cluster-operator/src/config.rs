use std::time::Duration;

use anyhow::{Context, Result};
use strato_reconcile::{
    RetryPolicy, DEFAULT_APPLY_ATTEMPTS, DEFAULT_FAILURE_WINDOW, DEFAULT_MAX_FAILED_PASSES,
    DEFAULT_RECONCILE_INTERVAL,
};

use crate::pipeline::{PipelineConfig, DEFAULT_DRAIN_HEARTBEAT_SECS};
use crate::stack::StackWaitConfig;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Run against the in-memory provider with a seeded demo cluster.
    pub dev_mode: bool,
    pub reconcile_interval: Duration,
    pub max_concurrent_clusters: usize,
    pub max_failed_passes: u32,
    pub failure_window: Duration,
    pub stack_wait: StackWaitConfig,
    pub retry: RetryPolicy,
    pub host_vpc_name: String,
    pub host_route_tables: Vec<String>,
    pub drain_heartbeat_timeout_secs: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = lookup("STRATO_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("STRATO_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let reconcile_interval = secs(
            &lookup,
            "STRATO_RECONCILE_INTERVAL_SECS",
            DEFAULT_RECONCILE_INTERVAL,
        )?;
        if reconcile_interval.is_zero() {
            anyhow::bail!("STRATO_RECONCILE_INTERVAL_SECS must be at least 1");
        }
        let max_concurrent_clusters = parse(&lookup, "STRATO_MAX_CONCURRENT_CLUSTERS", 4usize)?;
        if max_concurrent_clusters == 0 {
            anyhow::bail!("STRATO_MAX_CONCURRENT_CLUSTERS must be at least 1");
        }
        let max_failed_passes =
            parse(&lookup, "STRATO_MAX_FAILED_PASSES", DEFAULT_MAX_FAILED_PASSES)?;
        let failure_window = secs(&lookup, "STRATO_FAILURE_WINDOW_SECS", DEFAULT_FAILURE_WINDOW)?;

        let wait_defaults = StackWaitConfig::default();
        let stack_wait = StackWaitConfig {
            poll_interval: secs(
                &lookup,
                "STRATO_STACK_POLL_INTERVAL_SECS",
                wait_defaults.poll_interval,
            )?,
            timeout: secs(&lookup, "STRATO_STACK_TIMEOUT_SECS", wait_defaults.timeout)?,
        };
        stack_wait.validate()?;

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse(&lookup, "STRATO_RETRY_MAX_ATTEMPTS", DEFAULT_APPLY_ATTEMPTS)?,
            initial_delay: millis(
                &lookup,
                "STRATO_RETRY_INITIAL_DELAY_MS",
                retry_defaults.initial_delay,
            )?,
            max_delay: millis(&lookup, "STRATO_RETRY_MAX_DELAY_MS", retry_defaults.max_delay)?,
            ..retry_defaults
        };
        if retry.max_attempts == 0 {
            anyhow::bail!("STRATO_RETRY_MAX_ATTEMPTS must be at least 1");
        }

        let pipeline_defaults = PipelineConfig::default();
        let host_vpc_name =
            lookup("STRATO_HOST_VPC_NAME").unwrap_or(pipeline_defaults.host_vpc_name);
        let host_route_tables = lookup("STRATO_HOST_ROUTE_TABLES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(pipeline_defaults.host_route_tables);
        let drain_heartbeat_timeout_secs = parse(
            &lookup,
            "STRATO_DRAIN_HEARTBEAT_SECS",
            DEFAULT_DRAIN_HEARTBEAT_SECS,
        )?;

        Ok(Self {
            log_level,
            dev_mode,
            reconcile_interval,
            max_concurrent_clusters,
            max_failed_passes,
            failure_window,
            stack_wait,
            retry,
            host_vpc_name,
            host_route_tables,
            drain_heartbeat_timeout_secs,
        })
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            host_vpc_name: self.host_vpc_name.clone(),
            host_route_tables: self.host_route_tables.clone(),
            stack_wait: self.stack_wait.clone(),
            retry: self.retry.clone(),
            drain_heartbeat_timeout_secs: self.drain_heartbeat_timeout_secs,
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            interval: self.reconcile_interval,
            max_concurrent: self.max_concurrent_clusters,
            max_failed_passes: self.max_failed_passes,
            failure_window: self.failure_window,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(!config.dev_mode);
        assert_eq!(config.reconcile_interval, DEFAULT_RECONCILE_INTERVAL);
        assert_eq!(config.retry.max_attempts, DEFAULT_APPLY_ATTEMPTS);
        assert_eq!(config.pipeline().host_vpc_name, "host");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("STRATO_DEV", "TRUE"),
            ("STRATO_RECONCILE_INTERVAL_SECS", "5"),
            ("STRATO_HOST_ROUTE_TABLES", "a, b,,c"),
            ("STRATO_RETRY_INITIAL_DELAY_MS", "50"),
        ])
        .unwrap();
        assert!(config.dev_mode);
        assert_eq!(config.worker().interval, Duration::from_secs(5));
        assert_eq!(config.host_route_tables, vec!["a", "b", "c"]);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = config(&[("STRATO_MAX_FAILED_PASSES", "many")]).unwrap_err();
        assert!(err.to_string().contains("STRATO_MAX_FAILED_PASSES"));

        assert!(config(&[("STRATO_STACK_POLL_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("STRATO_RETRY_MAX_ATTEMPTS", "0")]).is_err());

        let err = config(&[("STRATO_RECONCILE_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("STRATO_RECONCILE_INTERVAL_SECS"));
        assert!(config(&[("STRATO_MAX_CONCURRENT_CLUSTERS", "0")]).is_err());
    }
}
