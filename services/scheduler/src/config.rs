//! Configuration for the scheduler service.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use fnsched_schedule_decision::{AggregationStrategy, PriorityPolicyKind, SchedulerOptions};

/// Scheduler service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// is unset.
    pub log_level: String,

    /// Highest priority a request may carry.
    pub max_priority: u16,

    pub aggregation: AggregationStrategy,

    /// Label-affinity scoring in relaxed mode.
    pub relaxed: bool,

    pub priority_policy: PriorityPolicyKind,

    /// Quiet period after which pending requests are retried.
    pub resource_idle: Duration,

    pub mailbox_size: usize,

    /// TOML resource-view snapshot.
    pub resource_view: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            max_priority: 3,
            aggregation: AggregationStrategy::NoAggregate,
            relaxed: false,
            priority_policy: PriorityPolicyKind::Fifo,
            resource_idle: Duration::from_millis(30_000),
            mailbox_size: 1024,
            resource_view: None,
        }
    }
}

impl Config {
    /// Load configuration from `FNSCHED_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Ok(Self {
            log_level: parsed("FNSCHED_LOG_LEVEL").unwrap_or(defaults.log_level),
            max_priority: parse_or("FNSCHED_MAX_PRIORITY", parsed("FNSCHED_MAX_PRIORITY"), defaults.max_priority)?,
            aggregation: parse_or(
                "FNSCHED_AGGREGATION_STRATEGY",
                parsed("FNSCHED_AGGREGATION_STRATEGY"),
                defaults.aggregation,
            )?,
            relaxed: parse_or("FNSCHED_RELAXED", parsed("FNSCHED_RELAXED"), defaults.relaxed)?,
            priority_policy: parse_or(
                "FNSCHED_PRIORITY_POLICY",
                parsed("FNSCHED_PRIORITY_POLICY"),
                defaults.priority_policy,
            )?,
            resource_idle: parse_or::<u64>("FNSCHED_RESOURCE_IDLE_MS", parsed("FNSCHED_RESOURCE_IDLE_MS"), 30_000)
                .map(Duration::from_millis)?,
            mailbox_size: parse_or("FNSCHED_MAILBOX_SIZE", parsed("FNSCHED_MAILBOX_SIZE"), defaults.mailbox_size)?,
            resource_view: parsed("FNSCHED_RESOURCE_VIEW").map(PathBuf::from),
        })
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_priority: self.max_priority,
            aggregation: self.aggregation,
            policy: self.priority_policy,
        }
    }
}

fn parse_or<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {name}={raw}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config(&[]).unwrap(), Config::default());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("FNSCHED_MAX_PRIORITY", "20"),
            ("FNSCHED_AGGREGATION_STRATEGY", "relaxed"),
            ("FNSCHED_RELAXED", "true"),
            ("FNSCHED_PRIORITY_POLICY", "fairness"),
            ("FNSCHED_RESOURCE_IDLE_MS", "500"),
            ("FNSCHED_RESOURCE_VIEW", "/etc/fnsched/view.toml"),
        ])
        .unwrap();
        assert_eq!(config.max_priority, 20);
        assert_eq!(config.aggregation, AggregationStrategy::Relaxed);
        assert!(config.relaxed);
        assert_eq!(config.priority_policy, PriorityPolicyKind::Fairness);
        assert_eq!(config.resource_idle, Duration::from_millis(500));
        assert_eq!(config.resource_view, Some(PathBuf::from("/etc/fnsched/view.toml")));
        assert_eq!(config.scheduler_options().policy, PriorityPolicyKind::Fairness);
    }

    #[rstest]
    #[case("FNSCHED_MAX_PRIORITY", "-1")]
    #[case("FNSCHED_AGGREGATION_STRATEGY", "greedy")]
    #[case("FNSCHED_PRIORITY_POLICY", "lottery")]
    #[case("FNSCHED_RELAXED", "maybe")]
    #[case("FNSCHED_MAILBOX_SIZE", "lots")]
    fn test_invalid_values_are_rejected(#[case] name: &str, #[case] value: &str) {
        let err = config(&[(name, value)]).unwrap_err();
        assert!(err.to_string().contains(name));
    }

    #[test]
    fn test_blank_values_use_defaults() {
        assert_eq!(config(&[("FNSCHED_MAX_PRIORITY", "  ")]).unwrap().max_priority, 3);
    }
}
