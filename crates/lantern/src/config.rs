//! Service configuration

use anyhow::{Context, Result};
use lantern_lib::{HubConfig, PollerConfig, WatchConfig};
use serde::Deserialize;
use std::time::Duration;

/// Service configuration, read from `LANTERN_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct LanternConfig {
    /// HTTP port for the API, WebSocket and probes
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Metrics poll interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Outbound queue capacity per subscriber
    #[serde(default = "default_queue_capacity")]
    pub subscriber_queue_capacity: usize,

    /// Capacity of the channel between producers and the hub
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Re-establish watch streams that end
    #[serde(default = "default_resubscribe")]
    pub resubscribe: bool,

    #[serde(default = "default_initial_backoff")]
    pub resubscribe_initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub resubscribe_max_backoff_ms: u64,

    /// Include node usage in metrics batches
    #[serde(default)]
    pub poll_node_metrics: bool,
}

fn default_api_port() -> u16 {
    8000
}

fn default_metrics_interval() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    256
}

fn default_event_buffer() -> usize {
    256
}

fn default_resubscribe() -> bool {
    true
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

impl LanternConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix("LANTERN"))
    }

    fn from_env(source: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(source.try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            resubscribe: self.resubscribe,
            initial_backoff: Duration::from_millis(self.resubscribe_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.resubscribe_max_backoff_ms),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(self.metrics_interval_secs.max(1)),
            poll_nodes: self.poll_node_metrics,
            ..PollerConfig::default()
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.subscriber_queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("LANTERN").source(Some(map))
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = LanternConfig::from_env(env(&[])).unwrap();

        assert_eq!(config.api_port, 8000);
        assert_eq!(config.metrics_interval_secs, 5);
        assert_eq!(config.subscriber_queue_capacity, 256);
        assert!(config.resubscribe);
        assert!(!config.poll_node_metrics);
    }

    #[test]
    fn test_environment_overrides() {
        let config = LanternConfig::from_env(env(&[
            ("LANTERN_API_PORT", "9100"),
            ("LANTERN_RESUBSCRIBE", "false"),
            ("LANTERN_RESUBSCRIBE_MAX_BACKOFF_MS", "2000"),
            ("LANTERN_POLL_NODE_METRICS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.api_port, 9100);
        assert!(!config.watch_config().resubscribe);
        assert_eq!(config.watch_config().max_backoff, Duration::from_secs(2));
        assert!(config.poller_config().poll_nodes);
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        assert!(LanternConfig::from_env(env(&[("LANTERN_API_PORT", "not-a-port")])).is_err());
    }
}
