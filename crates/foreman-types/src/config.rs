//! Global configuration for the Foreman platform.
//!
//! `ForemanConfig` represents the top-level `foreman.toml` controlling the
//! channel bind addresses, key material location, and worker pool size.
//! All fields have sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from `foreman.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForemanConfig {
    /// Bind address of the requests channel (workflow dispatch + readiness).
    #[serde(default = "default_requests_addr")]
    pub requests_addr: String,

    /// Bind address of the results channel (event stream fan-in).
    #[serde(default = "default_results_addr")]
    pub results_addr: String,

    /// Bind address of the control channel (pause/resume/trigger).
    #[serde(default = "default_control_addr")]
    pub control_addr: String,

    /// Directory holding `server.key` and `client.key`.
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    /// Number of worker processes the controller spawns.
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Sleep between empty non-blocking channel polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capacity of the in-process event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_requests_addr() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_results_addr() -> String {
    "127.0.0.1:5556".to_string()
}

fn default_control_addr() -> String {
    "127.0.0.1:5557".to_string()
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("keys")
}

fn default_workers() -> u32 {
    4
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            requests_addr: default_requests_addr(),
            results_addr: default_results_addr(),
            control_addr: default_control_addr(),
            key_dir: default_key_dir(),
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ForemanConfig::default();
        assert_eq!(config.requests_addr, "127.0.0.1:5555");
        assert_eq!(config.results_addr, "127.0.0.1:5556");
        assert_eq!(config.control_addr, "127.0.0.1:5557");
        assert_eq!(config.key_dir, PathBuf::from("keys"));
        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn test_config_deserialize_empty_uses_defaults() {
        let config: ForemanConfig = toml::from_str("").unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.requests_addr, "127.0.0.1:5555");
    }

    #[test]
    fn test_config_deserialize_with_values() {
        let toml_str = r#"
requests_addr = "127.0.0.1:7555"
workers = 2
key_dir = "/etc/foreman/keys"
"#;
        let config: ForemanConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.requests_addr, "127.0.0.1:7555");
        assert_eq!(config.workers, 2);
        assert_eq!(config.key_dir, PathBuf::from("/etc/foreman/keys"));
        // untouched fields keep their defaults
        assert_eq!(config.results_addr, "127.0.0.1:5556");
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = ForemanConfig {
            workers: 8,
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: ForemanConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.workers, 8);
        assert_eq!(parsed.control_addr, config.control_addr);
    }
}
