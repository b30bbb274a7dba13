//! Node configuration.

use crate::error::{Error, Result};
use murmur_account::DebounceConfig;
use murmur_feed::SyncConfig;
use murmur_ledger::{Environment, MemoryNetworkConfig, WaitConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a Murmur node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Which community to connect to.
    pub environment: Environment,
    /// Directory for durable state (feed cursors).
    pub data_dir: PathBuf,
    /// Convergence waiting.
    pub wait: WaitConfig,
    /// Username lookup debounce.
    pub debounce: DebounceConfig,
    /// Feed scanning.
    pub sync: SyncConfig,
    /// Simulated community used in development.
    pub network: MemoryNetworkConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            data_dir: PathBuf::from("./murmur-data"),
            wait: WaitConfig::default(),
            debounce: DebounceConfig::default(),
            sync: SyncConfig::default(),
            network: MemoryNetworkConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("MURMUR_ENV") {
            config.environment = Environment::from_name(&name);
        }
        if let Some(dir) = lookup("MURMUR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(attempts) = parse::<u32>(&lookup, "MURMUR_WAIT_ATTEMPTS")? {
            if attempts == 0 {
                return Err(Error::Config("MURMUR_WAIT_ATTEMPTS must be at least 1".into()));
            }
            config.wait = config.wait.with_max_attempts(attempts);
        }
        if let Some(ms) = parse::<u64>(&lookup, "MURMUR_POLL_INTERVAL_MS")? {
            config.wait = config.wait.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse::<u64>(&lookup, "MURMUR_DEBOUNCE_MS")? {
            config.debounce = config.debounce.with_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = parse::<u64>(&lookup, "MURMUR_ROUND_INTERVAL_MS")? {
            if ms == 0 {
                return Err(Error::Config("MURMUR_ROUND_INTERVAL_MS must be positive".into()));
            }
            config.network = config.network.with_round_interval(Duration::from_millis(ms));
        }

        Ok(config)
    }

    /// Set the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Short timings for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            wait: WaitConfig::fast(),
            debounce: DebounceConfig::fast(),
            sync: SyncConfig::default(),
            network: MemoryNetworkConfig::fast(),
            ..Self::default()
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {} {:?}: {}", name, raw, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = NodeConfig::from_lookup(vars(&[])).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.wait.max_attempts, 60);
        assert_eq!(config.wait.poll_interval, Duration::from_millis(500));
        assert_eq!(config.debounce.delay, Duration::from_millis(150));
        assert_eq!(config.sync.page_size, 256);
    }

    #[test]
    fn reads_variables() {
        let config = NodeConfig::from_lookup(vars(&[
            ("MURMUR_ENV", "production"),
            ("MURMUR_DATA_DIR", "/tmp/murmur"),
            ("MURMUR_WAIT_ATTEMPTS", "10"),
            ("MURMUR_POLL_INTERVAL_MS", "250"),
            ("MURMUR_DEBOUNCE_MS", " 75 "),
            ("MURMUR_ROUND_INTERVAL_MS", "50"),
        ]))
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/murmur"));
        assert_eq!(config.wait.bound(), Duration::from_millis(2500));
        assert_eq!(config.debounce.delay, Duration::from_millis(75));
        assert_eq!(config.network.round_interval, Duration::from_millis(50));
    }

    #[test]
    fn rejects_bad_values() {
        for (name, value) in [
            ("MURMUR_WAIT_ATTEMPTS", "lots"),
            ("MURMUR_WAIT_ATTEMPTS", "0"),
            ("MURMUR_POLL_INTERVAL_MS", "-1"),
            ("MURMUR_ROUND_INTERVAL_MS", "0"),
        ] {
            let result = NodeConfig::from_lookup(vars(&[(name, value)]));
            assert!(matches!(result, Err(Error::Config(_))), "{}={}", name, value);
        }
    }
}
