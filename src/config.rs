//! Configuration Module
//!
//! Loads cache and retry defaults from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{CacheOptions, EvictionPolicy, DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::retry::{RetryOptions, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_STORAGE_DIR: &str = ".chainkit";

/// Runtime configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of cache entries
    pub cache_capacity: usize,
    /// Entry lifetime in milliseconds
    pub cache_ttl_ms: u64,
    pub cache_policy: EvictionPolicy,
    pub cache_namespace: String,
    /// Directory holding persisted cache slots
    pub storage_dir: PathBuf,
    pub retry_max: u32,
    pub retry_delay_ms: u64,
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_CAPACITY` - Maximum cache entries (default: 100)
    /// - `CACHE_TTL_MS` - Entry lifetime in milliseconds (default: 300000)
    /// - `CACHE_POLICY` - `lru`, `lfu`, `fifo` or `arbitrary` (default: lru)
    /// - `CACHE_NAMESPACE` - Persistence namespace (default: default)
    /// - `CACHE_STORAGE_DIR` - Persistence directory (default: .chainkit)
    /// - `RETRY_MAX` - Retry attempts (default: 3)
    /// - `RETRY_DELAY_MS` - Base retry delay in milliseconds (default: 1000)
    ///
    /// Unparseable or zero values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_capacity: parsed("CACHE_CAPACITY")
                .filter(|&c| c > 0)
                .unwrap_or(defaults.cache_capacity),
            cache_ttl_ms: parsed("CACHE_TTL_MS")
                .filter(|&t| t > 0)
                .unwrap_or(defaults.cache_ttl_ms),
            cache_policy: parsed("CACHE_POLICY").unwrap_or(defaults.cache_policy),
            cache_namespace: env::var("CACHE_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty())
                .unwrap_or(defaults.cache_namespace),
            storage_dir: env::var("CACHE_STORAGE_DIR")
                .ok()
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            retry_max: parsed("RETRY_MAX")
                .filter(|&r| r > 0)
                .unwrap_or(defaults.retry_max),
            retry_delay_ms: parsed("RETRY_DELAY_MS").unwrap_or(defaults.retry_delay_ms),
        }
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions::default()
            .with_capacity(self.cache_capacity)
            .with_ttl(Duration::from_millis(self.cache_ttl_ms))
            .with_policy(self.cache_policy)
            .with_namespace(self.cache_namespace.clone())
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions::new(self.retry_max, Duration::from_millis(self.retry_delay_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            cache_ttl_ms: DEFAULT_TTL.as_millis() as u64,
            cache_policy: EvictionPolicy::default(),
            cache_namespace: DEFAULT_NAMESPACE.to_string(),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            retry_max: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.cache_ttl_ms, 300_000);
        assert_eq!(config.cache_policy, EvictionPolicy::Lru);
        assert_eq!(config.cache_namespace, "default");
        assert_eq!(config.storage_dir, PathBuf::from(".chainkit"));
        assert_eq!(config.retry_max, 3);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_config_into_options() {
        let config = Config {
            cache_capacity: 7,
            cache_ttl_ms: 250,
            cache_policy: EvictionPolicy::Fifo,
            cache_namespace: "docs".into(),
            retry_max: 5,
            retry_delay_ms: 20,
            ..Config::default()
        };

        let cache = config.cache_options();
        assert_eq!(cache.capacity, 7);
        assert_eq!(cache.ttl, Duration::from_millis(250));
        assert_eq!(cache.policy, EvictionPolicy::Fifo);
        assert_eq!(cache.namespace, "docs");

        let retry = config.retry_options();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.delay, Duration::from_millis(20));
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for name in [
            "CACHE_CAPACITY",
            "CACHE_TTL_MS",
            "CACHE_POLICY",
            "CACHE_NAMESPACE",
            "CACHE_STORAGE_DIR",
            "RETRY_MAX",
            "RETRY_DELAY_MS",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.cache_ttl_ms, 300_000);
        assert_eq!(config.cache_policy, EvictionPolicy::Lru);
        assert_eq!(config.retry_max, 3);
    }
}
