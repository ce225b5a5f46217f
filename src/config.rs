//! Configuration Module
//!
//! Loads store, cache and lock settings from environment variables.

use std::env;
use std::time::Duration;

use redis::IntoConnectionInfo;

use crate::error::{CacheError, Result};

/// Default upper bound of the random jitter added to deadline inserts.
pub const DEFAULT_JITTER_MAX_SECS: u64 = 1000;

/// Default reserved prefix for lock keys.
pub const DEFAULT_LOCK_PREFIX: &str = "DistributedLock:";

/// Store, cache and lock configuration.
///
/// All values except the connection string have defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection string, e.g. `redis://127.0.0.1:6379`
    pub connection_string: Option<String>,
    /// Logical database index selected after connecting
    pub db_index: i64,
    /// Optional label for the configured database, used in logs only
    pub db_name: Option<String>,
    /// Upper bound in seconds of the jitter added to deadline inserts
    pub jitter_max_secs: u64,
    /// Interval between lock acquisition attempts in milliseconds
    pub lock_poll_interval_ms: u64,
    /// Prefix separating lock keys from cache keys
    pub lock_key_prefix: String,
    /// Delay before a losing cache-aside caller re-reads the cache
    pub retry_delay_ms: u64,
    /// HTTP port for the demo service
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_CONNECTION_STRING` - Store connection string (required)
    /// - `REDIS_DB_INDEX` - Logical database index (default: 0)
    /// - `REDIS_DB_NAME` - Database label (optional)
    /// - `CACHE_JITTER_MAX_SECS` - Deadline jitter bound (default: 1000)
    /// - `LOCK_POLL_INTERVAL_MS` - Lock poll interval (default: 50)
    /// - `LOCK_KEY_PREFIX` - Lock key namespace (default: `DistributedLock:`)
    /// - `CACHE_RETRY_DELAY_MS` - Cache-aside retry delay (default: 100)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a Config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            connection_string: lookup("REDIS_CONNECTION_STRING"),
            db_index: lookup("REDIS_DB_INDEX")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.db_index),
            db_name: lookup("REDIS_DB_NAME").filter(|v| !v.trim().is_empty()),
            jitter_max_secs: lookup("CACHE_JITTER_MAX_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.jitter_max_secs),
            lock_poll_interval_ms: lookup("LOCK_POLL_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.lock_poll_interval_ms),
            lock_key_prefix: lookup("LOCK_KEY_PREFIX").unwrap_or(defaults.lock_key_prefix),
            retry_delay_ms: lookup("CACHE_RETRY_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_delay_ms),
            server_port: lookup("SERVER_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
        }
    }

    /// Sets the connection string.
    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    /// Checks that the configuration describes a usable store.
    ///
    /// Returns the trimmed connection string on success.
    pub fn validate(&self) -> Result<&str> {
        let conn = self
            .connection_string
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CacheError::Configuration("no valid Redis connection string configured".into())
            })?;

        conn.into_connection_info().map_err(|e| {
            CacheError::Configuration(format!("invalid Redis connection string: {e}"))
        })?;

        if self.db_index < 0 {
            return Err(CacheError::Configuration(format!(
                "database index must not be negative, got {}",
                self.db_index
            )));
        }

        if self.lock_poll_interval_ms == 0 {
            return Err(CacheError::Configuration(
                "lock poll interval must be greater than zero".into(),
            ));
        }

        Ok(conn)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn jitter_max(&self) -> Duration {
        Duration::from_secs(self.jitter_max_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_string: None,
            db_index: 0,
            db_name: None,
            jitter_max_secs: DEFAULT_JITTER_MAX_SECS,
            lock_poll_interval_ms: 50,
            lock_key_prefix: DEFAULT_LOCK_PREFIX.to_string(),
            retry_delay_ms: 100,
            server_port: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.connection_string.is_none());
        assert_eq!(config.db_index, 0);
        assert_eq!(config.jitter_max_secs, 1000);
        assert_eq!(config.lock_poll_interval_ms, 50);
        assert_eq!(config.lock_key_prefix, "DistributedLock:");
        assert_eq!(config.retry_delay_ms, 100);
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = Config::from_lookup(lookup_from(&[
            ("REDIS_CONNECTION_STRING", "redis://127.0.0.1:6379"),
            ("REDIS_DB_INDEX", "3"),
            ("CACHE_JITTER_MAX_SECS", "60"),
            ("LOCK_POLL_INTERVAL_MS", "20"),
            ("LOCK_KEY_PREFIX", "lock:"),
        ]));

        assert_eq!(config.db_index, 3);
        assert_eq!(config.jitter_max_secs, 60);
        assert_eq!(config.lock_poll_interval(), Duration::from_millis(20));
        assert_eq!(config.lock_key_prefix, "lock:");
        assert_eq!(config.validate().unwrap(), "redis://127.0.0.1:6379");
    }

    #[test]
    fn test_config_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("REDIS_DB_INDEX", "three"),
            ("SERVER_PORT", "http"),
        ]));
        assert_eq!(config.db_index, 0);
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn test_validate_missing_connection_string() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_validate_blank_connection_string() {
        let config = Config::default().with_connection_string("   ");
        assert!(matches!(config.validate(), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_validate_bad_scheme() {
        let config = Config::default().with_connection_string("http://nope");
        assert!(matches!(config.validate(), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default().with_connection_string("redis://127.0.0.1/");
        config.lock_poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(CacheError::Configuration(_))));
    }
}
