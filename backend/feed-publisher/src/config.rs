//! Service configuration from environment variables.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Reconnect budget for the initial database connection
    pub max_connect_retries: u32,
    /// Outbox rows locked per poll
    pub batch_size: i64,
    /// Sleep between polls when the outbox is empty
    pub poll_interval: Duration,
    /// Consecutive failed iterations tolerated before aborting
    pub max_consecutive_errors: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connect_retries: 5,
            batch_size: 100,
            poll_interval: Duration::from_secs(5),
            max_consecutive_errors: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, fallback: u64| -> u64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        };

        Self {
            max_connect_retries: var(
                "PUBLISHER_CONNECT_RETRIES",
                defaults.max_connect_retries as u64,
            ) as u32,
            batch_size: var("PUBLISHER_BATCH_SIZE", defaults.batch_size as u64) as i64,
            poll_interval: Duration::from_secs(var(
                "PUBLISHER_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )),
            max_consecutive_errors: var(
                "PUBLISHER_MAX_CONSECUTIVE_ERRORS",
                defaults.max_consecutive_errors as u64,
            ) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn defaults_match_publisher_contract() {
        for var in [
            "PUBLISHER_CONNECT_RETRIES",
            "PUBLISHER_BATCH_SIZE",
            "PUBLISHER_POLL_INTERVAL_SECS",
            "PUBLISHER_MAX_CONSECUTIVE_ERRORS",
        ] {
            std::env::remove_var(var);
        }

        let config = Config::from_env();
        assert_eq!(config.max_connect_retries, 5);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_consecutive_errors, 100);
    }

    #[test]
    #[serial_test::serial]
    fn env_overrides_are_applied() {
        std::env::set_var("PUBLISHER_BATCH_SIZE", "25");
        std::env::set_var("PUBLISHER_POLL_INTERVAL_SECS", "1");

        let config = Config::from_env();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.poll_interval, Duration::from_secs(1));

        std::env::remove_var("PUBLISHER_BATCH_SIZE");
        std::env::remove_var("PUBLISHER_POLL_INTERVAL_SECS");
    }
}
