//! Process manager configuration loaded from environment variables.

use std::time::Duration;

/// Tuning knobs for the process manager and watchdog.
///
/// Reads from environment variables:
/// - `ALLOCATOR_MAX_CONCURRENCY` — in-flight ticket calls per allocator (default: `8`)
/// - `ALLOCATOR_SYNC_ATTEMPTS` — ticket list sync attempts per assignment (default: `3`)
/// - `ALLOCATOR_MAX_ROUNDS` — work rounds per start/execute call (default: `16`)
/// - `ALLOCATOR_WATCHDOG_INTERVAL_SECS` — seconds between watchdog scans (default: `5`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    pub max_concurrency: usize,
    pub sync_attempts: usize,
    pub max_rounds: usize,
    pub watchdog_interval: Duration,
}

impl ProcessConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrency: env_or("ALLOCATOR_MAX_CONCURRENCY", defaults.max_concurrency).max(1),
            sync_attempts: env_or("ALLOCATOR_SYNC_ATTEMPTS", defaults.sync_attempts).max(1),
            max_rounds: env_or("ALLOCATOR_MAX_ROUNDS", defaults.max_rounds).max(1),
            watchdog_interval: Duration::from_secs(
                env_or(
                    "ALLOCATOR_WATCHDOG_INTERVAL_SECS",
                    defaults.watchdog_interval.as_secs(),
                )
                .max(1),
            ),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            sync_attempts: 3,
            max_rounds: 16,
            watchdog_interval: Duration::from_secs(5),
        }
    }
}

/// Parses `key` from the environment, or returns `default` when unset or malformed.
pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ProcessConfig::default();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.sync_attempts, 3);
        assert_eq!(config.max_rounds, 16);
        assert_eq!(config.watchdog_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_unset_values_fall_back() {
        assert_eq!(env_or("ALLOCATOR_TEST_UNSET_VARIABLE", 7usize), 7);
    }
}
