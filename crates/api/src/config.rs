//! Server configuration loaded from environment variables.

use saga::ProcessConfig;
use saga::config::env_or;

/// Bind address, log filter and process manager settings for the `api` binary.
///
/// `HOST` (default `0.0.0.0`), `PORT` (default `3000`) and `RUST_LOG` (default
/// `info`) are read here; the `ALLOCATOR_*` variables go to [`ProcessConfig`].
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub process: ProcessConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_or("HOST", defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: env_or("RUST_LOG", defaults.log_level),
            process: ProcessConfig::from_env(),
        }
    }

    /// The `host:port` string handed to the TCP listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            process: ProcessConfig::default(),
        }
    }
}
