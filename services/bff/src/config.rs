//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `API_BASE` replaces the configured upstream base URL, and
//! `APP_ENV=development` drops the `Secure` attribute from session cookies so
//! the gateway can run over plain HTTP locally.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Inbound HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upstream API settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    pub api_base: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on a single refresh call; joiners see the same deadline
    #[serde(default = "default_refresh_deadline")]
    pub refresh_deadline_secs: u64,
}

/// Where server-held credentials live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Memory,
    File,
}

/// Session custody settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub backend: SessionBackend,
    /// JSON file for the `file` backend
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Memory,
            path: None,
            secure_cookies: default_secure_cookies(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_refresh_deadline() -> u64 {
    10
}

fn default_max_connections() -> usize {
    1000
}

fn default_secure_cookies() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_deadline(&self) -> Duration {
        Duration::from_secs(self.refresh_deadline_secs)
    }
}

impl SessionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(api_base) = std::env::var("API_BASE") {
            config.upstream.api_base = api_base;
        }
        if std::env::var("APP_ENV").is_ok_and(|env| env == "development") {
            config.session.secure_cookies = false;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.upstream.api_base.starts_with("http://")
            && !self.upstream.api_base.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "api_base must start with http:// or https://, got: {}",
                self.upstream.api_base
            )));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.upstream.refresh_deadline_secs == 0 {
            return Err(common::Error::Config(
                "refresh_deadline_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.session.sweep_interval_secs == 0 {
            return Err(common::Error::Config(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }

        if self.session.backend == SessionBackend::File && self.session.path.is_none() {
            return Err(common::Error::Config(
                "session backend \"file\" requires session.path".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("bff-gateway.toml")
    }
}
