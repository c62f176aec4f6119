//! Server configuration loaded from environment variables

use anyhow::{anyhow, Result};
use std::net::SocketAddr;

pub const LISTEN_ADDR_ENV: &str = "DIRECTORY_LISTEN_ADDR";
pub const LOG_FORMAT_ENV: &str = "DIRECTORY_LOG_FORMAT";

/// Output format of the tracing subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Directory server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub listen_addr: SocketAddr,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], 4000).into(),
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup(LISTEN_ADDR_ENV) {
            config.listen_addr = addr
                .parse()
                .map_err(|e| anyhow!("Invalid {} '{}': {}", LISTEN_ADDR_ENV, addr, e))?;
        }

        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => return Err(anyhow!("Invalid {} '{}': expected text or json", LOG_FORMAT_ENV, other)),
            };
        }

        Ok(config)
    }
}
