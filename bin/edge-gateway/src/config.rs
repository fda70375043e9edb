//! Process configuration read from `GATEWAY_*` environment variables.

use gateway_proxy::{ClientIpSource, DEFAULT_MAX_BODY_BYTES};
use hyper::header::HeaderName;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_ADMIN_ADDR: &str = "0.0.0.0:9090";
const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var}: invalid socket address {value:?}")]
    InvalidAddr { var: &'static str, value: String },

    #[error("{var}: expected a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("GATEWAY_UPSTREAM_TIMEOUT_SECS must be greater than zero")]
    ZeroTimeout,

    #[error("GATEWAY_CLIENT_IP_HEADER: invalid header name {0:?}")]
    InvalidHeader(String),

    #[error("GATEWAY_LOG_FORMAT: expected `text` or `json`, got {0:?}")]
    InvalidLogFormat(String),

    #[error("public and admin listeners cannot share {0}")]
    AddrConflict(SocketAddr),
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where token records and rules are read from
#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    /// Remote key/value REST store
    Remote { url: String, token: Option<String> },
    /// In-memory store, optionally seeded from a YAML/JSON file
    Memory { seed_file: Option<PathBuf> },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) listen_addr: SocketAddr,
    pub(crate) admin_addr: SocketAddr,
    pub(crate) upstream_timeout: Duration,
    pub(crate) max_redirects: usize,
    pub(crate) max_body_bytes: usize,
    pub(crate) client_ip: ClientIpSource,
    pub(crate) store: StoreConfig,
    pub(crate) log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            admin_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            client_ip: ClientIpSource::Peer,
            store: StoreConfig::Memory { seed_file: None },
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value
    /// if set. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let listen_addr = parse_addr(
            "GATEWAY_LISTEN_ADDR",
            get("GATEWAY_LISTEN_ADDR").as_deref().unwrap_or(DEFAULT_LISTEN_ADDR),
        )?;
        let admin_addr = parse_addr(
            "GATEWAY_ADMIN_ADDR",
            get("GATEWAY_ADMIN_ADDR").as_deref().unwrap_or(DEFAULT_ADMIN_ADDR),
        )?;

        let upstream_timeout = match get("GATEWAY_UPSTREAM_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number("GATEWAY_UPSTREAM_TIMEOUT_SECS", &v)?),
            None => DEFAULT_UPSTREAM_TIMEOUT,
        };
        let max_redirects = match get("GATEWAY_MAX_REDIRECTS") {
            Some(v) => parse_number("GATEWAY_MAX_REDIRECTS", &v)? as usize,
            None => DEFAULT_MAX_REDIRECTS,
        };
        let max_body_bytes = match get("GATEWAY_MAX_BODY_BYTES") {
            Some(v) => parse_number("GATEWAY_MAX_BODY_BYTES", &v)? as usize,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        let client_ip = match get("GATEWAY_CLIENT_IP_HEADER") {
            Some(name) => ClientIpSource::Header(
                HeaderName::from_bytes(name.trim().as_bytes())
                    .map_err(|_| ConfigError::InvalidHeader(name.clone()))?,
            ),
            None => ClientIpSource::Peer,
        };

        let store = match get("GATEWAY_STORE_URL") {
            Some(url) => StoreConfig::Remote {
                url,
                token: get("GATEWAY_STORE_TOKEN"),
            },
            None => StoreConfig::Memory {
                seed_file: get("GATEWAY_SEED_FILE").map(PathBuf::from),
            },
        };

        let log_format = match get("GATEWAY_LOG_FORMAT") {
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => return Err(ConfigError::InvalidLogFormat(v)),
            },
            None => LogFormat::Text,
        };

        let config = Self {
            listen_addr,
            admin_addr,
            upstream_timeout,
            max_redirects,
            max_body_bytes,
            client_ip,
            store,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the public listener address.
    #[cfg(test)]
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Override the admin listener address.
    #[cfg(test)]
    pub fn with_admin_addr(mut self, addr: SocketAddr) -> Self {
        self.admin_addr = addr;
        self
    }

    /// Override the forward deadline.
    #[cfg(test)]
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    #[cfg(test)]
    pub fn with_client_ip(mut self, source: ClientIpSource) -> Self {
        self.client_ip = source;
        self
    }

    #[cfg(test)]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.listen_addr == self.admin_addr {
            return Err(ConfigError::AddrConflict(self.listen_addr));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    pub fn upstream_timeout(&self) -> Duration {
        self.upstream_timeout
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn client_ip(&self) -> &ClientIpSource {
        &self.client_ip
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

fn parse_addr(var: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidAddr {
        var,
        value: value.to_string(),
    })
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}
