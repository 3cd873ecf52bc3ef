//! Server configuration loading.
//!
//! Every field carries a default, so an empty TOML document is a valid
//! configuration. Defaults follow the conventional development setup:
//! `0.0.0.0:3000`, 30 second read/write timeouts, 1 MiB of headers.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Maximum time, in seconds, for reading a request head.
    pub read_timeout_secs: u64,
    /// Maximum time, in seconds, before timing out response writes.
    pub write_timeout_secs: u64,
    /// Optional per-request deadline, in seconds, exposed to handlers.
    pub request_timeout_secs: Option<u64>,
    /// Maximum size of the request head.
    pub max_header_bytes: usize,
    /// Maximum size of a buffered request body.
    pub max_body_bytes: usize,
    /// Number of idle request contexts kept for reuse.
    pub pool_capacity: usize,
    /// Enables Cross-Origin Resource Sharing headers.
    pub enable_cors: bool,
    /// Deployment environment label (development, production, ...).
    pub environment: String,
    /// Forwarding-header trust policy.
    pub proxy: ProxyTrust,
    /// Logging configuration.
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            request_timeout_secs: None,
            max_header_bytes: 1 << 20,
            max_body_bytes: 32 << 20,
            pool_capacity: 1024,
            enable_cors: false,
            environment: "development".to_string(),
            proxy: ProxyTrust::default(),
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded server configuration");
        Ok(config)
    }

    /// Parse and validate configuration from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot produce a working server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid("read_timeout_secs must be positive".into()));
        }
        if self.write_timeout_secs == 0 {
            return Err(ConfigError::Invalid("write_timeout_secs must be positive".into()));
        }
        if self.max_header_bytes == 0 {
            return Err(ConfigError::Invalid("max_header_bytes must be positive".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be positive".into()));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive when set".into(),
            ));
        }
        if let ProxyTrust::List { allow } = &self.proxy {
            if allow.is_empty() {
                return Err(ConfigError::Invalid(
                    "proxy allowlist is empty; use trust = \"none\" instead".into(),
                ));
            }
        }
        Ok(())
    }

    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Which peers may set `X-Forwarded-For` / `X-Real-IP`.
///
/// ```toml
/// [proxy]
/// trust = "list"
/// allow = ["10.0.0.1", "10.0.0.2"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "trust", rename_all = "lowercase")]
pub enum ProxyTrust {
    /// Forwarding headers are honored from any peer.
    #[default]
    All,
    /// Forwarding headers are ignored; the socket peer is the client.
    None,
    /// Forwarding headers are honored only from the listed peers.
    List { allow: Vec<IpAddr> },
}

impl ProxyTrust {
    /// Whether forwarding headers sent by `peer` should be believed.
    pub fn trusts(&self, peer: Option<IpAddr>) -> bool {
        match self {
            ProxyTrust::All => true,
            ProxyTrust::None => false,
            ProxyTrust::List { allow } => peer.is_some_and(|ip| allow.contains(&ip)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}
