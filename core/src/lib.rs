pub mod config;
pub mod telemetry;

pub use config::{ConfigError, LogConfig, ProxyTrust, ServerConfig};
pub use telemetry::{init_tracing, try_init_tracing};
