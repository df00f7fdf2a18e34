use crate::error::{HubError, Result};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub api: ApiServerConfig,
    /// Broadcast hub tuning
    pub hub: HubConfig,
    /// Synthetic producer configuration
    pub producer: ProducerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the server (default: 8080)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = any origin)
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the broadcast channel shared by all producers
    pub channel_capacity: usize,
    /// Frames queued per connection before writes start to block
    pub outbound_buffer: usize,
    /// Upper bound for a single write to one connection, in milliseconds
    pub write_timeout_ms: u64,
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            outbound_buffer: 64,
            write_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Start the synthetic producer at boot
    pub enabled: bool,
    /// Tick cadence in milliseconds
    pub interval_ms: u64,
}

impl ProducerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            api: ApiServerConfig {
                port: get_env_or("HUB_PORT", "8080").parse().map_err(|_| {
                    HubError::InvalidConfig("HUB_PORT must be a valid port number".into())
                })?,
                host: get_env_or("HUB_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            hub: HubConfig {
                channel_capacity: parse_positive("HUB_CHANNEL_CAPACITY", "1024")?,
                outbound_buffer: parse_positive("HUB_OUTBOUND_BUFFER", "64")?,
                write_timeout_ms: parse_positive("HUB_WRITE_TIMEOUT_MS", "1000")?,
            },
            producer: ProducerConfig {
                enabled: parse_bool("PRODUCER_ENABLED", "true")?,
                interval_ms: parse_positive("PRODUCER_INTERVAL_MS", "20")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Parse a numeric variable that must be strictly positive
fn parse_positive<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value: T = get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| HubError::InvalidConfig(format!("{} must be a valid number", key)))?;

    if value <= T::default() {
        return Err(HubError::InvalidConfig(format!(
            "{} must be greater than zero",
            key
        )));
    }

    Ok(value)
}

/// Parse an on/off switch, rejecting anything unrecognised
fn parse_bool(key: &str, default: &str) -> Result<bool> {
    match get_env_or(key, default).trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(HubError::InvalidConfig(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
