use crate::error::{RelayError, Result};
use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay server configuration
    pub server: ServerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the relay server (default: 10000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Path the WebSocket endpoint is mounted on (default: /ws)
    pub ws_path: String,
    /// Directory of static assets served as the fallback route
    pub static_dir: PathBuf,
    /// Allowed CORS origins (comma-separated, empty = any origin)
    pub cors_origins: Vec<String>,
    /// Largest inbound WebSocket message accepted, in bytes
    pub max_message_bytes: usize,
    /// Frames buffered per connection before it is considered too slow
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            server: ServerConfig {
                port: get_env_or("PORT", "10000").parse().map_err(|_| {
                    RelayError::InvalidConfig("PORT must be a valid port number".into())
                })?,
                host: get_env_or("HOST", "0.0.0.0"),
                ws_path: get_env_or("WS_PATH", "/ws"),
                static_dir: PathBuf::from(get_env_or("STATIC_DIR", "public")),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                max_message_bytes: get_env_or("WS_MAX_MESSAGE_BYTES", "1048576")
                    .parse()
                    .map_err(|_| {
                        RelayError::InvalidConfig(
                            "WS_MAX_MESSAGE_BYTES must be a valid number".into(),
                        )
                    })?,
                outbound_buffer: get_env_or("WS_OUTBOUND_BUFFER", "256")
                    .parse()
                    .map_err(|_| {
                        RelayError::InvalidConfig("WS_OUTBOUND_BUFFER must be a valid number".into())
                    })?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: LogFormat::from_str(&get_env_or("LOG_FORMAT", "pretty")),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.server.ws_path.starts_with('/') {
            return Err(RelayError::InvalidConfig(format!(
                "WS_PATH must start with '/': {}",
                self.server.ws_path
            )));
        }
        if self.server.outbound_buffer == 0 {
            return Err(RelayError::InvalidConfig(
                "WS_OUTBOUND_BUFFER must be greater than zero".into(),
            ));
        }
        if self.server.max_message_bytes == 0 {
            return Err(RelayError::InvalidConfig(
                "WS_MAX_MESSAGE_BYTES must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Get the relay server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 10000,
            host: "0.0.0.0".to_string(),
            ws_path: "/ws".to_string(),
            static_dir: PathBuf::from("public"),
            cors_origins: Vec::new(),
            max_message_bytes: 1024 * 1024,
            outbound_buffer: 256,
        }
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
