//! Gateway configuration
//!
//! Loads configuration from environment variables and an optional `.env` file.

use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse an environment name, case-insensitively
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Gateway server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub env: Environment,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Path serving both the WebSocket and the long polling endpoints
    #[serde(default = "default_path")]
    pub path: String,
    /// How long a long polling socket may go without an outstanding poll
    #[serde(default = "default_longpoll_timeout_ms")]
    pub longpoll_timeout_ms: u64,
    /// Emit JSON logs
    #[serde(default)]
    pub log_json: bool,
}

// Default value functions
fn default_app_name() -> String {
    "vibe-gateway".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_path() -> String {
    "/vibe".to_string()
}

fn default_longpoll_timeout_ms() -> u64 {
    30_000
}

impl GatewayConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = match lookup("APP_ENV") {
            Some(raw) => Environment::parse(&raw).ok_or(ConfigError::InvalidValue("APP_ENV", raw))?,
            None => Environment::default(),
        };

        let port = lookup("GATEWAY_PORT").ok_or(ConfigError::MissingVar("GATEWAY_PORT"))?;
        let port = port
            .parse()
            .map_err(|_| ConfigError::InvalidValue("GATEWAY_PORT", port))?;

        let path = lookup("GATEWAY_PATH").unwrap_or_else(default_path);
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidValue("GATEWAY_PATH", path));
        }

        let longpoll_timeout_ms = match lookup("LONGPOLL_TIMEOUT_MS") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("LONGPOLL_TIMEOUT_MS", raw))?,
            None => default_longpoll_timeout_ms(),
        };

        let log_json = match lookup("LOG_JSON") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("LOG_JSON", raw))?,
            None => env.is_production(),
        };

        Ok(Self {
            name: lookup("APP_NAME").unwrap_or_else(default_app_name),
            env,
            host: lookup("GATEWAY_HOST").unwrap_or_else(default_host),
            port,
            path,
            longpoll_timeout_ms,
            log_json,
        })
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn longpoll_timeout(&self) -> Duration {
        Duration::from_millis(self.longpoll_timeout_ms)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
