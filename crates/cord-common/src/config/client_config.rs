//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use cord_core::Intents;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::{Token, TokenType};

/// Main client configuration
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub app: AppSettings,
    /// Token installed on both engines at construction
    pub token: Option<Token>,
    pub rest: RestConfig,
    pub gateway: GatewayConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: default_env(),
        }
    }
}

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
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// REST engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    /// API root without the version segment
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_version")]
    pub version: u8,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Transient failures retried per request (429s never count)
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Fixed wait between transient retries, 0 retries immediately
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Added to every server-declared reset/retry duration
    #[serde(default)]
    pub time_offset_ms: i64,
    /// Idle dispatcher sweep period, 0 disables sweeping
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl RestConfig {
    /// Versioned base URL, e.g. `https://discord.com/api/v10`
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}/v{}", self.api_url.trim_end_matches('/'), self.version)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            version: default_api_version(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_limit: default_retry_limit(),
            retry_delay_ms: 0,
            time_offset_ms: 0,
            sweep_interval_ms: default_sweep_interval_ms(),
            user_agent: default_user_agent(),
        }
    }
}

/// Gateway engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Fallback URL when `GET /gateway/bot` cannot be used
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default = "default_api_version")]
    pub version: u8,
    /// Request zlib-stream transport compression
    #[serde(default)]
    pub compress: bool,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u8,
    #[serde(default)]
    pub intents: Intents,
    /// Time allowed between socket open and Hello, 0 disables
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    /// Grace window for unavailable guilds after READY
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Outbound commands allowed per `rate_window_ms`
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl GatewayConfig {
    #[must_use]
    pub fn hello_timeout(&self) -> Option<Duration> {
        (self.hello_timeout_ms > 0).then(|| Duration::from_millis(self.hello_timeout_ms))
    }

    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    #[must_use]
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            version: default_api_version(),
            compress: false,
            large_threshold: default_large_threshold(),
            intents: Intents::default(),
            hello_timeout_ms: default_hello_timeout_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            rate_limit: default_rate_limit(),
            rate_window_ms: default_rate_window_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "cord".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_api_url() -> String {
    "https://discord.com/api".to_string()
}

fn default_api_version() -> u8 {
    10
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_retry_limit() -> u32 {
    2
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_user_agent() -> String {
    format!("DiscordBot (cord, {})", env!("CARGO_PKG_VERSION"))
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_large_threshold() -> u8 {
    50
}

fn default_hello_timeout_ms() -> u64 {
    20_000
}

fn default_ready_timeout_ms() -> u64 {
    15_000
}

fn default_rate_limit() -> u32 {
    120
}

fn default_rate_window_ms() -> u64 {
    60_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

/// Read an optional variable, failing only when it is present but malformed
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(default),
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// Every variable is optional; malformed values are rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let token_type = match env::var("DISCORD_TOKEN_TYPE") {
            Ok(raw) => raw
                .parse::<TokenType>()
                .map_err(|_| ConfigError::InvalidValue("DISCORD_TOKEN_TYPE", raw))?,
            Err(_) => TokenType::Bot,
        };

        let intents = match env::var("GATEWAY_INTENTS") {
            Ok(raw) => {
                Intents::parse(&raw).map_err(|_| ConfigError::InvalidValue("GATEWAY_INTENTS", raw))?
            }
            Err(_) => Intents::default(),
        };

        Ok(Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| match s.to_lowercase().as_str() {
                        "production" => Some(Environment::Production),
                        "staging" => Some(Environment::Staging),
                        "development" => Some(Environment::Development),
                        _ => None,
                    })
                    .unwrap_or_default(),
            },
            token: env::var("DISCORD_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|secret| Token::new(token_type, secret)),
            rest: RestConfig {
                api_url: env::var("DISCORD_API_URL").unwrap_or_else(|_| default_api_url()),
                version: parse_var("DISCORD_API_VERSION", default_api_version())?,
                request_timeout_ms: parse_var(
                    "REST_REQUEST_TIMEOUT_MS",
                    default_request_timeout_ms(),
                )?,
                retry_limit: parse_var("REST_RETRY_LIMIT", default_retry_limit())?,
                retry_delay_ms: parse_var("REST_RETRY_DELAY_MS", 0)?,
                time_offset_ms: parse_var("REST_TIME_OFFSET_MS", 0)?,
                sweep_interval_ms: parse_var(
                    "REST_SWEEP_INTERVAL_MS",
                    default_sweep_interval_ms(),
                )?,
                user_agent: env::var("REST_USER_AGENT").unwrap_or_else(|_| default_user_agent()),
            },
            gateway: GatewayConfig {
                url: env::var("GATEWAY_URL").unwrap_or_else(|_| default_gateway_url()),
                version: parse_var("GATEWAY_VERSION", default_api_version())?,
                compress: parse_var("GATEWAY_COMPRESS", false)?,
                large_threshold: parse_var("GATEWAY_LARGE_THRESHOLD", default_large_threshold())?,
                intents,
                hello_timeout_ms: parse_var(
                    "GATEWAY_HELLO_TIMEOUT_MS",
                    default_hello_timeout_ms(),
                )?,
                ready_timeout_ms: parse_var(
                    "GATEWAY_READY_TIMEOUT_MS",
                    default_ready_timeout_ms(),
                )?,
                rate_limit: parse_var("GATEWAY_RATE_LIMIT", default_rate_limit())?,
                rate_window_ms: parse_var("GATEWAY_RATE_WINDOW_MS", default_rate_window_ms())?,
                reconnect_delay_ms: parse_var(
                    "GATEWAY_RECONNECT_DELAY_MS",
                    default_reconnect_delay_ms(),
                )?,
            },
        })
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
