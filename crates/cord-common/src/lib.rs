//! # cord-common
//!
//! Shared utilities including configuration, credentials, API error bodies, and telemetry.

pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::{Token, TokenType, TokenTypeParseError};
pub use config::{AppSettings, ClientConfig, ConfigError, Environment, GatewayConfig, RestConfig};
pub use error::ApiErrorBody;
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
