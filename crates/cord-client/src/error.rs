//! Client error type

use cord_common::ConfigError;
use cord_gateway::GatewayError;
use cord_rest::RestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Rest(#[from] RestError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// The token was missing or rejected
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            Self::Rest(RestError::TokenMissing) => true,
            Self::Rest(err) => err.status() == Some(401),
            Self::Gateway(err) => err.is_authentication_failure(),
            Self::Config(_) => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
