//! Gateway error types

use crate::protocol::{CloseCode, CloseKind};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Gateway error type
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No token configured; raised before any I/O
    #[error("The token is missing.")]
    TokenMissing,

    /// The socket closed before the session became ready
    #[error("Gateway closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    /// The server sent Invalid Session while connecting
    #[error("Invalid session")]
    InvalidSession,

    /// The session or supervisor was destroyed
    #[error("Gateway destroyed")]
    Destroyed,

    /// Unrecoverable close code
    #[error("Fatal close: {0}")]
    Fatal(CloseCode),

    /// Opening the socket failed
    #[error("WebSocket error: {0}")]
    Connect(#[source] Box<tungstenite::Error>),

    /// A frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// zlib-stream inflate failed
    #[error("Inflate error: {0}")]
    Inflate(#[from] flate2::DecompressError),

    #[error("Invalid gateway URL: {0}")]
    Url(#[from] url::ParseError),

    /// The gateway URL could not be resolved
    #[error("Gateway URL resolution failed: {0}")]
    Resolve(String),

    /// The token was rejected while resolving the gateway URL
    #[error("Unauthorized")]
    Unauthorized,
}

impl GatewayError {
    pub fn codec(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Codec(source.into())
    }

    /// Retrying with the same credentials cannot succeed
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            Self::TokenMissing | Self::Unauthorized | Self::Fatal(_) => true,
            Self::Closed { code, .. } => CloseKind::of(*code) == CloseKind::Fatal,
            _ => false,
        }
    }

    /// Close code carried by this error, if any
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Closed { code, .. } => Some(*code),
            Self::Fatal(code) => Some(code.as_u16()),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for GatewayError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Connect(Box::new(err))
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
