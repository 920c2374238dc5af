//! REST error types

use cord_common::ApiErrorBody;
use thiserror::Error;

use crate::route::Method;

/// REST error type
#[derive(Debug, Error)]
pub enum RestError {
    /// The request needs authorization but no token is set
    #[error("The token is missing.")]
    TokenMissing,

    /// Route template and parameters do not match
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    /// The request could not be assembled (bad header, bad mime type, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The server answered with a non-success status that is not retried
    #[error("{method} /{path} returned {status}{}", api_detail(.body))]
    Api {
        status: u16,
        method: Method,
        path: String,
        body: Option<ApiErrorBody>,
    },

    /// Transport failure, after the retry budget was spent when retryable
    #[error("{method} /{path} failed after {attempts} attempt(s): {source}")]
    Transport {
        method: Method,
        path: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// Response announced JSON but the body did not decode
    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// HTTP client construction failed
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

fn api_detail(body: &Option<ApiErrorBody>) -> String {
    match body {
        Some(body) => format!(": {body}"),
        None => String::new(),
    }
}

impl RestError {
    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Platform error code from the JSON body (e.g. 10003 Unknown Channel)
    pub fn api_code(&self) -> Option<u64> {
        match self {
            Self::Api {
                body: Some(body), ..
            } => Some(body.code),
            _ => None,
        }
    }

    /// The credentials were rejected or absent
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::TokenMissing) || self.status() == Some(401)
    }
}

/// REST result type
pub type RestResult<T> = Result<T, RestError>;
