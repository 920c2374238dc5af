//! Response body parsing

use bytes::Bytes;
use cord_common::ApiErrorBody;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RestError;

/// Parsed body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum RestResponse {
    /// `application/json` body
    Json(Value),
    /// Any other content type, returned unchanged
    Bytes(Bytes),
    /// No body (e.g. 204)
    Empty,
}

impl RestResponse {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Deserialize a JSON body into `T`
    pub fn json<T: DeserializeOwned>(self) -> Result<T, RestError> {
        match self {
            Self::Json(value) => Ok(serde_json::from_value(value)?),
            Self::Bytes(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Self::Empty => Ok(serde_json::from_value(Value::Null)?),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::Bytes(bytes) => bytes,
            Self::Empty => Bytes::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// JSON-decode when the content type says so, otherwise keep the raw bytes
pub(crate) fn parse_body(headers: &HeaderMap, body: Bytes) -> Result<RestResponse, RestError> {
    if body.is_empty() {
        return Ok(RestResponse::Empty);
    }
    if is_json(headers) {
        return Ok(RestResponse::Json(serde_json::from_slice(&body)?));
    }
    Ok(RestResponse::Bytes(body))
}

/// Structured error detail of a failed response, when it has one
pub(crate) fn parse_error_body(headers: &HeaderMap, body: &[u8]) -> Option<ApiErrorBody> {
    if !is_json(headers) {
        return None;
    }
    serde_json::from_slice(body).ok()
}
