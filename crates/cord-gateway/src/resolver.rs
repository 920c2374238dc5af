//! Gateway URL resolution
//!
//! The supervisor asks a resolver for the socket URL once per lifetime.
//! The client crate resolves it over REST; [`StaticResolver`] serves a
//! fixed URL.

use async_trait::async_trait;

use crate::error::GatewayError;

#[async_trait]
pub trait GatewayUrlResolver: Send + Sync {
    /// Base socket URL, without query parameters
    async fn resolve(&self) -> Result<String, GatewayError>;
}

/// Always resolves to the same URL
#[derive(Debug, Clone)]
pub struct StaticResolver {
    url: String,
}

impl StaticResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl GatewayUrlResolver for StaticResolver {
    async fn resolve(&self) -> Result<String, GatewayError> {
        Ok(self.url.clone())
    }
}
