//! Gateway URL lookup over REST

use async_trait::async_trait;
use cord_gateway::{GatewayError, GatewayUrlResolver};
use cord_rest::{routes, RequestOptions, RestError, RestRouter};

/// Asks `GET /gateway/bot` for the socket URL.
///
/// A 401 is an authentication failure; any other failure falls back to
/// the configured URL.
#[derive(Debug, Clone)]
pub struct RestGatewayResolver {
    rest: RestRouter,
    fallback: String,
}

impl RestGatewayResolver {
    pub fn new(rest: RestRouter, fallback: impl Into<String>) -> Self {
        Self {
            rest,
            fallback: fallback.into(),
        }
    }
}

#[async_trait]
impl GatewayUrlResolver for RestGatewayResolver {
    async fn resolve(&self) -> Result<String, GatewayError> {
        match self.rest.get(routes::GATEWAY_BOT, RequestOptions::new()).await {
            Ok(response) => {
                let url = response
                    .as_json()
                    .and_then(|body| body.get("url"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string);
                match url {
                    Some(url) => Ok(url),
                    None => {
                        tracing::warn!("Gateway lookup returned no url, using default");
                        Ok(self.fallback.clone())
                    }
                }
            }
            Err(RestError::TokenMissing) => Err(GatewayError::TokenMissing),
            Err(err) if err.status() == Some(401) => Err(GatewayError::Unauthorized),
            Err(err) => {
                tracing::warn!(error = %err, fallback = %self.fallback, "Gateway lookup failed, using default");
                Ok(self.fallback.clone())
            }
        }
    }
}
