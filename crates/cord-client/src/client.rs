//! Client facade

use cord_common::{ClientConfig, Token};
use cord_gateway::{EventStream, GatewaySupervisor};
use cord_rest::RestRouter;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::resolver::RestGatewayResolver;

/// REST and gateway access for one token
#[derive(Debug, Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    rest: RestRouter,
    gateway: GatewaySupervisor,
}

impl Client {
    /// Build both engines. Nothing connects until [`login`](Self::login).
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let rest = RestRouter::new(config.rest.clone())?;
        rest.set_token(config.token.clone());

        let resolver = Arc::new(RestGatewayResolver::new(
            rest.clone(),
            config.gateway.url.clone(),
        ));
        let gateway =
            GatewaySupervisor::new(config.gateway.clone(), config.token.clone(), resolver);

        Ok(Self {
            config: Arc::new(config),
            rest,
            gateway,
        })
    }

    /// Store `token` and connect to the gateway.
    ///
    /// On failure the client is destroyed and the error returned.
    pub async fn login(&self, token: Token) -> ClientResult<()> {
        if token.is_empty() {
            return Err(ClientError::from(cord_gateway::GatewayError::TokenMissing));
        }

        self.rest.set_token(Some(token.clone()));
        self.gateway.set_token(Some(token));

        tracing::info!(
            app = %self.config.app.name,
            intents = %self.config.gateway.intents,
            "Logging in"
        );

        if let Err(err) = self.gateway.connect().await {
            tracing::error!(error = %err, "Login failed");
            self.destroy();
            return Err(err.into());
        }

        tracing::info!("Logged in");
        Ok(())
    }

    /// Stop the gateway and the REST sweeper. Idempotent.
    pub fn destroy(&self) {
        self.gateway.destroy();
        self.rest.destroy();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn token(&self) -> Option<Token> {
        self.rest.token()
    }

    pub fn rest(&self) -> &RestRouter {
        &self.rest
    }

    pub fn gateway(&self) -> &GatewaySupervisor {
        &self.gateway
    }

    pub fn events(&self) -> EventStream {
        self.gateway.events()
    }

    /// Gateway heartbeat round trip
    pub fn ping(&self) -> Option<Duration> {
        self.gateway.ping()
    }
}
