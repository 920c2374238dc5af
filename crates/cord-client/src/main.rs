//! cord-bot: logs in and prints gateway events until Ctrl-C
//!
//! Run with:
//! ```bash
//! DISCORD_TOKEN=... cargo run -p cord-client --bin cord-bot
//! ```
//!
//! Configuration is loaded from environment variables.

use anyhow::Context;
use cord_client::{Client, ClientConfig, GatewayEvent};
use cord_common::{try_init_tracing_with_config, TracingConfig};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "cord-bot stopped");
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let token = config
        .token
        .clone()
        .context("DISCORD_TOKEN is not set")?;

    info!(env = ?config.app.env, intents = %config.gateway.intents, "Configuration loaded");

    let client = Client::new(config)?;
    let mut events = client.events();
    client.login(token).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let fatal = event.is_fatal();
                log_event(&event);
                if fatal {
                    break;
                }
            }
        }
    }

    client.destroy();
    Ok(())
}

fn log_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::Dispatch(dispatch) => {
            info!(event = %dispatch.kind, seq = ?dispatch.sequence, "Dispatch");
        }
        GatewayEvent::Ready { unavailable_guilds } => {
            info!(unavailable = unavailable_guilds.len(), "Ready");
        }
        GatewayEvent::Resumed => info!("Resumed"),
        GatewayEvent::Reconnecting => info!("Reconnecting"),
        GatewayEvent::Disconnected { code, reason } => {
            warn!(code, reason = %reason, "Disconnected");
        }
        GatewayEvent::InvalidSession => warn!("Invalid session"),
        GatewayEvent::Error { message } => warn!(message = %message, "Gateway error"),
        GatewayEvent::Fatal { code, message } => {
            error!(code = ?code, message = %message, "Gateway fatal error");
        }
    }
}
