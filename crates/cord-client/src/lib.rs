//! # cord-client
//!
//! The [`Client`] ties the REST router and the gateway supervisor to one
//! authentication token.

mod client;
pub mod error;
mod resolver;

pub use client::Client;
pub use error::{ClientError, ClientResult};
pub use resolver::RestGatewayResolver;

pub use cord_common::{ClientConfig, Token, TokenType};
pub use cord_core::{Intents, Snowflake};
pub use cord_gateway::{EventStream, GatewayEvent, GatewaySupervisor};
pub use cord_rest::{RequestOptions, RestRouter};
