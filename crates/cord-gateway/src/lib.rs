//! # cord-gateway
//!
//! Gateway client: a per-socket session state machine (handshake,
//! heartbeating, resume, rate-limited commands) and a supervisor that
//! classifies closes, reconnects, and holds dispatches back until ready.

pub mod codec;
mod endpoint;
pub mod error;
pub mod events;
pub mod inflate;
pub mod protocol;
mod ready_buffer;
pub mod resolver;
pub mod session;
mod supervisor;

pub use codec::{EncodedFrame, GatewayCodec, JsonCodec};
pub use endpoint::gateway_url;
pub use error::{GatewayError, GatewayResult};
pub use events::{Dispatch, GatewayEvent, GatewayEventType};
pub use inflate::ZlibStream;
pub use ready_buffer::ReadyBuffer;
pub use resolver::{GatewayUrlResolver, StaticResolver};
pub use session::{DestroyOptions, GatewaySession, SessionEvent, SessionStatus};
pub use supervisor::{EventStream, GatewaySupervisor};
