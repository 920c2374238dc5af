//! Gateway events
//!
//! Dispatch names and the events the supervisor publishes to consumers.

mod event_types;
mod gateway_event;

pub use event_types::GatewayEventType;
pub use gateway_event::{Dispatch, GatewayEvent};
