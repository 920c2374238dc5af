//! Events published by the supervisor

use cord_core::Snowflake;
use serde_json::Value;

/// One op=0 dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Event name (`t`)
    pub kind: String,
    pub sequence: Option<u64>,
    pub data: Value,
}

/// What a gateway consumer observes
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A dispatch, in arrival order
    Dispatch(Dispatch),
    /// Session ready; guilds that never arrived within the grace window are listed
    Ready { unavailable_guilds: Vec<Snowflake> },
    /// Session resumed after a reconnect
    Resumed,
    /// A reconnect attempt is starting
    Reconnecting,
    /// The socket closed
    Disconnected { code: u16, reason: String },
    /// The server rejected the session
    InvalidSession,
    /// Recoverable failure, reported and skipped
    Error { message: String },
    /// Unrecoverable failure; the supervisor has stopped
    Fatal { code: Option<u16>, message: String },
}

impl GatewayEvent {
    /// Dispatch event name, if this is a dispatch
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Dispatch(dispatch) => Some(&dispatch.kind),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
