//! Signals from a session to its owner

use cord_core::Snowflake;

use crate::error::GatewayError;
use crate::events::Dispatch;

/// Emitted by a [`GatewaySession`](super::GatewaySession), in order
#[derive(Debug)]
pub enum SessionEvent {
    Dispatch(Dispatch),
    /// Ready, with the guilds that stayed unavailable past the grace window
    Ready { unavailable_guilds: Vec<Snowflake> },
    Resumed,
    /// Non-resumable Invalid Session; the session id is gone
    InvalidSession,
    /// The socket closed, by either side
    Closed { code: u16, reason: String },
    /// Destroyed while no socket was open
    Destroyed,
    /// A frame was dropped
    Error(GatewayError),
}

/// Outcomes a pending `connect` waits on
#[derive(Debug, Clone)]
pub(crate) enum Lifecycle {
    Ready,
    Resumed,
    Closed { code: u16, reason: String },
    InvalidSession,
}

/// How to tear a session down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Close code sent to the server
    pub code: u16,
    /// Forget the session id and sequence
    pub reset: bool,
    /// Emit `Destroyed` when no socket was open
    pub emit: bool,
}

impl DestroyOptions {
    #[must_use]
    pub fn with_code(code: u16) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }
}

impl Default for DestroyOptions {
    fn default() -> Self {
        Self {
            code: 1000,
            reset: false,
            emit: true,
        }
    }
}
