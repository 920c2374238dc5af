//! Per-session connection state

use cord_core::Snowflake;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode as WsCloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::queue::SendQueue;

/// Connection status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Never connected
    Idle,
    Connecting,
    /// Connecting again after a disconnect
    Reconnecting,
    /// Socket open, waiting for Hello
    Nearly,
    Identifying,
    Resuming,
    /// READY received, guilds still arriving
    WaitingForGuilds,
    Ready,
    Disconnected,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Reconnecting => "reconnecting",
            Self::Nearly => "nearly",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::WaitingForGuilds => "waiting_for_guilds",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to the tasks of one open socket
#[derive(Debug)]
pub(crate) struct SocketHandle {
    /// Feeds the writer task; dropping it ends the writer
    pub outbound: mpsc::UnboundedSender<WsMessage>,
    pub reader: AbortHandle,
}

impl SocketHandle {
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed() && !self.reader.is_finished()
    }

    /// Send a close frame (best effort) and stop reading
    pub fn close(self, code: u16) {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        let _ = self.outbound.send(WsMessage::Close(Some(frame)));
        self.reader.abort();
    }
}

/// Timer tasks owned by the session
#[derive(Debug, Default)]
pub(crate) struct Timers {
    pub heartbeat: Option<AbortHandle>,
    pub hello: Option<AbortHandle>,
    pub ready: Option<AbortHandle>,
}

impl Timers {
    pub fn replace(slot: &mut Option<AbortHandle>, handle: Option<AbortHandle>) {
        if let Some(previous) = std::mem::replace(slot, handle) {
            previous.abort();
        }
    }

    pub fn clear(&mut self) {
        Self::replace(&mut self.heartbeat, None);
        Self::replace(&mut self.hello, None);
        Self::replace(&mut self.ready, None);
    }
}

/// Everything a session mutates, behind one lock that is never held
/// across an await
#[derive(Debug)]
pub(crate) struct SessionState {
    pub status: SessionStatus,
    pub sequence: Option<u64>,
    /// Sequence at the last close, replayed from on resume
    pub close_sequence: Option<u64>,
    pub session_id: Option<String>,
    pub resume_url: Option<String>,
    pub heartbeat_acked: bool,
    pub last_heartbeat_sent: Option<Instant>,
    pub ping: Option<Duration>,
    pub expected_guilds: HashSet<Snowflake>,
    pub queue: SendQueue,
    /// Bumped per socket and per teardown; tasks of an older generation
    /// are ignored
    pub generation: u64,
    pub socket: Option<SocketHandle>,
    pub timers: Timers,
    /// Cancelled on destroy to release pending `connect` callers
    pub connect_cancel: CancellationToken,
}

impl SessionState {
    pub fn new(rate_limit: u32) -> Self {
        Self {
            status: SessionStatus::Idle,
            sequence: None,
            close_sequence: None,
            session_id: None,
            resume_url: None,
            heartbeat_acked: true,
            last_heartbeat_sent: None,
            ping: None,
            expected_guilds: HashSet::new(),
            queue: SendQueue::new(rate_limit),
            generation: 0,
            socket: None,
            timers: Timers::default(),
            connect_cancel: CancellationToken::new(),
        }
    }

    /// Record a dispatch sequence number; never moves backwards
    pub fn observe_sequence(&mut self, sequence: u64) {
        self.sequence = Some(self.sequence.map_or(sequence, |current| current.max(sequence)));
    }

    /// Sequence to resume from or heartbeat with
    pub fn last_sequence(&self) -> Option<u64> {
        self.sequence.or(self.close_sequence)
    }

    pub fn freeze_sequence(&mut self) {
        if let Some(sequence) = self.sequence {
            self.close_sequence = Some(sequence);
        }
    }

    /// Forget the session so the next handshake identifies
    pub fn forget_session(&mut self) {
        self.sequence = None;
        self.close_sequence = None;
        self.session_id = None;
        self.resume_url = None;
    }

    /// Stop timers, empty the queue and detach the socket
    pub fn teardown(&mut self) -> Option<SocketHandle> {
        self.timers.clear();
        self.queue.reset();
        self.expected_guilds.clear();
        self.heartbeat_acked = true;
        self.last_heartbeat_sent = None;
        self.generation += 1;
        self.status = SessionStatus::Disconnected;
        self.socket.take()
    }
}
