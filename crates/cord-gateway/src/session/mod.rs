//! Gateway session
//!
//! One logical session carried over a succession of sockets. Each socket
//! gets a reader task (inflate, decode, handle) and a writer task fed by
//! the rate-limited send queue; heartbeat, hello and ready timers run as
//! their own tasks. All mutable state sits behind one lock, and every
//! task carries the socket generation it was started for so that late
//! callbacks from a torn-down socket are dropped.

mod event;
mod handlers;
mod queue;
mod state;

pub(crate) use event::Lifecycle;
pub use event::{DestroyOptions, SessionEvent};
pub use state::SessionStatus;

use cord_common::{GatewayConfig, Token};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::codec::{EncodedFrame, GatewayCodec, JsonCodec};
use crate::endpoint::gateway_url;
use crate::error::{GatewayError, GatewayResult};
use crate::inflate::ZlibStream;
use crate::protocol::{
    CloseCode, GatewayMessage, PresenceUpdatePayload, RequestGuildMembersPayload,
    VoiceStatePayload,
};
use state::{SessionState, SocketHandle, Timers};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LIFECYCLE_CAPACITY: usize = 16;

/// Close code reported when the socket ends without a close frame
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame without a status
const NO_STATUS: u16 = 1005;

enum Plan {
    Reidentify,
    Open { base: String, generation: u64 },
}

pub(crate) struct SessionInner {
    config: GatewayConfig,
    codec: Arc<dyn GatewayCodec>,
    token: RwLock<Option<Token>>,
    gateway_url: RwLock<String>,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    lifecycle: broadcast::Sender<Lifecycle>,
}

/// Handle to a gateway session. Cheap to clone.
#[derive(Clone)]
pub struct GatewaySession {
    inner: Arc<SessionInner>,
}

impl GatewaySession {
    /// Create a JSON session; events arrive on the returned receiver
    pub fn new(
        config: GatewayConfig,
        token: Option<Token>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::with_codec(config, token, Arc::new(JsonCodec))
    }

    pub fn with_codec(
        config: GatewayConfig,
        token: Option<Token>,
        codec: Arc<dyn GatewayCodec>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);

        let inner = SessionInner {
            gateway_url: RwLock::new(config.url.clone()),
            state: Mutex::new(SessionState::new(config.rate_limit)),
            config,
            codec,
            token: RwLock::new(token),
            events,
            lifecycle,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    pub fn set_token(&self, token: Option<Token>) {
        *self.inner.token.write() = token;
    }

    /// The token, unless unset or blank
    pub fn token(&self) -> Option<Token> {
        self.inner.token()
    }

    /// Base URL used for new sockets
    pub fn set_gateway_url(&self, url: impl Into<String>) {
        *self.inner.gateway_url.write() = url.into();
    }

    pub fn gateway_url(&self) -> String {
        self.inner.gateway_url.read().clone()
    }

    /// Open a socket, or re-identify on the open one, and wait until the
    /// session is ready or resumed.
    ///
    /// Fails with `TokenMissing` before any I/O, `Closed` when the socket
    /// closes first, `InvalidSession` when the server rejects the session,
    /// and `Destroyed` when [`destroy`](Self::destroy) runs first. The
    /// wait is one `select!`, so all of its branches end together.
    pub async fn connect(&self) -> GatewayResult<()> {
        let inner = &self.inner;
        if inner.token().is_none() {
            return Err(GatewayError::TokenMissing);
        }

        if inner.has_stale_socket() {
            inner.destroy(DestroyOptions {
                emit: false,
                ..DestroyOptions::default()
            });
        }

        let mut lifecycle = inner.lifecycle.subscribe();

        let (plan, cancel) = {
            let mut state = inner.state.lock();
            let cancel = state.connect_cancel.clone();

            let plan = if state.socket.is_some() {
                if state.status == SessionStatus::Ready {
                    return Ok(());
                }
                Plan::Reidentify
            } else {
                state.status = if state.status == SessionStatus::Disconnected {
                    SessionStatus::Reconnecting
                } else {
                    SessionStatus::Connecting
                };
                state.generation += 1;

                let base = match (&state.session_id, &state.resume_url) {
                    (Some(_), Some(resume_url)) => resume_url.clone(),
                    _ => inner.gateway_url.read().clone(),
                };
                Plan::Open {
                    base,
                    generation: state.generation,
                }
            };
            (plan, cancel)
        };

        let outcome = async {
            match plan {
                Plan::Reidentify => {
                    tracing::debug!("Socket already open, identifying again");
                    inner.identify();
                }
                Plan::Open { base, generation } => inner.open(&base, generation).await?,
            }
            wait_for_outcome(&mut lifecycle).await
        };

        tokio::select! {
            () = cancel.cancelled() => Err(GatewayError::Destroyed),
            result = outcome => result,
        }
    }

    /// Tear the session down. Idempotent.
    pub fn destroy(&self, options: DestroyOptions) {
        self.inner.destroy(options);
    }

    /// Queue a frame; `priority` puts it at the head of the queue
    pub fn send(&self, message: GatewayMessage, priority: bool) {
        self.inner.enqueue(message, priority);
    }

    pub fn update_presence(&self, presence: PresenceUpdatePayload) {
        self.send(GatewayMessage::presence_update(presence), false);
    }

    pub fn update_voice_state(&self, voice_state: VoiceStatePayload) {
        self.send(GatewayMessage::voice_state_update(voice_state), false);
    }

    pub fn request_guild_members(&self, request: RequestGuildMembersPayload) {
        self.send(GatewayMessage::request_guild_members(request), false);
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn ping(&self) -> Option<Duration> {
        self.inner.state.lock().ping
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id.clone()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.inner.state.lock().sequence
    }

    pub fn resume_gateway_url(&self) -> Option<String> {
        self.inner.state.lock().resume_url.clone()
    }

    /// Frames waiting for the send window
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("GatewaySession")
            .field("status", &state.status)
            .field("session_id", &state.session_id)
            .field("sequence", &state.sequence)
            .finish()
    }
}

impl SessionInner {
    fn token(&self) -> Option<Token> {
        self.token.read().clone().filter(|token| !token.is_empty())
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Session event dropped, receiver gone");
        }
    }

    fn signal(&self, lifecycle: Lifecycle) {
        let _ = self.lifecycle.send(lifecycle);
    }

    fn has_stale_socket(&self) -> bool {
        self.state
            .lock()
            .socket
            .as_ref()
            .is_some_and(|socket| !socket.is_open())
    }

    async fn open(self: &Arc<Self>, base: &str, generation: u64) -> GatewayResult<()> {
        let url = match gateway_url(
            base,
            self.config.version,
            self.codec.encoding(),
            self.config.compress,
        ) {
            Ok(url) => url,
            Err(err) => {
                self.on_close(generation, ABNORMAL_CLOSURE, err.to_string());
                return Err(err);
            }
        };

        self.arm_hello_timeout(generation);
        tracing::debug!(url = %url, generation, "Opening gateway socket");

        let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "Gateway socket failed to open");
                self.on_close(generation, ABNORMAL_CLOSURE, err.to_string());
                return Err(err.into());
            }
        };

        if self.attach(generation, stream) {
            Ok(())
        } else {
            Err(GatewayError::Destroyed)
        }
    }

    /// Start the socket tasks; false when the session moved on meanwhile
    fn attach(self: &Arc<Self>, generation: u64, stream: WsStream) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }

        let (sink, stream) = stream.split();
        let (outbound, receiver) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, receiver));
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(self),
            generation,
            stream,
            self.config.compress,
        ))
        .abort_handle();

        state.socket = Some(SocketHandle { outbound, reader });
        state.status = SessionStatus::Nearly;
        tracing::debug!(generation, "Gateway socket open, waiting for Hello");
        true
    }

    fn arm_hello_timeout(self: &Arc<Self>, generation: u64) {
        let Some(timeout) = self.config.hello_timeout() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.state.lock().generation != generation {
                return;
            }
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "No Hello received");
            inner.destroy(DestroyOptions {
                code: CloseCode::SessionTimeout.as_u16(),
                reset: true,
                emit: true,
            });
        })
        .abort_handle();

        Timers::replace(&mut self.state.lock().timers.hello, Some(timer));
    }

    fn on_payload(self: &Arc<Self>, generation: u64, payload: &[u8]) {
        if self.state.lock().generation != generation {
            return;
        }
        match self.codec.decode(payload) {
            Ok(frame) => {
                tracing::trace!(op = %frame.op, t = ?frame.t, s = ?frame.s, "Frame received");
                self.handle_frame(generation, frame);
            }
            Err(err) => {
                tracing::warn!(error = %err, "Dropping undecodable frame");
                self.emit(SessionEvent::Error(err));
            }
        }
    }

    /// The socket closed underneath us
    fn on_close(&self, generation: u64, code: u16, reason: String) {
        let socket = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.freeze_sequence();
            state.sequence = None;
            state.teardown()
        };
        drop(socket);

        tracing::info!(code, reason = %reason, "Gateway connection closed");
        self.emit(SessionEvent::Closed {
            code,
            reason: reason.clone(),
        });
        self.signal(Lifecycle::Closed { code, reason });
    }

    fn destroy(&self, options: DestroyOptions) {
        let (socket, cancel) = {
            let mut state = self.state.lock();
            state.freeze_sequence();
            if options.reset {
                state.forget_session();
            }
            let socket = state.teardown();
            let cancel = std::mem::replace(&mut state.connect_cancel, CancellationToken::new());
            (socket, cancel)
        };

        let was_open = socket.as_ref().is_some_and(SocketHandle::is_open);
        if let Some(socket) = socket {
            socket.close(options.code);
        }

        tracing::debug!(
            code = options.code,
            reset = options.reset,
            was_open,
            "Session destroyed"
        );

        if was_open {
            self.emit(SessionEvent::Closed {
                code: options.code,
                reason: String::new(),
            });
            self.signal(Lifecycle::Closed {
                code: options.code,
                reason: String::new(),
            });
        } else if options.emit {
            self.emit(SessionEvent::Destroyed);
        }

        cancel.cancel();
    }

    fn enqueue(self: &Arc<Self>, message: GatewayMessage, priority: bool) {
        self.state.lock().queue.push(message, priority);
        self.drain();
    }

    /// Move as many queued frames to the writer as the window allows.
    ///
    /// While a socket is being opened frames stay queued. If the socket is
    /// gone while the session believes it is connected, the session is
    /// destroyed with 4000 so the owner reconnects.
    fn drain(self: &Arc<Self>) {
        let mut failures = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.queue.is_empty() {
                return;
            }

            let Some(socket) = state.socket.as_ref().filter(|socket| socket.is_open()) else {
                let expects_socket = matches!(
                    state.status,
                    SessionStatus::Nearly
                        | SessionStatus::Identifying
                        | SessionStatus::Resuming
                        | SessionStatus::WaitingForGuilds
                        | SessionStatus::Ready
                );
                drop(guard);
                if expects_socket {
                    tracing::debug!("Socket not open, forcing reconnect");
                    self.destroy(DestroyOptions::with_code(CloseCode::UnknownError.as_u16()));
                }
                return;
            };

            let batch = state.queue.take_batch();
            for frame in batch.frames {
                match self.codec.encode(&frame) {
                    Ok(encoded) => {
                        tracing::trace!(op = %frame.op, "Sending frame");
                        let _ = socket.outbound.send(to_ws(encoded));
                    }
                    Err(err) => failures.push(err),
                }
            }

            if batch.opened_window {
                let weak = Arc::downgrade(self);
                let window = self.config.rate_window();
                let timer = tokio::spawn(async move {
                    sleep(window).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.state.lock().queue.refill();
                        inner.drain();
                    }
                })
                .abort_handle();
                state.queue.set_timer(timer);
            }
        }

        for err in failures {
            tracing::warn!(error = %err, "Dropping unencodable frame");
            self.emit(SessionEvent::Error(err));
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.timers.clear();
        state.queue.reset();
        if let Some(socket) = state.socket.take() {
            socket.close(CloseCode::Normal.as_u16());
        }
    }
}

fn to_ws(frame: EncodedFrame) -> WsMessage {
    match frame {
        EncodedFrame::Text(text) => WsMessage::Text(text),
        EncodedFrame::Binary(bytes) => WsMessage::Binary(bytes),
    }
}

async fn wait_for_outcome(lifecycle: &mut broadcast::Receiver<Lifecycle>) -> GatewayResult<()> {
    loop {
        match lifecycle.recv().await {
            Ok(Lifecycle::Ready | Lifecycle::Resumed) => return Ok(()),
            Ok(Lifecycle::Closed { code, reason }) => {
                return Err(GatewayError::Closed { code, reason })
            }
            Ok(Lifecycle::InvalidSession) => return Err(GatewayError::InvalidSession),
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return Err(GatewayError::Destroyed),
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, WsMessage::Close(_));
        if let Err(err) = sink.send(message).await {
            tracing::debug!(error = %err, "Gateway write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    session: Weak<SessionInner>,
    generation: u64,
    mut stream: SplitStream<WsStream>,
    compress: bool,
) {
    let mut inflater = compress.then(ZlibStream::new);

    let (code, reason) = loop {
        let Some(next) = stream.next().await else {
            break (ABNORMAL_CLOSURE, "stream ended".to_string());
        };
        let Some(inner) = session.upgrade() else {
            return;
        };

        match next {
            Ok(WsMessage::Text(text)) => inner.on_payload(generation, text.as_bytes()),
            Ok(WsMessage::Binary(bytes)) => match inflater.as_mut() {
                Some(inflater) => match inflater.push(&bytes) {
                    Ok(Some(payload)) => inner.on_payload(generation, &payload),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to inflate frame");
                        inner.emit(SessionEvent::Error(err.into()));
                    }
                },
                None => inner.on_payload(generation, &bytes),
            },
            Ok(WsMessage::Close(frame)) => {
                break frame.map_or((NO_STATUS, String::new()), |frame| {
                    (u16::from(frame.code), frame.reason.into_owned())
                });
            }
            Ok(_) => {}
            Err(err) => break (ABNORMAL_CLOSURE, err.to_string()),
        }
    };

    if let Some(inner) = session.upgrade() {
        inner.on_close(generation, code, reason);
    }
}
