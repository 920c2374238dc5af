//! Gateway supervisor
//!
//! Owns one [`GatewaySession`] and turns its signals into the public
//! [`GatewayEvent`] stream: close codes are classified, resumable drops
//! are reconnected, fatal ones stop everything, and dispatches are held
//! back until the session is ready.

use cord_common::{GatewayConfig, Token};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::codec::{GatewayCodec, JsonCodec};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{Dispatch, GatewayEvent};
use crate::protocol::{
    CloseCode, CloseKind, GatewayMessage, PresenceUpdatePayload, RequestGuildMembersPayload,
    VoiceStatePayload,
};
use crate::ready_buffer::ReadyBuffer;
use crate::resolver::GatewayUrlResolver;
use crate::session::{DestroyOptions, GatewaySession, SessionEvent, SessionStatus};

/// Receiving half of [`GatewaySupervisor::events`]
pub type EventStream = mpsc::UnboundedReceiver<GatewayEvent>;

#[derive(Debug, Default)]
struct SupervisorState {
    destroyed: bool,
    reconnecting: bool,
    ready: bool,
    ever_ready: bool,
    fatal: Option<CloseCode>,
    gateway_url: Option<String>,
    buffer: ReadyBuffer,
}

struct SupervisorInner {
    config: GatewayConfig,
    session: GatewaySession,
    resolver: Arc<dyn GatewayUrlResolver>,
    state: Mutex<SupervisorState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<GatewayEvent>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    shutdown: CancellationToken,
}

/// Keeps a gateway session alive. Cheap to clone.
#[derive(Clone)]
pub struct GatewaySupervisor {
    inner: Arc<SupervisorInner>,
}

impl GatewaySupervisor {
    pub fn new(
        config: GatewayConfig,
        token: Option<Token>,
        resolver: Arc<dyn GatewayUrlResolver>,
    ) -> Self {
        Self::with_codec(config, token, resolver, Arc::new(JsonCodec))
    }

    pub fn with_codec(
        config: GatewayConfig,
        token: Option<Token>,
        resolver: Arc<dyn GatewayUrlResolver>,
        codec: Arc<dyn GatewayCodec>,
    ) -> Self {
        let (session, receiver) = GatewaySession::with_codec(config.clone(), token, codec);
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                session,
                resolver,
                state: Mutex::new(SupervisorState::default()),
                subscribers: Mutex::new(Vec::new()),
                receiver: Mutex::new(Some(receiver)),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn set_token(&self, token: Option<Token>) {
        self.inner.session.set_token(token);
    }

    /// Subscribe to gateway events. Only events published after the call
    /// are received. Each subscriber gets every event in publication order;
    /// the stream ends once the supervisor is dropped.
    pub fn events(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Resolve the gateway URL (once), start the event loop and wait for
    /// the session to become ready.
    ///
    /// Errors of this first connection are returned here and are not
    /// retried. Once ready, drops are handled internally.
    pub async fn connect(&self) -> GatewayResult<()> {
        let inner = &self.inner;
        if inner.state.lock().destroyed {
            return Err(GatewayError::Destroyed);
        }
        if inner.session.token().is_none() {
            return Err(GatewayError::TokenMissing);
        }

        inner.resolve_url().await?;
        inner.start_event_loop();

        tracing::info!(url = %inner.session.gateway_url(), "Connecting to gateway");

        match inner.session.connect().await {
            Ok(()) => Ok(()),
            Err(err) => Err(inner.classify_error(err)),
        }
    }

    /// Close with 1000, forget the session and stop. Idempotent.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    /// Dispatches held back until ready
    pub fn buffered(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn ping(&self) -> Option<Duration> {
        self.inner.session.ping()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.session.status()
    }

    pub fn session(&self) -> &GatewaySession {
        &self.inner.session
    }

    pub fn send(&self, message: GatewayMessage) {
        self.inner.session.send(message, false);
    }

    pub fn update_presence(&self, presence: PresenceUpdatePayload) {
        self.inner.session.update_presence(presence);
    }

    pub fn update_voice_state(&self, voice_state: VoiceStatePayload) {
        self.inner.session.update_voice_state(voice_state);
    }

    pub fn request_guild_members(&self, request: RequestGuildMembersPayload) {
        self.inner.session.request_guild_members(request);
    }
}

impl std::fmt::Debug for GatewaySupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("GatewaySupervisor")
            .field("destroyed", &state.destroyed)
            .field("ready", &state.ready)
            .field("buffered", &state.buffer.len())
            .field("session", &self.inner.session)
            .finish()
    }
}

impl SupervisorInner {
    fn publish(&self, event: GatewayEvent) {
        tracing::trace!(event = ?event.kind(), "Publishing gateway event");
        // Dropped receivers unsubscribe
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    async fn resolve_url(&self) -> GatewayResult<()> {
        if self.state.lock().gateway_url.is_some() {
            return Ok(());
        }

        match self.resolver.resolve().await {
            Ok(url) => {
                tracing::debug!(url = %url, "Gateway URL resolved");
                self.session.set_gateway_url(url.clone());
                self.state.lock().gateway_url = Some(url);
                Ok(())
            }
            Err(err) => {
                if err.is_authentication_failure() {
                    self.fatal(None, err.to_string());
                }
                Err(err)
            }
        }
    }

    /// A fatal close surfaces as `Fatal`, whichever way the race went
    fn classify_error(&self, err: GatewayError) -> GatewayError {
        match err {
            GatewayError::Closed { code, reason } if CloseKind::of(code) == CloseKind::Fatal => {
                CloseCode::from_u16(code)
                    .map_or(GatewayError::Closed { code, reason }, GatewayError::Fatal)
            }
            GatewayError::Destroyed => match self.state.lock().fatal {
                Some(code) => GatewayError::Fatal(code),
                None => GatewayError::Destroyed,
            },
            err => err,
        }
    }

    fn start_event_loop(self: &Arc<Self>) {
        let Some(receiver) = self.receiver.lock().take() else {
            return;
        };
        tokio::spawn(run(Arc::downgrade(self), receiver, self.shutdown.clone()));
    }

    fn next_buffered(&self) -> Option<Dispatch> {
        let mut state = self.state.lock();
        let ready = state.ready;
        state.buffer.pop(ready)
    }

    fn handle(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Dispatch(dispatch) => {
                let admitted = {
                    let mut state = self.state.lock();
                    let ready = state.ready;
                    state.buffer.admit(ready, dispatch)
                };
                match admitted {
                    Some(dispatch) => self.publish(GatewayEvent::Dispatch(dispatch)),
                    None => tracing::trace!("Dispatch held until ready"),
                }
            }
            SessionEvent::Ready { unavailable_guilds } => {
                self.mark_ready();
                self.publish(GatewayEvent::Ready { unavailable_guilds });
            }
            SessionEvent::Resumed => {
                self.mark_ready();
                self.publish(GatewayEvent::Resumed);
            }
            SessionEvent::Closed { code, reason } => {
                self.state.lock().ready = false;
                self.publish(GatewayEvent::Disconnected {
                    code,
                    reason: reason.clone(),
                });
                self.on_close(code, &reason);
            }
            SessionEvent::Destroyed => {
                self.state.lock().ready = false;
                if self.state.lock().ever_ready {
                    self.schedule_reconnect();
                }
            }
            SessionEvent::InvalidSession => {
                self.state.lock().ready = false;
                self.publish(GatewayEvent::InvalidSession);
                if self.state.lock().ever_ready {
                    self.schedule_reconnect();
                }
            }
            SessionEvent::Error(err) => {
                tracing::warn!(error = %err, "Gateway session error");
                self.publish(GatewayEvent::Error {
                    message: err.to_string(),
                });
            }
        }
    }

    fn mark_ready(&self) {
        let mut state = self.state.lock();
        state.ready = true;
        state.ever_ready = true;
    }

    fn on_close(self: &Arc<Self>, code: u16, reason: &str) {
        let (destroyed, ever_ready) = {
            let state = self.state.lock();
            (state.destroyed, state.ever_ready)
        };
        if destroyed {
            tracing::debug!(code, "Closed after destroy, not reconnecting");
            return;
        }

        let kind = CloseKind::of(code);
        if kind == CloseKind::Fatal {
            let message = match CloseCode::from_u16(code) {
                Some(close) => close.to_string(),
                None => format!("{code}: {reason}"),
            };
            self.fatal(Some(code), message);
            return;
        }

        // The first connection reports its own failure to the caller
        if !ever_ready {
            return;
        }

        if kind == CloseKind::Unresumable || self.session.session_id().is_none() {
            tracing::debug!(code, "Close is not resumable, dropping session");
            self.session.destroy(DestroyOptions {
                reset: true,
                emit: false,
                ..DestroyOptions::default()
            });
        }

        self.schedule_reconnect();
    }

    /// Start the reconnect loop unless one is already running
    fn schedule_reconnect(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.destroyed || state.reconnecting {
                return;
            }
            state.reconnecting = true;
        }

        tracing::info!("Reconnecting to gateway");
        self.publish(GatewayEvent::Reconnecting);

        let weak = Arc::downgrade(self);
        let session = self.session.clone();
        let shutdown = self.shutdown.clone();
        let delay = self.config.reconnect_delay();

        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    () = shutdown.cancelled() => return,
                    result = session.connect() => result,
                };

                let Some(inner) = weak.upgrade() else {
                    return;
                };

                match result {
                    Ok(()) => {
                        inner.state.lock().reconnecting = false;
                        tracing::info!("Reconnected to gateway");
                        return;
                    }
                    Err(err) if err.is_authentication_failure() => {
                        inner.state.lock().reconnecting = false;
                        inner.fatal(err.close_code(), err.to_string());
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            retry_in_ms = delay.as_millis() as u64,
                            "Reconnect failed"
                        );
                        inner.publish(GatewayEvent::Error {
                            message: err.to_string(),
                        });
                    }
                }
                drop(inner);

                tokio::select! {
                    () = shutdown.cancelled() => return,
                    () = sleep(delay) => {}
                }
            }
        });
    }

    /// Stop for good and report once
    fn fatal(&self, code: Option<u16>, message: String) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.ready = false;
            state.fatal = code.and_then(CloseCode::from_u16);
            state.buffer.clear();
        }

        tracing::error!(code = ?code, message = %message, "Gateway failed, giving up");
        self.session.destroy(DestroyOptions {
            reset: true,
            emit: false,
            ..DestroyOptions::default()
        });
        self.publish(GatewayEvent::Fatal { code, message });
        self.shutdown.cancel();
    }

    fn destroy(&self) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.ready = false;
            state.buffer.clear();
        }

        tracing::info!("Gateway supervisor destroyed");
        self.session.destroy(DestroyOptions {
            code: CloseCode::Normal.as_u16(),
            reset: true,
            emit: false,
        });
        self.shutdown.cancel();
    }
}

impl Drop for SupervisorInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Forward session events in order; once ready, held dispatches go out
/// one per scheduler tick ahead of anything newer.
async fn run(
    supervisor: Weak<SupervisorInner>,
    mut receiver: mpsc::UnboundedReceiver<SessionEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let Some(inner) = supervisor.upgrade() else {
            break;
        };
        if let Some(dispatch) = inner.next_buffered() {
            inner.publish(GatewayEvent::Dispatch(dispatch));
            drop(inner);
            tokio::task::yield_now().await;
            continue;
        }
        drop(inner);

        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = receiver.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        let Some(inner) = supervisor.upgrade() else {
            break;
        };
        inner.handle(event);
    }
    tracing::debug!("Gateway event loop stopped");
}
