//! Inbound frame handling, one method per op code

use cord_core::Snowflake;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant};

use super::state::Timers;
use super::{DestroyOptions, Lifecycle, SessionEvent, SessionInner, SessionStatus};
use crate::error::GatewayError;
use crate::events::{Dispatch, GatewayEventType};
use crate::protocol::{
    CloseCode, GatewayMessage, HelloPayload, IdentifyPayload, IdentifyProperties, OpCode,
    ReadyPayload, ResumePayload,
};

impl SessionInner {
    pub(super) fn handle_frame(self: &Arc<Self>, generation: u64, frame: GatewayMessage) {
        match frame.op {
            OpCode::Dispatch => self.on_dispatch(generation, frame),
            OpCode::Hello => match frame.as_hello() {
                Some(hello) => self.on_hello(generation, &hello),
                None => self.emit(SessionEvent::Error(GatewayError::codec(
                    "malformed Hello payload",
                ))),
            },
            OpCode::Heartbeat => {
                tracing::debug!("Heartbeat requested by server");
                self.send_heartbeat();
            }
            OpCode::HeartbeatAck => self.on_heartbeat_ack(),
            OpCode::Reconnect => {
                tracing::info!("Server requested reconnect");
                self.destroy(DestroyOptions::with_code(CloseCode::UnknownError.as_u16()));
            }
            OpCode::InvalidSession => {
                self.on_invalid_session(frame.as_invalid_session().unwrap_or(false));
            }
            op => tracing::warn!(op = %op, "Ignoring client op code sent by server"),
        }
    }

    fn on_hello(self: &Arc<Self>, generation: u64, hello: &HelloPayload) {
        let interval = Duration::from_millis(hello.heartbeat_interval.max(1));
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            Timers::replace(&mut state.timers.hello, None);
            // A fresh socket starts with nothing in flight
            state.heartbeat_acked = true;
            state.last_heartbeat_sent = None;

            let weak = Arc::downgrade(self);
            let heartbeat = tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + interval, interval);
                loop {
                    ticker.tick().await;
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    if !inner.heartbeat_tick(generation) {
                        break;
                    }
                }
            })
            .abort_handle();
            Timers::replace(&mut state.timers.heartbeat, Some(heartbeat));
        }

        tracing::debug!(interval_ms = hello.heartbeat_interval, "Hello received");
        self.identify();
    }

    /// Returns false once the heartbeat loop should stop
    fn heartbeat_tick(self: &Arc<Self>, generation: u64) -> bool {
        let acked = {
            let state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            state.heartbeat_acked
        };

        if !acked {
            tracing::warn!("Heartbeat not acknowledged, connection zombied");
            self.destroy(DestroyOptions {
                code: CloseCode::SessionTimeout.as_u16(),
                reset: false,
                emit: true,
            });
            return false;
        }

        self.send_heartbeat();
        true
    }

    pub(super) fn send_heartbeat(self: &Arc<Self>) {
        let frame = {
            let mut state = self.state.lock();
            state.heartbeat_acked = false;
            state.last_heartbeat_sent = Some(Instant::now());
            GatewayMessage::heartbeat(state.last_sequence())
        };
        self.enqueue(frame, true);
    }

    fn on_heartbeat_ack(&self) {
        let mut state = self.state.lock();
        state.heartbeat_acked = true;
        if let Some(sent) = state.last_heartbeat_sent {
            let ping = sent.elapsed();
            state.ping = Some(ping);
            tracing::trace!(ping_ms = ping.as_millis() as u64, "Heartbeat acknowledged");
        }
    }

    /// Resume when a session id is held, identify otherwise
    pub(super) fn identify(self: &Arc<Self>) {
        let Some(token) = self.token() else {
            tracing::warn!("No token, cannot identify");
            return;
        };

        let frame = {
            let mut state = self.state.lock();
            match state.session_id.clone() {
                Some(session_id) => {
                    state.status = SessionStatus::Resuming;
                    let seq = state.last_sequence();
                    tracing::debug!(session_id = %session_id, seq = ?seq, "Resuming session");
                    GatewayMessage::resume(ResumePayload {
                        token: token.secret().to_string(),
                        session_id,
                        seq,
                    })
                }
                None => {
                    state.status = SessionStatus::Identifying;
                    tracing::debug!(intents = %self.config.intents, "Identifying new session");
                    GatewayMessage::identify(IdentifyPayload {
                        token: token.secret().to_string(),
                        properties: IdentifyProperties::new(),
                        compress: self.config.compress,
                        large_threshold: self.config.large_threshold,
                        intents: self.config.intents,
                        presence: None,
                    })
                }
            }
        };

        self.enqueue(frame, true);
    }

    fn on_dispatch(self: &Arc<Self>, generation: u64, frame: GatewayMessage) {
        if let Some(sequence) = frame.s {
            self.state.lock().observe_sequence(sequence);
        }

        let Some(kind) = frame.t.clone() else {
            tracing::warn!(s = ?frame.s, "Dispatch without event name");
            return;
        };
        let event_type = GatewayEventType::from_name(&kind);

        let ready = match event_type {
            Some(GatewayEventType::Ready) => frame.as_ready(),
            _ => None,
        };
        let guild_id: Option<Snowflake> = match event_type {
            Some(GatewayEventType::GuildCreate) => frame
                .d
                .get("id")
                .and_then(|id| serde_json::from_value(id.clone()).ok()),
            _ => None,
        };

        self.emit(SessionEvent::Dispatch(Dispatch {
            kind,
            sequence: frame.s,
            data: frame.d,
        }));

        match event_type {
            Some(GatewayEventType::Ready) => match ready {
                Some(ready) => self.on_ready(generation, ready),
                None => self.emit(SessionEvent::Error(GatewayError::codec(
                    "malformed READY payload",
                ))),
            },
            Some(GatewayEventType::Resumed) => self.on_resumed(),
            Some(GatewayEventType::GuildCreate) => {
                if let Some(guild_id) = guild_id {
                    self.on_guild_available(generation, guild_id);
                }
            }
            _ => {}
        }
    }

    fn on_ready(self: &Arc<Self>, generation: u64, ready: ReadyPayload) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.status = SessionStatus::WaitingForGuilds;
            state.expected_guilds = ready.guilds.iter().map(|guild| guild.id).collect();
            state.heartbeat_acked = true;
            tracing::info!(
                session_id = %ready.session_id,
                guilds = state.expected_guilds.len(),
                "Session identified, waiting for guilds"
            );
            state.session_id = Some(ready.session_id);
            state.resume_url = ready.resume_gateway_url;
        }

        self.send_heartbeat();
        self.check_ready(generation);
    }

    fn on_resumed(self: &Arc<Self>) {
        let replayed = {
            let mut state = self.state.lock();
            state.status = SessionStatus::Ready;
            state.heartbeat_acked = true;
            match (state.sequence, state.close_sequence) {
                (Some(sequence), Some(closed_at)) => sequence.saturating_sub(closed_at),
                _ => 0,
            }
        };

        tracing::info!(replayed, "Session resumed");
        self.send_heartbeat();
        self.emit(SessionEvent::Resumed);
        self.signal(Lifecycle::Resumed);
    }

    fn on_guild_available(self: &Arc<Self>, generation: u64, guild_id: Snowflake) {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.status != SessionStatus::WaitingForGuilds {
                return;
            }
            state.expected_guilds.remove(&guild_id);
        }
        self.check_ready(generation);
    }

    /// Ready once every expected guild arrived, or when the grace timer
    /// fires, whichever comes first
    fn check_ready(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }

        if state.expected_guilds.is_empty() {
            Timers::replace(&mut state.timers.ready, None);
            state.status = SessionStatus::Ready;
            drop(state);
            self.announce_ready(Vec::new());
            return;
        }

        let weak = Arc::downgrade(self);
        let grace = self.config.ready_timeout();
        let timer = tokio::spawn(async move {
            sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_ready_timeout(generation);
            }
        })
        .abort_handle();
        Timers::replace(&mut state.timers.ready, Some(timer));
    }

    fn on_ready_timeout(&self, generation: u64) {
        let unavailable = {
            let mut state = self.state.lock();
            if state.generation != generation || state.status != SessionStatus::WaitingForGuilds {
                return;
            }
            state.status = SessionStatus::Ready;
            state.timers.ready = None;
            let mut ids: Vec<Snowflake> = state.expected_guilds.drain().collect();
            ids.sort_unstable();
            ids
        };

        tracing::warn!(
            unavailable = unavailable.len(),
            "Guilds still unavailable after the ready grace period"
        );
        self.announce_ready(unavailable);
    }

    fn announce_ready(&self, unavailable_guilds: Vec<Snowflake>) {
        tracing::info!("Session ready");
        self.emit(SessionEvent::Ready { unavailable_guilds });
        self.signal(Lifecycle::Ready);
    }

    fn on_invalid_session(self: &Arc<Self>, resumable: bool) {
        if resumable {
            tracing::info!("Invalid session, resuming");
            self.identify();
            return;
        }

        {
            let mut state = self.state.lock();
            state.forget_session();
            state.status = SessionStatus::Reconnecting;
        }

        tracing::info!("Invalid session, not resumable");
        self.emit(SessionEvent::InvalidSession);
        self.signal(Lifecycle::InvalidSession);
    }
}
