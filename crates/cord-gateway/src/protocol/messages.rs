//! Gateway frame format

use super::{
    HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, ReadyPayload,
    RequestGuildMembersPayload, ResumePayload, VoiceStatePayload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One gateway frame: `{op, d, s, t}`
///
/// `d` is always present on the wire (`null` when empty); `s` and `t` only
/// on dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: OpCode,

    #[serde(default)]
    pub d: Value,

    /// Sequence number (op=0 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (op=0 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayMessage {
    fn with_data(op: OpCode, d: Value) -> Self {
        Self { op, d, s: None, t: None }
    }

    fn with_payload<T: Serialize>(op: OpCode, payload: T) -> Self {
        Self::with_data(op, serde_json::to_value(payload).unwrap_or_default())
    }

    // === Client Messages ===

    /// Heartbeat (op=1) carrying the last sequence number seen
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::with_data(OpCode::Heartbeat, last_sequence.map_or(Value::Null, Value::from))
    }

    /// Identify (op=2)
    #[must_use]
    pub fn identify(payload: IdentifyPayload) -> Self {
        Self::with_payload(OpCode::Identify, payload)
    }

    /// Presence Update (op=3)
    #[must_use]
    pub fn presence_update(payload: PresenceUpdatePayload) -> Self {
        Self::with_payload(OpCode::PresenceUpdate, payload)
    }

    /// Voice State Update (op=4)
    #[must_use]
    pub fn voice_state_update(payload: VoiceStatePayload) -> Self {
        Self::with_payload(OpCode::VoiceStateUpdate, payload)
    }

    /// Resume (op=6)
    #[must_use]
    pub fn resume(payload: ResumePayload) -> Self {
        Self::with_payload(OpCode::Resume, payload)
    }

    /// Request Guild Members (op=8)
    #[must_use]
    pub fn request_guild_members(payload: RequestGuildMembersPayload) -> Self {
        Self::with_payload(OpCode::RequestGuildMembers, payload)
    }

    // === Server Messages ===

    /// Dispatch (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d: data,
            s: Some(sequence),
            t: Some(event_type.into()),
        }
    }

    /// Hello (op=10)
    #[must_use]
    pub fn hello(payload: HelloPayload) -> Self {
        Self::with_payload(OpCode::Hello, payload)
    }

    /// Heartbeat ACK (op=11)
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::with_data(OpCode::HeartbeatAck, Value::Null)
    }

    /// Reconnect (op=7)
    #[must_use]
    pub fn reconnect() -> Self {
        Self::with_data(OpCode::Reconnect, Value::Null)
    }

    /// Invalid Session (op=9), `resumable` is carried in `d`
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::with_data(OpCode::InvalidSession, Value::Bool(resumable))
    }

    // === Parsing ===

    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        serde_json::from_value(self.d.clone()).ok()
    }

    /// READY dispatch payload
    pub fn as_ready(&self) -> Option<ReadyPayload> {
        if self.op != OpCode::Dispatch || self.t.as_deref() != Some("READY") {
            return None;
        }
        serde_json::from_value(self.d.clone()).ok()
    }

    /// Whether an Invalid Session may be resumed
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_bool().unwrap_or(false))
    }

    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_u64())
    }

    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        if self.op != OpCode::Identify {
            return None;
        }
        serde_json::from_value(self.d.clone()).ok()
    }

    pub fn as_resume(&self) -> Option<ResumePayload> {
        if self.op != OpCode::Resume {
            return None;
        }
        serde_json::from_value(self.d.clone()).ok()
    }

    // === Utilities ===

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
