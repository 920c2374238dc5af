//! Frame encoding
//!
//! The session is generic over how frames are serialized. JSON is the
//! default; another encoding plugs in through [`GatewayCodec`].

use crate::error::GatewayError;
use crate::protocol::GatewayMessage;

/// One encoded outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Serializes frames for the wire
pub trait GatewayCodec: Send + Sync + std::fmt::Debug {
    /// Value of the `encoding` query parameter
    fn encoding(&self) -> &'static str;

    fn encode(&self, message: &GatewayMessage) -> Result<EncodedFrame, GatewayError>;

    /// Decode one complete (already inflated) frame
    fn decode(&self, payload: &[u8]) -> Result<GatewayMessage, GatewayError>;
}

/// JSON text frames
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl GatewayCodec for JsonCodec {
    fn encoding(&self) -> &'static str {
        "json"
    }

    fn encode(&self, message: &GatewayMessage) -> Result<EncodedFrame, GatewayError> {
        message
            .to_json()
            .map(EncodedFrame::Text)
            .map_err(GatewayError::codec)
    }

    fn decode(&self, payload: &[u8]) -> Result<GatewayMessage, GatewayError> {
        serde_json::from_slice(payload).map_err(GatewayError::codec)
    }
}
