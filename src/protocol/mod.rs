//!
//! Protocol seam: trait implemented by pluggable hub message codecs.
//!

pub mod json;
pub mod plain;

pub use json::JsonHubProtocol;
pub use plain::PlainJsonProtocol;

use crate::imports::*;
use crate::message::HubMessage;

/// Payload representation used on the WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFormat {
    Text,
    Binary,
}

/// Numeric `type` tag carried by every hub message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl MessageType {
    /// Unknown tags yield `None` and must be skipped, not rejected.
    pub fn from_tag(tag: u64) -> Option<MessageType> {
        match tag {
            1 => Some(MessageType::Invocation),
            2 => Some(MessageType::StreamItem),
            3 => Some(MessageType::Completion),
            4 => Some(MessageType::StreamInvocation),
            5 => Some(MessageType::CancelInvocation),
            6 => Some(MessageType::Ping),
            7 => Some(MessageType::Close),
            _ => None,
        }
    }
}

/// First frame sent after the WebSocket opens.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: i32,
}

impl HandshakeRequest {
    pub fn new(protocol: &str, version: i32) -> Self {
        HandshakeRequest {
            protocol: protocol.to_string(),
            version,
        }
    }
}

/// Server reply to the handshake request. An empty object means the
/// protocol was accepted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    pub error: Option<String>,
    pub minor_version: Option<i32>,
}

impl HandshakeResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Bidirectional translation between [`HubMessage`] values and wire
/// frames, plus the handshake dialect of the codec.
pub trait HubProtocol: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn version(&self) -> i32;
    fn transfer_format(&self) -> TransferFormat;
    /// Bytes of the handshake frame. An empty vector means the codec
    /// has no handshake dialect and the exchange is skipped entirely.
    fn handshake_request(&self) -> Vec<u8>;
    /// Splits the first inbound frame into the handshake response and
    /// any trailing hub messages concatenated after it.
    fn parse_handshake<'a>(&self, data: &'a [u8]) -> Result<(HandshakeResponse, &'a [u8])>;
    fn encode(&self, message: &HubMessage) -> Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> Result<Vec<HubMessage>>;
}
