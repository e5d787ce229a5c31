//!
//! Plain JSON codec: one type-tagged JSON object per WebSocket frame,
//! no record separator and no handshake. Used against endpoints that
//! speak hub-shaped JSON without the SignalR handshake dialect.
//!

use super::json::{from_wire_value, to_wire_value};
use super::{HandshakeResponse, HubProtocol, TransferFormat};
use crate::imports::*;
use crate::message::HubMessage;

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainJsonProtocol;

impl HubProtocol for PlainJsonProtocol {
    fn name(&self) -> &'static str {
        "plain-json"
    }

    fn version(&self) -> i32 {
        1
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Text
    }

    fn handshake_request(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_handshake<'a>(&self, data: &'a [u8]) -> Result<(HandshakeResponse, &'a [u8])> {
        Ok((HandshakeResponse::default(), data))
    }

    fn encode(&self, message: &HubMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&to_wire_value(message)?)?)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<HubMessage>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let value: Value =
            serde_json::from_slice(data).map_err(|err| Error::Protocol(err.to_string()))?;
        Ok(from_wire_value(value)?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Completion, Invocation};
    use serde_json::json;

    #[test]
    fn encodes_without_separator() {
        let protocol = PlainJsonProtocol;
        let data = protocol
            .encode(&HubMessage::Invocation(Invocation::new(
                None,
                "notify",
                vec![json!(1)],
            )))
            .unwrap();
        assert!(!data.contains(&0x1e));
        let value: Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(value["type"], json!(1));
    }

    #[test]
    fn decodes_single_message_per_frame() {
        let protocol = PlainJsonProtocol;
        let decoded = protocol
            .decode(b"{\"type\":3,\"invocationId\":\"9\",\"result\":true}")
            .unwrap();
        assert_eq!(
            decoded,
            vec![HubMessage::Completion(Completion::result("9", json!(true)))]
        );
    }

    #[test]
    fn unknown_type_yields_nothing() {
        let protocol = PlainJsonProtocol;
        assert!(protocol.decode(b"{\"type\":42}").unwrap().is_empty());
    }

    #[test]
    fn has_no_handshake_dialect() {
        let protocol = PlainJsonProtocol;
        assert!(protocol.handshake_request().is_empty());
        let (response, remaining) = protocol.parse_handshake(b"{\"type\":6}").unwrap();
        assert!(response.is_success());
        assert_eq!(remaining, b"{\"type\":6}");
    }
}
