//!
//! SignalR JSON hub protocol: type-tagged JSON texts delimited by the
//! 0x1E record separator.
//!

use super::{HandshakeRequest, HandshakeResponse, HubProtocol, MessageType, TransferFormat};
use crate::imports::*;
use crate::message::*;

/// Byte terminating every JSON text on the wire.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Serializes a hub message into its type-tagged JSON object form.
pub(crate) fn to_wire_value(message: &HubMessage) -> Result<Value> {
    let (kind, mut value) = match message {
        HubMessage::Invocation(msg) => (MessageType::Invocation, serde_json::to_value(msg)?),
        HubMessage::StreamInvocation(msg) => {
            (MessageType::StreamInvocation, serde_json::to_value(msg)?)
        }
        HubMessage::StreamItem(msg) => (MessageType::StreamItem, serde_json::to_value(msg)?),
        HubMessage::Completion(msg) => (MessageType::Completion, serde_json::to_value(msg)?),
        HubMessage::CancelInvocation(msg) => {
            (MessageType::CancelInvocation, serde_json::to_value(msg)?)
        }
        HubMessage::Ping => (MessageType::Ping, Value::Object(serde_json::Map::new())),
        HubMessage::Close(msg) => (MessageType::Close, serde_json::to_value(msg)?),
    };

    match &mut value {
        Value::Object(map) => {
            map.insert("type".to_string(), Value::from(kind as u8));
            Ok(value)
        }
        _ => Err(Error::Protocol(
            "hub message did not serialize to an object".to_string(),
        )),
    }
}

/// Deserializes a type-tagged JSON object into a hub message.
/// Unknown type tags yield `None` for forward compatibility.
pub(crate) fn from_wire_value(value: Value) -> Result<Option<HubMessage>> {
    let Value::Object(mut map) = value else {
        return Err(Error::Protocol(
            "hub message is not a JSON object".to_string(),
        ));
    };

    let tag = map
        .remove("type")
        .and_then(|tag| tag.as_u64())
        .ok_or_else(|| Error::Protocol("hub message carries no type tag".to_string()))?;

    let Some(kind) = MessageType::from_tag(tag) else {
        log_trace!("ignoring hub message with unknown type tag {tag}");
        return Ok(None);
    };

    let value = Value::Object(map);
    let message = match kind {
        MessageType::Invocation => HubMessage::Invocation(parse(value)?),
        MessageType::StreamItem => HubMessage::StreamItem(parse(value)?),
        MessageType::Completion => {
            let completion: Completion = parse(value)?;
            if completion.result.is_some() && completion.error.is_some() {
                return Err(Error::Protocol(
                    "completion carries both result and error".to_string(),
                ));
            }
            HubMessage::Completion(completion)
        }
        MessageType::StreamInvocation => HubMessage::StreamInvocation(parse(value)?),
        MessageType::CancelInvocation => HubMessage::CancelInvocation(parse(value)?),
        MessageType::Ping => HubMessage::Ping,
        MessageType::Close => HubMessage::Close(parse(value)?),
    };

    Ok(Some(message))
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| Error::Protocol(err.to_string()))
}

/// The standard `"json"` hub protocol, version 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonHubProtocol;

impl HubProtocol for JsonHubProtocol {
    fn name(&self) -> &'static str {
        "json"
    }

    fn version(&self) -> i32 {
        1
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Text
    }

    fn handshake_request(&self) -> Vec<u8> {
        let request = HandshakeRequest::new(self.name(), self.version());
        let mut data = serde_json::to_vec(&request).expect("handshake request serialization");
        data.push(RECORD_SEPARATOR);
        data
    }

    fn parse_handshake<'a>(&self, data: &'a [u8]) -> Result<(HandshakeResponse, &'a [u8])> {
        let Some(position) = data.iter().position(|byte| *byte == RECORD_SEPARATOR) else {
            return Err(Error::Handshake(
                "incomplete handshake response".to_string(),
            ));
        };

        let response: HandshakeResponse = serde_json::from_slice(&data[..position])
            .map_err(|err| Error::Handshake(err.to_string()))?;

        Ok((response, &data[position + 1..]))
    }

    fn encode(&self, message: &HubMessage) -> Result<Vec<u8>> {
        let mut data = serde_json::to_vec(&to_wire_value(message)?)?;
        data.push(RECORD_SEPARATOR);
        Ok(data)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<HubMessage>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        // A frame not terminated by the record separator holds a
        // partial JSON text; the stream cannot be re-synchronized.
        let Some(data) = data.strip_suffix(&[RECORD_SEPARATOR]) else {
            return Err(Error::Protocol(
                "incomplete frame: missing record separator".to_string(),
            ));
        };

        let mut messages = Vec::new();
        for chunk in data.split(|byte| *byte == RECORD_SEPARATOR) {
            if chunk.is_empty() {
                continue;
            }
            let text =
                std::str::from_utf8(chunk).map_err(|err| Error::Protocol(err.to_string()))?;
            let value: Value =
                serde_json::from_str(text).map_err(|err| Error::Protocol(err.to_string()))?;
            if let Some(message) = from_wire_value(value)? {
                messages.push(message);
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(message: HubMessage) {
        let protocol = JsonHubProtocol;
        let data = protocol.encode(&message).unwrap();
        assert_eq!(*data.last().unwrap(), RECORD_SEPARATOR);
        let decoded = protocol.decode(&data).unwrap();
        assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn round_trips() {
        round_trip(HubMessage::Invocation(Invocation::new(
            None,
            "notify",
            vec![json!({"x": 1})],
        )));
        round_trip(HubMessage::Invocation(Invocation::new(
            Some("42".to_string()),
            "add",
            vec![json!(1), json!(2)],
        )));
        round_trip(HubMessage::StreamInvocation(StreamInvocation::new(
            "7".to_string(),
            "counter",
            vec![json!(10)],
        )));
        round_trip(HubMessage::StreamItem(StreamItem::new("7", json!("item"))));
        round_trip(HubMessage::Completion(Completion::result("42", json!(3))));
        round_trip(HubMessage::Completion(Completion::error("42", "boom")));
        round_trip(HubMessage::Completion(Completion::void("42")));
        round_trip(HubMessage::CancelInvocation(CancelInvocation::new("7")));
        round_trip(HubMessage::Ping);
        round_trip(HubMessage::Close(Close::new(
            Some("going away".to_string()),
            Some(true),
        )));
    }

    #[test]
    fn decode_concatenated_frames() {
        let protocol = JsonHubProtocol;
        let a = HubMessage::Ping;
        let b = HubMessage::Completion(Completion::result("1", json!(3)));
        let mut data = protocol.encode(&a).unwrap();
        data.extend(protocol.encode(&b).unwrap());
        let decoded = protocol.decode(&data).unwrap();
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn decode_rejects_partial_frame() {
        let protocol = JsonHubProtocol;
        let result = protocol.decode(b"{\"type\":6}\x1e{\"type\":6");
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let protocol = JsonHubProtocol;
        let result = protocol.decode(b"{\"type\":\x1e");
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn decode_skips_unknown_type_tags() {
        let protocol = JsonHubProtocol;
        let data = b"{\"type\":99,\"payload\":true}\x1e{\"type\":6}\x1e";
        let decoded = protocol.decode(data).unwrap();
        assert_eq!(decoded, vec![HubMessage::Ping]);
    }

    #[test]
    fn decode_rejects_missing_type_tag() {
        let protocol = JsonHubProtocol;
        let result = protocol.decode(b"{\"target\":\"x\"}\x1e");
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn completion_with_result_and_error_is_rejected() {
        let protocol = JsonHubProtocol;
        let data = b"{\"type\":3,\"invocationId\":\"1\",\"result\":1,\"error\":\"x\"}\x1e";
        assert!(matches!(protocol.decode(data), Err(Error::Protocol(_))));
    }

    #[test]
    fn handshake_request_shape() {
        let protocol = JsonHubProtocol;
        let data = protocol.handshake_request();
        assert_eq!(*data.last().unwrap(), RECORD_SEPARATOR);
        let value: Value = serde_json::from_slice(&data[..data.len() - 1]).unwrap();
        assert_eq!(value, json!({"protocol": "json", "version": 1}));
    }

    #[test]
    fn parse_handshake_success_with_trailing_messages() {
        let protocol = JsonHubProtocol;
        let data = b"{}\x1e{\"type\":6}\x1e";
        let (response, remaining) = protocol.parse_handshake(data).unwrap();
        assert!(response.is_success());
        assert_eq!(protocol.decode(remaining).unwrap(), vec![HubMessage::Ping]);
    }

    #[test]
    fn parse_handshake_null_error_is_success() {
        let protocol = JsonHubProtocol;
        let (response, remaining) = protocol.parse_handshake(b"{\"error\":null}\x1e").unwrap();
        assert!(response.is_success());
        assert!(remaining.is_empty());
    }

    #[test]
    fn parse_handshake_error() {
        let protocol = JsonHubProtocol;
        let (response, _) = protocol
            .parse_handshake(b"{\"error\":\"bad proto\"}\x1e")
            .unwrap();
        assert_eq!(response.error.as_deref(), Some("bad proto"));
    }

    #[test]
    fn parse_handshake_without_separator_fails() {
        let protocol = JsonHubProtocol;
        assert!(matches!(
            protocol.parse_handshake(b"{\"error\":null}"),
            Err(Error::Handshake(_))
        ));
    }

    #[test]
    fn separator_absent_from_payload() {
        let protocol = JsonHubProtocol;
        let data = protocol
            .encode(&HubMessage::Invocation(Invocation::new(
                None,
                "notify",
                vec![json!("text with spaces")],
            )))
            .unwrap();
        assert_eq!(
            data.iter()
                .filter(|byte| **byte == RECORD_SEPARATOR)
                .count(),
            1
        );
    }
}
