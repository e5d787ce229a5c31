//!
//! In-memory hub message model shared by all protocol codecs.
//!

use crate::imports::*;

/// A single message exchanged with the hub. Wire representation
/// (type tags, framing) is the responsibility of the protocol codec.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(Invocation),
    StreamInvocation(StreamInvocation),
    StreamItem(StreamItem),
    Completion(Completion),
    CancelInvocation(CancelInvocation),
    Ping,
    Close(Close),
}

/// Invocation of a hub method. Without an `invocation_id` no response
/// is expected (fire-and-forget); with one, the receiving side is
/// obliged to answer with a [`Completion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<AHashMap<String, String>>,
}

impl Invocation {
    pub fn new(invocation_id: Option<String>, target: &str, arguments: Vec<Value>) -> Self {
        Invocation {
            invocation_id,
            target: target.to_string(),
            arguments,
            stream_ids: None,
            headers: None,
        }
    }
}

/// Like [`Invocation`], but the server is expected to respond with a
/// stream of [`StreamItem`] messages terminated by a [`Completion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInvocation {
    pub invocation_id: String,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<AHashMap<String, String>>,
}

impl StreamInvocation {
    pub fn new(invocation_id: String, target: &str, arguments: Vec<Value>) -> Self {
        StreamInvocation {
            invocation_id,
            target: target.to_string(),
            arguments,
            stream_ids: None,
            headers: None,
        }
    }
}

/// One element of an active stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamItem {
    pub invocation_id: String,
    pub item: Value,
}

impl StreamItem {
    pub fn new(invocation_id: &str, item: Value) -> Self {
        StreamItem {
            invocation_id: invocation_id.to_string(),
            item,
        }
    }
}

/// Terminal message of an invocation or stream. Carries either a
/// `result`, an `error`, or neither (void completion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub invocation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Completion {
    pub fn result(invocation_id: &str, result: Value) -> Self {
        Completion {
            invocation_id: invocation_id.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(invocation_id: &str, error: impl Into<String>) -> Self {
        Completion {
            invocation_id: invocation_id.to_string(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn void(invocation_id: &str) -> Self {
        Completion {
            invocation_id: invocation_id.to_string(),
            result: None,
            error: None,
        }
    }

    pub fn is_void(&self) -> bool {
        self.result.is_none() && self.error.is_none()
    }
}

/// Requests cancellation of an outstanding stream invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInvocation {
    pub invocation_id: String,
}

impl CancelInvocation {
    pub fn new(invocation_id: &str) -> Self {
        CancelInvocation {
            invocation_id: invocation_id.to_string(),
        }
    }
}

/// Server-initiated connection close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Close {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_reconnect: Option<bool>,
}

impl Close {
    pub fn new(error: Option<String>, allow_reconnect: Option<bool>) -> Self {
        Close {
            error,
            allow_reconnect,
        }
    }
}
