//!
//! Client [`enum@Error`] enum declaration
//!

use std::sync::PoisonError;
use thiserror::Error;
use workflow_core::channel::{RecvError, SendError, TrySendError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Custom(String),

    #[error("invalid URL scheme: {0}")]
    AddressSchema(String),

    /// An operation was issued while the connection was not in the
    /// connected state. Distinct from [`Error::Connection`], which
    /// reports transport failures on an established link.
    #[error("client is not connected")]
    NotConnected,

    #[error("client is already running")]
    AlreadyRunning,

    /// Transport-level failure (socket open, send or receive).
    #[error("connection error: {0}")]
    Connection(String),

    /// Negotiation HTTP call failed with a non-auth error.
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Negotiation was rejected with 401/403.
    #[error("negotiation rejected with status {0}")]
    Auth(u16),

    /// Handshake response carried an error or was malformed.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Inbound frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server-reported error in a completion.
    #[error("{0}")]
    Server(String),

    /// No inbound traffic within the connection timeout.
    #[error("connection timeout")]
    Timeout,

    #[error("PoisonError")]
    PoisonError,

    #[error("channel receive error")]
    ChannelRecv,

    #[error("channel send error")]
    ChannelSend,

    #[error("WebSocket error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    pub fn custom<T: ToString>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Errors that abort the connection loop instead of engaging
    /// the reconnect strategy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Auth(_) | Error::Handshake(_) | Error::AddressSchema(_)
        )
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Error {
        Error::PoisonError
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(_: SendError<T>) -> Error {
        Error::ChannelSend
    }
}

impl<T> From<TrySendError<T>> for Error {
    fn from(_: TrySendError<T>) -> Error {
        Error::ChannelSend
    }
}

impl From<RecvError> for Error {
    fn from(_: RecvError) -> Error {
        Error::ChannelRecv
    }
}
