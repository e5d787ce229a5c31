//!
//! Thin adapter over tokio-tungstenite: builds the client handshake
//! request (header and bearer-token merge), applies TLS and message
//! size limits, and opens the socket.
//!

use crate::imports::*;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};

pub use tokio_tungstenite::Connector;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection-time knobs for the underlying WebSocket.
#[derive(Default)]
pub struct TransportOptions {
    /// Additional HTTP headers for the WebSocket handshake request.
    /// `Authorization` is owned by the access token and cannot be
    /// overridden here.
    pub headers: AHashMap<String, String>,
    /// External TLS connector; `None` selects the default connector
    /// of the enabled TLS feature.
    pub tls: Option<Connector>,
    /// Inbound message byte limit; `None` disables the limit.
    pub max_message_size: Option<usize>,
}

/// Opens the WebSocket. The bearer token, when present, is attached
/// as `Authorization: Bearer <token>` after the user headers so the
/// token provider always wins that header.
pub(crate) async fn connect(
    url: &str,
    bearer: Option<&str>,
    options: &TransportOptions,
) -> Result<WsStream> {
    if !url.starts_with("ws://") && !url.starts_with("wss://") {
        return Err(Error::AddressSchema(url.to_string()));
    }

    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();
    for (name, value) in options.headers.iter() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| Error::Connection(format!("invalid header name `{name}`: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| Error::Connection(format!("invalid header value: {err}")))?;
        headers.insert(name, value);
    }
    if let Some(token) = bearer {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| Error::Connection(format!("invalid bearer token: {err}")))?;
        headers.insert(AUTHORIZATION, value);
    }

    let mut config = WebSocketConfig::default();
    config.max_message_size = options.max_message_size;

    log_trace!("opening websocket to {url}");
    let (stream, _response) =
        connect_async_tls_with_config(request, Some(config), false, options.tls.clone()).await?;

    Ok(stream)
}
