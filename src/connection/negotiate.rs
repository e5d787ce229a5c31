//!
//! Pre-handshake HTTP negotiation: resolves an HTTP(S) hub URL into a
//! connectable WebSocket URL plus an optional session access token.
//!

use crate::imports::*;

pub(crate) const NEGOTIATE_VERSION: u32 = 1;
/// Redirect responses (`{url, accessToken}`) are re-negotiated at the
/// target, bounded to avoid redirect loops.
pub(crate) const MAX_REDIRECTS: usize = 8;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NegotiateResponse {
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub connection_id: Option<String>,
    pub connection_token: Option<String>,
    #[serde(default)]
    pub available_transports: Vec<TransportSpec>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportSpec {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Outcome of negotiation: where to open the WebSocket and which
/// bearer token to attach.
#[derive(Debug)]
pub(crate) struct Negotiated {
    pub url: String,
    pub access_token: Option<String>,
}

pub(crate) async fn negotiate(
    http: &reqwest::Client,
    url: &str,
    headers: &AHashMap<String, String>,
    bearer: Option<&str>,
) -> Result<Negotiated> {
    let mut url = url.to_string();
    let mut bearer = bearer.map(str::to_string);

    for _ in 0..=MAX_REDIRECTS {
        // ws/wss endpoints connect directly; negotiation is an
        // HTTP(S)-only concern.
        if is_websocket_scheme(&url) {
            return Ok(Negotiated {
                url,
                access_token: bearer,
            });
        }

        let endpoint = negotiate_url(&url);
        log_trace!("negotiating via {endpoint}");

        let mut request = http.post(&endpoint);
        for (name, value) in headers.iter() {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = bearer.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| Error::Negotiation(err.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(Error::Auth(status));
        }
        if !response.status().is_success() {
            return Err(Error::Negotiation(format!(
                "negotiate returned status {status}"
            )));
        }

        let document: NegotiateResponse = response
            .json()
            .await
            .map_err(|err| Error::Negotiation(err.to_string()))?;

        if let Some(error) = document.error {
            return Err(Error::Negotiation(error));
        }

        // Redirect: re-negotiate at the target with its token.
        if let Some(redirect) = document.url {
            log_debug!("negotiate redirected to {redirect}");
            bearer = document.access_token.or(bearer);
            url = redirect;
            continue;
        }

        for transport in document.available_transports.iter() {
            log_trace!(
                "available transport: {} {:?}",
                transport.transport,
                transport.transfer_formats
            );
        }

        let id = document
            .connection_token
            .or(document.connection_id)
            .ok_or_else(|| {
                Error::Negotiation("negotiate response carries no connection id".to_string())
            })?;

        return Ok(Negotiated {
            url: append_id(&websocket_url(&url)?, &id),
            access_token: document.access_token.or(bearer),
        });
    }

    Err(Error::Negotiation(format!(
        "negotiate exceeded {MAX_REDIRECTS} redirects"
    )))
}

pub(crate) fn is_websocket_scheme(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

/// http → ws, https → wss; ws/wss pass through unchanged.
pub(crate) fn websocket_url(url: &str) -> Result<String> {
    if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if is_websocket_scheme(url) {
        Ok(url.to_string())
    } else {
        Err(Error::AddressSchema(url.to_string()))
    }
}

fn negotiate_url(base: &str) -> String {
    let (path, query) = match base.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (base, None),
    };
    let path = path.trim_end_matches('/');
    match query {
        Some(query) => format!("{path}/negotiate?{query}&negotiateVersion={NEGOTIATE_VERSION}"),
        None => format!("{path}/negotiate?negotiateVersion={NEGOTIATE_VERSION}"),
    }
}

pub(crate) fn append_id(url: &str, id: &str) -> String {
    if url.contains('?') {
        format!("{url}&id={id}")
    } else {
        format!("{url}?id={id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_url_building() {
        assert_eq!(
            negotiate_url("http://example.com/hub"),
            "http://example.com/hub/negotiate?negotiateVersion=1"
        );
        assert_eq!(
            negotiate_url("http://example.com/hub/"),
            "http://example.com/hub/negotiate?negotiateVersion=1"
        );
        assert_eq!(
            negotiate_url("http://example.com/hub?tenant=a"),
            "http://example.com/hub/negotiate?tenant=a&negotiateVersion=1"
        );
    }

    #[test]
    fn scheme_conversion() {
        assert_eq!(
            websocket_url("http://example.com/hub").unwrap(),
            "ws://example.com/hub"
        );
        assert_eq!(
            websocket_url("https://example.com/hub").unwrap(),
            "wss://example.com/hub"
        );
        assert_eq!(
            websocket_url("wss://example.com/hub").unwrap(),
            "wss://example.com/hub"
        );
        assert!(websocket_url("ftp://example.com").is_err());
    }

    #[test]
    fn id_query_append() {
        assert_eq!(append_id("ws://h/hub", "abc"), "ws://h/hub?id=abc");
        assert_eq!(append_id("ws://h/hub?x=1", "abc"), "ws://h/hub?x=1&id=abc");
    }

    #[test]
    fn parses_transport_response() {
        let document: NegotiateResponse = serde_json::from_str(
            r#"{
                "connectionId": "conn-1",
                "connectionToken": "token-1",
                "negotiateVersion": 1,
                "availableTransports": [
                    {"transport": "WebSockets", "transferFormats": ["Text", "Binary"]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(document.connection_id.as_deref(), Some("conn-1"));
        assert_eq!(document.connection_token.as_deref(), Some("token-1"));
        assert_eq!(document.available_transports[0].transport, "WebSockets");
        assert_eq!(
            document.available_transports[0].transfer_formats,
            ["Text", "Binary"]
        );
    }

    #[test]
    fn parses_redirect_response() {
        let document: NegotiateResponse = serde_json::from_str(
            r#"{"url": "https://other.example.com/hub", "accessToken": "bearer-1"}"#,
        )
        .unwrap();
        assert_eq!(document.url.as_deref(), Some("https://other.example.com/hub"));
        assert_eq!(document.access_token.as_deref(), Some("bearer-1"));
        assert!(document.available_transports.is_empty());
    }

    #[test]
    fn parses_error_response() {
        let document: NegotiateResponse =
            serde_json::from_str(r#"{"error": "negotiation disabled"}"#).unwrap();
        assert_eq!(document.error.as_deref(), Some("negotiation disabled"));
    }
}
