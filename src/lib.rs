//!
//! [`signalr-client`](self) is an async client for the SignalR hub
//! protocol (JSON dialect, version 1). Clients subscribe to named
//! server events, invoke hub methods, answer server-originated
//! client-result requests and consume server-to-client streams, while
//! negotiation, handshake, framing, keep-alive and automatic
//! reconnection are handled internally.
//!
//! ```ignore
//! let client = SignalRClient::new(ClientOptions::new("https://example.com/hub"))?;
//!
//! client.on("tick", |arguments| async move {
//!     log_info!("tick: {arguments:?}");
//! });
//!
//! let client_ = client.clone();
//! spawn(async move { client_.run().await });
//!
//! let sum = client.invoke("Add", vec![json!(1), json!(2)]).await?;
//! ```
//!

pub mod client;
pub mod connection;
pub mod error;
mod imports;
pub mod message;
pub mod prelude;
pub mod protocol;
pub mod result;
pub mod transport;


pub use client::{ClientOptions, InvocationStream, SignalRClient};
pub use connection::retry::{IntervalStrategy, RawStrategy, ReconnectStrategy};
pub use connection::{AccessTokenFn, AccessTokenFnReturn, State};
pub use error::Error;
pub use message::HubMessage;
pub use protocol::{HubProtocol, JsonHubProtocol, PlainJsonProtocol};
pub use result::Result;
