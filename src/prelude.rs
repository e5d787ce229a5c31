//!
//! Common imports for crate users.
//!

pub use crate::client::{ClientOptions, InvocationStream, SignalRClient};
pub use crate::connection::retry::{IntervalStrategy, RawStrategy, ReconnectStrategy};
pub use crate::connection::{AccessTokenFn, AccessTokenFnReturn, State};
pub use crate::error::Error;
pub use crate::message::{
    CancelInvocation, Close, Completion, HubMessage, Invocation, StreamInvocation, StreamItem,
};
pub use crate::protocol::{HubProtocol, JsonHubProtocol, PlainJsonProtocol, TransferFormat};
pub use crate::result::Result;
pub use crate::transport::Connector;
