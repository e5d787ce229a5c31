pub use crate::error::Error;
pub use crate::result::Result;
pub use ahash::AHashMap;
pub use async_trait::async_trait;
pub use futures::{future::FutureExt, select_biased, Future};
pub use serde::{de::DeserializeOwned, Deserialize, Serialize};
pub use serde_json::Value;
pub use std::fmt::Debug;
pub use std::pin::Pin;
pub use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
pub use std::sync::{Arc, Mutex};
pub use std::time::Duration;
pub use workflow_core::channel::{oneshot, Channel, DuplexChannel, Receiver, Sender};
pub use workflow_core::task::{sleep, spawn, yield_now};
pub use triggered::{trigger, Listener, Trigger};
pub use workflow_core::time::Instant;
pub use workflow_log::{log_debug, log_error, log_trace, log_warn};
