//!
//! Invocation registry: pending unary calls and streams keyed by
//! invocation id, plus the per-connection id allocator.
//!

use crate::imports::*;

pub(crate) enum PendingKind {
    Call { waiter: Sender<Result<Value>> },
    Stream { sink: Sender<Result<Value>> },
}

pub(crate) struct Pending {
    kind: PendingKind,
    settled: Arc<AtomicBool>,
    created_at: Instant,
}

/// Owned exclusively by the client; entries are released on
/// completion or on connection loss.
pub(crate) struct PendingRegistry {
    entries: Mutex<AHashMap<String, Pending>>,
    next_id: AtomicU64,
}

impl PendingRegistry {
    pub fn new() -> PendingRegistry {
        PendingRegistry {
            entries: Mutex::new(AHashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Ids are monotonically increasing while the connection lives.
    pub fn next_invocation_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Restarts id allocation; called on every successful connect,
    /// after outstanding entries have been failed.
    pub fn reset(&self) {
        self.next_id.store(0, Ordering::SeqCst);
    }

    pub fn register_call(&self, id: &str) -> (Receiver<Result<Value>>, Arc<AtomicBool>) {
        let (waiter, receiver) = oneshot();
        let settled = Arc::new(AtomicBool::new(false));
        self.entries.lock().unwrap().insert(
            id.to_string(),
            Pending {
                kind: PendingKind::Call { waiter },
                settled: settled.clone(),
                created_at: Instant::now(),
            },
        );
        (receiver, settled)
    }

    pub fn register_stream(&self, id: &str) -> (Receiver<Result<Value>>, Arc<AtomicBool>) {
        let channel = Channel::unbounded();
        let settled = Arc::new(AtomicBool::new(false));
        self.entries.lock().unwrap().insert(
            id.to_string(),
            Pending {
                kind: PendingKind::Stream {
                    sink: channel.sender,
                },
                settled: settled.clone(),
                created_at: Instant::now(),
            },
        );
        (channel.receiver, settled)
    }

    /// Drops an entry without waking its consumer (send failures
    /// before the frame ever left the client).
    pub fn discard(&self, id: &str) {
        self.entries.lock().unwrap().remove(id);
    }

    /// Routes a completion outcome and retires the id. Returns false
    /// when the id is unknown (already retired or never issued).
    pub fn complete(&self, id: &str, outcome: Result<Value>) -> bool {
        let Some(pending) = self.entries.lock().unwrap().remove(id) else {
            return false;
        };
        pending.settled.store(true, Ordering::SeqCst);
        match pending.kind {
            PendingKind::Call { waiter } => {
                waiter.try_send(outcome).ok();
            }
            PendingKind::Stream { sink } => {
                if let Err(error) = outcome {
                    sink.try_send(Err(error)).ok();
                }
                // Dropping the sink terminates the stream.
            }
        }
        true
    }

    /// Delivers one stream element; items for unary calls or unknown
    /// ids are dropped.
    pub fn stream_item(&self, id: &str, item: Value) -> bool {
        match self.entries.lock().unwrap().get(id) {
            Some(Pending {
                kind: PendingKind::Stream { sink },
                ..
            }) => sink.try_send(Ok(item)).is_ok(),
            _ => false,
        }
    }

    /// Fails every outstanding entry; used on connection loss and on
    /// close.
    pub fn fail_all(&self, reason: &str) {
        let mut entries = self.entries.lock().unwrap();
        for (id, pending) in entries.drain() {
            log_trace!(
                "failing invocation {id} after {:?}: {reason}",
                pending.created_at.elapsed()
            );
            pending.settled.store(true, Ordering::SeqCst);
            let error = Error::Connection(reason.to_string());
            match pending.kind {
                PendingKind::Call { waiter } => {
                    waiter.try_send(Err(error)).ok();
                }
                PendingKind::Stream { sink } => {
                    sink.try_send(Err(error)).ok();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Detaches a dropped caller: posts a pre-encoded `CancelInvocation`
/// frame unless the invocation already settled. The registry entry is
/// left in place until the server's completion retires the id.
pub(crate) struct CancelGuard {
    settled: Arc<AtomicBool>,
    frame: Option<Vec<u8>>,
    outbound: Sender<Vec<u8>>,
}

impl CancelGuard {
    pub fn new(settled: Arc<AtomicBool>, frame: Vec<u8>, outbound: Sender<Vec<u8>>) -> Self {
        CancelGuard {
            settled,
            frame: Some(frame),
            outbound,
        }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.settled.load(Ordering::SeqCst) {
            if let Some(frame) = self.frame.take() {
                self.outbound.try_send(frame).ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_allocation_is_monotonic_and_resettable() {
        let registry = PendingRegistry::new();
        assert_eq!(registry.next_invocation_id(), "1");
        assert_eq!(registry.next_invocation_id(), "2");
        registry.reset();
        assert_eq!(registry.next_invocation_id(), "1");
    }

    #[test]
    fn completion_retires_the_id() {
        let registry = PendingRegistry::new();
        let (receiver, settled) = registry.register_call("1");
        assert_eq!(registry.len(), 1);

        assert!(registry.complete("1", Ok(json!(3))));
        assert!(settled.load(Ordering::SeqCst));
        assert!(registry.is_empty());
        assert_eq!(receiver.try_recv().unwrap().unwrap(), json!(3));

        // Retired ids are unknown to later traffic.
        assert!(!registry.complete("1", Ok(json!(4))));
        assert!(!registry.stream_item("1", json!(5)));
    }

    #[test]
    fn stream_items_are_delivered_in_order_before_completion() {
        let registry = PendingRegistry::new();
        let (receiver, _settled) = registry.register_stream("7");

        assert!(registry.stream_item("7", json!(1)));
        assert!(registry.stream_item("7", json!(2)));
        assert!(registry.complete("7", Ok(Value::Null)));

        assert_eq!(receiver.try_recv().unwrap().unwrap(), json!(1));
        assert_eq!(receiver.try_recv().unwrap().unwrap(), json!(2));
        // Sink dropped: the stream is terminated.
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn stream_items_for_unary_calls_are_dropped() {
        let registry = PendingRegistry::new();
        let (_receiver, _settled) = registry.register_call("1");
        assert!(!registry.stream_item("1", json!(1)));
    }

    #[test]
    fn fail_all_unblocks_every_waiter() {
        let registry = PendingRegistry::new();
        let (call, _) = registry.register_call("1");
        let (stream, _) = registry.register_stream("2");

        registry.fail_all("connection lost");
        assert!(registry.is_empty());
        assert!(matches!(
            call.try_recv().unwrap(),
            Err(Error::Connection(_))
        ));
        assert!(matches!(
            stream.try_recv().unwrap(),
            Err(Error::Connection(_))
        ));
    }

    #[test]
    fn cancel_guard_posts_unless_settled() {
        let outbound = Channel::<Vec<u8>>::unbounded();
        let settled = Arc::new(AtomicBool::new(false));
        drop(CancelGuard::new(
            settled.clone(),
            b"cancel".to_vec(),
            outbound.sender.clone(),
        ));
        assert_eq!(outbound.try_recv().unwrap(), b"cancel".to_vec());

        settled.store(true, Ordering::SeqCst);
        drop(CancelGuard::new(
            settled,
            b"cancel".to_vec(),
            outbound.sender.clone(),
        ));
        assert!(outbound.try_recv().is_err());
    }
}
