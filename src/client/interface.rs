//!
//! Handler registry: one async handler per event name, plus dedicated
//! slots for the `open`/`close`/`error` lifecycle hooks.
//!

use crate::imports::*;
use crate::message::Completion;

pub type EventHandlerFn = Arc<Box<dyn Send + Sync + Fn(Vec<Value>) -> EventHandlerReturn + 'static>>;
pub type EventHandlerReturn = Pin<Box<dyn Send + 'static + Future<Output = Result<Value>>>>;

pub type LifecycleFn = Arc<Box<dyn Send + Sync + Fn() -> LifecycleFnReturn + 'static>>;
pub type LifecycleFnReturn = Pin<Box<dyn Send + 'static + Future<Output = Result<()>>>>;

pub type ErrorHandlerFn = Arc<Box<dyn Send + Sync + Fn(Completion) -> ErrorHandlerFnReturn + 'static>>;
pub type ErrorHandlerFnReturn = Pin<Box<dyn Send + 'static + Future<Output = ()>>>;

/// Conversion for values returned by event handlers. A unit return is
/// an ordinary event handler; anything else becomes the client-result
/// payload when the server requested one.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> Result<Value>;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> Result<Value> {
        Ok(Value::Null)
    }
}

impl IntoHandlerResult for Value {
    fn into_handler_result(self) -> Result<Value> {
        Ok(self)
    }
}

impl IntoHandlerResult for String {
    fn into_handler_result(self) -> Result<Value> {
        Ok(Value::String(self))
    }
}

impl IntoHandlerResult for &'static str {
    fn into_handler_result(self) -> Result<Value> {
        Ok(Value::String(self.to_string()))
    }
}

impl<T> IntoHandlerResult for Result<T>
where
    T: IntoHandlerResult,
{
    fn into_handler_result(self) -> Result<Value> {
        self.and_then(IntoHandlerResult::into_handler_result)
    }
}

pub(crate) struct Interface {
    events: Mutex<AHashMap<String, EventHandlerFn>>,
    open: Mutex<Option<LifecycleFn>>,
    close: Mutex<Option<LifecycleFn>>,
    error: Mutex<Option<ErrorHandlerFn>>,
}

impl Interface {
    pub fn new() -> Interface {
        Interface {
            events: Mutex::new(AHashMap::new()),
            open: Mutex::new(None),
            close: Mutex::new(None),
            error: Mutex::new(None),
        }
    }

    /// Registers the handler for `event`, replacing any prior one.
    pub fn register(&self, event: &str, handler: EventHandlerFn) {
        if self
            .events
            .lock()
            .unwrap()
            .insert(event.to_string(), handler)
            .is_some()
        {
            log_trace!("replacing existing handler for event `{event}`");
        }
    }

    pub fn handler(&self, event: &str) -> Option<EventHandlerFn> {
        self.events.lock().unwrap().get(event).cloned()
    }

    pub fn set_open(&self, handler: LifecycleFn) {
        self.open.lock().unwrap().replace(handler);
    }

    pub fn set_close(&self, handler: LifecycleFn) {
        self.close.lock().unwrap().replace(handler);
    }

    pub fn set_error(&self, handler: ErrorHandlerFn) {
        self.error.lock().unwrap().replace(handler);
    }

    pub fn open_handler(&self) -> Option<LifecycleFn> {
        self.open.lock().unwrap().clone()
    }

    pub fn close_handler(&self) -> Option<LifecycleFn> {
        self.close.lock().unwrap().clone()
    }

    pub fn error_handler(&self) -> Option<ErrorHandlerFn> {
        self.error.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler_returning(value: Value) -> EventHandlerFn {
        Arc::new(Box::new(move |_arguments| {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        }))
    }

    #[tokio::test]
    async fn registration_replaces_prior_handler() {
        let interface = Interface::new();
        interface.register("tick", handler_returning(json!(1)));
        interface.register("tick", handler_returning(json!(2)));

        let handler = interface.handler("tick").unwrap();
        assert_eq!(handler(vec![]).await.unwrap(), json!(2));
        assert!(interface.handler("missing").is_none());
    }

    #[test]
    fn handler_result_conversions() {
        assert_eq!(().into_handler_result().unwrap(), Value::Null);
        assert_eq!("pong".into_handler_result().unwrap(), json!("pong"));
        assert_eq!(
            json!({"a": 1}).into_handler_result().unwrap(),
            json!({"a": 1})
        );
        let failure: Result<Value> = Err(Error::custom("handler failed"));
        assert!(failure.into_handler_result().is_err());
    }
}
