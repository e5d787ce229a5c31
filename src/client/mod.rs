//!
//! Client facade: handler registration, hub method invocation,
//! server-to-client streams and the connection run loop.
//!

pub mod interface;
pub mod pending;

use crate::connection::retry::{IntervalStrategy, ReconnectStrategy};
use crate::connection::{AccessTokenFn, Connection, ConnectionOptions, Dispatcher, State};
use crate::imports::*;
use crate::message::{CancelInvocation, Completion, HubMessage, Invocation, StreamInvocation};
use crate::protocol::{HubProtocol, JsonHubProtocol};
use crate::transport::{Connector, TransportOptions};
use futures::Stream;
use interface::{
    ErrorHandlerFn, EventHandlerFn, Interface, IntoHandlerResult, LifecycleFn,
};
use pending::{CancelGuard, PendingRegistry};
use std::task::{Context, Poll};

/// Recognized client configuration. Plain struct; unset fields keep
/// their defaults.
pub struct ClientOptions {
    /// HTTP(S) or WS(S) hub endpoint.
    pub url: String,
    /// Invoked once per connection attempt; the token is attached as
    /// `Authorization: Bearer` to negotiation and the WebSocket
    /// request.
    pub access_token_factory: Option<AccessTokenFn>,
    /// Additional handshake headers; they win on conflict except for
    /// `Authorization`.
    pub headers: AHashMap<String, String>,
    /// External TLS connector for the WebSocket.
    pub tls: Option<Connector>,
    /// Hub protocol codec; defaults to the JSON hub protocol.
    pub protocol: Option<Arc<dyn HubProtocol>>,
    /// Emit a ping after this long without an outbound send.
    pub ping_interval: Duration,
    /// Drop the connection after this long without inbound traffic.
    pub connection_timeout: Duration,
    /// Reconnect policy; defaults to interval delays of
    /// 1, 2, 4, 8 and 16 seconds.
    pub reconnect: Arc<dyn ReconnectStrategy>,
    /// Inbound message byte limit; `None` disables the limit.
    pub max_message_size: Option<usize>,
}

impl ClientOptions {
    pub fn new(url: &str) -> Self {
        ClientOptions {
            url: url.to_string(),
            ..Default::default()
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            url: String::new(),
            access_token_factory: None,
            headers: AHashMap::new(),
            tls: None,
            protocol: None,
            ping_interval: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(30),
            reconnect: Arc::new(IntervalStrategy::default()),
            max_message_size: Some(64 << 20),
        }
    }
}

struct Inner {
    connection: Arc<Connection>,
    protocol: Arc<dyn HubProtocol>,
    interface: Arc<Interface>,
    pending: Arc<PendingRegistry>,
}

/// Async SignalR hub client. Cheap to clone; all clones share the
/// same connection.
#[derive(Clone)]
pub struct SignalRClient {
    inner: Arc<Inner>,
}

impl SignalRClient {
    pub fn new(options: ClientOptions) -> Result<SignalRClient> {
        let ClientOptions {
            url,
            access_token_factory,
            headers,
            tls,
            protocol,
            ping_interval,
            connection_timeout,
            reconnect,
            max_message_size,
        } = options;

        if !["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(Error::AddressSchema(url));
        }

        let protocol = protocol.unwrap_or_else(|| Arc::new(JsonHubProtocol));
        let connection = Arc::new(Connection::new(
            ConnectionOptions {
                url,
                access_token_factory,
                transport: TransportOptions {
                    headers,
                    tls,
                    max_message_size,
                },
                ping_interval,
                connection_timeout,
                reconnect,
            },
            protocol.clone(),
        ));

        Ok(SignalRClient {
            inner: Arc::new(Inner {
                connection,
                protocol,
                interface: Arc::new(Interface::new()),
                pending: Arc::new(PendingRegistry::new()),
            }),
        })
    }

    /// Registers the handler for a server event, replacing any prior
    /// handler for the same name. A handler returning a value answers
    /// server invocations that request a client result.
    pub fn on<F, R, T>(&self, event: &str, handler: F)
    where
        F: Send + Sync + 'static + Fn(Vec<Value>) -> R,
        R: Future<Output = T> + Send + 'static,
        T: IntoHandlerResult + Send + 'static,
    {
        let handler: EventHandlerFn = Arc::new(Box::new(move |arguments| {
            let future = handler(arguments);
            Box::pin(async move { future.await.into_handler_result() })
        }));
        self.inner.interface.register(event, handler);
    }

    pub fn on_open<F, R, T>(&self, handler: F)
    where
        F: Send + Sync + 'static + Fn() -> R,
        R: Future<Output = T> + Send + 'static,
        T: IntoHandlerResult + Send + 'static,
    {
        let handler: LifecycleFn = Arc::new(Box::new(move || {
            let future = handler();
            Box::pin(async move { future.await.into_handler_result().map(|_| ()) })
        }));
        self.inner.interface.set_open(handler);
    }

    pub fn on_close<F, R, T>(&self, handler: F)
    where
        F: Send + Sync + 'static + Fn() -> R,
        R: Future<Output = T> + Send + 'static,
        T: IntoHandlerResult + Send + 'static,
    {
        let handler: LifecycleFn = Arc::new(Box::new(move || {
            let future = handler();
            Box::pin(async move { future.await.into_handler_result().map(|_| ()) })
        }));
        self.inner.interface.set_close(handler);
    }

    /// Receives server-reported completion errors and server close
    /// errors as [`Completion`] messages.
    pub fn on_error<F, R>(&self, handler: F)
    where
        F: Send + Sync + 'static + Fn(Completion) -> R,
        R: Future<Output = ()> + Send + 'static,
    {
        let handler: ErrorHandlerFn =
            Arc::new(Box::new(move |completion| Box::pin(handler(completion))));
        self.inner.interface.set_error(handler);
    }

    /// Fire-and-forget hub method invocation; no response is awaited.
    pub async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<()> {
        let message = HubMessage::Invocation(Invocation::new(None, target, arguments));
        let data = self.inner.protocol.encode(&message)?;
        self.inner.connection.post(data).await
    }

    /// Invokes a hub method and waits for its completion. Dropping
    /// the returned future mid-flight sends a `CancelInvocation`; the
    /// invocation id stays reserved until the server completes it.
    pub async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value> {
        if !self.inner.connection.is_connected() {
            return Err(Error::NotConnected);
        }

        let id = self.inner.pending.next_invocation_id();
        let (receiver, settled) = self.inner.pending.register_call(&id);

        let message =
            HubMessage::Invocation(Invocation::new(Some(id.clone()), target, arguments));
        let frame = self.encode_or_discard(&id, &message)?;
        let cancel = self.encode_or_discard(
            &id,
            &HubMessage::CancelInvocation(CancelInvocation::new(&id)),
        )?;

        if let Err(err) = self.inner.connection.post(frame).await {
            self.inner.pending.discard(&id);
            return Err(err);
        }

        let _guard = CancelGuard::new(settled, cancel, self.inner.connection.sender());
        Ok(receiver.recv().await??)
    }

    /// Invokes a streaming hub method. Items arrive in order and the
    /// stream terminates with the server's completion; a completion
    /// error surfaces as the final `Err` item.
    pub async fn stream(&self, target: &str, arguments: Vec<Value>) -> Result<InvocationStream> {
        if !self.inner.connection.is_connected() {
            return Err(Error::NotConnected);
        }

        let id = self.inner.pending.next_invocation_id();
        let (receiver, settled) = self.inner.pending.register_stream(&id);

        let message =
            HubMessage::StreamInvocation(StreamInvocation::new(id.clone(), target, arguments));
        let frame = self.encode_or_discard(&id, &message)?;
        let cancel = self.encode_or_discard(
            &id,
            &HubMessage::CancelInvocation(CancelInvocation::new(&id)),
        )?;

        if let Err(err) = self.inner.connection.post(frame).await {
            self.inner.pending.discard(&id);
            return Err(err);
        }

        Ok(InvocationStream {
            invocation_id: id,
            receiver,
            _guard: CancelGuard::new(settled, cancel, self.inner.connection.sender()),
        })
    }

    /// Drives the connection to completion. Returns `Ok(())` only
    /// after [`close`](Self::close); otherwise propagates the
    /// terminal error once the reconnect policy gives up.
    pub async fn run(&self) -> Result<()> {
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(ClientDispatcher {
            connection: self.inner.connection.clone(),
            protocol: self.inner.protocol.clone(),
            interface: self.inner.interface.clone(),
            pending: self.inner.pending.clone(),
        });
        self.inner.connection.run(dispatcher).await
    }

    /// Shuts the connection down and unblocks every pending
    /// operation. Idempotent and safe to call from any handler.
    pub fn close(&self) {
        self.inner.connection.close();
        let outstanding = self.inner.pending.len();
        if outstanding > 0 {
            log_debug!("close is failing {outstanding} pending invocations");
        }
        self.inner.pending.fail_all("connection closed");
    }

    pub fn state(&self) -> State {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    fn encode_or_discard(&self, id: &str, message: &HubMessage) -> Result<Vec<u8>> {
        self.inner.protocol.encode(message).map_err(|err| {
            self.inner.pending.discard(id);
            err
        })
    }
}

/// Server-to-client stream returned by [`SignalRClient::stream`].
/// Dropping it before the terminal completion cancels the invocation
/// on the server.
pub struct InvocationStream {
    invocation_id: String,
    receiver: Receiver<Result<Value>>,
    _guard: CancelGuard,
}

impl InvocationStream {
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }
}

impl Stream for InvocationStream {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let receiver = unsafe { self.map_unchecked_mut(|this| &mut this.receiver) };
        receiver.poll_next(cx)
    }
}

/// Per-epoch bridge between the connection manager and the handler
/// registry; deliberately carries only what dispatch needs rather
/// than the whole client.
struct ClientDispatcher {
    connection: Arc<Connection>,
    protocol: Arc<dyn HubProtocol>,
    interface: Arc<Interface>,
    pending: Arc<PendingRegistry>,
}

#[async_trait]
impl Dispatcher for ClientDispatcher {
    async fn connected(&self) {
        if let Some(handler) = self.interface.open_handler() {
            spawn_lifecycle(self.interface.clone(), handler, "open");
        }
    }

    async fn disconnected(&self, error: Option<&Error>) {
        let reason = error
            .map(|error| error.to_string())
            .unwrap_or_else(|| "connection closed".to_string());
        if !self.pending.is_empty() {
            log_debug!("connection lost with outstanding invocations: {reason}");
        }
        self.pending.fail_all(&reason);
        // Id allocation restarts with the next connected epoch; no
        // operation can register an entry while disconnected.
        self.pending.reset();
        if let Some(handler) = self.interface.close_handler() {
            spawn_lifecycle(self.interface.clone(), handler, "close");
        }
    }

    async fn dispatch(&self, message: HubMessage) {
        match message {
            HubMessage::Invocation(invocation) => self.handle_invocation(invocation).await,
            HubMessage::StreamItem(item) => {
                if !self.pending.stream_item(&item.invocation_id, item.item) {
                    log_trace!(
                        "dropping stream item for unknown invocation {}",
                        item.invocation_id
                    );
                }
            }
            HubMessage::Completion(completion) => self.handle_completion(completion).await,
            HubMessage::Close(close) => {
                if let Some(error) = close.error {
                    self.report_error(Completion::error("", error)).await;
                }
            }
            HubMessage::Ping => {}
            other => {
                log_trace!("ignoring unexpected hub message: {other:?}");
            }
        }
    }
}

impl ClientDispatcher {
    async fn handle_invocation(&self, invocation: Invocation) {
        let Some(handler) = self.interface.handler(&invocation.target) else {
            log_debug!("no handler registered for event `{}`", invocation.target);
            return;
        };

        let result = handler(invocation.arguments).await;

        match invocation.invocation_id {
            // The server requested a client result: answer with a
            // completion either way.
            Some(id) => {
                let completion = match result {
                    Ok(value) => Completion::result(&id, value),
                    Err(err) => Completion::error(&id, err.to_string()),
                };
                match self.protocol.encode(&HubMessage::Completion(completion)) {
                    Ok(data) => {
                        self.connection.post(data).await.unwrap_or_else(|err| {
                            log_warn!("unable to send client result for invocation {id}: {err}")
                        });
                    }
                    Err(err) => {
                        log_error!("unable to encode client result for invocation {id}: {err}")
                    }
                }
            }
            // One failing handler must not tear the connection down.
            None => {
                if let Err(err) = result {
                    log_warn!("event handler `{}` failed: {err}", invocation.target);
                    self.report_error(Completion::error("", err.to_string())).await;
                }
            }
        }
    }

    async fn handle_completion(&self, completion: Completion) {
        let outcome = match completion.error.as_ref() {
            Some(error) => Err(Error::Server(error.clone())),
            None => Ok(completion.result.clone().unwrap_or(Value::Null)),
        };
        if !self.pending.complete(&completion.invocation_id, outcome) {
            log_trace!(
                "completion for unknown invocation {}",
                completion.invocation_id
            );
        }
        if completion.error.is_some() {
            self.report_error(completion).await;
        }
    }

    async fn report_error(&self, completion: Completion) {
        if let Some(handler) = self.interface.error_handler() {
            handler(completion).await;
        }
    }
}

/// Lifecycle hooks run as their own tasks so a hook that suspends (or
/// invokes back into the client) cannot stall the read loop.
fn spawn_lifecycle(interface: Arc<Interface>, handler: LifecycleFn, hook: &'static str) {
    spawn(async move {
        if let Err(err) = handler().await {
            log_warn!("`on_{hook}` handler failed: {err}");
            if let Some(error_handler) = interface.error_handler() {
                error_handler(Completion::error("", err.to_string())).await;
            }
        }
    });
}
