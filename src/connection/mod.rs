//!
//! Connection manager: negotiation, handshake, the read loop, the
//! keep-alive loop and the reconnect policy driver.
//!

pub mod negotiate;
pub mod retry;

use crate::imports::*;
use crate::message::HubMessage;
use crate::protocol::{HubProtocol, TransferFormat};
use crate::transport::{self, TransportOptions, WsStream};
use futures::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use retry::ReconnectStrategy;
use tungstenite::Message as WsMessage;

type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Lifecycle of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Reconnecting,
    Closed,
}

pub type AccessTokenFn = Arc<Box<dyn Send + Sync + Fn() -> AccessTokenFnReturn + 'static>>;
pub type AccessTokenFnReturn = Pin<Box<dyn Send + 'static + Future<Output = Result<String>>>>;

/// Callbacks from the connection manager into the owner of the
/// invocation registry and user handlers.
#[async_trait]
pub(crate) trait Dispatcher: Send + Sync + 'static {
    /// Fired after every successful handshake.
    async fn connected(&self);
    /// Fired when a connected epoch ends; `error` is absent on user
    /// initiated close.
    async fn disconnected(&self, error: Option<&Error>);
    /// A decoded inbound hub message.
    async fn dispatch(&self, message: HubMessage);
}

pub(crate) struct ConnectionOptions {
    pub url: String,
    pub access_token_factory: Option<AccessTokenFn>,
    pub transport: TransportOptions,
    pub ping_interval: Duration,
    pub connection_timeout: Duration,
    pub reconnect: Arc<dyn ReconnectStrategy>,
}

/// Outcome of one connection epoch.
enum Epoch {
    /// User close observed.
    Closed,
    /// Non-retryable failure.
    Fatal(Error),
    /// Retryable failure; `was_connected` notes whether the epoch
    /// reached the connected state.
    Retry { error: Error, was_connected: bool },
}

pub(crate) struct Connection {
    options: ConnectionOptions,
    protocol: Arc<dyn HubProtocol>,
    http: reqwest::Client,
    state: Mutex<State>,
    outbound: Channel<Vec<u8>>,
    close_trigger: Trigger,
    close_listener: Listener,
    closed: AtomicBool,
    running: AtomicBool,
    last_inbound: Mutex<Instant>,
    last_outbound: Mutex<Instant>,
}

impl Connection {
    pub fn new(options: ConnectionOptions, protocol: Arc<dyn HubProtocol>) -> Connection {
        let (close_trigger, close_listener) = trigger();
        Connection {
            options,
            protocol,
            http: reqwest::Client::new(),
            state: Mutex::new(State::Disconnected),
            outbound: Channel::unbounded(),
            close_trigger,
            close_listener,
            closed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            last_inbound: Mutex::new(Instant::now()),
            last_outbound: Mutex::new(Instant::now()),
        }
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: State) {
        log_trace!("connection state: {state:?}");
        *self.state.lock().unwrap() = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == State::Connected
    }

    /// Queues one encoded frame for transmission. Frames are written
    /// to the socket by the epoch loop, one at a time, in submission
    /// order.
    pub async fn post(&self, data: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.outbound.send(data).await?;
        yield_now().await;
        Ok(())
    }

    /// Raw handle onto the outbound queue, for fire-and-forget frames
    /// posted from non-async contexts (cancellation guards).
    pub(crate) fn sender(&self) -> Sender<Vec<u8>> {
        self.outbound.sender.clone()
    }

    /// Requests shutdown. Idempotent, non-blocking and safe to call
    /// from within user handlers; the running loops observe the
    /// trigger and tear the connection down.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log_debug!("connection close requested");
            self.set_state(State::Closed);
            self.close_trigger.trigger();
        }
    }

    fn is_close_requested(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drives the connection until close or a terminal error.
    pub async fn run(self: &Arc<Self>, dispatcher: Arc<dyn Dispatcher>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        let result = self.connection_loop(&dispatcher).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn connection_loop(self: &Arc<Self>, dispatcher: &Arc<dyn Dispatcher>) -> Result<()> {
        let mut delays: Option<Box<dyn Iterator<Item = Duration> + Send>> = None;

        loop {
            match self.epoch(dispatcher).await {
                Epoch::Closed => {
                    self.set_state(State::Closed);
                    return Ok(());
                }
                Epoch::Fatal(error) => {
                    self.set_state(State::Closed);
                    return Err(error);
                }
                Epoch::Retry {
                    error,
                    was_connected,
                } => {
                    if was_connected {
                        // Fresh delay sequence after every epoch that
                        // actually connected.
                        delays = None;
                    }
                    let delays = delays.get_or_insert_with(|| self.options.reconnect.delays());
                    match delays.next() {
                        None => {
                            self.set_state(State::Disconnected);
                            return Err(error);
                        }
                        Some(delay) => {
                            self.set_state(State::Reconnecting);
                            log_debug!("reconnecting in {delay:?} after: {error}");
                            select_biased! {
                                _ = self.close_listener.clone().fuse() => {
                                    self.set_state(State::Closed);
                                    return Ok(());
                                }
                                _ = sleep(delay).fuse() => {}
                            }
                        }
                    }
                }
            }
        }
    }

    fn classify(&self, error: Error, was_connected: bool) -> Epoch {
        if error.is_fatal() {
            Epoch::Fatal(error)
        } else {
            Epoch::Retry {
                error,
                was_connected,
            }
        }
    }

    /// One negotiate → connect → handshake → read-loop cycle.
    async fn epoch(self: &Arc<Self>, dispatcher: &Arc<dyn Dispatcher>) -> Epoch {
        if self.is_close_requested() {
            return Epoch::Closed;
        }
        self.set_state(State::Connecting);

        // Establishment must remain interruptible: close() may arrive
        // while negotiation or the socket open is still in flight.
        let established = select_biased! {
            _ = self.close_listener.clone().fuse() => return Epoch::Closed,
            result = self.establish().fuse() => result,
        };

        let (mut ws_sender, mut ws_receiver, leftover) = match established {
            Ok(parts) => parts,
            Err(error) => return self.classify(error, false),
        };

        // Frames queued while disconnected (stale cancellations and
        // the like) must not precede handshake completion.
        self.outbound.drain().ok();
        *self.last_inbound.lock().unwrap() = Instant::now();
        *self.last_outbound.lock().unwrap() = Instant::now();
        self.set_state(State::Connected);
        dispatcher.connected().await;

        let force_close = Channel::<()>::oneshot();
        let keepalive_shutdown = DuplexChannel::<(), ()>::oneshot();
        self.keepalive_task(keepalive_shutdown.clone(), force_close.sender.clone());

        let outcome = self
            .dispatcher_loop(
                &mut ws_sender,
                &mut ws_receiver,
                leftover,
                dispatcher,
                &force_close.receiver,
            )
            .await;

        keepalive_shutdown
            .signal(())
            .await
            .unwrap_or_else(|err| log_error!("unable to stop keep-alive task: {err}"));

        let error = match &outcome {
            Epoch::Closed => None,
            Epoch::Fatal(error) => Some(error),
            Epoch::Retry { error, .. } => Some(error),
        };
        dispatcher.disconnected(error).await;

        outcome
    }

    /// Negotiates, opens the socket and completes the handshake.
    async fn establish(self: &Arc<Self>) -> Result<(WsSink, WsSource, Vec<HubMessage>)> {
        let token = self.access_token().await?;

        let negotiated = negotiate::negotiate(
            &self.http,
            &self.options.url,
            &self.options.transport.headers,
            token.as_deref(),
        )
        .await?;

        let stream = transport::connect(
            &negotiated.url,
            negotiated.access_token.as_deref(),
            &self.options.transport,
        )
        .await?;

        let (mut ws_sender, mut ws_receiver) = stream.split();

        self.set_state(State::Handshaking);
        match self.handshake(&mut ws_sender, &mut ws_receiver).await {
            Ok(leftover) => {
                log_debug!("connected to {}", negotiated.url);
                Ok((ws_sender, ws_receiver, leftover))
            }
            Err(error) => {
                ws_sender.close().await.ok();
                Err(error)
            }
        }
    }

    /// Sends the codec's handshake request and waits for the first
    /// frame; any hub messages concatenated after the handshake
    /// response are returned for dispatch.
    async fn handshake(
        &self,
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
    ) -> Result<Vec<HubMessage>> {
        let request = self.protocol.handshake_request();
        if request.is_empty() {
            return Ok(Vec::new());
        }

        self.send_frame(ws_sender, request).await?;

        let data: Vec<u8> = loop {
            match ws_receiver.next().await {
                Some(Ok(WsMessage::Text(text))) => break text.into_bytes(),
                Some(Ok(WsMessage::Binary(data))) => break data,
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(Error::Connection(
                        "connection closed during handshake".to_string(),
                    ));
                }
                Some(Err(err)) => return Err(err.into()),
            }
        };

        let (response, remaining) = self.protocol.parse_handshake(&data)?;
        if let Some(error) = response.error {
            return Err(Error::Handshake(error));
        }
        log_trace!(
            "handshake complete (minor version {:?})",
            response.minor_version
        );

        if remaining.is_empty() {
            Ok(Vec::new())
        } else {
            self.protocol.decode(remaining)
        }
    }

    /// The per-epoch select loop: sole writer to the socket, decoder
    /// and dispatcher of everything inbound.
    async fn dispatcher_loop(
        self: &Arc<Self>,
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
        leftover: Vec<HubMessage>,
        dispatcher: &Arc<dyn Dispatcher>,
        force_close: &Receiver<()>,
    ) -> Epoch {
        for message in leftover {
            if let Some(outcome) = self.handle_message(message, dispatcher).await {
                return outcome;
            }
        }

        loop {
            select_biased! {
                _ = self.close_listener.clone().fuse() => {
                    ws_sender.close().await.ok();
                    return Epoch::Closed;
                }
                _ = force_close.recv().fuse() => {
                    ws_sender.close().await.ok();
                    return Epoch::Retry { error: Error::Timeout, was_connected: true };
                }
                frame = self.outbound.recv().fuse() => {
                    match frame {
                        Ok(data) => {
                            if let Err(error) = self.send_frame(ws_sender, data).await {
                                return Epoch::Retry { error, was_connected: true };
                            }
                        }
                        Err(_) => {
                            return Epoch::Retry {
                                error: Error::ChannelRecv,
                                was_connected: true,
                            };
                        }
                    }
                }
                message = ws_receiver.next().fuse() => {
                    match message {
                        Some(Ok(message)) => {
                            *self.last_inbound.lock().unwrap() = Instant::now();
                            let data = match message {
                                WsMessage::Text(text) => Some(text.into_bytes()),
                                WsMessage::Binary(data) => Some(data),
                                // Transport pings/pongs only refresh
                                // the idle timer.
                                WsMessage::Ping(_) | WsMessage::Pong(_) => None,
                                WsMessage::Frame(_) => None,
                                WsMessage::Close(frame) => {
                                    let reason = frame
                                        .map(|frame| frame.reason.to_string())
                                        .unwrap_or_else(|| "connection closed".to_string());
                                    return Epoch::Retry {
                                        error: Error::Connection(reason),
                                        was_connected: true,
                                    };
                                }
                            };
                            if let Some(data) = data {
                                if let Some(outcome) = self.handle_frame(&data, dispatcher).await {
                                    return outcome;
                                }
                            }
                        }
                        Some(Err(err)) => {
                            return Epoch::Retry { error: err.into(), was_connected: true };
                        }
                        None => {
                            return Epoch::Retry {
                                error: Error::Connection("connection closed".to_string()),
                                was_connected: true,
                            };
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        data: &[u8],
        dispatcher: &Arc<dyn Dispatcher>,
    ) -> Option<Epoch> {
        let messages = match self.protocol.decode(data) {
            Ok(messages) => messages,
            Err(error) => {
                // A record-separator stream cannot be re-synchronized
                // mid-buffer; drop the connection.
                log_error!("inbound frame decode failed: {error}");
                return Some(Epoch::Retry {
                    error,
                    was_connected: true,
                });
            }
        };

        for message in messages {
            if let Some(outcome) = self.handle_message(message, dispatcher).await {
                return Some(outcome);
            }
        }

        None
    }

    async fn handle_message(
        &self,
        message: HubMessage,
        dispatcher: &Arc<dyn Dispatcher>,
    ) -> Option<Epoch> {
        match message {
            HubMessage::Close(close) => {
                log_debug!(
                    "server close (allow_reconnect: {:?}, error: {:?})",
                    close.allow_reconnect,
                    close.error
                );
                let allow_reconnect = close.allow_reconnect != Some(false);
                let error = Error::Connection(
                    close
                        .error
                        .clone()
                        .unwrap_or_else(|| "connection closed by server".to_string()),
                );
                dispatcher.dispatch(HubMessage::Close(close)).await;
                Some(if allow_reconnect {
                    Epoch::Retry {
                        error,
                        was_connected: true,
                    }
                } else {
                    Epoch::Fatal(error)
                })
            }
            HubMessage::Ping => {
                // Inbound activity was already recorded; no reply is
                // required.
                log_trace!("server ping");
                None
            }
            message => {
                dispatcher.dispatch(message).await;
                None
            }
        }
    }

    async fn send_frame(&self, ws_sender: &mut WsSink, data: Vec<u8>) -> Result<()> {
        let message = match self.protocol.transfer_format() {
            TransferFormat::Text => WsMessage::Text(
                String::from_utf8(data).map_err(|err| Error::Protocol(err.to_string()))?,
            ),
            TransferFormat::Binary => WsMessage::Binary(data),
        };
        ws_sender.send(message).await?;
        *self.last_outbound.lock().unwrap() = Instant::now();
        Ok(())
    }

    /// Sibling task of the epoch loop: emits a `Ping` whenever the
    /// link has been send-idle for `ping_interval` and force-closes
    /// the connection after `connection_timeout` of inbound silence.
    fn keepalive_task(
        self: &Arc<Self>,
        shutdown: DuplexChannel<(), ()>,
        force_close: Sender<()>,
    ) {
        let this = self.clone();
        let ping = this.protocol.encode(&HubMessage::Ping).unwrap_or_default();
        spawn(async move {
            let ping_interval = this.options.ping_interval;
            let connection_timeout = this.options.connection_timeout;
            let mut next_ping = Instant::now() + ping_interval;

            loop {
                let now = Instant::now();

                let idle_deadline = *this.last_inbound.lock().unwrap() + connection_timeout;
                if now >= idle_deadline {
                    log_warn!(
                        "no traffic received for {connection_timeout:?}, dropping connection"
                    );
                    force_close.try_send(()).ok();
                    break;
                }

                let ping_deadline =
                    (*this.last_outbound.lock().unwrap() + ping_interval).max(next_ping);
                if now >= ping_deadline {
                    if !ping.is_empty() {
                        log_trace!("keep-alive ping");
                        this.outbound.try_send(ping.clone()).ok();
                    }
                    next_ping = now + ping_interval;
                    continue;
                }

                let wait = ping_deadline.min(idle_deadline) - now;
                select_biased! {
                    _ = shutdown.request.receiver.recv().fuse() => break,
                    _ = sleep(wait).fuse() => {}
                }
            }

            shutdown
                .response
                .sender
                .send(())
                .await
                .unwrap_or_else(|err| {
                    log_error!("unable to signal keep-alive shutdown completion: {err}")
                });
        });
    }

    async fn access_token(&self) -> Result<Option<String>> {
        match self.options.access_token_factory.as_ref() {
            Some(factory) => Ok(Some((factory)().await?)),
            None => Ok(None),
        }
    }
}
