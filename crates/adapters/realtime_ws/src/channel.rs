//! The realtime channel: one WebSocket session plus its background tasks.
//!
//! Opening a session spawns three tasks sharing a cancellation token: a
//! writer owning the sink, a heartbeat pushing pings through the writer, and
//! a listener dispatching inbound frames. Whichever of the writer or the
//! listener sees the socket fail tears the session down and starts the
//! reconnect loop. Sessions carry a generation number so a late failure
//! report from an old session never tears down its successor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voxline_app::ports::{CredentialProvider, Transport, TransportError};
use voxline_domain::command::{Command, DeliveryReceipt};
use voxline_domain::id::CommandId;

use crate::backoff::ReconnectBackoff;
use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::protocol::{COMMAND_RESULT, CommandResult, Outbound};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Connection state as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connected,
    /// Waiting for, or running, reconnect attempt `attempt` (from 1).
    Reconnecting { attempt: u32 },
    /// Every reconnect attempt failed. Only an explicit
    /// [`RealtimeChannel::schedule_reconnect`] tries again.
    Lost,
}

struct Session {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    token: CancellationToken,
}

struct Inner {
    url: String,
    heartbeat: Duration,
    request_timeout: Duration,
    max_reconnect_attempts: u32,
    credentials: Arc<dyn CredentialProvider>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    handlers: RwLock<HashMap<String, Handler>>,
    pending: Mutex<HashMap<CommandId, oneshot::Sender<DeliveryReceipt>>>,
    reconnecting: AtomicBool,
    status: watch::Sender<ChannelStatus>,
    shutdown: CancellationToken,
}

/// Persistent duplex channel to the processing backend.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl RealtimeChannel {
    #[must_use]
    pub fn new(config: &RealtimeConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: config.url.clone(),
                heartbeat: config.heartbeat(),
                request_timeout: config.request_timeout(),
                max_reconnect_attempts: config.max_reconnect_attempts,
                credentials,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                reconnecting: AtomicBool::new(false),
                status,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        *self.inner.status.borrow()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Route inbound frames whose `type` equals `event_type` to `handler`.
    /// A later registration for the same type replaces the earlier one.
    pub fn register_handler<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_type.into(), Arc::new(handler));
    }

    /// Open a session. On failure the reconnect loop takes over in the
    /// background and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError`] when the handshake fails.
    #[tracing::instrument(skip(self), fields(url = %self.inner.url))]
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        if let Err(err) = self.open().await {
            warn!(%err, "realtime connection failed");
            self.schedule_reconnect();
            return Err(err);
        }
        Ok(())
    }

    /// Queue `message` for the open session.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::NotConnected`] without a session, or
    /// [`RealtimeError::Encode`] when `message` does not serialize.
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) -> Result<(), RealtimeError> {
        let text = serde_json::to_string(message)?;
        let session = self.lock_session();
        let Some(session) = session.as_ref() else {
            return Err(RealtimeError::NotConnected);
        };
        session
            .outbound
            .send(Message::Text(text))
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Start the reconnect loop unless one is already running or the
    /// channel was shut down.
    pub fn schedule_reconnect(&self) {
        if self.inner.shutdown.is_cancelled() || self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let channel = self.clone();
        tokio::spawn(async move { channel.reconnect_loop().await });
    }

    /// Close the session for good and stop any reconnect loop.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(session) = self.lock_session().take() {
            session.token.cancel();
        }
        self.lock_pending().clear();
        self.inner.status.send_replace(ChannelStatus::Disconnected);
        info!("realtime channel shut down");
    }

    async fn open(&self) -> Result<(), RealtimeError> {
        let mut request = self.inner.url.as_str().into_client_request()?;
        if let Some(token) = self.inner.credentials.bearer_token() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        let (socket, _) = connect_async(request).await?;
        let (sink, stream) = socket.split();
        let (outbound, rx) = mpsc::unbounded_channel();
        let token = self.inner.shutdown.child_token();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = self.lock_session().replace(Session {
            generation,
            outbound: outbound.clone(),
            token: token.clone(),
        });
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        tokio::spawn(self.clone().write_loop(sink, rx, token.clone(), generation));
        tokio::spawn(heartbeat(outbound, self.inner.heartbeat, token.clone()));
        tokio::spawn(self.clone().listen(stream, token, generation));

        self.inner.status.send_replace(ChannelStatus::Connected);
        info!(url = %self.inner.url, generation, "realtime channel connected");
        Ok(())
    }

    async fn reconnect_loop(self) {
        let mut backoff = ReconnectBackoff::new(self.inner.max_reconnect_attempts);
        loop {
            let Some(at) = backoff.schedule_next(Instant::now()) else {
                warn!(attempts = backoff.attempt(), "giving up on realtime reconnection");
                self.inner.status.send_replace(ChannelStatus::Lost);
                break;
            };
            let attempt = backoff.attempt() + 1;
            self.inner
                .status
                .send_replace(ChannelStatus::Reconnecting { attempt });
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                () = sleep_until(at) => {}
            }
            match self.open().await {
                Ok(()) => {
                    info!(attempt, "realtime channel reconnected");
                    break;
                }
                Err(err) => {
                    warn!(attempt, %err, "reconnect attempt failed");
                    backoff.record_failure();
                }
            }
        }
        self.inner.reconnecting.store(false, Ordering::SeqCst);

        // a session that died while this loop still held the guard
        if !self.inner.shutdown.is_cancelled()
            && !self.is_connected()
            && self.status() == ChannelStatus::Disconnected
        {
            self.schedule_reconnect();
        }
    }

    async fn write_loop(
        self,
        mut sink: SplitSink<Socket, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        token: CancellationToken,
        generation: u64,
    ) {
        loop {
            let message = tokio::select! {
                () = token.cancelled() => break,
                message = rx.recv() => message,
            };
            let Some(message) = message else { break };
            if let Err(err) = sink.send(message).await {
                self.on_disconnect(generation, &err.to_string());
                return;
            }
        }
        let _ = sink.close().await;
    }

    async fn listen(self, mut stream: SplitStream<Socket>, token: CancellationToken, generation: u64) {
        let reason = loop {
            let next = tokio::select! {
                () = token.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => self.dispatch(&text),
                Some(Ok(Message::Close(_))) | None => break "closed by peer".to_string(),
                Some(Ok(_)) => {}
                Some(Err(err)) => break err.to_string(),
            }
        };
        self.on_disconnect(generation, &reason);
    }

    fn dispatch(&self, text: &str) {
        let message: serde_json::Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "dropping malformed realtime frame");
                return;
            }
        };
        let Some(kind) = message.get("type").and_then(serde_json::Value::as_str) else {
            debug!("dropping realtime frame without type");
            return;
        };
        let kind = kind.to_owned();

        if kind == COMMAND_RESULT {
            self.settle(&message);
        }
        let handler = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned();
        match handler {
            Some(handler) => handler(message),
            None if kind != COMMAND_RESULT => debug!(%kind, "no handler registered"),
            None => {}
        }
    }

    fn settle(&self, message: &serde_json::Value) {
        let result = match CommandResult::deserialize(message) {
            Ok(result) => result,
            Err(err) => {
                warn!(%err, "malformed command result");
                return;
            }
        };
        let waiter = self.lock_pending().remove(&result.id);
        match waiter {
            Some(waiter) => {
                // the caller may have timed out meanwhile
                let _ = waiter.send(result.into_receipt());
            }
            None => debug!(command_id = %result.id, "result for unknown or expired request"),
        }
    }

    fn on_disconnect(&self, generation: u64, reason: &str) {
        {
            let mut session = self.lock_session();
            if !session.as_ref().is_some_and(|s| s.generation == generation) {
                return;
            }
            if let Some(session) = session.take() {
                session.token.cancel();
            }
        }
        // dropping the senders fails every in-flight delivery
        self.lock_pending().clear();
        warn!(generation, reason, "realtime channel disconnected");
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.status.send_replace(ChannelStatus::Disconnected);
        self.schedule_reconnect();
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<CommandId, oneshot::Sender<DeliveryReceipt>>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn heartbeat(outbound: mpsc::UnboundedSender<Message>, period: Duration, token: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                if outbound.send(Message::Ping(Vec::new())).is_err() {
                    break;
                }
            }
        }
    }
}

impl Transport for RealtimeChannel {
    fn is_available(&self) -> bool {
        self.is_connected()
    }

    async fn deliver(&self, command: &Command) -> Result<DeliveryReceipt, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(command.id, tx);
        if let Err(err) = self.send(&Outbound::command(command)) {
            self.lock_pending().remove(&command.id);
            return Err(err.into());
        }
        debug!(command_id = %command.id, "command pushed, awaiting result");

        match timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(_)) => Err(TransportError::ConnectionLost(
                "session closed before acknowledgement".to_string(),
            )),
            Err(_) => {
                self.lock_pending().remove(&command.id);
                Err(RealtimeError::Timeout(self.inner.request_timeout).into())
            }
        }
    }
}
