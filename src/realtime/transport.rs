//! Reconnecting WebSocket transport.
//!
//! `connect` spawns one background task per channel. The task walks
//! `Disconnected → Connecting → Connected`, decodes every inbound text frame
//! into a [`ServerEvent`] and hands it to the channel's [`EventRouter`].
//! When the socket drops it reconnects after a fixed interval until closed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use metrics::counter;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{ServerEvent, Topic};

use super::router::{EventRouter, Unsubscribe};

const METRIC_TRANSPORT_RECONNECT: &str = "mangasync_transport_reconnect_total";

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1_000);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);
pub const DEFAULT_WS_PATH: &str = "/ws";
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub type ConnectionCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        })
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid websocket url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to connect: {0}")]
    Connect(#[source] tungstenite::Error),
    #[error("connection lost: {0}")]
    Stream(#[source] tungstenite::Error),
    #[error("undecodable frame: {0}")]
    Frame(#[source] serde_json::Error),
}

impl TransportError {
    fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone)]
pub struct TransportOptions {
    pub reconnect: bool,
    pub reconnect_interval: Duration,
    pub heartbeat_interval: Duration,
    pub on_connect: Option<ConnectionCallback>,
    pub on_disconnect: Option<ConnectionCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            on_connect: None,
            on_disconnect: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("reconnect", &self.reconnect)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl TransportOptions {
    fn connected(&self) {
        if let Some(callback) = &self.on_connect {
            callback();
        }
    }

    fn disconnected(&self) {
        if let Some(callback) = &self.on_disconnect {
            callback();
        }
    }

    fn failed(&self, err: &TransportError) {
        warn!(error = %err, "Realtime transport error");
        if let Some(callback) = &self.on_error {
            callback(err);
        }
    }
}

/// Derive the notification endpoint from a page origin.
///
/// `http` maps to `ws` and `https` to `wss`; any path on the origin is
/// replaced by `path`.
pub fn websocket_url(origin: &str, path: &str) -> Result<Url, TransportError> {
    let mut url =
        Url::parse(origin).map_err(|err| TransportError::invalid_url(origin, err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::invalid_url(
                origin,
                format!("unsupported scheme `{other}`"),
            ));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::invalid_url(origin, "cannot change scheme"))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Handle to a running transport task.
///
/// Dropping the handle closes the channel.
pub struct TransportHandle {
    url: Url,
    router: EventRouter,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The router inbound events are dispatched to.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Unsubscribe
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.router.subscribe(topic, handler)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// A receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Ask the task to stop. Idempotent.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Close and wait for the task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            error!(error = %err, "Realtime transport task failed");
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open a channel to `url` and start the background task.
///
/// Only an unusable URL fails here; connection problems are reported through
/// `on_error` and retried when `reconnect` is set.
pub fn connect(url: &str, options: TransportOptions) -> Result<TransportHandle, TransportError> {
    connect_with_router(url, options, EventRouter::new())
}

/// Like [`connect`], dispatching into an existing router.
pub fn connect_with_router(
    url: &str,
    options: TransportOptions,
    router: EventRouter,
) -> Result<TransportHandle, TransportError> {
    let url = Url::parse(url).map_err(|err| TransportError::invalid_url(url, err.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(TransportError::invalid_url(
            url.as_str(),
            "scheme must be ws or wss",
        ));
    }

    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(run(
        url.clone(),
        options,
        router.clone(),
        state_tx,
        shutdown_rx,
    ));

    Ok(TransportHandle {
        url,
        router,
        state: state_rx,
        shutdown: shutdown_tx,
        task: Some(task),
    })
}

enum SessionEnd {
    Shutdown,
    Dropped(Option<TransportError>),
}

async fn run(
    url: Url,
    options: TransportOptions,
    router: EventRouter,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u64 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        attempt += 1;
        state.send_replace(ConnectionState::Connecting);
        debug!(url = %url, attempt, "Connecting realtime transport");

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((socket, _response)) => {
                state.send_replace(ConnectionState::Connected);
                info!(url = %url, attempt, "Realtime transport connected");
                options.connected();

                let end = session(socket, &options, &router, &mut shutdown).await;

                state.send_replace(ConnectionState::Disconnected);
                info!(url = %url, "Realtime transport disconnected");
                options.disconnected();

                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Dropped(Some(err)) => options.failed(&err),
                    SessionEnd::Dropped(None) => {}
                }
            }
            Err(err) => {
                state.send_replace(ConnectionState::Disconnected);
                options.failed(&TransportError::Connect(err));
            }
        }

        if !options.reconnect {
            break;
        }

        counter!(METRIC_TRANSPORT_RECONNECT).increment(1);
        tokio::select! {
            _ = sleep(options.reconnect_interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    state.send_replace(ConnectionState::Disconnected);
    debug!(url = %url, "Realtime transport stopped");
}

async fn session(
    socket: Socket,
    options: &TransportOptions,
    router: &EventRouter,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut source) = socket.split();
    let period = options.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if let Err(err) = sink.send(Message::Close(None)).await {
                    debug!(error = %err, "Close frame not delivered");
                }
                return SessionEnd::Shutdown;
            }
            _ = heartbeat.tick() => {
                if let Err(err) = sink.send(Message::Ping(Default::default())).await {
                    return SessionEnd::Dropped(Some(TransportError::Stream(err)));
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => match ServerEvent::parse(text.as_str()) {
                    Ok(event) => {
                        debug!(topic = %event.topic(), "Realtime event received");
                        router.dispatch(&event);
                    }
                    Err(err) => options.failed(&TransportError::Frame(err)),
                },
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped(None),
                Some(Ok(_)) => {}
                Some(Err(err)) => return SessionEnd::Dropped(Some(TransportError::Stream(err))),
            },
        }
    }
}
