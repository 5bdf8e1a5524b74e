//! Connection lifecycle management for the exam realtime channel.
//!
//! [`RealtimeClient`] owns the WebSocket, the connection state machine and
//! the reconnect schedule. One logical connection is live at a time: `open`
//! is idempotent with respect to an already-active attempt, and an abnormal
//! disconnect redials on a fixed interval until the retry budget is spent.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::config::{RealtimeConfig, TokenSource};
use crate::protocol::{ALL_EXAMS, ClientCommand, ServerEvent};
use crate::retry::{RetryPolicy, close_is_abnormal};
use crate::roster::ExamSession;
use crate::router::{Notification, Router};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Where the connection currently stands.
///
/// `Closed` is terminal: it is reached only by an explicit [`RealtimeClient::close`],
/// a normal server closure, or retry exhaustion, and is left only by a new
/// explicit [`RealtimeClient::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticating,
    Live,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Why a single connection ended.
enum ConnExit {
    /// The caller asked for shutdown.
    Shutdown,
    /// The server closed with code 1000.
    Normal,
    /// Anything else: transport error, abnormal close code, dropped stream.
    Abnormal,
}

pub(crate) struct EngineShared {
    config: RealtimeConfig,
    tokens: Arc<dyn TokenSource>,
    retry: RetryPolicy,
    /// Scheduled reconnects since the last authenticated connection.
    attempt: AtomicU32,
    state_tx: watch::Sender<ConnectionState>,
    /// Flipped to `true` by `close`; cancels the socket and any pending timer.
    shutdown_tx: watch::Sender<bool>,
    /// Guards against a second concurrent engine task.
    running: AtomicBool,
    sink: Mutex<Option<WsSink>>,
    pub(crate) router: Router,
    pub(crate) notify_tx: broadcast::Sender<Notification>,
}

impl EngineShared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state transition");
        }
    }

    /// Serializes and sends a frame on the current socket, if any.
    ///
    /// This is the raw path used for the handshake as well; the public
    /// [`RealtimeClient::send`] adds the `Live` gate on top.
    pub(crate) async fn send_frame(&self, command: &ClientCommand) -> bool {
        let payload = match serde_json::to_string(command) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to serialize outbound frame");
                return false;
            }
        };
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            warn!("no active websocket; dropping outbound frame");
            return false;
        };
        match sink.send(WsMessage::Text(payload.into())).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to send frame");
                false
            }
        }
    }
}

/// The realtime engine handle.
///
/// Cheap to clone; all clones share one connection, one roster projection and
/// one handler registry.
#[derive(Clone)]
pub struct RealtimeClient {
    pub(crate) shared: Arc<EngineShared>,
}

impl RealtimeClient {
    pub fn new(config: RealtimeConfig, tokens: Arc<dyn TokenSource>) -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, _) = watch::channel(false);
        let retry = RetryPolicy::new(config.max_reconnect_attempts, config.reconnect_interval);
        Self {
            shared: Arc::new(EngineShared {
                config,
                tokens,
                retry,
                attempt: AtomicU32::new(0),
                state_tx,
                shutdown_tx,
                running: AtomicBool::new(false),
                sink: Mutex::new(None),
                router: Router::new(notify_tx.clone()),
                notify_tx,
            }),
        }
    }

    /// Opens the realtime connection.
    ///
    /// Without a token this logs a warning and makes no connection attempt.
    /// While an engine task is already active (any state other than `Idle` or
    /// `Closed`) a repeated `open` is a logged no-op. Opening resets the
    /// reconnect attempt counter to zero.
    pub fn open(&self) {
        if self.shared.tokens.token().is_none() {
            warn!("no auth token available; not opening realtime connection");
            return;
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!("connection attempt already active; ignoring open");
            return;
        }
        self.shared.attempt.store(0, Ordering::SeqCst);
        self.shared.shutdown_tx.send_replace(false);
        tokio::spawn(run_loop(Arc::clone(&self.shared)));
    }

    /// User-initiated shutdown: sends a normal-closure frame if connected,
    /// cancels any pending reconnect timer and transitions to `Closed`.
    pub async fn close(&self) {
        info!("closing realtime connection");
        self.shared.shutdown_tx.send_replace(true);
        if !self.shared.running.load(Ordering::SeqCst) {
            // No engine task to react; transition directly.
            self.shared.router.clear_handlers();
            self.shared.set_state(ConnectionState::Closed);
        }
    }

    /// Sends a frame if and only if the channel is `Live`.
    ///
    /// Never panics and never returns an error: a closed or still-handshaking
    /// channel logs a warning and reports `false`.
    pub async fn send(&self, command: &ClientCommand) -> bool {
        let state = self.state();
        if state != ConnectionState::Live {
            warn!(%state, "channel not live; dropping outbound command");
            return false;
        }
        self.shared.send_frame(command).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch channel for connection state changes; the surrounding
    /// application uses this to surface a persistent offline indicator.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribes to user-facing notifications (broadcasts, pause/resume,
    /// command outcomes).
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.shared.notify_tx.subscribe()
    }

    /// Registers a message handler invoked with every inbound event.
    ///
    /// Registering under an existing key replaces the previous handler.
    pub fn register_handler<F>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.router.register(key.into(), Arc::new(handler));
    }

    pub fn remove_handler(&self, key: &str) {
        self.shared.router.remove(key);
    }

    /// A cloned snapshot of one exam's roster, if known.
    pub fn session(&self, exam_id: u64) -> Option<ExamSession> {
        self.shared.router.session(exam_id)
    }

    /// Cloned snapshots of every known exam roster.
    pub fn sessions(&self) -> Vec<ExamSession> {
        self.shared.router.sessions()
    }
}

/// The engine task: dial, authenticate, pump frames, redial on failure.
async fn run_loop(shared: Arc<EngineShared>) {
    let url = shared.config.url();
    // Whether the stop was intentional (user close or normal server close),
    // which also retires the handler registry.
    let mut intentional_stop = true;

    loop {
        let Some(token) = shared.tokens.token() else {
            warn!("auth token no longer available; abandoning reconnection");
            break;
        };

        shared.set_state(ConnectionState::Connecting);
        info!(url = %url, "dialing exam realtime endpoint");
        let exit = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => drive_connection(&shared, stream, token).await,
            Err(err) => {
                warn!(error = %err, "websocket connect failed");
                ConnExit::Abnormal
            }
        };
        shared.sink.lock().await.take();

        match exit {
            ConnExit::Shutdown => break,
            ConnExit::Normal => {
                info!("server closed the connection normally");
                break;
            }
            ConnExit::Abnormal => {
                let attempt = shared.attempt.load(Ordering::SeqCst);
                let Some(delay) = shared.retry.next_delay(attempt) else {
                    warn!(
                        attempts = attempt,
                        "reconnect budget exhausted; staying offline until reopened"
                    );
                    intentional_stop = false;
                    break;
                };
                shared.attempt.store(attempt + 1, Ordering::SeqCst);
                shared.set_state(ConnectionState::Reconnecting);
                info!(
                    attempt = attempt + 1,
                    max = shared.retry.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );

                let mut shutdown = shared.shutdown_tx.subscribe();
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    if intentional_stop {
        shared.router.clear_handlers();
    }
    shared.set_state(ConnectionState::Closed);
    shared.running.store(false, Ordering::SeqCst);
    info!("realtime connection closed");
}

/// Pumps one established connection until it ends.
async fn drive_connection(
    shared: &Arc<EngineShared>,
    stream: WsStream,
    token: SecretString,
) -> ConnExit {
    let (sink, mut frames) = stream.split();
    *shared.sink.lock().await = Some(sink);

    shared.set_state(ConnectionState::Authenticating);
    let auth = ClientCommand::Auth {
        token: token.expose_secret().to_string(),
    };
    if !shared.send_frame(&auth).await {
        warn!("failed to send auth frame");
        return ConnExit::Abnormal;
    }

    let mut shutdown = shared.shutdown_tx.subscribe();
    if *shutdown.borrow() {
        return close_socket(shared).await;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return close_socket(shared).await;
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(ServerEvent::AuthSuccess { .. }) = shared.router.on_frame(&text) {
                        info!("authenticated with exam server");
                        shared.attempt.store(0, Ordering::SeqCst);
                        shared.set_state(ConnectionState::Live);
                        // Ask for the current status of every exam so the
                        // roster catches up after a (re)connect.
                        let query = ClientCommand::GetExamStatus { exam_id: ALL_EXAMS };
                        if !shared.send_frame(&query).await {
                            warn!("failed to send initial exam status query");
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let abnormal = close_is_abnormal(frame.as_ref());
                    info!(abnormal, "server closed connection");
                    return if abnormal { ConnExit::Abnormal } else { ConnExit::Normal };
                }
                // Pings are answered by the transport; binary frames are not
                // part of this protocol.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "websocket read error");
                    return ConnExit::Abnormal;
                }
                None => {
                    warn!("websocket stream ended without close frame");
                    return ConnExit::Abnormal;
                }
            }
        }
    }
}

/// Sends the normal-closure frame for a caller-initiated shutdown.
async fn close_socket(shared: &Arc<EngineShared>) -> ConnExit {
    if let Some(mut sink) = shared.sink.lock().await.take() {
        let _ = sink
            .send(WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client shutdown".into(),
            })))
            .await;
    }
    ConnExit::Shutdown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_display_names() {
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
        assert_eq!(ConnectionState::Authenticating.to_string(), "authenticating");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }
}
