//! Push-based Stream Channel.
//!
//! [`StreamChannel`] owns one long-lived WebSocket connection to the
//! event stream. Once [`connect`](StreamChannel::connect) succeeds a
//! background task reads frames, forwards parsed progress events to
//! every registered [`EventSink`], and reconnects with backoff whenever
//! the connection drops or goes silent. Only
//! [`disconnect`](StreamChannel::disconnect) ends it.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use trendscope_core::event::{EventSink, EventSource};

use crate::client::{StreamClient, WsStream};
use crate::error::TransportError;
use crate::frames::{parse_frame, ServerFrame};
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// Default silence window: three missed 30-second heartbeats.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// How long `disconnect` waits for the session task to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Observable lifecycle of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// First connection attempt in progress.
    Connecting,
    Connected,
    /// Connection lost; attempt `attempt` of the current outage.
    Reconnecting { attempt: u32 },
    /// The last attempt was rejected; retries continue with backoff.
    AuthRejected,
    /// Released by `disconnect`.
    Disconnected,
}

/// Tunables for the channel.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub reconnect: ReconnectConfig,
    /// A session with no frame at all for this long is treated as dead.
    pub idle_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

type Sinks = Arc<RwLock<Vec<Arc<dyn EventSink>>>>;

/// Bookkeeping for the running connection task.
struct Session {
    task_handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Push transport for progress events.
pub struct StreamChannel {
    client: Arc<StreamClient>,
    config: StreamConfig,
    sinks: Sinks,
    token: Arc<RwLock<String>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    session: Mutex<Option<Session>>,
}

impl StreamChannel {
    pub fn new(ws_url: impl Into<String>, config: StreamConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            client: Arc::new(StreamClient::new(ws_url)),
            config,
            sinks: Arc::new(RwLock::new(Vec::new())),
            token: Arc::new(RwLock::new(String::new())),
            state_tx: Arc::new(state_tx),
            session: Mutex::new(None),
        }
    }

    /// Register a sink invoked once per parsed progress event.
    ///
    /// May be called before or after `connect`.
    pub async fn on_event(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().await.push(sink);
    }

    /// Watch the connection lifecycle.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Replace the credential used by subsequent reconnect attempts.
    pub async fn refresh_token(&self, token: impl Into<String>) {
        *self.token.write().await = token.into();
        tracing::info!(client_id = self.client.client_id(), "Stream credential refreshed");
    }

    /// Open the channel.
    ///
    /// The first attempt is made inline and its failure is returned as
    /// [`TransportError::Auth`] or [`TransportError::Network`]. After a
    /// successful connect, failures are handled by the background task
    /// and never surface here. Connecting an already connected channel
    /// replaces the previous session.
    pub async fn connect(&self, token: &str) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            stop_session(previous).await;
        }

        *self.token.write().await = token.to_string();
        self.state_tx.send_replace(ConnectionState::Connecting);

        let conn = match self.client.connect(token).await {
            Ok(conn) => conn,
            Err(e) => {
                let state = match e {
                    TransportError::Auth(_) => ConnectionState::AuthRejected,
                    _ => ConnectionState::Idle,
                };
                self.state_tx.send_replace(state);
                return Err(e);
            }
        };
        self.state_tx.send_replace(ConnectionState::Connected);

        let cancel = CancellationToken::new();
        let ctx = SessionContext {
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            sinks: Arc::clone(&self.sinks),
            token: Arc::clone(&self.token),
            state_tx: Arc::clone(&self.state_tx),
            cancel: cancel.clone(),
        };

        let task_handle = tokio::spawn(async move {
            run_connection_loop(ctx, conn.ws_stream).await;
        });

        *session = Some(Session {
            task_handle,
            cancel,
        });
        Ok(())
    }

    /// Release the connection. No event is delivered after this returns.
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            tracing::info!(client_id = self.client.client_id(), "Disconnecting event stream");
            stop_session(session).await;
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Whether a session task is currently running.
    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.task_handle.is_finished())
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
            session.task_handle.abort();
        }
    }
}

/// Cancel the session and wait for its task; abort it after the grace
/// period so no sink is reached once this returns.
async fn stop_session(session: Session) {
    let Session {
        mut task_handle,
        cancel,
    } = session;
    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut task_handle)
        .await
        .is_err()
    {
        tracing::warn!("Event stream task did not exit in time, aborting it");
        task_handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// Everything the background task needs, owned.
struct SessionContext {
    client: Arc<StreamClient>,
    config: StreamConfig,
    sinks: Sinks,
    token: Arc<RwLock<String>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
}

/// Why a session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Closed,
    IdleTimeout,
    Error,
}

/// Core loop: process frames -> reconnect -> process frames ...
///
/// Runs until the cancellation token is triggered.
async fn run_connection_loop(ctx: SessionContext, initial: WsStream) {
    let mut ws_stream = initial;

    loop {
        let end = process_frames(&ctx, &mut ws_stream).await;
        if end == SessionEnd::Cancelled || ctx.cancel.is_cancelled() {
            let _ = ws_stream.close(None).await;
            return;
        }

        tracing::info!(
            client_id = ctx.client.client_id(),
            reason = ?end,
            "Event stream lost, entering reconnect loop",
        );
        ctx.state_tx
            .send_replace(ConnectionState::Reconnecting { attempt: 0 });

        match reconnect_loop(
            &ctx.client,
            &ctx.token,
            &ctx.config.reconnect,
            &ctx.state_tx,
            &ctx.cancel,
        )
        .await
        {
            Some(conn) => {
                ctx.state_tx.send_replace(ConnectionState::Connected);
                ws_stream = conn.ws_stream;
            }
            None => return,
        }
    }
}

/// Read frames until the socket closes, errors, goes idle, or the
/// channel is cancelled.
async fn process_frames(ctx: &SessionContext, ws_stream: &mut WsStream) -> SessionEnd {
    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return SessionEnd::Cancelled,
            next = tokio::time::timeout(ctx.config.idle_timeout, ws_stream.next()) => next,
        };

        let Ok(msg_result) = next else {
            tracing::warn!(
                client_id = ctx.client.client_id(),
                idle_secs = ctx.config.idle_timeout.as_secs(),
                "No frames received within idle timeout",
            );
            return SessionEnd::IdleTimeout;
        };

        match msg_result {
            Some(Ok(Message::Text(text))) => handle_text_frame(ctx, &text).await,
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!("Ignoring binary frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite; counts as liveness.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Event stream closed by server");
                return SessionEnd::Closed;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Event stream receive error");
                return SessionEnd::Error;
            }
            None => return SessionEnd::Closed,
        }
    }
}

/// Parse one text frame and fan progress events out to the sinks.
async fn handle_text_frame(ctx: &SessionContext, text: &str) {
    match parse_frame(text) {
        Ok(ServerFrame::Progress(event)) => {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let event = event.with_source(EventSource::Stream);
            tracing::debug!(
                key = %event.key,
                phase = %event.phase,
                sequence = event.sequence,
                "Stream progress event",
            );
            let sinks = ctx.sinks.read().await;
            for sink in sinks.iter() {
                sink.deliver(event.clone()).await;
            }
        }
        Ok(ServerFrame::Heartbeat) => {
            tracing::trace!("Heartbeat");
        }
        Err(e) => {
            tracing::debug!(error = %e, raw_frame = %text, "Discarding unparseable frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_idle_timeout_covers_three_heartbeats() {
        let config = StreamConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn new_channel_is_idle() {
        let channel = StreamChannel::new("ws://127.0.0.1:9", StreamConfig::default());
        assert_eq!(*channel.state().borrow(), ConnectionState::Idle);
        assert!(!channel.is_connected().await);
    }

    #[tokio::test]
    async fn failed_first_connect_is_reported() {
        let channel = StreamChannel::new("ws://127.0.0.1:9", StreamConfig::default());
        let result = channel.connect("token").await;
        assert!(matches!(result, Err(TransportError::Network(_))));
        assert_eq!(*channel.state().borrow(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_session_is_aborted_after_the_grace_period() {
        struct SetOnDrop(Arc<std::sync::atomic::AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let guard = SetOnDrop(Arc::clone(&dropped));
        // Stands in for a sink that never returns and ignores cancellation.
        let task_handle = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        let session = Session {
            task_handle,
            cancel: CancellationToken::new(),
        };

        stop_session(session).await;

        for _ in 0..10 {
            if dropped.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_harmless() {
        let channel = StreamChannel::new("ws://127.0.0.1:9", StreamConfig::default());
        channel.disconnect().await;
        assert_eq!(*channel.state().borrow(), ConnectionState::Disconnected);
    }
}
