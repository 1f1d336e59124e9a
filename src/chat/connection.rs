// Connection lifecycle for one chat view: connect, monitor, recover.
//
// Transport failures never surface as errors to callers; they drive the
// state machine and are reported through the connection state instead.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use crate::chat::transport::{LinkEvent, Transport, TransportLink};
use crate::models::{ConnectionState, ConnectionStatus, InboundFrame};

/// Automatic recovery gives up after this many attempts within one cycle
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the Nth reconnect attempt is N times this base
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Liveness probe cadence while connected
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

const PING_FRAME: &str = r#"{"type":"PING"}"#;

enum Outbound {
    Frame(String),
    Close,
}

struct Inner {
    chat_id: String,
    websocket_url: String,
    token: Option<String>,
    transport: Arc<dyn Transport>,
    state: TokioMutex<ConnectionState>,
    frame_tx: mpsc::Sender<InboundFrame>,
    connected_tx: mpsc::Sender<()>,
    outbound: TokioMutex<Option<mpsc::Sender<Outbound>>>,
    reconnect_timer: TokioMutex<Option<JoinHandle<()>>>,
    // Bumped by connect/disconnect/reconnect so tasks from an older cycle
    // notice they are stale and stop without touching state
    generation: AtomicU64,
}

/// Owns at most one live transport link for its chat.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager for one chat view.
    ///
    /// Inbound frames are forwarded raw on `frame_tx`; a unit is sent on
    /// `connected_tx` after every successful connect, which the session uses
    /// to trigger outbox replay.
    pub fn new(
        chat_id: &str,
        websocket_url: &str,
        token: Option<String>,
        transport: Arc<dyn Transport>,
        frame_tx: mpsc::Sender<InboundFrame>,
        connected_tx: mpsc::Sender<()>,
    ) -> Self {
        ConnectionManager {
            inner: Arc::new(Inner {
                chat_id: chat_id.to_string(),
                websocket_url: websocket_url.to_string(),
                token,
                transport,
                state: TokioMutex::new(ConnectionState::new()),
                frame_tx,
                connected_tx,
                outbound: TokioMutex::new(None),
                reconnect_timer: TokioMutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Snapshot of the current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.state.lock().await.clone()
    }

    /// Open the transport for this chat.
    ///
    /// An empty chat id is rejected with a log line. A missing credential
    /// aborts silently: the caller sees no error, the state stays
    /// disconnected, and the UI shows the usual disconnected indicator.
    pub async fn connect(&self) {
        if self.inner.chat_id.is_empty() {
            error!("Refusing to connect with an empty chat id");
            return;
        }
        if self.inner.token.is_none() {
            debug!("No auth token available, skipping connect for chat {}", self.inner.chat_id);
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        cancel_reconnect_timer(&self.inner).await;
        // At most one live link per chat: an earlier link, if any, is closed
        if let Some(sender) = self.inner.outbound.lock().await.take() {
            let _ = sender.send(Outbound::Close).await;
        }
        {
            let mut state = self.inner.state.lock().await;
            state.status = ConnectionStatus::Connecting;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            start_link(inner, generation).await;
        });
    }

    /// Close the transport with a normal-closure code and cancel any pending
    /// reconnect timer. Safe to call repeatedly or while disconnected.
    pub async fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        cancel_reconnect_timer(&self.inner).await;

        let sender = self.inner.outbound.lock().await.take();
        if let Some(sender) = sender {
            // The driver closes the link and exits when it sees this
            let _ = sender.send(Outbound::Close).await;
        }

        let mut state = self.inner.state.lock().await;
        if state.status != ConnectionStatus::Disconnected {
            info!("Disconnected from chat {}", self.inner.chat_id);
            state.status = ConnectionStatus::Disconnected;
        }
    }

    /// Manual recovery: reset the attempt budget and start a fresh cycle.
    pub async fn reconnect(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.reconnect_attempts = 0;
            state.last_error = None;
        }
        self.disconnect().await;
        self.connect().await;
    }

    /// Try to write one frame to the open transport. Returns whether the
    /// write was accepted; a rejected write is the outbox's cue to keep the
    /// message queued. No retry happens here.
    pub async fn send_message(&self, payload: &str) -> bool {
        let state = self.inner.state.lock().await;
        if state.status != ConnectionStatus::Connected {
            return false;
        }
        drop(state);

        let outbound = self.inner.outbound.lock().await;
        match outbound.as_ref() {
            Some(sender) => sender.try_send(Outbound::Frame(payload.to_string())).is_ok(),
            None => false,
        }
    }
}

async fn cancel_reconnect_timer(inner: &Arc<Inner>) {
    if let Some(handle) = inner.reconnect_timer.lock().await.take() {
        handle.abort();
        debug!("Cancelled pending reconnect timer");
    }
}

fn is_stale(inner: &Arc<Inner>, generation: u64) -> bool {
    inner.generation.load(Ordering::SeqCst) != generation
}

fn connect_url(inner: &Arc<Inner>) -> String {
    let token = inner.token.as_deref().unwrap_or("");
    let separator = if inner.websocket_url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}token={}&chat={}",
        inner.websocket_url, separator, token, inner.chat_id
    )
}

// Boxed so the reconnect timer can re-enter start_link without creating a
// recursive future type
fn start_link_boxed(inner: Arc<Inner>, generation: u64) -> futures::future::BoxFuture<'static, ()> {
    Box::pin(start_link(inner, generation))
}

/// Open the transport and hand the link to the driver loop.
async fn start_link(inner: Arc<Inner>, generation: u64) {
    let url = connect_url(&inner);
    match inner.transport.open(&url).await {
        Ok(mut link) => {
            if is_stale(&inner, generation) {
                debug!("Connection cycle superseded, closing fresh link");
                link.close().await;
                return;
            }

            {
                let mut state = inner.state.lock().await;
                state.status = ConnectionStatus::Connected;
                state.reconnect_attempts = 0;
                state.last_error = None;
            }
            info!("Connected to chat {}", inner.chat_id);

            let (outbound_tx, outbound_rx) = mpsc::channel(64);
            *inner.outbound.lock().await = Some(outbound_tx);

            // Outbox replay trigger; dropped triggers are fine, the
            // consumer only needs to know a connect happened
            let _ = inner.connected_tx.try_send(());

            run_link(inner, generation, link, outbound_rx).await;
        }
        Err(e) => {
            if is_stale(&inner, generation) {
                return;
            }
            warn!("Connect failed for chat {}: {}", inner.chat_id, e);
            schedule_reconnect(&inner, generation, e.to_string()).await;
        }
    }
}

/// Drive one live link: pump outbound frames, forward inbound frames,
/// probe liveness, and kick off recovery when the link dies.
async fn run_link(
    inner: Arc<Inner>,
    generation: u64,
    mut link: Box<dyn TransportLink>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await; // consume the immediate first tick

    // The select only picks what happened; the link is touched afterwards,
    // once the competing next_event future has been dropped
    enum Step {
        Ping,
        Outbound(Option<Outbound>),
        Inbound(Option<LinkEvent>),
    }

    let failure: Option<String> = loop {
        let step = tokio::select! {
            _ = ping.tick() => Step::Ping,
            outbound = outbound_rx.recv() => Step::Outbound(outbound),
            event = link.next_event() => Step::Inbound(event),
        };

        match step {
            Step::Ping => {
                if let Err(e) = link.send(PING_FRAME).await {
                    break Some(format!("liveness probe failed: {}", e));
                }
            }
            Step::Outbound(Some(Outbound::Frame(frame))) => {
                if let Err(e) = link.send(&frame).await {
                    break Some(format!("send failed: {}", e));
                }
            }
            Step::Outbound(Some(Outbound::Close)) | Step::Outbound(None) => {
                link.close().await;
                return;
            }
            Step::Inbound(Some(LinkEvent::Frame(raw))) => {
                let frame = InboundFrame {
                    chat_id: inner.chat_id.clone(),
                    raw,
                };
                if inner.frame_tx.send(frame).await.is_err() {
                    debug!("Inbound frame receiver dropped");
                }
            }
            Step::Inbound(Some(LinkEvent::Closed { normal: true })) => {
                info!("Server closed the connection normally");
                inner.outbound.lock().await.take();
                if !is_stale(&inner, generation) {
                    inner.state.lock().await.status = ConnectionStatus::Disconnected;
                }
                return;
            }
            Step::Inbound(Some(LinkEvent::Closed { normal: false })) => {
                break Some("connection closed abnormally".to_string());
            }
            Step::Inbound(Some(LinkEvent::Failed(e))) => break Some(e),
            Step::Inbound(None) => break Some("transport stream ended".to_string()),
        }
    };

    inner.outbound.lock().await.take();
    if let Some(reason) = failure {
        if is_stale(&inner, generation) {
            return;
        }
        warn!("Link lost for chat {}: {}", inner.chat_id, reason);
        schedule_reconnect(&inner, generation, reason).await;
    }
}

/// Schedule the next automatic reconnect attempt, or park the state machine
/// in `Error` once the budget is spent.
async fn schedule_reconnect(inner: &Arc<Inner>, generation: u64, reason: String) {
    if is_stale(inner, generation) {
        return;
    }

    let delay;
    {
        let mut state = inner.state.lock().await;
        state.last_error = Some(reason);
        if state.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
            error!(
                "Giving up on chat {} after {} reconnect attempts",
                inner.chat_id, MAX_RECONNECT_ATTEMPTS
            );
            state.status = ConnectionStatus::Error;
            return;
        }
        state.reconnect_attempts += 1;
        state.status = ConnectionStatus::Reconnecting;
        // Linear backoff: 2s, 4s, 6s, ...
        delay = RECONNECT_BASE_DELAY * state.reconnect_attempts;
        info!(
            "Reconnect attempt {}/{} for chat {} in {:?}",
            state.reconnect_attempts, MAX_RECONNECT_ATTEMPTS, inner.chat_id, delay
        );
    }

    let task_inner = inner.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if is_stale(&task_inner, generation) {
            return;
        }
        task_inner.reconnect_timer.lock().await.take();
        {
            let mut state = task_inner.state.lock().await;
            state.status = ConnectionStatus::Connecting;
        }
        start_link_boxed(task_inner, generation).await;
    });
    *inner.reconnect_timer.lock().await = Some(handle);
}
