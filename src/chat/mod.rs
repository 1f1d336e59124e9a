// Chat delivery client for one chat view.
//
// A ChatSession is an explicit per-view context object: constructed when the
// view mounts, torn down when it unmounts or the active chat changes. There
// is no process-wide connection singleton; everything a view needs travels
// with its session, which makes the four teardown obligations (close the
// transport normally, cancel pending reconnects, unsubscribe the realtime
// channel, clear the typing set) mechanically checkable.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;

pub mod api;
pub mod connection;
pub mod outbox;
pub mod realtime;
pub mod transport;
pub mod typing;

pub use api::BackendApi;
pub use connection::{
    ConnectionManager, MAX_RECONNECT_ATTEMPTS, PING_INTERVAL, RECONNECT_BASE_DELAY,
};
pub use outbox::{MessageSender, OfflineOutbox};
pub use realtime::{chat_channel, RealtimeService, SocketRealtime, Subscription};
pub use transport::{LinkEvent, Transport, TransportError, TransportLink, WebSocketTransport};
pub use typing::TypingTracker;

use crate::config::ClientConfig;
use crate::credentials::load_token;
use crate::models::{ConnectionState, InboundFrame, PresenceEvent, QueuedMessage, RealtimeEvent, TypingUser};
use crate::storage::{FileOutboxStore, MemoryOutboxStore, OutboxStore};

/// Everything the session needs from the backend over HTTP.
#[async_trait]
pub trait Backend: MessageSender {
    async fn report_typing(&self, chat_id: &str, is_typing: bool) -> Result<()>;
}

#[async_trait]
impl Backend for BackendApi {
    async fn report_typing(&self, chat_id: &str, is_typing: bool) -> Result<()> {
        BackendApi::report_typing(self, chat_id, is_typing).await
    }
}

/// External capabilities a session is mounted with. Production code builds
/// this from [`ClientConfig`]; tests inject mocks.
pub struct SessionDeps {
    pub websocket_url: String,
    pub token: Option<String>,
    pub transport: Arc<dyn Transport>,
    pub realtime: Arc<dyn RealtimeService>,
    pub store: Arc<dyn OutboxStore>,
    pub backend: Arc<dyn Backend>,
}

impl SessionDeps {
    /// Wire up the production stack: websocket transport, socket realtime
    /// client, file-backed outbox store, HTTP backend, stored bearer token.
    pub fn from_config(config: &ClientConfig) -> Self {
        let token = load_token();
        let store: Arc<dyn OutboxStore> = match FileOutboxStore::default_location() {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("Falling back to in-memory outbox store: {}", e);
                Arc::new(MemoryOutboxStore::new())
            }
        };
        SessionDeps {
            websocket_url: config.websocket_url.clone(),
            token: token.clone(),
            transport: Arc::new(WebSocketTransport),
            realtime: Arc::new(SocketRealtime::new(&config.realtime_url, token.as_deref())),
            store,
            backend: Arc::new(BackendApi::new(&config.api_url, token)),
        }
    }
}

/// Event streams handed to the UI layer at mount. Raw transport frames and
/// realtime events are independent, eventually-consistent views of the same
/// logical events; the UI deduplicates by message id.
pub struct SessionEvents {
    pub frames: mpsc::Receiver<InboundFrame>,
    pub realtime: mpsc::Receiver<RealtimeEvent>,
}

/// Live chat client state for one mounted chat view.
pub struct ChatSession {
    chat_id: String,
    connection: Arc<ConnectionManager>,
    outbox: Arc<OfflineOutbox>,
    typing: Arc<TokioMutex<TypingTracker>>,
    backend: Arc<dyn Backend>,
    replay_task: Option<JoinHandle<()>>,
    event_task: Option<JoinHandle<()>>,
    torn_down: bool,
}

impl ChatSession {
    /// Mount a session for a chat view and start connecting.
    pub async fn mount(chat_id: &str, deps: SessionDeps) -> (ChatSession, SessionEvents) {
        let (frame_tx, frames) = mpsc::channel(100);
        let (connected_tx, mut connected_rx) = mpsc::channel(8);
        let (realtime_tx, realtime_rx) = mpsc::channel(100);

        let connection = Arc::new(ConnectionManager::new(
            chat_id,
            &deps.websocket_url,
            deps.token.clone(),
            deps.transport,
            frame_tx,
            connected_tx,
        ));
        let outbox = Arc::new(OfflineOutbox::load(chat_id, deps.store));
        let typing = Arc::new(TokioMutex::new(TypingTracker::new()));

        // Replay queued messages after every successful connect
        let replay_outbox = outbox.clone();
        let replay_backend = deps.backend.clone();
        let replay_task = tokio::spawn(async move {
            while connected_rx.recv().await.is_some() {
                replay_outbox.replay(&*replay_backend).await;
            }
        });

        // One realtime subscription per mounted view. The task owns it, so
        // aborting the task drops the guard and unsubscribes.
        let subscription = deps.realtime.subscribe(&chat_channel(chat_id)).await;
        let event_task = subscription.map(|mut subscription| {
            let typing = typing.clone();
            tokio::spawn(async move {
                while let Some(event) = subscription.recv().await {
                    if event.event == "typing" {
                        match serde_json::from_value::<PresenceEvent>(event.payload.clone()) {
                            Ok(presence) => typing.lock().await.on_presence_event(&presence),
                            Err(e) => warn!("Dropping malformed typing event: {}", e),
                        }
                    }
                    if realtime_tx.send(event).await.is_err() {
                        // UI receiver gone; keep feeding the typing tracker
                        debug!("Realtime event receiver dropped");
                    }
                }
            })
        });

        connection.connect().await;

        let session = ChatSession {
            chat_id: chat_id.to_string(),
            connection,
            outbox,
            typing,
            backend: deps.backend,
            replay_task: Some(replay_task),
            event_task,
            torn_down: false,
        };
        let events = SessionEvents {
            frames,
            realtime: realtime_rx,
        };
        (session, events)
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Send a text message, enqueue-first: the message is persisted before
    /// the immediate send attempt, and leaves the queue only once the
    /// transport accepts the write. Returns the message so the UI can show
    /// it in its pending state.
    pub async fn send_message(&self, content: &str, parent_id: Option<&str>) -> QueuedMessage {
        let mut message = QueuedMessage::text(&self.chat_id, content);
        if let Some(parent_id) = parent_id {
            message = message.reply_to(parent_id);
        }
        self.deliver(message).await
    }

    /// Send a media message referencing an already-uploaded payload. If the
    /// immediate attempt fails the reference stays queued but is not
    /// auto-replayed; the UI offers a manual resend instead.
    pub async fn send_media(&self, upload_ref: &str, parent_id: Option<&str>) -> QueuedMessage {
        let mut message = QueuedMessage::media(&self.chat_id, upload_ref);
        if let Some(parent_id) = parent_id {
            message = message.reply_to(parent_id);
        }
        self.deliver(message).await
    }

    async fn deliver(&self, message: QueuedMessage) -> QueuedMessage {
        self.outbox.enqueue(message.clone()).await;

        let payload = json!({
            "type": "MESSAGE",
            "id": message.id,
            "kind": message.kind,
            "content": message.content,
            "parentId": message.parent_id,
        })
        .to_string();

        if self.connection.send_message(&payload).await {
            self.outbox.dequeue(&message.id).await;
        } else {
            debug!("Transport not open; message {} stays queued", message.id);
        }
        message
    }

    /// Broadcast this client's own typing transition, over the transport and
    /// the backend's typing endpoint. Local tracked state is untouched: self
    /// is never shown as typing.
    pub async fn set_typing(&self, is_typing: bool) {
        let payload = json!({"type": "TYPING", "isTyping": is_typing}).to_string();
        self.connection.send_message(&payload).await;

        if let Err(e) = self.backend.report_typing(&self.chat_id, is_typing).await {
            warn!("Typing report failed: {}", e);
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }

    /// Manual recovery after the automatic budget is spent.
    pub async fn reconnect(&self) {
        self.connection.reconnect().await;
    }

    pub async fn typing_users(&self) -> Vec<TypingUser> {
        self.typing.lock().await.users().to_vec()
    }

    pub async fn typing_summary(&self) -> Option<String> {
        self.typing.lock().await.summary()
    }

    /// Messages still waiting for a confirmed send, for pending-state UI.
    pub async fn pending_messages(&self) -> Vec<QueuedMessage> {
        self.outbox.messages().await
    }

    pub fn outbox(&self) -> Arc<OfflineOutbox> {
        self.outbox.clone()
    }

    /// Tear the session down: close the transport with a normal-closure
    /// code, cancel any pending reconnect, drop the realtime subscription,
    /// and clear the typing set. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.connection.disconnect().await;
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        if let Some(task) = self.replay_task.take() {
            task.abort();
        }
        self.typing.lock().await.clear();
        debug!("Session for chat {} torn down", self.chat_id);
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        // Best effort for sessions dropped without an explicit shutdown
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        if let Some(task) = self.replay_task.take() {
            task.abort();
        }
        if !self.torn_down {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let connection = self.connection.clone();
                handle.spawn(async move {
                    connection.disconnect().await;
                });
            }
        }
    }
}
