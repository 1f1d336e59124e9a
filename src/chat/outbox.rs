// Offline outbox: a message composed while disconnected is never silently
// lost, and retries happen in the order the messages were composed.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::models::{MessageKind, QueuedMessage};
use crate::storage::OutboxStore;

/// Backend send path used during replay. The production implementation is
/// the HTTP create-message endpoint; tests substitute a recorder.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &QueuedMessage) -> Result<()>;
}

/// Durable FIFO queue of not-yet-confirmed messages for one chat.
pub struct OfflineOutbox {
    chat_id: String,
    store: Arc<dyn OutboxStore>,
    queue: TokioMutex<Vec<QueuedMessage>>,
}

impl OfflineOutbox {
    /// Load the persisted queue for this chat. Called once, at view mount.
    pub fn load(chat_id: &str, store: Arc<dyn OutboxStore>) -> Self {
        let queue = match store.load(chat_id) {
            Ok(queue) => {
                if !queue.is_empty() {
                    info!("Loaded {} queued message(s) for chat {}", queue.len(), chat_id);
                }
                queue
            }
            Err(e) => {
                // Start empty rather than refusing to mount the chat view
                error!("Could not load outbox for chat {}: {}", chat_id, e);
                Vec::new()
            }
        };

        OfflineOutbox {
            chat_id: chat_id.to_string(),
            store,
            queue: TokioMutex::new(queue),
        }
    }

    /// Append a message and persist the full queue immediately. Messages
    /// without an enqueue timestamp are stamped here.
    pub async fn enqueue(&self, mut message: QueuedMessage) {
        if message.enqueued_at == 0 {
            message.enqueued_at = crate::utils::epoch_millis();
        }
        let mut queue = self.queue.lock().await;
        debug!("Queueing message {} for chat {}", message.id, self.chat_id);
        queue.push(message);
        self.persist(&queue);
    }

    /// Remove a message by id from the queue and from storage. A no-op when
    /// the id is not present.
    pub async fn dequeue(&self, message_id: &str) {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|m| m.id != message_id);
        if queue.len() != before {
            debug!("Dequeued message {} for chat {}", message_id, self.chat_id);
            self.persist(&queue);
        }
    }

    /// Attempt delivery of every queued TEXT message, oldest first.
    ///
    /// A message leaves the queue only on a confirmed accept; failures stay
    /// queued for the next replay trigger (the next connected transition).
    /// MEDIA messages are never replayed automatically: their binary payload
    /// is not captured durably by this queue.
    pub async fn replay<S: MessageSender + ?Sized>(&self, sender: &S) {
        let mut snapshot = self.queue.lock().await.clone();
        if snapshot.is_empty() {
            return;
        }
        snapshot.sort_by_key(|m| m.enqueued_at);
        info!(
            "Replaying {} queued message(s) for chat {}",
            snapshot.len(),
            self.chat_id
        );

        for message in &snapshot {
            if message.kind == MessageKind::Media {
                debug!(
                    "Skipping media message {} during replay (not auto-replayable)",
                    message.id
                );
                continue;
            }
            match sender.send(message).await {
                Ok(()) => self.dequeue(&message.id).await,
                Err(e) => {
                    warn!(
                        "Replay of message {} failed, keeping it queued: {}",
                        message.id, e
                    );
                }
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Current queue contents, for the UI's pending-message rendering.
    pub async fn messages(&self) -> Vec<QueuedMessage> {
        self.queue.lock().await.clone()
    }

    fn persist(&self, queue: &[QueuedMessage]) {
        if let Err(e) = self.store.save(&self.chat_id, queue) {
            // The in-memory queue still holds the message; the next
            // successful mutation rewrites the whole entry anyway
            error!("Could not persist outbox for chat {}: {}", self.chat_id, e);
        }
    }
}
