// Durable storage for the offline outbox.
//
// The outbox is the only writer of its chat's entry; each chat id maps to one
// stored queue, read once when the chat view mounts and rewritten in full on
// every mutation. The repository trait lets tests swap the file store for an
// in-memory one.

use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

use crate::credentials::get_config_dir;
use crate::models::QueuedMessage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Repository for per-chat offline queues.
pub trait OutboxStore: Send + Sync {
    /// Load the queue for a chat. A chat with no stored entry yields an
    /// empty queue, not an error.
    fn load(&self, chat_id: &str) -> Result<Vec<QueuedMessage>, StoreError>;

    /// Replace the stored queue for a chat with the given one.
    fn save(&self, chat_id: &str, queue: &[QueuedMessage]) -> Result<(), StoreError>;
}

/// File-backed store: one JSON file per chat id under the config directory.
pub struct FileOutboxStore {
    dir: PathBuf,
}

impl FileOutboxStore {
    pub fn new(dir: PathBuf) -> Self {
        FileOutboxStore { dir }
    }

    /// Store rooted at the default config directory.
    pub fn default_location() -> Result<Self, StoreError> {
        let mut dir = get_config_dir().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        dir.push("outbox");
        Ok(FileOutboxStore { dir })
    }

    fn path_for(&self, chat_id: &str) -> PathBuf {
        // Chat ids come from the backend; keep the filename safe anyway
        let safe: String = chat_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl OutboxStore for FileOutboxStore {
    fn load(&self, chat_id: &str) -> Result<Vec<QueuedMessage>, StoreError> {
        let path = self.path_for(chat_id);
        if !path.exists() {
            debug!("No stored outbox for chat {}", chat_id);
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;
        let queue = serde_json::from_str(&contents)?;
        Ok(queue)
    }

    fn save(&self, chat_id: &str, queue: &[QueuedMessage]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(chat_id);
        fs::write(&path, serde_json::to_string(queue)?)?;
        debug!("Persisted {} queued message(s) for chat {}", queue.len(), chat_id);
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
pub struct MemoryOutboxStore {
    entries: Mutex<HashMap<String, Vec<QueuedMessage>>>,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        MemoryOutboxStore {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxStore for MemoryOutboxStore {
    fn load(&self, chat_id: &str) -> Result<Vec<QueuedMessage>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        Ok(entries.get(chat_id).cloned().unwrap_or_default())
    }

    fn save(&self, chat_id: &str, queue: &[QueuedMessage]) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        entries.insert(chat_id.to_string(), queue.to_vec());
        Ok(())
    }
}
