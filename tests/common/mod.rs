// Common test utilities for integration tests: a scripted mock transport,
// a recording backend send path, and a hand-driven realtime service.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use chatwire::chat::{
    Backend, LinkEvent, MessageSender, RealtimeService, Subscription, Transport, TransportError,
    TransportLink,
};
use chatwire::models::{QueuedMessage, RealtimeEvent};

/// Handle to a scripted link: tests push inbound events through `event_tx`
/// and observe what the connection manager wrote through `sent`.
#[derive(Clone)]
pub struct LinkHandle {
    pub event_tx: mpsc::UnboundedSender<LinkEvent>,
    pub sent: Arc<Mutex<Vec<String>>>,
    pub closed_normally: Arc<AtomicBool>,
}

impl LinkHandle {
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn was_closed_normally(&self) -> bool {
        self.closed_normally.load(Ordering::SeqCst)
    }
}

struct ScriptedLink {
    event_rx: mpsc::UnboundedReceiver<LinkEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_normally: Arc<AtomicBool>,
}

#[async_trait]
impl TransportLink for ScriptedLink {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        self.event_rx.recv().await
    }

    async fn close(&mut self) {
        self.closed_normally.store(true, Ordering::SeqCst);
    }
}

/// Transport whose `open` calls succeed in the order links were scripted
/// and are refused once the script runs out.
pub struct MockTransport {
    links: Mutex<VecDeque<ScriptedLink>>,
    pub open_attempts: AtomicUsize,
}

impl MockTransport {
    /// A transport with an empty script: every open is refused until links
    /// are scripted with [`MockTransport::expect_link`].
    pub fn new() -> Arc<Self> {
        Arc::new(MockTransport {
            links: Mutex::new(VecDeque::new()),
            open_attempts: AtomicUsize::new(0),
        })
    }

    /// Script one successful open and get the handle driving its link.
    pub fn expect_link(self: &Arc<Self>) -> LinkHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed_normally = Arc::new(AtomicBool::new(false));
        self.links.lock().unwrap().push_back(ScriptedLink {
            event_rx,
            sent: sent.clone(),
            closed_normally: closed_normally.clone(),
        });
        LinkHandle {
            event_tx,
            sent,
            closed_normally,
        }
    }

    pub fn opens(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &str) -> Result<Box<dyn TransportLink>, TransportError> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        match self.links.lock().unwrap().pop_front() {
            Some(link) => Ok(Box::new(link)),
            None => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}

/// Backend send path that records accepted messages, with a switch to make
/// every attempt fail.
pub struct RecordingBackend {
    pub accepted: Mutex<Vec<QueuedMessage>>,
    pub failing: AtomicBool,
    pub typing_reports: Mutex<Vec<(String, bool)>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingBackend {
            accepted: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            typing_reports: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn accepted_ids(&self) -> Vec<String> {
        self.accepted.lock().unwrap().iter().map(|m| m.id.clone()).collect()
    }
}

#[async_trait]
impl MessageSender for RecordingBackend {
    async fn send(&self, message: &QueuedMessage) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("backend unreachable");
        }
        self.accepted.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn report_typing(&self, chat_id: &str, is_typing: bool) -> anyhow::Result<()> {
        self.typing_reports
            .lock()
            .unwrap()
            .push((chat_id.to_string(), is_typing));
        Ok(())
    }
}

/// Realtime service driven by hand: tests push events through the sender
/// handed out per subscription and watch the unsubscribe flag.
pub struct MockRealtime {
    pub channels: Mutex<Vec<String>>,
    pub event_tx: Mutex<Option<mpsc::Sender<RealtimeEvent>>>,
    pub unsubscribed: Arc<AtomicBool>,
    /// When true the service acts uninitialized: subscriptions yield None
    pub uninitialized: AtomicBool,
}

impl MockRealtime {
    pub fn new() -> Arc<Self> {
        Arc::new(MockRealtime {
            channels: Mutex::new(Vec::new()),
            event_tx: Mutex::new(None),
            unsubscribed: Arc::new(AtomicBool::new(false)),
            uninitialized: AtomicBool::new(false),
        })
    }

    pub async fn emit(&self, event: &str, payload: serde_json::Value) {
        let sender = self.event_tx.lock().unwrap().clone();
        if let Some(sender) = sender {
            sender
                .send(RealtimeEvent {
                    event: event.to_string(),
                    payload,
                })
                .await
                .expect("subscription receiver dropped");
        }
    }

    pub fn was_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeService for MockRealtime {
    async fn subscribe(&self, channel: &str) -> Option<Subscription> {
        if self.uninitialized.load(Ordering::SeqCst) {
            return None;
        }
        self.channels.lock().unwrap().push(channel.to_string());
        let (sender, events) = mpsc::channel(64);
        *self.event_tx.lock().unwrap() = Some(sender);
        let unsubscribed = self.unsubscribed.clone();
        Some(Subscription::new(events, move || {
            unsubscribed.store(true, Ordering::SeqCst);
        }))
    }
}

/// A queued message with a fixed enqueue timestamp, for ordering tests.
pub fn queued_at(chat_id: &str, content: &str, enqueued_at: i64) -> QueuedMessage {
    let mut msg = QueuedMessage::text(chat_id, content);
    msg.enqueued_at = enqueued_at;
    msg
}
