// Realtime broadcast channel fan-in.
//
// Each mounted chat view holds exactly one subscription to its `chat:<id>`
// channel on the external realtime service. Events arrive independently of
// the primary transport; the two paths are eventually-consistent views of
// the same logical events and the UI deduplicates by message id.
//
// Own-typing broadcasts do not ride this channel: they go out over the plain
// HTTP typing endpoint (see `chat::api`), and the backend fans them out.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::models::RealtimeEvent;

/// Channel name for a chat, derived deterministically from its id.
pub fn chat_channel(chat_id: &str) -> String {
    format!("chat:{}", chat_id)
}

/// A live channel subscription. Events are read with [`Subscription::recv`];
/// dropping the subscription unsubscribes, which teardown relies on to stop
/// events firing into a dead view.
pub struct Subscription {
    events: mpsc::Receiver<RealtimeEvent>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Pair an event receiver with an unsubscribe hook that runs on drop.
    pub fn new(
        events: mpsc::Receiver<RealtimeEvent>,
        on_unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Subscription {
            events,
            unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// Capability interface over the external pub/sub service.
#[async_trait]
pub trait RealtimeService: Send + Sync {
    /// Subscribe to a channel. `None` means the service client is not
    /// initialized (no credentials); the caller gets no events and no error,
    /// matching how an unconfigured client behaves until remount.
    async fn subscribe(&self, channel: &str) -> Option<Subscription>;
}

enum Control {
    Subscribe {
        channel: String,
        id: u64,
        sender: mpsc::Sender<RealtimeEvent>,
    },
    Unsubscribe {
        channel: String,
        id: u64,
    },
}

/// Production realtime client: one websocket to the service, multiplexing
/// any number of named channels over it.
pub struct SocketRealtime {
    control: Option<mpsc::UnboundedSender<Control>>,
    next_id: Arc<AtomicU64>,
}

impl SocketRealtime {
    /// An absent API key yields an uninitialized client whose subscriptions
    /// are permanent no-ops, logged once per attempt.
    pub fn new(url: &str, api_key: Option<&str>) -> Self {
        let control = match api_key {
            Some(key) => {
                let (control_tx, control_rx) = mpsc::unbounded_channel();
                let url = url.to_string();
                let key = key.to_string();
                tokio::spawn(run_worker(url, key, control_rx));
                Some(control_tx)
            }
            None => {
                warn!("Realtime service has no API key; subscriptions will be no-ops");
                None
            }
        };
        SocketRealtime {
            control,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

#[async_trait]
impl RealtimeService for SocketRealtime {
    async fn subscribe(&self, channel: &str) -> Option<Subscription> {
        let control = match &self.control {
            Some(control) => control.clone(),
            None => {
                warn!("Ignoring subscribe to {}: realtime client not initialized", channel);
                return None;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::channel(64);
        control
            .send(Control::Subscribe {
                channel: channel.to_string(),
                id,
                sender,
            })
            .ok()?;

        let channel = channel.to_string();
        Some(Subscription::new(events, move || {
            let _ = control.send(Control::Unsubscribe { channel, id });
        }))
    }
}

/// Wire envelope from the realtime service: `{channel, event, payload}`.
#[derive(Deserialize)]
struct ChannelEnvelope {
    channel: String,
    event: String,
    payload: serde_json::Value,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Registry = HashMap<String, Vec<(u64, mpsc::Sender<RealtimeEvent>)>>;

enum Step {
    Control(Option<Control>),
    Socket(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

async fn run_worker(url: String, key: String, mut control_rx: mpsc::UnboundedReceiver<Control>) {
    let mut registry: Registry = HashMap::new();
    let mut socket: Option<Socket> = None;

    loop {
        let step = match socket.as_mut() {
            Some(ws) => tokio::select! {
                control = control_rx.recv() => Step::Control(control),
                message = ws.next() => Step::Socket(message),
            },
            None => Step::Control(control_rx.recv().await),
        };

        match step {
            Step::Control(Some(control)) => {
                handle_control(control, &mut registry, &mut socket).await;
                // Connect lazily, and re-announce channels after a drop
                if socket.is_none() && !registry.is_empty() {
                    socket = open_socket(&url, &key, &registry).await;
                }
            }
            Step::Control(None) => {
                // Service handle dropped; close the socket and stop
                if let Some(mut ws) = socket.take() {
                    let _ = ws.close(None).await;
                }
                return;
            }
            Step::Socket(message) => match message {
                Some(Ok(Message::Text(text))) => dispatch(&text, &mut registry),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    warn!("Realtime socket closed by the service");
                    socket = None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Realtime socket failed: {}", e);
                    socket = None;
                }
            },
        }
    }
}

async fn handle_control(control: Control, registry: &mut Registry, socket: &mut Option<Socket>) {
    match control {
        Control::Subscribe { channel, id, sender } => {
            debug!("Subscribing to realtime channel {}", channel);
            let fresh = !registry.contains_key(&channel);
            registry.entry(channel.clone()).or_default().push((id, sender));
            if fresh {
                if let Some(ws) = socket.as_mut() {
                    let frame = serde_json::json!({"event": "subscribe", "channel": channel});
                    if let Err(e) = ws.send(Message::Text(frame.to_string())).await {
                        warn!("Could not announce channel {}: {}", channel, e);
                        *socket = None;
                    }
                }
            }
        }
        Control::Unsubscribe { channel, id } => {
            if let Some(entries) = registry.get_mut(&channel) {
                entries.retain(|(entry_id, _)| *entry_id != id);
                if entries.is_empty() {
                    registry.remove(&channel);
                    debug!("Unsubscribed from realtime channel {}", channel);
                    if let Some(ws) = socket.as_mut() {
                        let frame = serde_json::json!({"event": "unsubscribe", "channel": channel});
                        let _ = ws.send(Message::Text(frame.to_string())).await;
                    }
                }
            }
        }
    }
}

async fn open_socket(url: &str, key: &str, registry: &Registry) -> Option<Socket> {
    let separator = if url.contains('?') { '&' } else { '?' };
    let full_url = format!("{}{}apikey={}", url, separator, key);
    match connect_async(&full_url).await {
        Ok((mut ws, _response)) => {
            info!("Connected to realtime service");
            for channel in registry.keys() {
                let frame = serde_json::json!({"event": "subscribe", "channel": channel});
                if let Err(e) = ws.send(Message::Text(frame.to_string())).await {
                    warn!("Could not announce channel {}: {}", channel, e);
                    return None;
                }
            }
            Some(ws)
        }
        Err(e) => {
            warn!("Could not reach realtime service: {}", e);
            None
        }
    }
}

fn dispatch(text: &str, registry: &mut Registry) {
    let envelope: ChannelEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            // The backend is trusted but a malformed broadcast should not
            // take the worker down
            warn!("Dropping malformed realtime event: {}", e);
            return;
        }
    };

    if let Some(entries) = registry.get_mut(&envelope.channel) {
        entries.retain(|(_, sender)| {
            let event = RealtimeEvent {
                event: envelope.event.clone(),
                payload: envelope.payload.clone(),
            };
            match sender.try_send(event) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Realtime subscriber lagging on {}", envelope.channel);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}
