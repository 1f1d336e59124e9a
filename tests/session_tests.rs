// End-to-end session behavior: enqueue-first sends, replay on reconnect,
// realtime fan-in, and the four teardown obligations.

mod common;
use common::{queued_at, MockRealtime, MockTransport, RecordingBackend};

use std::sync::Arc;
use std::time::Duration;
use serde_json::json;
use tokio::time::sleep;

use chatwire::chat::{ChatSession, SessionDeps};
use chatwire::models::ConnectionStatus;
use chatwire::storage::{MemoryOutboxStore, OutboxStore};

struct TestRig {
    transport: Arc<MockTransport>,
    realtime: Arc<MockRealtime>,
    store: Arc<MemoryOutboxStore>,
    backend: Arc<RecordingBackend>,
}

impl TestRig {
    fn new() -> Self {
        TestRig {
            transport: MockTransport::new(),
            realtime: MockRealtime::new(),
            store: Arc::new(MemoryOutboxStore::new()),
            backend: RecordingBackend::new(),
        }
    }

    fn deps(&self, token: Option<&str>) -> SessionDeps {
        SessionDeps {
            websocket_url: "wss://chat.test/ws".to_string(),
            token: token.map(|t| t.to_string()),
            transport: self.transport.clone(),
            realtime: self.realtime.clone(),
            store: self.store.clone(),
            backend: self.backend.clone(),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn offline_send_stays_queued_with_no_error() {
    let rig = TestRig::new();
    // No token: the session mounts but never connects
    let (session, _events) = ChatSession::mount("chat-1", rig.deps(None)).await;
    sleep(Duration::from_millis(10)).await;

    let msg = session.send_message("composed offline", None).await;

    let pending = session.pending_messages().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, msg.id);
    // Persisted immediately, not just held in memory
    assert_eq!(rig.store.load("chat-1").unwrap().len(), 1);
    assert_eq!(rig.transport.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn connected_send_is_dequeued_after_transport_accept() {
    let rig = TestRig::new();
    let link = rig.transport.expect_link();
    let (session, _events) = ChatSession::mount("chat-1", rig.deps(Some("token"))).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        session.connection_state().await.status,
        ConnectionStatus::Connected
    );

    let msg = session.send_message("hello", None).await;
    sleep(Duration::from_millis(10)).await;

    assert!(session.pending_messages().await.is_empty());
    let frames = link.sent_frames();
    assert!(frames.iter().any(|f| f.contains(&msg.id)));
}

#[tokio::test(start_paused = true)]
async fn replies_carry_the_parent_reference() {
    let rig = TestRig::new();
    let (session, _events) = ChatSession::mount("chat-1", rig.deps(None)).await;

    let msg = session.send_message("replying", Some("parent-42")).await;
    assert_eq!(msg.parent_id.as_deref(), Some("parent-42"));
}

#[tokio::test(start_paused = true)]
async fn queued_messages_replay_in_order_on_connect() {
    let rig = TestRig::new();
    // Three messages composed in an earlier, offline session
    let a = queued_at("chat-1", "first", 1_000);
    let b = queued_at("chat-1", "second", 2_000);
    let c = queued_at("chat-1", "third", 3_000);
    rig.store
        .save("chat-1", &[c.clone(), a.clone(), b.clone()])
        .unwrap();

    let _link = rig.transport.expect_link();
    let (session, _events) = ChatSession::mount("chat-1", rig.deps(Some("token"))).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(rig.backend.accepted_ids(), vec![a.id, b.id, c.id]);
    assert!(session.pending_messages().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn realtime_typing_events_feed_the_tracker_and_the_ui() {
    let rig = TestRig::new();
    let (session, mut events) = ChatSession::mount("chat-1", rig.deps(None)).await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        rig.realtime.channels.lock().unwrap().as_slice(),
        ["chat:chat-1"]
    );

    rig.realtime
        .emit(
            "typing",
            json!({"user_id": "u1", "name": "Ada", "is_typing": true}),
        )
        .await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(session.typing_summary().await.unwrap(), "Ada is typing...");
    let forwarded = events.realtime.recv().await.unwrap();
    assert_eq!(forwarded.event, "typing");

    rig.realtime
        .emit(
            "typing",
            json!({"user_id": "u1", "name": "Ada", "is_typing": false}),
        )
        .await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(session.typing_summary().await, None);
}

#[tokio::test(start_paused = true)]
async fn non_typing_realtime_events_are_forwarded_untouched() {
    let rig = TestRig::new();
    let (session, mut events) = ChatSession::mount("chat-1", rig.deps(None)).await;
    sleep(Duration::from_millis(10)).await;

    rig.realtime
        .emit("message", json!({"id": "m1", "content": "hi"}))
        .await;
    let forwarded = events.realtime.recv().await.unwrap();
    assert_eq!(forwarded.event, "message");
    assert_eq!(forwarded.payload["id"], "m1");
    assert!(session.typing_users().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn own_typing_goes_out_over_transport_and_http() {
    let rig = TestRig::new();
    let link = rig.transport.expect_link();
    let (session, _events) = ChatSession::mount("chat-1", rig.deps(Some("token"))).await;
    sleep(Duration::from_millis(10)).await;

    session.set_typing(true).await;
    sleep(Duration::from_millis(10)).await;

    assert!(link.sent_frames().iter().any(|f| f.contains("TYPING")));
    assert_eq!(
        rig.backend.typing_reports.lock().unwrap().as_slice(),
        [("chat-1".to_string(), true)]
    );
    // Self is never shown in the local typing set
    assert!(session.typing_users().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn teardown_performs_all_four_cleanup_steps() {
    let rig = TestRig::new();
    let link = rig.transport.expect_link();
    let (mut session, _events) = ChatSession::mount("chat-1", rig.deps(Some("token"))).await;
    sleep(Duration::from_millis(10)).await;

    rig.realtime
        .emit(
            "typing",
            json!({"user_id": "u1", "name": "Ada", "is_typing": true}),
        )
        .await;
    sleep(Duration::from_millis(10)).await;
    assert!(!session.typing_users().await.is_empty());

    session.shutdown().await;
    sleep(Duration::from_millis(10)).await;

    // (a) transport closed with a normal-closure code
    assert!(link.was_closed_normally());
    // (b) no reconnect fires after teardown
    sleep(Duration::from_secs(120)).await;
    assert_eq!(rig.transport.opens(), 1);
    assert_eq!(
        session.connection_state().await.status,
        ConnectionStatus::Disconnected
    );
    // (c) the realtime channel was unsubscribed
    assert!(rig.realtime.was_unsubscribed());
    // (d) the typing set is empty
    assert!(session.typing_users().await.is_empty());

    // Teardown is idempotent
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn uninitialized_realtime_service_is_a_quiet_noop() {
    let rig = TestRig::new();
    rig.realtime
        .uninitialized
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let (session, _events) = ChatSession::mount("chat-1", rig.deps(None)).await;
    sleep(Duration::from_millis(10)).await;

    // No subscription exists; the session still works for sends
    assert!(rig.realtime.channels.lock().unwrap().is_empty());
    session.send_message("still fine", None).await;
    assert_eq!(session.pending_messages().await.len(), 1);
}
