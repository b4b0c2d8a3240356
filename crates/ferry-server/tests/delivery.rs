//! End-to-end delivery semantics, driven through the router against the
//! in-process cluster backend and an in-memory SQLite history store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use ferry_cluster::{KvStore, MemoryStore, MessageBus, Registry};
use ferry_proto::constants::OUTBOUND_QUEUE_SIZE;
use ferry_proto::{Message, MessageStatus, MessageType, Transport};
use ferry_server::{Router, SessionHandle, SessionTable};
use ferry_store::{Database, HistoryStore, SqliteStore};

const WAIT: Duration = Duration::from_secs(2);

/// A delivery-plane node sharing the cluster backend and history store
/// with its peers, with its cross-node subscriber running.
async fn make_node(kv: Arc<dyn KvStore>, store: Arc<SqliteStore>, node_id: &str) -> Arc<Router> {
    let registry = Arc::new(Registry::new(
        kv.clone(),
        node_id,
        format!("{node_id}.internal:7000"),
    ));
    let bus = Arc::new(MessageBus::new(kv));
    let bus_rx = bus.subscribe(node_id).await.unwrap();

    let router = Arc::new(Router::new(
        node_id,
        Arc::new(SessionTable::new()),
        registry,
        bus,
        store.clone(),
        store.clone(),
        store,
    ));
    router.clone().spawn_bus_subscriber(bus_rx);
    router
}

fn shared_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new(Database::open_in_memory().unwrap()))
}

async fn single_node() -> (Arc<Router>, Arc<SqliteStore>) {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let store = shared_store();
    let router = make_node(kv, store.clone(), "node-1").await;
    (router, store)
}

async fn attach(
    router: &Arc<Router>,
    user: &str,
    transport: Transport,
) -> (SessionHandle, mpsc::Receiver<Message>) {
    let (handle, rx) = SessionHandle::new(user, transport, router.clone());
    router.clone().register_session(&handle).await;
    (handle, rx)
}

fn chat(id: &str, from: &str, to: &str, content: &str, ts: i64) -> Message {
    let mut msg = Message::text(from, to, content);
    msg.id = id.into();
    msg.timestamp = ts;
    msg.conversation_id = format!("conv-{from}-{to}");
    msg
}

async fn expect_message(rx: &mut mpsc::Receiver<Message>) -> Message {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("session queue closed")
}

/// Poll the store until the message reaches the wanted status.
async fn await_status(store: &SqliteStore, id: &str, wanted: MessageStatus) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Ok(status) = store.message_status(id).await {
            if status == wanted {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "message {id} never reached {wanted:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn local_delivery_between_two_online_users() {
    let (router, store) = single_node().await;
    let (_a, _rx_a) = attach(&router, "u1", Transport::WsJson).await;
    let (_b, mut rx_b) = attach(&router, "u2", Transport::WsJson).await;

    router
        .route(chat("m1", "u1", "u2", "hi", 1_700_000_000))
        .await
        .unwrap();

    let received = expect_message(&mut rx_b).await;
    assert_eq!(received.content, "hi");
    assert_eq!(received.sender, "u1");
    assert_eq!(store.message_status("m1").await.unwrap(), MessageStatus::Sent);
}

#[tokio::test]
async fn offline_recipient_gets_replay_on_attach() {
    let (router, store) = single_node().await;
    let (_a, _rx_a) = attach(&router, "u1", Transport::WsJson).await;

    router
        .route(chat("m1", "u1", "u2", "later", 1_700_000_000))
        .await
        .unwrap();
    assert_eq!(
        store.message_status("m1").await.unwrap(),
        MessageStatus::Unsent
    );

    // u2 attaches afterwards; the queued message replays and flips to sent.
    let (_b, mut rx_b) = attach(&router, "u2", Transport::WsJson).await;
    let received = expect_message(&mut rx_b).await;
    assert_eq!(received.content, "later");
    await_status(&store, "m1", MessageStatus::Sent).await;
}

#[tokio::test]
async fn offline_replay_preserves_timestamp_order() {
    let (router, store) = single_node().await;
    let (_a, _rx_a) = attach(&router, "u1", Transport::WsJson).await;

    for (id, ts) in [("m-late", 300), ("m-early", 100), ("m-mid", 200)] {
        router.route(chat(id, "u1", "u2", id, ts)).await.unwrap();
    }

    let (_b, mut rx_b) = attach(&router, "u2", Transport::WsJson).await;
    let first = expect_message(&mut rx_b).await;
    let second = expect_message(&mut rx_b).await;
    let third = expect_message(&mut rx_b).await;
    assert_eq!(
        [first.id.as_str(), second.id.as_str(), third.id.as_str()],
        ["m-early", "m-mid", "m-late"]
    );
    await_status(&store, "m-late", MessageStatus::Sent).await;
}

#[tokio::test]
async fn cross_node_delivery() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let store = shared_store();
    let node1 = make_node(kv.clone(), store.clone(), "node-1").await;
    let node2 = make_node(kv, store.clone(), "node-2").await;

    let (_a, _rx_a) = attach(&node1, "u1", Transport::WsJson).await;
    let (_b, mut rx_b) = attach(&node2, "u2", Transport::WsJson).await;

    node1
        .route(chat("m1", "u1", "u2", "across the wire", 1))
        .await
        .unwrap();

    let received = expect_message(&mut rx_b).await;
    assert_eq!(received.content, "across the wire");
    assert_eq!(received.sender, "u1");
}

#[tokio::test]
async fn stale_registry_entry_diverts_to_offline_store() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let store = shared_store();
    let node1 = make_node(kv.clone(), store.clone(), "node-1").await;

    // node-2 registered u2 and then died: the entry is live but nothing
    // subscribes to its channel.
    let dead_registry = Registry::new(kv, "node-2", "node-2.internal:7000");
    dead_registry
        .register("u2", Transport::WsJson, 1)
        .await
        .unwrap();

    let (_a, _rx_a) = attach(&node1, "u1", Transport::WsJson).await;
    node1
        .route(chat("m1", "u1", "u2", "into the void", 1))
        .await
        .unwrap();

    assert_eq!(
        store.message_status("m1").await.unwrap(),
        MessageStatus::Unsent
    );
}

#[tokio::test]
async fn binary_session_evicts_json_and_takes_over_delivery() {
    let (router, _store) = single_node().await;
    let (json_handle, mut rx_json) = attach(&router, "u1", Transport::WsJson).await;

    let (_bin_handle, mut rx_bin) = attach(&router, "u1", Transport::WsBinary).await;

    // The JSON session is closed by arbitration.
    assert!(json_handle.is_closed());

    router
        .route(chat("m1", "u9", "u1", "mobile wins", 1))
        .await
        .unwrap();
    let received = expect_message(&mut rx_bin).await;
    assert_eq!(received.content, "mobile wins");
    assert!(timeout(Duration::from_millis(100), rx_json.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn buffer_full_falls_through_to_second_session() {
    let (router, _store) = single_node().await;
    let (full_handle, _rx_full) = attach(&router, "u2", Transport::TcpBinary).await;
    let (_second, mut rx_second) = attach(&router, "u2", Transport::WsJson).await;

    // Saturate the higher-priority session's queue.
    for i in 0..OUTBOUND_QUEUE_SIZE {
        full_handle
            .send(Message::text("x", "u2", format!("fill-{i}")))
            .unwrap();
    }

    router
        .route(chat("m1", "u1", "u2", "overflow path", 1))
        .await
        .unwrap();
    let received = expect_message(&mut rx_second).await;
    assert_eq!(received.content, "overflow path");
}

#[tokio::test]
async fn buffer_full_on_only_session_goes_offline() {
    let (router, store) = single_node().await;
    let (handle, _rx) = attach(&router, "u2", Transport::WsJson).await;

    for i in 0..OUTBOUND_QUEUE_SIZE {
        handle
            .send(Message::text("x", "u2", format!("fill-{i}")))
            .unwrap();
    }

    router
        .route(chat("m1", "u1", "u2", "no room", 1))
        .await
        .unwrap();
    assert_eq!(
        store.message_status("m1").await.unwrap(),
        MessageStatus::Unsent
    );
}

#[tokio::test]
async fn closed_session_is_unregistered_during_routing() {
    let (router, store) = single_node().await;
    let (handle, _rx) = attach(&router, "u2", Transport::WsJson).await;

    handle.close();
    router
        .route(chat("m1", "u1", "u2", "too late", 1))
        .await
        .unwrap();

    assert_eq!(
        store.message_status("m1").await.unwrap(),
        MessageStatus::Unsent
    );
    assert!(!router.table().contains("u2"));
}

#[tokio::test]
async fn per_sender_messages_arrive_in_order() {
    let (router, _store) = single_node().await;
    let (_b, mut rx_b) = attach(&router, "u2", Transport::WsJson).await;

    for i in 0..20 {
        router
            .route(chat(&format!("m{i}"), "u1", "u2", &format!("c{i}"), 100 + i))
            .await
            .unwrap();
    }

    for i in 0..20 {
        let received = expect_message(&mut rx_b).await;
        assert_eq!(received.id, format!("m{i}"));
    }
}

#[tokio::test]
async fn route_is_idempotent_on_message_id() {
    let (router, store) = single_node().await;

    let msg = chat("m1", "u1", "u2", "once only", 1);
    router.route(msg.clone()).await.unwrap();
    router.route(msg).await.unwrap();

    assert_eq!(store.message_count().await.unwrap(), 1);
}

#[tokio::test]
async fn group_message_fans_out_to_members_except_sender() {
    let (router, store) = single_node().await;
    for member in ["u1", "u2", "u3"] {
        store.add_group_member("g1", member).await.unwrap();
    }

    let (_a, mut rx_a) = attach(&router, "u1", Transport::WsJson).await;
    let (_b, mut rx_b) = attach(&router, "u2", Transport::WsJson).await;
    // u3 stays offline.

    let mut msg = Message::text("u1", "", "team update");
    msg.id = "gm1".into();
    msg.is_group = true;
    msg.group_id = "g1".into();
    msg.timestamp = 1;
    router.route(msg).await.unwrap();

    let received = expect_message(&mut rx_b).await;
    assert_eq!(received.content, "team update");
    assert!(received.is_group);

    // The sender does not receive their own group message.
    assert!(timeout(Duration::from_millis(100), rx_a.recv()).await.is_err());

    // u3's copy landed in the offline queue.
    let pending = store.load_offline_for("u3").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].content, "team update");
}

#[tokio::test]
async fn bus_messages_already_handled_are_ignored() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let store = shared_store();
    let node1 = make_node(kv.clone(), store.clone(), "node-1").await;
    let bus = MessageBus::new(kv);

    let (_b, mut rx_b) = attach(&node1, "u2", Transport::WsJson).await;

    // A stale republish: the flag says some node already delivered it.
    let mut stale = chat("m-stale", "u1", "u2", "duplicate", 1);
    stale.handled_by_local = true;
    bus.publish_to_node("node-1", &stale).await.unwrap();

    let mut fresh = chat("m-fresh", "u1", "u2", "first copy", 2);
    fresh.handled_by_local = false;
    bus.publish_to_node("node-1", &fresh).await.unwrap();

    let received = expect_message(&mut rx_b).await;
    assert_eq!(received.id, "m-fresh");
    assert!(timeout(Duration::from_millis(100), rx_b.recv()).await.is_err());
}

#[tokio::test]
async fn bus_message_for_departed_user_goes_offline_not_republished() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let store = shared_store();
    let _node1 = make_node(kv.clone(), store.clone(), "node-1").await;
    let bus = MessageBus::new(kv);

    // Addressed to node-1, but u2 has no session there (moved on).
    let msg = chat("m1", "u1", "u2", "wrong stop", 1);
    bus.publish_to_node("node-1", &msg).await.unwrap();

    await_status(&store, "m1", MessageStatus::Unsent).await;
}

#[tokio::test]
async fn presence_changes_reach_friends() {
    let (router, store) = single_node().await;
    store.add_friend("u1", "u2").await.unwrap();

    let (_b, mut rx_b) = attach(&router, "u2", Transport::WsJson).await;

    let (a_handle, _rx_a) = attach(&router, "u1", Transport::WsJson).await;
    let online = expect_message(&mut rx_b).await;
    assert_eq!(online.kind, MessageType::Status);
    assert_eq!(online.sender, "u1");
    assert_eq!(online.content, "online");

    router
        .unregister_session(a_handle.user(), a_handle.session_id())
        .await;
    let offline = expect_message(&mut rx_b).await;
    assert_eq!(offline.kind, MessageType::Status);
    assert_eq!(offline.content, "offline");

    // Presence is never persisted.
    assert_eq!(store.message_count().await.unwrap(), 0);
}

#[tokio::test]
async fn message_without_destination_is_rejected() {
    let (router, store) = single_node().await;

    let mut msg = Message::text("u1", "", "to nobody");
    msg.id = "m1".into();
    let err = router.route(msg).await.unwrap_err();
    assert!(err.to_string().contains("recipient"));
    assert_eq!(store.message_count().await.unwrap(), 0);
}

#[tokio::test]
async fn registry_reflects_session_lifecycle() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let store = shared_store();
    let router = make_node(kv.clone(), store, "node-1").await;
    let observer = Registry::new(kv, "observer", "observer:0");

    let (handle, _rx) = attach(&router, "u1", Transport::TcpBinary).await;
    let entry = observer.lookup("u1").await.unwrap().unwrap();
    assert_eq!(entry.node_id, "node-1");
    assert_eq!(entry.transport, Transport::TcpBinary);

    router
        .unregister_session(handle.user(), handle.session_id())
        .await;
    assert!(observer.lookup("u1").await.unwrap().is_none());
}
