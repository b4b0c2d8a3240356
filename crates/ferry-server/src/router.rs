//! The central dispatcher.
//!
//! `route` walks the delivery decision tree for every accepted message:
//! local session first, then the owning remote node via the cross-node
//! bus, then the offline store. At-least-once delivery hangs off step 3
//! being the fallback for everything. Cross-node messages make at most one
//! hop: the receiving node either delivers locally or parks the message
//! offline, never re-publishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ferry_cluster::{MessageBus, Registry};
use ferry_proto::constants::HEARTBEAT_PERIOD_SECS;
use ferry_proto::{codec, Message};
use ferry_store::{FriendStore, GroupStore, HistoryStore};

use crate::error::{RouteError, SessionError};
use crate::offline::OfflineStore;
use crate::session::{MessageRouter, SessionHandle};
use crate::table::SessionTable;

pub struct Router {
    node_id: String,
    table: Arc<SessionTable>,
    registry: Arc<Registry>,
    bus: Arc<MessageBus>,
    offline: OfflineStore,
    history: Arc<dyn HistoryStore>,
    groups: Arc<dyn GroupStore>,
    friends: Arc<dyn FriendStore>,
    shutdown: CancellationToken,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        table: Arc<SessionTable>,
        registry: Arc<Registry>,
        bus: Arc<MessageBus>,
        history: Arc<dyn HistoryStore>,
        groups: Arc<dyn GroupStore>,
        friends: Arc<dyn FriendStore>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            table,
            registry,
            bus,
            offline: OfflineStore::new(history.clone()),
            history,
            groups,
            friends,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    /// Accept an outbound message. Returns once the message is queued for
    /// a local session, published to the owning remote node, or persisted
    /// offline. Offline-store failures surface to the caller; registry and
    /// bus outages degrade to the offline path silently.
    pub async fn route(&self, mut msg: Message) -> Result<(), RouteError> {
        if msg.sender.is_empty() {
            return Err(RouteError::MissingSender);
        }
        msg.ensure_id();
        msg.ensure_timestamp(Utc::now().timestamp());

        if msg.is_group && !msg.group_id.is_empty() {
            return self.route_group(msg).await;
        }
        if msg.recipient.is_empty() {
            return Err(RouteError::MissingDestination);
        }

        // History first, before any network action.
        if !msg.is_control() {
            self.history.save_message(&msg).await?;
        }

        self.deliver(msg).await
    }

    /// Fan a group message out to every member except the sender, each copy
    /// walking the same decision tree under its own id.
    async fn route_group(&self, msg: Message) -> Result<(), RouteError> {
        if !msg.is_control() {
            self.history.save_message(&msg).await?;
        }

        let members = self.groups.members_of(&msg.group_id).await?;
        debug!(group = %msg.group_id, members = members.len(), "fanning out group message");

        let mut first_failure = None;
        for member in members {
            if member == msg.sender {
                continue;
            }
            let mut copy = msg.clone();
            copy.id = Uuid::new_v4().to_string();
            copy.recipient = member;
            if let Err(err) = self.deliver(copy).await {
                warn!(group = %msg.group_id, %err, "group member delivery failed");
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Steps 1-3 of the decision tree for a message with a recipient.
    async fn deliver(&self, mut msg: Message) -> Result<(), RouteError> {
        // Step 1: a session on this node.
        if self.deliver_local(&mut msg).await {
            return Ok(());
        }

        // Step 2: the owning remote node.
        match self.registry.lookup(&msg.recipient).await {
            Ok(Some(entry)) if entry.node_id != self.node_id => {
                // Losing side of a register race: our table may still hold
                // sessions for a user another node now owns. Evict them.
                if self.table.contains(&msg.recipient) {
                    info!(
                        user = %msg.recipient,
                        owner = %entry.node_id,
                        "user re-registered on another node, evicting stale sessions"
                    );
                    for session in self.table.sessions_for(&msg.recipient) {
                        self.unregister_session(&msg.recipient, session.session_id())
                            .await;
                    }
                }

                let mut remote = msg.clone();
                remote.handled_by_local = false;
                match self.bus.publish_to_node(&entry.node_id, &remote).await {
                    Ok(receivers) if receivers > 0 => return Ok(()),
                    Ok(_) => {
                        debug!(node = %entry.node_id, "no subscriber on remote channel");
                    }
                    Err(err) => {
                        warn!(%err, "bus publish failed, diverting to offline store");
                    }
                }
            }
            Ok(Some(_)) => {
                // Registry says the user is here, but step 1 found nothing
                // deliverable. Stale entry; fall through.
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%err, "registry unavailable, skipping cross-node routing");
            }
        }

        // Step 3: the offline store. Control messages are never persisted;
        // an undeliverable one is simply dropped.
        if msg.is_control() {
            debug!(recipient = %msg.recipient, kind = ?msg.kind, "undeliverable control message dropped");
            return Ok(());
        }
        self.offline.queue(&msg).await
    }

    /// Try every local session for the recipient in transport priority
    /// order. `BufferFull` moves to the next candidate; `Closed` unregisters
    /// the dead session and moves on.
    async fn deliver_local(&self, msg: &mut Message) -> bool {
        let sessions = self.table.sessions_for(&msg.recipient);
        if sessions.is_empty() {
            return false;
        }

        for session in sessions {
            let mut copy = msg.clone();
            copy.handled_by_local = true;
            match session.send(copy) {
                Ok(()) => {
                    debug!(
                        recipient = %msg.recipient,
                        transport = %session.transport(),
                        msg_id = %msg.id,
                        "delivered locally"
                    );
                    msg.handled_by_local = true;
                    return true;
                }
                Err(SessionError::BufferFull) => {
                    debug!(
                        recipient = %msg.recipient,
                        transport = %session.transport(),
                        "outbound queue full, trying next session"
                    );
                }
                Err(SessionError::Closed) => {
                    self.unregister_session(msg.recipient.as_str(), session.session_id())
                        .await;
                }
            }
        }
        false
    }

    /// Register a freshly authenticated session: arbitration in the table,
    /// best-effort registry claim, presence fan-out, async offline replay.
    pub async fn register_session(self: Arc<Self>, handle: &SessionHandle) {
        let evicted = self.table.register(handle.clone());
        for old in evicted {
            info!(
                user = %old.user(),
                session_id = %old.session_id(),
                "closing JSON session evicted by binary transport"
            );
            old.close();
        }

        if let Err(err) = self
            .registry
            .register(handle.user(), handle.transport(), Utc::now().timestamp())
            .await
        {
            warn!(user = %handle.user(), %err, "registry register failed, continuing degraded");
        }

        self.broadcast_presence(handle.user(), true).await;

        let router = Arc::clone(&self);
        let user = handle.user().to_string();
        tokio::spawn(async move {
            router.replay_offline(&user).await;
        });
    }

    /// Remove one session. The last session for a user also releases the
    /// registry claim and flips presence to offline.
    pub async fn unregister_session(&self, user: &str, session_id: &str) {
        let outcome = self.table.unregister(user, session_id);
        if let Some(session) = outcome.session {
            session.close();
        }
        if outcome.last_for_user {
            if let Err(err) = self.registry.unregister(user).await {
                warn!(user, %err, "registry unregister failed");
            }
            self.broadcast_presence(user, false).await;
        }
    }

    /// Replay the offline queue into step-1 delivery after a reconnect.
    pub async fn replay_offline(&self, user: &str) {
        let pending = match self.offline.replay_for(user).await {
            Ok(pending) => pending,
            Err(err) => {
                error!(user, %err, "offline replay load failed");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let mut delivered = Vec::new();
        for mut msg in pending {
            if self.deliver_local(&mut msg).await {
                delivered.push(msg.id);
            }
        }

        if delivered.is_empty() {
            return;
        }
        let count = delivered.len();
        match self.offline.mark_delivered(&delivered).await {
            Ok(()) => info!(user, count, "replayed offline messages"),
            Err(err) => error!(user, %err, "failed to mark replayed messages delivered"),
        }
    }

    /// Fan a user's presence change out to their friends as `status`
    /// messages. Best-effort: absent friends are skipped, never queued.
    pub async fn broadcast_presence(&self, user: &str, online: bool) {
        let friends = match self.friends.friends_of(user).await {
            Ok(friends) => friends,
            Err(err) => {
                warn!(user, %err, "friend lookup failed, skipping presence broadcast");
                return;
            }
        };

        let now = Utc::now().timestamp();
        for friend in friends {
            let update = Message::presence(user, &friend, online, now);
            self.deliver_presence(update).await;
        }
    }

    /// A client-originated `status` message, forwarded to friends verbatim.
    pub async fn broadcast_status(&self, msg: &Message) {
        let friends = match self.friends.friends_of(&msg.sender).await {
            Ok(friends) => friends,
            Err(err) => {
                warn!(user = %msg.sender, %err, "friend lookup failed, dropping status");
                return;
            }
        };

        for friend in friends {
            let mut copy = msg.clone();
            copy.id = Uuid::new_v4().to_string();
            copy.recipient = friend;
            self.deliver_presence(copy).await;
        }
    }

    /// Best-effort delivery for presence traffic: local sessions, then one
    /// remote publish, never the offline store and never session teardown.
    /// Kept separate from [`Self::deliver`] so a presence fan-out triggered
    /// by an unregister cannot re-enter the full decision tree.
    async fn deliver_presence(&self, mut msg: Message) {
        msg.handled_by_local = true;
        for session in self.table.sessions_for(&msg.recipient) {
            if session.send(msg.clone()).is_ok() {
                return;
            }
        }

        match self.registry.lookup(&msg.recipient).await {
            Ok(Some(entry)) if entry.node_id != self.node_id => {
                msg.handled_by_local = false;
                if let Err(err) = self.bus.publish_to_node(&entry.node_id, &msg).await {
                    debug!(recipient = %msg.recipient, %err, "presence publish failed");
                }
            }
            Ok(_) => {}
            Err(err) => {
                debug!(recipient = %msg.recipient, %err, "registry unavailable for presence");
            }
        }
    }

    /// Consume this node's cross-node channel. Only messages not yet
    /// handled elsewhere are delivered; a miss goes straight to the offline
    /// store and is never re-published.
    pub fn spawn_bus_subscriber(self: Arc<Self>, mut rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
        let router = self;
        tokio::spawn(async move {
            info!(node = %router.node_id, "cross-node subscriber started");
            loop {
                tokio::select! {
                    _ = router.shutdown.cancelled() => break,
                    maybe = rx.recv() => {
                        let Some(raw) = maybe else { break };
                        router.handle_bus_payload(&raw).await;
                    }
                }
            }
            info!(node = %router.node_id, "cross-node subscriber stopped");
        })
    }

    async fn handle_bus_payload(&self, raw: &[u8]) {
        // Cross-node payloads are JSON by contract; fall back to detection
        // for payloads written by a node mid-upgrade.
        let mut msg: Message = match serde_json::from_slice(raw) {
            Ok(msg) => msg,
            Err(_) => match codec::detect(raw) {
                Ok((msg, _)) => msg,
                Err(err) => {
                    warn!(%err, "undecodable bus payload dropped");
                    return;
                }
            },
        };

        if msg.handled_by_local {
            debug!(msg_id = %msg.id, "stale republish ignored");
            return;
        }

        if self.deliver_local(&mut msg).await {
            return;
        }
        // Recipient moved on since the publish; no further hops.
        if msg.is_control() {
            return;
        }
        if let Err(err) = self.offline.queue(&msg).await {
            error!(msg_id = %msg.id, %err, "failed to park cross-node message offline");
        }
    }

    /// Periodically refresh registry TTLs for every locally-attached user.
    pub fn spawn_heartbeat(self: Arc<Self>) -> JoinHandle<()> {
        let router = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_PERIOD_SECS));
            loop {
                tokio::select! {
                    _ = router.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let users = router.table.users();
                        if let Err(err) = router.registry.heartbeat_all(&users).await {
                            warn!(%err, "registry heartbeat failed");
                        }
                    }
                }
            }
        })
    }

    /// Stop background tasks, close every session and release registry
    /// claims. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for session in self.table.drain_all() {
            session.close();
        }
        if let Err(err) = self.registry.evict_node(&self.node_id).await {
            warn!(%err, "registry eviction on shutdown failed");
        }
    }
}

// The dispatcher seam sessions are constructed against.
#[async_trait]
impl MessageRouter for Router {
    async fn route(&self, msg: Message) -> Result<(), RouteError> {
        Router::route(self, msg).await
    }

    async fn broadcast_status(&self, msg: &Message) {
        Router::broadcast_status(self, msg).await
    }
}
