//! The cluster-wide presence and routing registry.
//!
//! Maps each user to the node currently owning their session. Entries are
//! written with a TTL and kept alive by the owning node's heartbeat; a node
//! that dies stops heartbeating and its entries age out. Two nodes racing
//! to register the same user resolve last-writer-wins; the loser notices on
//! a later lookup and evicts its local session.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ferry_proto::constants::REGISTRY_TTL_SECS;
use ferry_proto::Transport;

use crate::store::KvStore;
use crate::Result;

const ONLINE_USERS_KEY: &str = "online_users";

/// One registry row: where a user's session currently lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub user: String,
    pub node_id: String,
    pub node_addr: String,
    pub transport: Transport,
    pub last_heartbeat: i64,
}

pub struct Registry {
    store: Arc<dyn KvStore>,
    node_id: String,
    node_addr: String,
    ttl: Duration,
}

fn user_key(user: &str) -> String {
    format!("user_registry:{user}")
}

fn node_users_key(node_id: &str) -> String {
    format!("server_users:{node_id}")
}

impl Registry {
    pub fn new(store: Arc<dyn KvStore>, node_id: impl Into<String>, node_addr: impl Into<String>) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            node_addr: node_addr.into(),
            ttl: Duration::from_secs(REGISTRY_TTL_SECS),
        }
    }

    /// Shorter TTLs for tests.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Claim ownership of `user` for this node. Last writer wins.
    pub async fn register(&self, user: &str, transport: Transport, now_unix: i64) -> Result<()> {
        let entry = RouteEntry {
            user: user.to_string(),
            node_id: self.node_id.clone(),
            node_addr: self.node_addr.clone(),
            transport,
            last_heartbeat: now_unix,
        };
        let payload = serde_json::to_string(&entry)?;

        self.store
            .set_with_ttl(&user_key(user), &payload, self.ttl)
            .await?;
        self.store
            .sadd(&node_users_key(&self.node_id), user)
            .await?;
        self.store.sadd(ONLINE_USERS_KEY, user).await?;

        debug!(user, node = %self.node_id, %transport, "registered user route");
        Ok(())
    }

    /// Drop `user` from the registry and the online set. If another node
    /// has re-claimed the user since (we lost a register race), its entry
    /// is left alone and only our own bookkeeping is cleaned up.
    pub async fn unregister(&self, user: &str) -> Result<()> {
        match self.lookup(user).await? {
            Some(entry) if entry.node_id != self.node_id => {
                debug!(user, owner = %entry.node_id, "user re-claimed elsewhere, keeping entry");
            }
            _ => {
                self.store.del(&user_key(user)).await?;
                self.store.srem(ONLINE_USERS_KEY, user).await?;
            }
        }
        self.store
            .srem(&node_users_key(&self.node_id), user)
            .await?;

        debug!(user, node = %self.node_id, "unregistered user route");
        Ok(())
    }

    pub async fn lookup(&self, user: &str) -> Result<Option<RouteEntry>> {
        match self.store.get(&user_key(user)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Refresh the TTL of every locally-owned user. Called on the node's
    /// heartbeat tick with the session table's current user list.
    pub async fn heartbeat_all(&self, users: &[String]) -> Result<()> {
        for user in users {
            self.store.expire(&user_key(user), self.ttl).await?;
        }
        if !users.is_empty() {
            debug!(count = users.len(), "refreshed registry heartbeats");
        }
        Ok(())
    }

    /// Drop every registry entry owned by `node_id`. Run against our own id
    /// at startup (crash leftovers) and at shutdown.
    pub async fn evict_node(&self, node_id: &str) -> Result<()> {
        let key = node_users_key(node_id);
        let users = self.store.smembers(&key).await?;
        for user in &users {
            // Another node may have re-claimed the user since; only delete
            // entries still pointing at the evicted node.
            match self.lookup(user).await? {
                Some(entry) if entry.node_id == node_id => {
                    self.store.del(&user_key(user)).await?;
                    self.store.srem(ONLINE_USERS_KEY, user).await?;
                }
                _ => {}
            }
            self.store.srem(&key, user).await?;
        }
        info!(node = node_id, count = users.len(), "evicted node from registry");
        Ok(())
    }

    /// Best-effort view of currently-online users across the cluster.
    pub async fn online_users(&self) -> Result<Vec<String>> {
        self.store.smembers(ONLINE_USERS_KEY).await
    }
}
