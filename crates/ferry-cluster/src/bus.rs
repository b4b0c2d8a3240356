//! Cross-node message bus.
//!
//! Every node subscribes to its own channel `server_msg:{node_id}`; routing
//! a message to a remote node is one JSON publish on that node's channel.
//! There is deliberately no wildcard channel: a message makes at most one
//! hop, and a miss at the receiving node falls into the offline store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use ferry_proto::constants::BUS_QUEUE_SIZE;
use ferry_proto::Message;

use crate::store::KvStore;
use crate::Result;

pub struct MessageBus {
    store: Arc<dyn KvStore>,
}

fn node_channel(node_id: &str) -> String {
    format!("server_msg:{node_id}")
}

impl MessageBus {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Publish `msg` to the node currently owning the recipient's session.
    /// Returns the subscriber count; zero means the target node is gone and
    /// the caller must fall back to the offline store.
    pub async fn publish_to_node(&self, node_id: &str, msg: &Message) -> Result<usize> {
        let payload = serde_json::to_vec(msg)?;
        let receivers = self.store.publish(&node_channel(node_id), payload).await?;
        debug!(node = node_id, msg_id = %msg.id, receivers, "published to remote node");
        Ok(receivers)
    }

    /// Subscribe to this node's own channel. The receiver is bounded at
    /// [`BUS_QUEUE_SIZE`]; overflow is dropped by the backend.
    pub async fn subscribe(&self, node_id: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        self.store
            .subscribe(&node_channel(node_id), BUS_QUEUE_SIZE)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn publish_reaches_the_addressed_node_only() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let bus = MessageBus::new(store);

        let mut node2 = bus.subscribe("node-2").await.unwrap();
        let mut node3 = bus.subscribe("node-3").await.unwrap();

        let msg = Message::text("u1", "u2", "cross-node hello");
        let receivers = bus.publish_to_node("node-2", &msg).await.unwrap();
        assert_eq!(receivers, 1);

        let raw = node2.recv().await.unwrap();
        let decoded: Message = serde_json::from_slice(&raw).unwrap();
        assert_eq!(decoded.content, "cross-node hello");

        assert!(node3.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_fire_and_forget() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let bus = MessageBus::new(store);

        let msg = Message::text("u1", "u2", "nobody home");
        let receivers = bus.publish_to_node("node-gone", &msg).await.unwrap();
        assert_eq!(receivers, 0);
    }
}
