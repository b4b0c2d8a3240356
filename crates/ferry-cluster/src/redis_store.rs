//! Redis-backed [`KvStore`] implementation.
//!
//! Commands go through a [`ConnectionManager`], which reconnects on its own
//! after transient failures. Each subscription owns a dedicated pub/sub
//! connection whose messages are forwarded into a bounded channel; overflow
//! is dropped, never buffered unboundedly.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::store::KvStore;
use crate::Result;

pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        info!(url, "connected to redis");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(set, member).await?;
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(set, member).await?;
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(set).await?)
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, channel: &str, capacity: usize) -> Result<mpsc::Receiver<Vec<u8>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(capacity);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload = msg.get_payload_bytes().to_vec();
                if tx.is_closed() {
                    break;
                }
                if tx.try_send(payload).is_err() {
                    debug!(channel = %channel, "inbound queue full, dropping message");
                }
            }
            warn!(channel = %channel, "redis subscription stream ended");
        });

        Ok(rx)
    }
}
