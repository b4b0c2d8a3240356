//! The shared store seam behind the registry and the bus.
//!
//! Mirrors the small slice of Redis the delivery plane actually uses:
//! atomic set/get/expire, set membership, and pub/sub. [`crate::RedisStore`]
//! is the production implementation; [`crate::MemoryStore`] backs tests and
//! single-node deployments.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` to `value` with a time-to-live.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Refresh the TTL of an existing key. A missing key is not an error.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn sadd(&self, set: &str, member: &str) -> Result<()>;

    async fn srem(&self, set: &str, member: &str) -> Result<()>;

    async fn smembers(&self, set: &str) -> Result<Vec<String>>;

    /// Publish to a channel, returning the number of subscribers the
    /// backend delivered to. Nobody listening is not an error; callers that
    /// need delivery fall back on a zero count.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize>;

    /// Subscribe to a channel. The receiver is bounded at `capacity`;
    /// messages arriving while it is full are dropped.
    async fn subscribe(&self, channel: &str, capacity: usize) -> Result<mpsc::Receiver<Vec<u8>>>;
}
