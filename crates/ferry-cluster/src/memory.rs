//! In-memory [`KvStore`] implementation.
//!
//! Backs tests and nodes run without a configured Redis backend. Expiry is
//! checked lazily on read, which matches how the registry consumes TTLs.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::store::KvStore;
use crate::Result;

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |deadline| Instant::now() < deadline)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(entry) = self.entries.lock().await.get_mut(key) {
            if entry.live() {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<()> {
        self.sets
            .lock()
            .await
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<()> {
        let mut sets = self.sets.lock().await;
        if let Some(members) = sets.get_mut(set) {
            members.remove(member);
            if members.is_empty() {
                sets.remove(set);
            }
        }
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .lock()
            .await
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize> {
        let mut subscribers = self.subscribers.lock().await;
        let Some(senders) = subscribers.get_mut(channel) else {
            return Ok(0);
        };
        senders.retain(|tx| {
            if tx.is_closed() {
                return false;
            }
            if tx.try_send(payload.clone()).is_err() {
                debug!(channel, "subscriber queue full, dropping message");
            }
            true
        });
        Ok(senders.len())
    }

    async fn subscribe(&self, channel: &str, capacity: usize) -> Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(capacity);
        self.subscribers
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
