//! Thin adapter between the router and the external history store's
//! offline queue. Failures here are fatal for the message in question and
//! surface to the caller so the sender can retry client-side.

use std::sync::Arc;

use tracing::info;

use ferry_proto::Message;
use ferry_store::HistoryStore;

use crate::error::RouteError;

pub struct OfflineStore {
    history: Arc<dyn HistoryStore>,
}

impl OfflineStore {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self { history }
    }

    /// Persist a message nobody could take delivery of.
    pub async fn queue(&self, msg: &Message) -> Result<(), RouteError> {
        self.history.queue_offline(msg).await?;
        info!(msg_id = %msg.id, recipient = %msg.recipient, "message queued offline");
        Ok(())
    }

    /// The user's pending messages, oldest first.
    pub async fn replay_for(&self, user: &str) -> Result<Vec<Message>, RouteError> {
        Ok(self.history.load_offline_for(user).await?)
    }

    /// Flip replayed messages to `sent` after at-least-once transmission.
    pub async fn mark_delivered(&self, ids: &[String]) -> Result<(), RouteError> {
        self.history.mark_delivered(ids).await?;
        Ok(())
    }
}
