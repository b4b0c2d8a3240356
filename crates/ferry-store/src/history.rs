//! Store seams consumed by the delivery plane, plus the SQLite-backed
//! implementation.
//!
//! The router only ever talks to the traits; every call must stay
//! idempotent on retry (`save_message` deduplicates on id, the mutators
//! are upserts/updates).

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use tokio::sync::Mutex;

use ferry_proto::{Message, MessageStatus, MessageType};

use crate::database::Database;
use crate::Result;

/// Message-history store: durable record of every chat message and the
/// offline queue for absent recipients.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a chat message. Idempotent on `msg.id`; control messages
    /// (ping/pong/status) are never written.
    async fn save_message(&self, msg: &Message) -> Result<()>;

    /// Park a message in the offline queue: insert it if unseen, and force
    /// its status to `unsent` either way.
    async fn queue_offline(&self, msg: &Message) -> Result<()>;

    /// All `unsent` messages for `user`, ascending timestamp.
    async fn load_offline_for(&self, user: &str) -> Result<Vec<Message>>;

    /// Flip the given message ids from `unsent` to `sent` after an
    /// at-least-once transmission.
    async fn mark_delivered(&self, ids: &[String]) -> Result<()>;
}

/// Group-membership store, written by the out-of-scope group CRUD service.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn members_of(&self, group_id: &str) -> Result<Vec<String>>;
}

/// Friendship store, written by the out-of-scope friend CRUD service.
/// The router uses it to fan presence changes out to a user's friends.
#[async_trait]
pub trait FriendStore: Send + Sync {
    async fn friends_of(&self, user: &str) -> Result<Vec<String>>;
}

/// SQLite implementation of all three store seams.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Seed helper for the membership tables. The CRUD surfaces that fill
    /// these in production are out of scope; tests and tooling use this.
    pub async fn add_group_member(&self, group_id: &str, user: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, role, created_at)
             VALUES (?1, ?2, 0, ?3)",
            params![group_id, user, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Seed helper for the friendship table; see [`Self::add_group_member`].
    pub async fn add_friend(&self, user: &str, friend: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.conn().execute(
            "INSERT OR IGNORE INTO friendships (user_id, friend_id, status, created_at)
             VALUES (?1, ?2, 1, ?3)",
            params![user, friend, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Current status of a stored message, for tests and diagnostics.
    pub async fn message_status(&self, id: &str) -> Result<MessageStatus> {
        let db = self.db.lock().await;
        let status: String = db
            .conn()
            .query_row("SELECT status FROM messages WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => crate::StoreError::NotFound,
                other => crate::StoreError::Sqlite(other),
            })?;
        Ok(MessageStatus::parse(&status))
    }

    pub async fn message_count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn save_message(&self, msg: &Message) -> Result<()> {
        if msg.kind.is_control() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().await;
        // INSERT OR IGNORE: replaying the same message id must not create
        // a second row (route idempotence hangs off this).
        db.conn().execute(
            "INSERT OR IGNORE INTO messages
             (id, conversation_id, sender, recipient, group_id, is_group,
              kind, content, status, timestamp, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                msg.id,
                msg.conversation_id,
                msg.sender,
                msg.recipient,
                msg.group_id,
                msg.is_group,
                msg.kind.as_str(),
                msg.content,
                msg.status.as_str(),
                msg.timestamp,
                now,
                now,
            ],
        )?;
        Ok(())
    }

    async fn queue_offline(&self, msg: &Message) -> Result<()> {
        let mut parked = msg.clone();
        parked.status = MessageStatus::Unsent;
        self.save_message(&parked).await?;

        // The row may predate this call with a delivered status; the
        // offline queue owns it now.
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().await;
        db.conn().execute(
            "UPDATE messages SET status = 'unsent', updated_at = ?1 WHERE id = ?2",
            params![now, parked.id],
        )?;
        Ok(())
    }

    async fn load_offline_for(&self, user: &str) -> Result<Vec<Message>> {
        let db = self.db.lock().await;
        let mut stmt = db.conn().prepare(
            "SELECT id, conversation_id, sender, recipient, group_id, is_group,
                    kind, content, status, timestamp
             FROM messages
             WHERE recipient = ?1 AND status = 'unsent'
             ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(params![user], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    async fn mark_delivered(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().await;
        let mut stmt = db.conn().prepare(
            "UPDATE messages SET status = 'sent', updated_at = ?1
             WHERE id = ?2 AND status = 'unsent'",
        )?;
        for id in ids {
            stmt.execute(params![now, id])?;
        }
        Ok(())
    }
}

#[async_trait]
impl GroupStore for SqliteStore {
    async fn members_of(&self, group_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .conn()
            .prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;
        let rows = stmt.query_map(params![group_id], |row| row.get::<_, String>(0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}

#[async_trait]
impl FriendStore for SqliteStore {
    async fn friends_of(&self, user: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .conn()
            .prepare("SELECT friend_id FROM friendships WHERE user_id = ?1 AND status = 1")?;
        let rows = stmt.query_map(params![user], |row| row.get::<_, String>(0))?;

        let mut friends = Vec::new();
        for row in rows {
            friends.push(row?);
        }
        Ok(friends)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(6)?;
    let status: String = row.get(8)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender: row.get(2)?,
        recipient: row.get(3)?,
        group_id: row.get(4)?,
        is_group: row.get(5)?,
        kind: MessageType::parse(&kind),
        content: row.get(7)?,
        status: MessageStatus::parse(&status),
        timestamp: row.get(9)?,
        ..Message::default()
    })
}
