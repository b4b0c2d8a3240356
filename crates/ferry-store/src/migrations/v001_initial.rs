//! v001 -- Initial schema creation.
//!
//! One canonical `messages` table holds every chat message regardless of
//! kind; 1:1 and group rows are discriminated by `is_group`/`group_id`.
//! `group_members` and `friendships` back the membership lookups the
//! router needs for fan-out.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages (canonical history + offline queue)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4 (server-assigned if absent)
    conversation_id TEXT NOT NULL DEFAULT '',
    sender          TEXT NOT NULL,
    recipient       TEXT NOT NULL DEFAULT '',
    group_id        TEXT NOT NULL DEFAULT '',
    is_group        INTEGER NOT NULL DEFAULT 0,
    kind            TEXT NOT NULL,              -- symbolic message type
    content         TEXT NOT NULL DEFAULT '',
    status          TEXT NOT NULL DEFAULT 'sent',
    timestamp       INTEGER NOT NULL,           -- unix seconds (wire clock)
    created_at      TEXT NOT NULL,              -- RFC-3339
    updated_at      TEXT NOT NULL
);

-- Offline replay scans: unsent rows for one recipient, oldest first.
CREATE INDEX IF NOT EXISTS idx_messages_recipient_status
    ON messages(recipient, status, timestamp);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, timestamp);

-- ----------------------------------------------------------------
-- Group membership (written by the out-of-scope group CRUD service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_members (
    group_id   TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    role       INTEGER NOT NULL DEFAULT 0,     -- 0 member, 1 admin
    created_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id)
);

-- ----------------------------------------------------------------
-- Friendships (written by the out-of-scope friend CRUD service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friendships (
    user_id    TEXT NOT NULL,
    friend_id  TEXT NOT NULL,
    status     INTEGER NOT NULL DEFAULT 1,     -- 0 pending, 1 accepted
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_id, friend_id)
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
