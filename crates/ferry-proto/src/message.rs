use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::SERVER_SENDER;

/// The single on-wire and in-transit record of the delivery plane.
///
/// Both wire encodings (JSON and Protobuf) carry this logical shape; see
/// [`crate::codec`] for the mapping. Control messages (`ping`, `pong`,
/// `status`) are never persisted and never forwarded as chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recipient: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub conversation_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_id: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_group: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// Unix seconds. Zero means "not yet stamped"; the session read loop
    /// fills it in before the message reaches the router.
    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub status: MessageStatus,

    /// Nonzero on server-originated failure replies.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub status_code: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaInfo>,

    /// Loop-prevention flag for cross-node delivery: set when a node has
    /// delivered (or attempted to deliver) the message locally, cleared
    /// when publishing to a remote node.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub handled_by_local: bool,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Audio,
    Video,
    Ping,
    Pong,
    Status,
    Error,
    Command,
    Response,
    Unknown,
}

impl Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Unknown type names decode rather than fail; the delivery plane
        // must survive newer clients.
        let raw = String::deserialize(deserializer)?;
        Ok(MessageType::parse(&raw))
    }
}

impl MessageType {
    /// Control messages are handled by the session or router directly and
    /// never persisted or forwarded as chat.
    pub fn is_control(self) -> bool {
        matches!(self, MessageType::Ping | MessageType::Pong | MessageType::Status)
    }

    /// Symbolic wire name; agrees with the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::Audio => "audio",
            MessageType::Video => "video",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Status => "status",
            MessageType::Error => "error",
            MessageType::Command => "command",
            MessageType::Response => "response",
            MessageType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "text" | "message" => MessageType::Text,
            "image" => MessageType::Image,
            "file" => MessageType::File,
            "audio" => MessageType::Audio,
            "video" => MessageType::Video,
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "status" => MessageType::Status,
            "error" => MessageType::Error,
            "command" => MessageType::Command,
            "response" => MessageType::Response,
            _ => MessageType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
    Failed,
    Unsent,
}

impl Serialize for MessageStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(MessageStatus::parse(&raw))
    }
}

impl MessageStatus {
    /// Symbolic wire name; agrees with the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
            MessageStatus::Unsent => "unsent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            "failed" => MessageStatus::Failed,
            "unsent" => MessageStatus::Unsent,
            _ => MessageStatus::Sent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub width: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub height: u32,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

fn is_zero_u32(n: &u32) -> bool {
    *n == 0
}

fn is_zero_u64(n: &u64) -> bool {
    *n == 0
}

impl Default for Message {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: MessageType::Text,
            sender: String::new(),
            recipient: String::new(),
            conversation_id: String::new(),
            group_id: String::new(),
            is_group: false,
            content: String::new(),
            timestamp: 0,
            status: MessageStatus::Sent,
            status_code: 0,
            request_id: String::new(),
            metadata: HashMap::new(),
            error: None,
            media: None,
            handled_by_local: false,
        }
    }
}

impl Message {
    /// A chat text message from `sender` to `recipient`.
    pub fn text(sender: impl Into<String>, recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Text,
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// A server-originated application-level ping.
    pub fn ping() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MessageType::Ping,
            sender: SERVER_SENDER.to_string(),
            ..Self::default()
        }
    }

    /// The pong reply to a client ping, addressed back to the pinging user.
    pub fn pong(recipient: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MessageType::Pong,
            sender: SERVER_SENDER.to_string(),
            recipient: recipient.into(),
            timestamp,
            ..Self::default()
        }
    }

    /// A presence update fanned out to a user's friends.
    pub fn presence(user: impl Into<String>, recipient: impl Into<String>, online: bool, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MessageType::Status,
            sender: user.into(),
            recipient: recipient.into(),
            content: if online { "online" } else { "offline" }.to_string(),
            timestamp,
            ..Self::default()
        }
    }

    /// A server-originated error reply delivered on the sender's own session.
    pub fn error_reply(
        recipient: impl Into<String>,
        content: impl Into<String>,
        status_code: i32,
        request_id: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MessageType::Error,
            sender: SERVER_SENDER.to_string(),
            recipient: recipient.into(),
            status: MessageStatus::Failed,
            status_code,
            request_id: request_id.into(),
            error: Some(ErrorInfo {
                message: content.clone(),
                details: String::new(),
            }),
            content,
            timestamp,
            ..Self::default()
        }
    }

    /// Assign a fresh UUID when the client did not provide one.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }

    /// Stamp the timestamp when the client left it at zero.
    pub fn ensure_timestamp(&mut self, now_unix: i64) {
        if self.timestamp == 0 {
            self.timestamp = now_unix;
        }
    }

    /// True when the message can be routed: a 1:1 recipient or a group id.
    pub fn has_destination(&self) -> bool {
        !self.recipient.is_empty() || (self.is_group && !self.group_id.is_empty())
    }

    pub fn is_control(&self) -> bool {
        self.kind.is_control()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_field_names_match_wire_contract() {
        let msg = Message::text("u1", "u2", "hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["sender"], "u1");
        assert_eq!(value["recipient"], "u2");
        // Absent optionals are omitted entirely.
        assert!(value.get("group_id").is_none());
        assert!(value.get("error").is_none());
        assert!(value.get("handled_by_local").is_none());
    }

    #[test]
    fn legacy_message_type_alias_accepted() {
        let msg: Message =
            serde_json::from_str(r#"{"type":"message","recipient":"u2","content":"hi"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Text);
    }

    #[test]
    fn unknown_type_does_not_fail_decode() {
        let msg: Message = serde_json::from_str(r#"{"type":"sticker"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown);
    }

    #[test]
    fn destination_rules() {
        let mut msg = Message::text("u1", "", "hi");
        assert!(!msg.has_destination());
        msg.is_group = true;
        msg.group_id = "g1".into();
        assert!(msg.has_destination());
        msg.is_group = false;
        assert!(!msg.has_destination());
        msg.recipient = "u2".into();
        assert!(msg.has_destination());
    }

    #[test]
    fn ensure_id_and_timestamp_only_fill_blanks() {
        let mut msg = Message::text("u1", "u2", "hi");
        msg.id = "fixed".into();
        msg.timestamp = 1_700_000_000;
        msg.ensure_id();
        msg.ensure_timestamp(1_800_000_000);
        assert_eq!(msg.id, "fixed");
        assert_eq!(msg.timestamp, 1_700_000_000);

        let mut blank = Message::text("u1", "u2", "hi");
        blank.ensure_id();
        blank.ensure_timestamp(1_800_000_000);
        assert!(!blank.id.is_empty());
        assert_eq!(blank.timestamp, 1_800_000_000);
    }

    #[test]
    fn as_str_agrees_with_serde_names() {
        for kind in [
            MessageType::Text,
            MessageType::Ping,
            MessageType::Status,
            MessageType::Error,
            MessageType::Response,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
            assert_eq!(MessageType::parse(kind.as_str()), kind);
        }
        for status in [
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
            MessageStatus::Failed,
            MessageStatus::Unsent,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
            assert_eq!(MessageStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn error_reply_carries_code_and_request_id() {
        let reply = Message::error_reply("u1", "missing recipient", 400, "req-7", 1);
        assert_eq!(reply.kind, MessageType::Error);
        assert_eq!(reply.status_code, 400);
        assert_eq!(reply.request_id, "req-7");
        assert_eq!(reply.error.as_ref().unwrap().message, "missing recipient");
    }
}
