//! Encoding and decoding of [`Message`] in both wire forms.
//!
//! JSON carries the `type`/`status` enums as symbolic strings, Protobuf as
//! integers; the conversions below own that mapping in both directions.
//! Encoding selection is explicit everywhere (frame tag on the stream
//! transport, frame opcode on WebSocket); [`detect`] exists only for
//! cross-node payloads of uncertain provenance.

use prost::Message as _;
use serde::{Deserialize, Serialize};

use crate::message::{ErrorInfo, MediaInfo, Message, MessageStatus, MessageType};
use crate::pb;
use crate::ProtoError;

/// Payload serialization of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    Protobuf,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Json => write!(f, "json"),
            Encoding::Protobuf => write!(f, "protobuf"),
        }
    }
}

/// Serialize a message in the requested encoding.
pub fn encode(msg: &Message, encoding: Encoding) -> Result<Vec<u8>, ProtoError> {
    match encoding {
        Encoding::Json => Ok(serde_json::to_vec(msg)?),
        Encoding::Protobuf => Ok(to_pb(msg).encode_to_vec()),
    }
}

/// Deserialize a message in the stated encoding.
pub fn decode(data: &[u8], encoding: Encoding) -> Result<Message, ProtoError> {
    match encoding {
        Encoding::Json => Ok(serde_json::from_slice(data)?),
        Encoding::Protobuf => Ok(from_pb(pb::Message::decode(data)?)),
    }
}

/// Last-resort decoding for payloads whose encoding is not carried by the
/// framing (e.g. a bus payload written by an old node). Client paths never
/// use this; they dispatch on the frame tag or opcode.
pub fn detect(data: &[u8]) -> Result<(Message, Encoding), ProtoError> {
    match serde_json::from_slice::<Message>(data) {
        Ok(msg) => Ok((msg, Encoding::Json)),
        Err(json_err) => match pb::Message::decode(data) {
            Ok(msg) => Ok((from_pb(msg), Encoding::Protobuf)),
            Err(_) => Err(ProtoError::Json(json_err)),
        },
    }
}

fn to_pb(msg: &Message) -> pb::Message {
    pb::Message {
        id: msg.id.clone(),
        r#type: kind_to_pb(msg.kind) as i32,
        sender: msg.sender.clone(),
        recipient: msg.recipient.clone(),
        conversation_id: msg.conversation_id.clone(),
        group_id: msg.group_id.clone(),
        is_group: msg.is_group,
        content: msg.content.clone(),
        timestamp: msg.timestamp,
        status: status_to_pb(msg.status) as i32,
        status_code: msg.status_code,
        request_id: msg.request_id.clone(),
        metadata: msg.metadata.clone(),
        error: msg.error.as_ref().map(|e| pb::ErrorInfo {
            message: e.message.clone(),
            details: e.details.clone(),
        }),
        media: msg.media.as_ref().map(|m| pb::MediaInfo {
            mime_type: m.mime_type.clone(),
            size_bytes: m.size_bytes,
            width: m.width,
            height: m.height,
            duration_ms: m.duration_ms,
            url: m.url.clone(),
        }),
        handled_by_local: msg.handled_by_local,
    }
}

fn from_pb(msg: pb::Message) -> Message {
    Message {
        id: msg.id,
        kind: kind_from_pb(msg.r#type),
        sender: msg.sender,
        recipient: msg.recipient,
        conversation_id: msg.conversation_id,
        group_id: msg.group_id,
        is_group: msg.is_group,
        content: msg.content,
        timestamp: msg.timestamp,
        status: status_from_pb(msg.status),
        status_code: msg.status_code,
        request_id: msg.request_id,
        metadata: msg.metadata,
        error: msg.error.map(|e| ErrorInfo {
            message: e.message,
            details: e.details,
        }),
        media: msg.media.map(|m| MediaInfo {
            mime_type: m.mime_type,
            size_bytes: m.size_bytes,
            width: m.width,
            height: m.height,
            duration_ms: m.duration_ms,
            url: m.url,
        }),
        handled_by_local: msg.handled_by_local,
    }
}

fn kind_to_pb(kind: MessageType) -> pb::MessageType {
    match kind {
        MessageType::Text => pb::MessageType::Text,
        MessageType::Image => pb::MessageType::Image,
        MessageType::File => pb::MessageType::File,
        MessageType::Audio => pb::MessageType::Audio,
        MessageType::Video => pb::MessageType::Video,
        MessageType::Ping => pb::MessageType::Ping,
        MessageType::Pong => pb::MessageType::Pong,
        MessageType::Status => pb::MessageType::Status,
        MessageType::Error => pb::MessageType::Error,
        MessageType::Command => pb::MessageType::Command,
        MessageType::Response => pb::MessageType::Response,
        MessageType::Unknown => pb::MessageType::Unknown,
    }
}

fn kind_from_pb(raw: i32) -> MessageType {
    match pb::MessageType::try_from(raw).unwrap_or(pb::MessageType::Unknown) {
        pb::MessageType::Text => MessageType::Text,
        pb::MessageType::Image => MessageType::Image,
        pb::MessageType::File => MessageType::File,
        pb::MessageType::Audio => MessageType::Audio,
        pb::MessageType::Video => MessageType::Video,
        pb::MessageType::Ping => MessageType::Ping,
        pb::MessageType::Pong => MessageType::Pong,
        pb::MessageType::Status => MessageType::Status,
        pb::MessageType::Error => MessageType::Error,
        pb::MessageType::Command => MessageType::Command,
        pb::MessageType::Response => MessageType::Response,
        pb::MessageType::Unknown => MessageType::Unknown,
    }
}

fn status_to_pb(status: MessageStatus) -> pb::MessageStatus {
    match status {
        MessageStatus::Sent => pb::MessageStatus::Sent,
        MessageStatus::Delivered => pb::MessageStatus::Delivered,
        MessageStatus::Read => pb::MessageStatus::Read,
        MessageStatus::Failed => pb::MessageStatus::Failed,
        MessageStatus::Unsent => pb::MessageStatus::Unsent,
    }
}

fn status_from_pb(raw: i32) -> MessageStatus {
    match pb::MessageStatus::try_from(raw).unwrap_or(pb::MessageStatus::Unknown) {
        pb::MessageStatus::Delivered => MessageStatus::Delivered,
        pb::MessageStatus::Read => MessageStatus::Read,
        pb::MessageStatus::Failed => MessageStatus::Failed,
        pb::MessageStatus::Unsent => MessageStatus::Unsent,
        pb::MessageStatus::Sent | pb::MessageStatus::Unknown => MessageStatus::Sent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        let mut msg = Message::text("user-abc", "user-def", "hello there");
        msg.id = "msg-1".into();
        msg.conversation_id = "conv-1".into();
        msg.timestamp = 1_700_000_000;
        msg.request_id = "req-1".into();
        msg.metadata.insert("platform".into(), "web".into());
        msg
    }

    #[test]
    fn json_round_trip() {
        let msg = sample();
        let bytes = encode(&msg, Encoding::Json).unwrap();
        let back = decode(&bytes, Encoding::Json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn protobuf_round_trip() {
        let mut msg = sample();
        msg.kind = MessageType::Image;
        msg.status = MessageStatus::Unsent;
        msg.media = Some(MediaInfo {
            mime_type: "image/png".into(),
            size_bytes: 2048,
            width: 64,
            height: 64,
            ..MediaInfo::default()
        });
        let bytes = encode(&msg, Encoding::Protobuf).unwrap();
        let back = decode(&bytes, Encoding::Protobuf).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn error_block_survives_both_encodings() {
        let msg = Message::error_reply("u1", "boom", 500, "req-9", 42);
        for encoding in [Encoding::Json, Encoding::Protobuf] {
            let back = decode(&encode(&msg, encoding).unwrap(), encoding).unwrap();
            assert_eq!(back.error.as_ref().unwrap().message, "boom");
            assert_eq!(back.status_code, 500);
        }
    }

    #[test]
    fn unknown_pb_enum_value_degrades_gracefully() {
        assert_eq!(kind_from_pb(999), MessageType::Unknown);
        assert_eq!(status_from_pb(999), MessageStatus::Sent);
    }

    #[test]
    fn detect_prefers_json() {
        let msg = sample();
        let (decoded, encoding) = detect(&encode(&msg, Encoding::Json).unwrap()).unwrap();
        assert_eq!(encoding, Encoding::Json);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn detect_falls_back_to_protobuf() {
        let msg = sample();
        let (decoded, encoding) = detect(&encode(&msg, Encoding::Protobuf).unwrap()).unwrap();
        assert_eq!(encoding, Encoding::Protobuf);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn cross_encoding_transcode_preserves_fields() {
        // A JSON-origin message re-encoded as Protobuf for a binary session.
        let msg = sample();
        let pb_bytes = encode(&msg, Encoding::Protobuf).unwrap();
        let back = decode(&pb_bytes, Encoding::Protobuf).unwrap();
        assert_eq!(back.metadata.get("platform").map(String::as_str), Some("web"));
        assert_eq!(back.conversation_id, msg.conversation_id);
    }
}
