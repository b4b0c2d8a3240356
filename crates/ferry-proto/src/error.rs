use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("Frame payload too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Unknown frame tag: 0x{0:02x}")]
    UnknownFrameTag(u8),
}
