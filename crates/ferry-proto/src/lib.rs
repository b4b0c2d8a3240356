// Shared message model and wire plumbing for the ferry delivery plane.

pub mod codec;
pub mod constants;
pub mod framing;
pub mod message;
pub mod pb;
pub mod types;

mod error;

pub use codec::Encoding;
pub use error::ProtoError;
pub use framing::{decode_frame, encode_frame, Frame};
pub use message::{ErrorInfo, MediaInfo, Message, MessageStatus, MessageType};
pub use types::Transport;
