//! Stream framing for the TCP transport.
//!
//! Each frame is `[proto-tag:1][len:u32 big-endian][payload:len]`. Tag 0x01
//! carries JSON, 0x02 carries Protobuf. Oversize frames and unknown tags
//! are unrecoverable on a stream (length desync) and fail the session.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::Encoding;
use crate::constants::{FRAME_TAG_JSON, FRAME_TAG_PROTOBUF, MAX_FRAME};
use crate::ProtoError;

/// Tag byte plus big-endian length prefix.
const HEADER_LEN: usize = 5;

/// One decoded stream frame: the payload plus the encoding its tag named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub encoding: Encoding,
    pub payload: Bytes,
}

/// Append one frame to `buf`.
pub fn encode_frame(buf: &mut BytesMut, encoding: Encoding, payload: &[u8]) -> Result<(), ProtoError> {
    if payload.len() > MAX_FRAME {
        return Err(ProtoError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME,
        });
    }
    let tag = match encoding {
        Encoding::Json => FRAME_TAG_JSON,
        Encoding::Protobuf => FRAME_TAG_PROTOBUF,
    };
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_u8(tag);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(())
}

/// Try to split one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. Errors leave `buf`
/// untouched; the stream is desynchronized and the caller must close it.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, ProtoError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let tag = buf[0];
    let encoding = match tag {
        FRAME_TAG_JSON => Encoding::Json,
        FRAME_TAG_PROTOBUF => Encoding::Protobuf,
        other => return Err(ProtoError::UnknownFrameTag(other)),
    };

    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > MAX_FRAME {
        return Err(ProtoError::FrameTooLarge { len, max: MAX_FRAME });
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    let payload = buf.split_to(len).freeze();
    Ok(Some(Frame { encoding, payload }))
}
