//! Length-prefixed message framing.
//!
//! ```text
//! +------------+----------------+-------------------+
//! | compressed |  length (u32,  |  protobuf message |
//! |   (u8)     |   big endian)  |                   |
//! +------------+----------------+-------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::rpc::status::{Code, RpcError};

/// Size of the frame header.
pub const HEADER_LEN: usize = 5;

/// Default limit on a single message.
pub const DEFAULT_MAX_MESSAGE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("compressed messages are not supported")]
    Compressed,

    #[error("message of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("{0} trailing bytes after message")]
    Trailing(usize),
}

impl From<FrameError> for RpcError {
    fn from(err: FrameError) -> Self {
        let code = match err {
            FrameError::Compressed => Code::Unimplemented,
            FrameError::TooLarge { .. } => Code::ResourceExhausted,
            FrameError::Truncated { .. } | FrameError::Trailing(_) => Code::Internal,
        };
        RpcError::new(code, err.to_string())
    }
}

/// Frame one message.
pub fn encode_frame(message: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + message.len());
    buf.put_u8(0);
    buf.put_u32(message.len() as u32);
    buf.put_slice(message);
    buf.freeze()
}

/// Unframe exactly one message from a unary call body.
///
/// An empty body is an empty message.
pub fn decode_unary(body: &Bytes, limit: usize) -> Result<Bytes, FrameError> {
    if body.is_empty() {
        return Ok(Bytes::new());
    }
    if body.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: HEADER_LEN,
            available: body.len(),
        });
    }
    if body[0] != 0 {
        return Err(FrameError::Compressed);
    }

    let size = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    if size > limit {
        return Err(FrameError::TooLarge { size, limit });
    }

    let end = HEADER_LEN + size;
    if body.len() < end {
        return Err(FrameError::Truncated {
            needed: end,
            available: body.len(),
        });
    }
    if body.len() > end {
        return Err(FrameError::Trailing(body.len() - end));
    }
    Ok(body.slice(HEADER_LEN..end))
}

/// Hex preview of a payload for logs.
pub fn abbreviate(payload: &[u8]) -> String {
    const PREVIEW: usize = 32;
    let shown: String = payload
        .iter()
        .take(PREVIEW)
        .map(|b| format!("{:02x}", b))
        .collect();
    if payload.len() > PREVIEW {
        format!("{}.. ({} bytes)", shown, payload.len())
    } else {
        shown
    }
}
