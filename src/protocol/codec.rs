//! Length-prefixed framing for messages exchanged between the tiers.
//!
//! A frame is a 4-byte big-endian payload length followed by exactly that many
//! bytes of JSON. The codec only frames and unframes; what the JSON means is
//! the caller's business.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::limits::MAX_FRAME_BYTES;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Why a frame was rejected.
#[derive(Debug, Error)]
pub enum MalformedFrame {
    #[error("declared length {declared} exceeds limit of {max} bytes")]
    Oversized { declared: usize, max: usize },

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("{extra} unexpected bytes after payload")]
    TrailingBytes { extra: usize },

    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] MalformedFrame),

    /// The peer closed the stream before sending any byte of a frame.
    #[error("connection closed before a frame arrived")]
    Closed,

    #[error("frame I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl FrameError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, FrameError::Malformed(_))
    }
}

/// Frame encoder/decoder with a configurable payload limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(u32::MAX as usize),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn check_len(&self, declared: usize) -> Result<(), MalformedFrame> {
        if declared > self.max_frame_len {
            return Err(MalformedFrame::Oversized {
                declared,
                max: self.max_frame_len,
            });
        }
        Ok(())
    }

    /// Serialize `message` and prepend its length.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Bytes, FrameError> {
        let payload = serde_json::to_vec(message).map_err(FrameError::Encode)?;
        self.check_len(payload.len())?;

        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.extend_from_slice(&payload);
        Ok(frame.freeze())
    }

    /// Decode one complete frame held in memory.
    pub fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T, FrameError> {
        if frame.len() < HEADER_LEN {
            return Err(MalformedFrame::Truncated {
                expected: HEADER_LEN,
                actual: frame.len(),
            }
            .into());
        }

        let declared = read_prefix(&frame[..HEADER_LEN]);
        self.check_len(declared)?;

        let payload = &frame[HEADER_LEN..];
        if payload.len() < declared {
            return Err(MalformedFrame::Truncated {
                expected: declared,
                actual: payload.len(),
            }
            .into());
        }
        if payload.len() > declared {
            return Err(MalformedFrame::TrailingBytes {
                extra: payload.len() - declared,
            }
            .into());
        }

        parse_payload(payload)
    }

    /// Read exactly one frame's payload from `reader`.
    ///
    /// The declared length is checked against the limit before any buffer is
    /// allocated, and nothing past the declared length is consumed.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Bytes, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = reader.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Err(FrameError::Closed);
                }
                return Err(MalformedFrame::Truncated {
                    expected: HEADER_LEN,
                    actual: filled,
                }
                .into());
            }
            filled += n;
        }

        let declared = read_prefix(&header);
        self.check_len(declared)?;

        let mut payload = Vec::with_capacity(declared);
        reader.take(declared as u64).read_to_end(&mut payload).await?;
        if payload.len() < declared {
            return Err(MalformedFrame::Truncated {
                expected: declared,
                actual: payload.len(),
            }
            .into());
        }

        Ok(Bytes::from(payload))
    }

    /// Read one frame and deserialize its payload.
    pub async fn read_message<R, T>(&self, reader: &mut R) -> Result<T, FrameError>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let payload = self.read_frame(reader).await?;
        parse_payload(&payload)
    }

    /// Encode `message` and write the whole frame, then flush.
    pub async fn write_message<W, T>(&self, writer: &mut W, message: &T) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let frame = self.encode(message)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn read_prefix(header: &[u8]) -> usize {
    u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize
}

fn parse_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    serde_json::from_slice(payload)
        .map_err(|e| FrameError::Malformed(MalformedFrame::InvalidPayload(e)))
}

/// Encode with the default frame limit.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, FrameError> {
    FrameCodec::default().encode(message)
}

/// Decode with the default frame limit.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, FrameError> {
    FrameCodec::default().decode(frame)
}
