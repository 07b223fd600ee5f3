//! Length-delimited framing over an accumulating byte stream.
//!
//! TCP may deliver one message split across many reads or several messages in
//! a single read; [`FrameDecoder::decode`] is re-entrant across partial
//! deliveries and consumes nothing until a whole frame is buffered.
//!
//! Frames ride in [`bytes::Bytes`], so ownership moves stage to stage and the
//! underlying buffer is released exactly once on every path, success or
//! failure.

use bytes::{Bytes, BytesMut};

use flowlink_api::protocol::{LENGTH_FIELD_OFFSET, OFP_HEADER_SIZE};

use crate::error::{ConnectionError, Result};

/// One frame tagged with the protocol version its peer speaks.
///
/// `message` starts at the message-type byte; the leading version byte has
/// been consumed by the version detector.
#[derive(Debug, Clone)]
pub struct VersionedFrame {
    /// Protocol wire version read from byte 0 of the frame.
    pub version: u8,
    /// Frame bytes from the message-type byte to the end of the frame.
    pub message: Bytes,
}

/// Incremental decoder slicing length-delimited frames out of a stream
/// buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_length: usize,
}

impl FrameDecoder {
    /// Creates a decoder rejecting frames whose declared length exceeds
    /// `max_frame_length`.
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    /// Attempts to slice one frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` without consuming any bytes when less than a full
    /// frame is buffered. Emits at most one frame per call; callers loop to
    /// drain several frames arriving in one read. A declared length below
    /// the fixed header size or above the configured maximum is a
    /// connection-fatal error: a byte stream cannot be resynchronized past a
    /// corrupt length field.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if buf.len() < OFP_HEADER_SIZE {
            return Ok(None);
        }
        let length =
            u16::from_be_bytes([buf[LENGTH_FIELD_OFFSET], buf[LENGTH_FIELD_OFFSET + 1]]) as usize;
        if length < OFP_HEADER_SIZE {
            return Err(ConnectionError::FrameTooShort { length });
        }
        if length > self.max_frame_length {
            return Err(ConnectionError::FrameTooLarge {
                length,
                max: self.max_frame_length,
            });
        }
        if buf.len() < length {
            return Ok(None);
        }
        Ok(Some(buf.split_to(length).freeze()))
    }
}
