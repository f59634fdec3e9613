//! Stream framing for `tokio_util::codec`
//!
//! Splits a byte stream into frames holding exactly one command: the line up
//! to and including its terminator, plus the declared payload bytes for
//! payload-bearing commands.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::{MsnpError, WireError};
use crate::protocol::wire::{declared_payload_length, tokenize};

/// Default upper bound for a single inbound frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Line-plus-payload frame codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    /// Total length of the frame at the head of the buffer, once known
    pending: Option<usize>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            pending: None,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn frame_length(&self, src: &BytesMut) -> Result<Option<usize>, MsnpError> {
        let Some(line_end) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > self.max_frame_size {
                return Err(WireError::FrameTooLarge {
                    size: src.len(),
                    max_size: self.max_frame_size,
                }
                .into());
            }
            return Ok(None);
        };

        let line = core::str::from_utf8(&src[..line_end]).map_err(|_| WireError::InvalidUtf8)?;
        let tokens = tokenize(line.trim_end_matches('\r'));
        let payload_len = declared_payload_length(&tokens)?.unwrap_or(0);
        let total = line_end + 1 + payload_len;
        if total > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: total,
                max_size: self.max_frame_size,
            }
            .into());
        }
        Ok(Some(total))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = MsnpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let total = match self.pending {
            Some(total) => total,
            None => match self.frame_length(src)? {
                Some(total) => total,
                None => return Ok(None),
            },
        };

        if src.len() < total {
            self.pending = Some(total);
            src.reserve(total - src.len());
            return Ok(None);
        }

        self.pending = None;
        Ok(Some(src.split_to(total).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = MsnpError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_lines() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"JOI a@b.c A\r\nBYE a@b.c\r\nPART"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"JOI a@b.c A\r\n"));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"BYE a@b.c\r\n"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"PART");
    }

    #[test]
    fn test_waits_for_full_payload() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"MSG a@b.c A 5\r\nhel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"loJOI");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(b"MSG a@b.c A 5\r\nhello"));
        assert_eq!(&buf[..], b"JOI");
    }

    #[test]
    fn test_rejects_oversized_frames() {
        let mut codec = FrameCodec::with_max_frame_size(32);
        let mut buf = BytesMut::from(&b"MSG a@b.c A 4000\r\n"[..]);
        assert!(codec.decode(&mut buf).is_err());

        let mut codec = FrameCodec::with_max_frame_size(8);
        let mut buf = BytesMut::from(&b"NO TERMINATOR HERE"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_error_code_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"217 3\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"217 3\r\n"));
    }
}
