//! Message framing for the peer link
//!
//! Wire format, applied identically by either side of the stream:
//! - 4 bytes: length (big-endian, includes the type byte)
//! - 1 byte: frame type
//! - N bytes: payload

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (1 MB). A batch is the coalesced pending set for
/// one peer, which is bounded by the graph size, not the update rate.
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    #[error("Frame too small: {0} bytes (min 1)")]
    TooSmall(usize),
    #[error("Unknown frame type: {0}")]
    UnknownType(u8),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A framed message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

/// Frame types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Identity handshake, first frame in each direction
    Hello = 0,
    /// Batch of topology updates
    Updates = 1,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Hello),
            1 => Ok(Self::Updates),
            _ => Err(FrameError::UnknownType(value)),
        }
    }
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self { frame_type, payload }
    }
}

/// Codec for length-prefixed frames
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least 5 bytes (4 length + 1 type)
        if src.len() < 5 {
            return Ok(None);
        }

        // Peek at length
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        // A frame always carries at least the type byte.
        if length < 1 {
            return Err(FrameError::TooSmall(length));
        }

        // Need full frame
        if src.len() < 4 + length {
            return Ok(None);
        }

        src.advance(4);

        let frame_type = FrameType::try_from(src[0])?;
        src.advance(1);

        let payload = src.split_to(length - 1).to_vec();

        Ok(Some(Frame { frame_type, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = 1 + item.payload.len();
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        dst.put_u32(length as u32);
        dst.put_u8(item.frame_type as u8);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let mut codec = FrameCodec::new();
        let frame = Frame::new(FrameType::Updates, vec![1, 2, 3, 4, 5]);

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_frame_waits_for_more() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new(FrameType::Hello, vec![9; 16]), &mut buf)
            .unwrap();

        let mut partial = buf.split_to(7);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(0x7f);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::UnknownType(0x7f))
        ));
    }

    #[test]
    fn test_zero_length_frame_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u8(0);

        assert!(matches!(codec.decode(&mut buf), Err(FrameError::TooSmall(0))));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.put_u8(0);

        assert!(matches!(codec.decode(&mut buf), Err(FrameError::TooLarge(_))));

        let big = Frame::new(FrameType::Updates, vec![0; MAX_FRAME_SIZE]);
        let mut out = BytesMut::new();
        assert!(matches!(
            codec.encode(big, &mut out),
            Err(FrameError::TooLarge(_))
        ));
    }
}
