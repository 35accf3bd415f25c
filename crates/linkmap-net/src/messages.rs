//! Protocol messages carried inside frames
//!
//! Payloads are postcard-encoded: node ids are length-prefixed strings and
//! update batches are count-prefixed sequences.

use crate::framing::{Frame, FrameType};
use linkmap_core::{NodeId, Update};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message decoding errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Unexpected frame type: expected {expected:?}, got {got:?}")]
    UnexpectedType { expected: FrameType, got: FrameType },
    #[error("Decode error: {0}")]
    Decode(#[from] postcard::Error),
}

/// Identity handshake, sent once in each direction at connection start.
///
/// Neither side processes updates on a connection before it has seen the
/// peer's hello.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    pub node: NodeId,
}

/// One coalesced batch of topology updates.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateBatch {
    pub updates: Vec<Update>,
}

impl Hello {
    pub fn to_frame(&self) -> Result<Frame, WireError> {
        let payload = postcard::to_allocvec(self)?;
        Ok(Frame::new(FrameType::Hello, payload))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, WireError> {
        if frame.frame_type != FrameType::Hello {
            return Err(WireError::UnexpectedType {
                expected: FrameType::Hello,
                got: frame.frame_type,
            });
        }
        Ok(postcard::from_bytes(&frame.payload)?)
    }
}

impl UpdateBatch {
    pub fn to_frame(&self) -> Result<Frame, WireError> {
        let payload = postcard::to_allocvec(self)?;
        Ok(Frame::new(FrameType::Updates, payload))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, WireError> {
        if frame.frame_type != FrameType::Updates {
            return Err(WireError::UnexpectedType {
                expected: FrameType::Updates,
                got: frame.frame_type,
            });
        }
        Ok(postcard::from_bytes(&frame.payload)?)
    }
}
