//! Networking primitives for the linkmap gossip protocol
//!
//! This crate provides:
//! - Length-prefixed message framing over a reliable byte stream
//! - The handshake and update-batch messages the daemon exchanges
//!
//! Any byte stream that speaks this framing is accepted; there is no
//! version negotiation, authentication, or encryption.

pub mod framing;
pub mod messages;

pub use framing::{Frame, FrameCodec, FrameError, FrameType};
pub use messages::{Hello, UpdateBatch, WireError};
