//! linkmap core library
//!
//! This crate provides the propagation engine for the linkmap connectivity
//! mesh: the merged topology graph, the per-peer gossip sessions, and the
//! convergent merge rule that keeps every replica's view consistent.
//!
//! # Modules
//!
//! - [`types`]: Graph vocabulary (NodeId, Edge, Update)
//! - [`propagation`]: Connectivity store and per-peer Connections
//!
//! The engine performs no I/O and holds no locks; the daemon wraps one
//! [`propagation::Connectivity`] in its process-wide mutex.

pub mod propagation;
pub mod types;

pub use propagation::{Connection, Connectivity};
pub use types::{Edge, NodeId, Update, UpdateKind};
