//! linkmapd - cluster connectivity gossip daemon
//!
//! Each daemon instance maintains a local copy of the cluster's
//! connectivity directory and exchanges incremental updates with every
//! peer it holds a live TCP connection to. The propagation engine lives
//! in linkmap-core; this crate provides the transport orchestration:
//! - Accept loop and startup dials
//! - Per-socket reader/writer tasks and the identity handshake
//! - The process-wide lock serializing all state access

pub mod config;
pub mod daemon;
mod session;

pub use config::Config;
pub use daemon::Daemon;
