//! Daemon orchestration: listener, startup dials, shared state

use crate::config::Config;
use crate::session::Session;
use linkmap_core::{Connectivity, Edge, NodeId};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fatal startup errors. Everything after startup is local to one
/// connection and recovered by tearing that connection down.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Failed to dial {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

const INITIAL_ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(5);

/// Daemon state shared by the accept loop and every session.
///
/// `state` is the process-wide lock from the concurrency model: every
/// read or write of the connectivity store or of any per-peer pending
/// set goes through it. Sessions hold the lock only around state
/// transitions, never across socket I/O.
pub struct Daemon {
    us: NodeId,
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Mutex<Connectivity>,
    cancel: CancellationToken,
    dump_graph: bool,
}

impl Daemon {
    /// Bind the listener and initialize an empty connectivity store.
    pub async fn bind(config: &Config) -> Result<Arc<Self>, DaemonError> {
        let us = match &config.node_id {
            Some(id) => NodeId::new(id.clone()),
            None => NodeId::random(),
        };

        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| DaemonError::Bind {
                addr: config.listen,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| DaemonError::Bind {
            addr: config.listen,
            source,
        })?;
        info!(node = %us, listen = %local_addr, "bound listener");

        Ok(Arc::new(Self {
            state: Mutex::new(Connectivity::new(us.clone())),
            us,
            listener,
            local_addr,
            cancel: CancellationToken::new(),
            dump_graph: config.dump_graph,
        }))
    }

    pub fn node_id(&self) -> &NodeId {
        &self.us
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Dial a peer and hand the socket to a new session.
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<(), DaemonError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| DaemonError::Dial { addr, source })?;
        debug!(%addr, "dialed peer");
        self.spawn_session(stream, addr);
        Ok(())
    }

    /// Accept peers until shutdown.
    ///
    /// Transient accept failures are retried with backoff instead of
    /// killing the listener; only shutdown ends the loop.
    pub async fn run(self: Arc<Self>) -> Result<(), DaemonError> {
        let mut backoff = INITIAL_ACCEPT_BACKOFF;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("shutting down");
                    return Ok(());
                }
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => {
                        backoff = INITIAL_ACCEPT_BACKOFF;
                        debug!(%addr, "accepted connection");
                        self.spawn_session(stream, addr);
                    }
                    Err(e) => {
                        warn!("accept error: {e}; retrying in {backoff:?}");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
                    }
                }
            }
        }
    }

    fn spawn_session(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let daemon = self.clone();
        tokio::spawn(async move {
            Session::run(daemon, stream, addr).await;
        });
    }

    /// Cancel the accept loop and every live session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Edges currently believed live, for diagnostics and tests.
    pub fn edges(&self) -> Vec<Edge> {
        self.state.lock().edges()
    }

    /// Peers with a live gossip session.
    pub fn peers(&self) -> Vec<NodeId> {
        self.state.lock().peers()
    }

    /// Render the merged graph. O(graph size) under the process lock.
    pub fn dump(&self) -> String {
        self.state.lock().dump()
    }

    pub(crate) fn state(&self) -> &Mutex<Connectivity> {
        &self.state
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn dump_graph(&self) -> bool {
        self.dump_graph
    }
}
