//! One gossip session per socket: handshake, reader, writer, teardown
//!
//! Each socket gets a pair of tasks, one per direction. The writer sends
//! our hello and then flushes pending batches whenever the wake signal
//! fires; the reader resolves the peer's identity and applies incoming
//! batches. Whichever side exits first performs the one-shot close; the
//! other observes it already done.

use crate::daemon::Daemon;
use futures::{SinkExt, StreamExt};
use linkmap_core::NodeId;
use linkmap_net::framing::{FrameCodec, FrameError};
use linkmap_net::messages::{Hello, UpdateBatch, WireError};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
enum SessionError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
    #[error("Peer presented our own node id")]
    SelfConnection,
    #[error("Already connected to {0}")]
    AlreadyConnected(NodeId),
}

type Reader = FramedRead<OwnedReadHalf, FrameCodec>;
type Writer = FramedWrite<OwnedWriteHalf, FrameCodec>;

pub(crate) struct Session {
    daemon: Arc<Daemon>,
    cancel: CancellationToken,
    /// Level-triggered wake signal; its single stored permit coalesces
    /// any number of pending-set notifications into one writer pass.
    wake: Arc<Notify>,
    /// Set once the handshake resolves; None means no Connection was
    /// ever registered and teardown must not touch the store.
    peer: Mutex<Option<NodeId>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) async fn run(daemon: Arc<Daemon>, stream: TcpStream, addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let session = Arc::new(Session {
            cancel: daemon.cancel_token().child_token(),
            daemon,
            wake: Arc::new(Notify::new()),
            peer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let writer = session.clone();
        tokio::spawn(async move {
            let result = writer
                .write_side(FramedWrite::new(write_half, FrameCodec::new()))
                .await;
            if writer.close() {
                if let Err(e) = result {
                    warn!(%addr, "write side failed: {e}");
                }
            }
        });

        let result = session
            .read_side(FramedRead::new(read_half, FrameCodec::new()))
            .await;
        if session.close() {
            match result {
                Ok(()) => debug!(%addr, "connection closed"),
                Err(e) => warn!(%addr, "read side failed: {e}"),
            }
        }
    }

    /// Send our identity, then flush pending batches on every wake.
    async fn write_side(&self, mut sink: Writer) -> Result<(), SessionError> {
        let hello = Hello {
            node: self.daemon.node_id().clone(),
        };
        sink.send(hello.to_frame()?).await?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = self.wake.notified() => {}
            }
            self.flush_pending(&mut sink).await?;
        }
    }

    async fn flush_pending(&self, sink: &mut Writer) -> Result<(), SessionError> {
        let Some(peer) = self.peer.lock().clone() else {
            return Ok(());
        };
        let batch = {
            let mut state = self.daemon.state().lock();
            state.connection_mut(&peer).and_then(|conn| conn.outgoing())
        };
        let Some(batch) = batch else {
            return Ok(());
        };

        // The socket write happens outside the process lock; one slow
        // peer must not stall every other connection's state transitions.
        let frame = UpdateBatch {
            updates: batch.clone(),
        }
        .to_frame()?;
        sink.send(frame).await?;

        let mut state = self.daemon.state().lock();
        if let Some(conn) = state.connection_mut(&peer) {
            conn.delivered(&batch);
        }
        Ok(())
    }

    /// Resolve the peer's identity, then apply incoming batches.
    async fn read_side(&self, mut frames: Reader) -> Result<(), SessionError> {
        let Some(frame) = self.next_frame(&mut frames).await? else {
            // Stream ended before the handshake; nothing to tear down.
            return Ok(());
        };
        let hello = Hello::from_frame(&frame)?;
        if hello.node == *self.daemon.node_id() {
            return Err(SessionError::SelfConnection);
        }
        let peer = hello.node;
        debug!(%peer, "handshake complete");

        {
            let mut state = self.daemon.state().lock();
            // Crossed dials produce two sockets for one peer. The session
            // that registered first keeps the Connection; this younger
            // socket goes away without ever touching the store (our peer
            // slot stays None, so close() leaves the survivor alone).
            if state.is_connected(&peer) {
                return Err(SessionError::AlreadyConnected(peer));
            }
            let wake = self.wake.clone();
            let conn = state.connect(peer.clone());
            conn.set_wake(move || wake.notify_one());
            *self.peer.lock() = Some(peer.clone());
        }

        loop {
            let Some(frame) = self.next_frame(&mut frames).await? else {
                return Ok(());
            };
            let batch = UpdateBatch::from_frame(&frame)?;
            let mut state = self.daemon.state().lock();
            state.receive(&peer, batch.updates);
            if self.daemon.dump_graph() {
                debug!(graph = %state.dump(), "graph after receive");
            }
        }
    }

    /// Next frame, or None on cancellation or clean end of stream.
    async fn next_frame(&self, frames: &mut Reader) -> Result<Option<linkmap_net::Frame>, SessionError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(None),
            frame = frames.next() => match frame {
                None => Ok(None),
                Some(frame) => Ok(Some(frame?)),
            },
        }
    }

    /// One-shot teardown shared by both directions.
    ///
    /// Returns whether this call performed the close; the loser of the
    /// swap returns without touching anything, so concurrent reader and
    /// writer failures remove the peer exactly once.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        if let Some(peer) = self.peer.lock().clone() {
            debug!(%peer, "peer disconnected");
            self.daemon.state().lock().close(&peer);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn daemon(node_id: &str) -> Arc<Daemon> {
        let config = Config {
            listen: "127.0.0.1:0".parse().unwrap(),
            node_id: Some(node_id.to_string()),
            peers: vec![],
            dump_graph: false,
            verbose: false,
        };
        Daemon::bind(&config).await.unwrap()
    }

    fn session_for(daemon: Arc<Daemon>) -> Arc<Session> {
        Arc::new(Session {
            cancel: daemon.cancel_token().child_token(),
            daemon,
            wake: Arc::new(Notify::new()),
            peer: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn test_close_runs_exactly_once() {
        let daemon = daemon("a").await;
        let session = session_for(daemon.clone());
        {
            let mut state = daemon.state().lock();
            state.connect(NodeId::from("b"));
            *session.peer.lock() = Some(NodeId::from("b"));
        }

        // Reader and writer fail at the same time; only one of the two
        // teardown calls may reach the store.
        let racers: Vec<_> = (0..2)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.close() })
            })
            .collect();
        let mut wins = 0;
        for racer in racers {
            if racer.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert!(session.cancel.is_cancelled());
        assert!(daemon.peers().is_empty());
        assert_eq!(daemon.dump(), "a<->b removed v2 by a");
    }

    #[tokio::test]
    async fn test_close_without_handshake_leaves_store_alone() {
        let daemon = daemon("a").await;
        let session = session_for(daemon.clone());

        assert!(session.close());
        assert!(!session.close());
        assert_eq!(daemon.dump(), "(empty)");
    }
}
