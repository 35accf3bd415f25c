//! Connectivity propagation engine
//!
//! One [`Connectivity`] per process holds the merged topology graph and one
//! [`Connection`] per live peer. Local changes and received batches are
//! merged last-writer-wins per edge and fanned out as pending deltas to
//! every other peer; each peer's writer drains its pending set with
//! [`Connection::outgoing`] / [`Connection::delivered`].
//!
//! The engine is synchronous and lock-free by itself. All methods must be
//! called under the daemon's process-wide lock; the only thing that escapes
//! the lock is the wake callback, which must therefore never block.

use crate::types::{Edge, NodeId, Update, UpdateKind};
use std::collections::HashMap;

/// Gossip session state for one peer.
///
/// Owned exclusively by [`Connectivity`]; reached through it by peer id.
pub struct Connection {
    peer: NodeId,
    /// Updates not yet handed to the writer, keyed by edge so a newer
    /// update for an edge coalesces over the older one.
    pending: HashMap<Edge, Update>,
    /// The batch currently being written to the socket, if any.
    in_flight: Option<Vec<Update>>,
    wake: Option<Box<dyn Fn() + Send + Sync>>,
    closed: bool,
}

impl Connection {
    fn new(peer: NodeId) -> Self {
        Self {
            peer,
            pending: HashMap::new(),
            in_flight: None,
            wake: None,
            closed: false,
        }
    }

    pub fn peer(&self) -> &NodeId {
        &self.peer
    }

    /// Register the wake callback.
    ///
    /// The callback is a level-triggered hint, not a queue: it fires at
    /// least once whenever pending work exists, and the consumer always
    /// re-reads the full pending set. If work is already pending at
    /// registration time it fires immediately, so a writer registered
    /// after the connection was seeded does not sleep forever.
    pub fn set_wake(&mut self, wake: impl Fn() + Send + Sync + 'static) {
        if !self.pending.is_empty() {
            wake();
        }
        self.wake = Some(Box::new(wake));
    }

    /// Queue an update for this peer and wake the writer.
    pub(crate) fn mark_pending(&mut self, update: Update) {
        if self.closed {
            return;
        }
        if let Some(stored) = self.pending.get(&update.edge) {
            if !update.supersedes(stored) {
                return;
            }
        }
        self.pending.insert(update.edge.clone(), update);
        if let Some(wake) = &self.wake {
            wake();
        }
    }

    /// Take the current pending set for flushing.
    ///
    /// Moves it to in-flight; returns `None` while a previous batch is
    /// still in flight, so a connection is never flushed twice
    /// concurrently. The batch is sorted by edge for a deterministic
    /// wire order.
    pub fn outgoing(&mut self) -> Option<Vec<Update>> {
        if self.closed || self.in_flight.is_some() || self.pending.is_empty() {
            return None;
        }
        let mut batch: Vec<Update> = self.pending.drain().map(|(_, u)| u).collect();
        batch.sort_by(|x, y| x.edge.cmp(&y.edge));
        self.in_flight = Some(batch.clone());
        Some(batch)
    }

    /// Mark a flushed batch as written to the socket.
    ///
    /// Only the exact outstanding batch clears the in-flight slot.
    /// Updates that went pending while the flush was in progress stay
    /// pending for the next [`Connection::outgoing`].
    pub fn delivered(&mut self, batch: &[Update]) {
        if self.in_flight.as_deref() == Some(batch) {
            self.in_flight = None;
        }
    }

    /// Tear down session bookkeeping. Idempotent.
    fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
        self.in_flight = None;
        self.wake = None;
    }
}

/// Per-process store of the believed cluster topology.
///
/// The graph maps each known edge to the latest update seen for it; the
/// merge is commutative, associative, and idempotent, so replicas
/// converge regardless of delivery order or replay.
pub struct Connectivity {
    us: NodeId,
    graph: HashMap<Edge, Update>,
    peers: HashMap<NodeId, Connection>,
}

impl Connectivity {
    /// Empty graph, no peers.
    pub fn new(us: NodeId) -> Self {
        Self {
            us,
            graph: HashMap::new(),
            peers: HashMap::new(),
        }
    }

    pub fn us(&self) -> &NodeId {
        &self.us
    }

    /// Resolve the connection for a peer after its handshake completed.
    ///
    /// Returns the existing connection if the peer is already live.
    /// Otherwise creates one, seeds its pending set with the entire
    /// current graph (a reconnecting peer re-learns anything lost in
    /// flight on the previous session), records a fresh `Added` update
    /// for our edge to the peer, and fans that out to every other live
    /// connection. The new peer itself does not need the echo.
    pub fn connect(&mut self, peer: NodeId) -> &mut Connection {
        if self.peers.contains_key(&peer) {
            return self.peers.get_mut(&peer).unwrap();
        }

        let mut conn = Connection::new(peer.clone());
        for update in self.graph.values() {
            conn.mark_pending(update.clone());
        }
        self.peers.insert(peer.clone(), conn);

        let edge = Edge::new(self.us.clone(), peer.clone());
        let update = Update {
            kind: UpdateKind::Added,
            origin: self.us.clone(),
            version: self.next_version(&edge),
            edge,
        };
        if self.apply(&update) {
            self.fan_out(&update, Some(&peer));
        }

        self.peers.get_mut(&peer).unwrap()
    }

    /// Apply a batch received from `from`.
    ///
    /// Updates that do not advance the graph are dropped silently; the
    /// rest are fanned out to every connection except the source.
    pub fn receive(&mut self, from: &NodeId, updates: Vec<Update>) {
        for update in updates {
            if self.apply(&update) {
                self.fan_out(&update, Some(from));
            }
        }
    }

    /// Tear down the connection to `peer`.
    ///
    /// If our edge to the peer is currently `Added`, synthesizes a
    /// `Removed` update with a fresh version and gossips it to the
    /// remaining connections. Closing an absent peer is a no-op.
    pub fn close(&mut self, peer: &NodeId) {
        let Some(mut conn) = self.peers.remove(peer) else {
            return;
        };
        conn.close();

        let edge = Edge::new(self.us.clone(), peer.clone());
        match self.graph.get(&edge) {
            Some(stored) if stored.kind == UpdateKind::Added => {
                let update = Update {
                    kind: UpdateKind::Removed,
                    origin: self.us.clone(),
                    version: stored.version + 1,
                    edge,
                };
                if self.apply(&update) {
                    self.fan_out(&update, None);
                }
            }
            _ => {}
        }
    }

    pub fn connection_mut(&mut self, peer: &NodeId) -> Option<&mut Connection> {
        self.peers.get_mut(peer)
    }

    /// Whether a live connection to `peer` is registered.
    pub fn is_connected(&self, peer: &NodeId) -> bool {
        self.peers.contains_key(peer)
    }

    /// Currently live peers, sorted.
    pub fn peers(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Edges currently believed live, sorted.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .graph
            .values()
            .filter(|u| u.kind == UpdateKind::Added)
            .map(|u| u.edge.clone())
            .collect();
        edges.sort();
        edges
    }

    /// Diagnostic snapshot of the merged graph.
    ///
    /// O(graph size); the daemon gates it behind a debug flag because it
    /// runs under the process-wide lock.
    pub fn dump(&self) -> String {
        if self.graph.is_empty() {
            return "(empty)".to_string();
        }
        let mut updates: Vec<&Update> = self.graph.values().collect();
        updates.sort_by(|x, y| x.edge.cmp(&y.edge));
        let lines: Vec<String> = updates.iter().map(|u| u.to_string()).collect();
        lines.join("; ")
    }

    /// Version for a locally originated update on `edge`: one past
    /// whatever we currently store, so it dominates anything the cluster
    /// holds for that edge.
    fn next_version(&self, edge: &Edge) -> u64 {
        self.graph.get(edge).map_or(1, |u| u.version + 1)
    }

    /// Merge one update into the graph. Returns whether state advanced.
    fn apply(&mut self, update: &Update) -> bool {
        match self.graph.get(&update.edge) {
            Some(stored) if !update.supersedes(stored) => false,
            _ => {
                self.graph.insert(update.edge.clone(), update.clone());
                true
            }
        }
    }

    /// Mark an applied update pending on every connection except `skip`.
    fn fan_out(&mut self, update: &Update, skip: Option<&NodeId>) {
        for (peer, conn) in self.peers.iter_mut() {
            if Some(peer) != skip {
                conn.mark_pending(update.clone());
            }
        }
    }
}
