//! Graph vocabulary for the linkmap mesh
//!
//! All types serialize deterministically via postcard: strings are
//! length-prefixed and sequences count-prefixed, which is exactly the
//! wire shape the update-batch frames carry.

use serde::{Deserialize, Serialize};

/// Cluster-unique node identifier.
///
/// Opaque to the propagation engine; correctness only needs it to be
/// comparable and stable across restarts. Identity is injected by the
/// daemon (configuration or [`NodeId::random`] for throwaway nodes).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random hex identifier for nodes started without a configured one.
    ///
    /// Unique with overwhelming probability, but not stable across
    /// restarts; restarted nodes reappear as a fresh identity.
    pub fn random() -> Self {
        Self(hex::encode(rand::random::<[u8; 8]>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unordered pair of nodes with an observed live link between them.
///
/// The constructor canonicalizes the pair so `{A,B}` and `{B,A}` are the
/// same edge; `a()` always returns the lesser endpoint. Deserialization
/// goes through the constructor too, so a peer sending the endpoints in
/// the other order still merges onto the same graph key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(from = "EdgeWire")]
pub struct Edge {
    a: NodeId,
    b: NodeId,
}

#[derive(Deserialize)]
struct EdgeWire {
    a: NodeId,
    b: NodeId,
}

impl From<EdgeWire> for Edge {
    fn from(wire: EdgeWire) -> Self {
        Edge::new(wire.a, wire.b)
    }
}

impl Edge {
    pub fn new(x: NodeId, y: NodeId) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn a(&self) -> &NodeId {
        &self.a
    }

    pub fn b(&self) -> &NodeId {
        &self.b
    }

    /// Whether `node` is one of the two endpoints.
    pub fn touches(&self, node: &NodeId) -> bool {
        self.a == *node || self.b == *node
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.a, self.b)
    }
}

/// Whether an edge was observed appearing or disappearing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateKind {
    Added = 0,
    Removed = 1,
}

/// One immutable fact about one edge of the topology graph.
///
/// `version` is a per-edge monotone counter assigned by the origin when it
/// locally adds or removes the edge; it drives last-writer-wins merge.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Update {
    pub edge: Edge,
    pub kind: UpdateKind,
    pub origin: NodeId,
    pub version: u64,
}

impl Update {
    /// Merge rule: does `self` replace `stored` for the same edge?
    ///
    /// Strictly-greater version wins; on a version tie, Removed beats
    /// Added; on a full tie the greater origin wins. The last step makes
    /// the order total over distinct updates, so symmetric records minted
    /// by both endpoints of an edge resolve to the same winner on every
    /// node regardless of arrival order. An update never supersedes an
    /// identical one, keeping replay a no-op.
    pub fn supersedes(&self, stored: &Update) -> bool {
        if self.version != stored.version {
            return self.version > stored.version;
        }
        if self.kind != stored.kind {
            return self.kind == UpdateKind::Removed;
        }
        self.origin > stored.origin
    }
}

impl std::fmt::Display for Update {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            UpdateKind::Added => "added",
            UpdateKind::Removed => "removed",
        };
        write!(f, "{} {} v{} by {}", self.edge, kind, self.version, self.origin)
    }
}
