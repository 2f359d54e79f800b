//! [`NeighborProvider`]: the uniform capability set over adjacency queries
//! (component L), implemented here by [`crate::adjacency::AdjacencyProvider`]
//! and by the bitmap index in `warp-index`.

use std::collections::BTreeSet;
use warp_crdt::{Label, NodeId};

/// Which side of an edge to traverse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Follow edges where the queried node is the source.
    Out,
    /// Follow edges where the queried node is the destination.
    In,
    /// Follow both, de-duplicated by `(neighborId, label)`.
    Both,
}

/// A uniform neighbor query interface. `NodeId` and `Label` are plain,
/// totally ordered byte strings (no prototype chain to confuse, unlike a
/// host-object map keyed by arbitrary strings), so identifiers like
/// `"__proto__"` or `"constructor"` are ordinary keys here.
pub trait NeighborProvider {
    /// True iff `id` is a known, alive node.
    fn has_node(&self, id: &NodeId) -> bool;

    /// Neighbors of `id` in the given `direction`, optionally filtered to
    /// a label set. Results are sorted by `(neighborId, label)` codepoint
    /// order (property P11). An unknown node yields an empty result, never
    /// an error. Unlabeled edges carry `label = ""`.
    fn get_neighbors(
        &self,
        id: &NodeId,
        direction: Direction,
        labels: Option<&BTreeSet<Label>>,
    ) -> Vec<(NodeId, Label)>;
}
