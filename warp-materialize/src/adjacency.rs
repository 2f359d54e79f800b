//! [`AdjacencyProvider`]: a [`NeighborProvider`] reading directly off a
//! materialized [`State`], synchronously.

use crate::neighbor::{Direction, NeighborProvider};
use std::collections::BTreeSet;
use warp_crdt::{Label, NodeId, State};

/// Reads neighbor queries straight from the materialized state's alive
/// edges. No I/O, no caching beyond what `State` itself already holds.
pub struct AdjacencyProvider<'a> {
    state: &'a State,
}

impl<'a> AdjacencyProvider<'a> {
    /// Wraps a materialized state as a neighbor provider.
    pub fn new(state: &'a State) -> Self {
        Self { state }
    }
}

impl<'a> NeighborProvider for AdjacencyProvider<'a> {
    fn has_node(&self, id: &NodeId) -> bool {
        self.state.node_is_alive(id)
    }

    fn get_neighbors(
        &self,
        id: &NodeId,
        direction: Direction,
        labels: Option<&BTreeSet<Label>>,
    ) -> Vec<(NodeId, Label)> {
        if !self.has_node(id) {
            return Vec::new();
        }
        let mut result: BTreeSet<(NodeId, Label)> = BTreeSet::new();
        for edge in self.state.alive_edges() {
            let matches_out = matches!(direction, Direction::Out | Direction::Both) && &edge.from == id;
            let matches_in = matches!(direction, Direction::In | Direction::Both) && &edge.to == id;
            if matches_out {
                result.insert((edge.to.clone(), edge.label.clone()));
            }
            if matches_in {
                result.insert((edge.from.clone(), edge.label.clone()));
            }
        }
        match labels {
            Some(labels) => result
                .into_iter()
                .filter(|(_, label)| labels.contains(label))
                .collect(),
            None => result.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_crdt::{Dot, Ident, WriterId};

    fn ident(s: &str) -> Ident {
        Ident::new(s.as_bytes().to_vec()).unwrap()
    }

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    fn sample_state() -> State {
        let mut state = State::new();
        for n in ["a", "b", "c"] {
            state.node_alive.add(ident(n), Dot::new(writer(1), 1));
        }
        state.edge_alive.add(
            warp_crdt::EdgeKey::new(ident("a"), ident("b"), ident("follows")),
            Dot::new(writer(1), 2),
        );
        state.edge_alive.add(
            warp_crdt::EdgeKey::new(ident("c"), ident("a"), ident("follows")),
            Dot::new(writer(1), 3),
        );
        state
    }

    #[test]
    fn unknown_node_returns_empty() {
        let state = sample_state();
        let provider = AdjacencyProvider::new(&state);
        assert!(provider.get_neighbors(&ident("zzz"), Direction::Out, None).is_empty());
    }

    #[test]
    fn out_direction_follows_source_edges() {
        let state = sample_state();
        let provider = AdjacencyProvider::new(&state);
        let neighbors = provider.get_neighbors(&ident("a"), Direction::Out, None);
        assert_eq!(neighbors, vec![(ident("b"), ident("follows"))]);
    }

    #[test]
    fn both_direction_de_duplicates() {
        let mut state = sample_state();
        // A self-loop so in and out both mention "a" itself.
        state.edge_alive.add(
            warp_crdt::EdgeKey::new(ident("a"), ident("a"), ident("follows")),
            Dot::new(writer(1), 4),
        );
        let provider = AdjacencyProvider::new(&state);
        let neighbors = provider.get_neighbors(&ident("a"), Direction::Both, None);
        assert_eq!(
            neighbors,
            vec![(ident("a"), ident("follows")), (ident("b"), ident("follows")), (ident("c"), ident("follows"))]
        );
    }

    #[test]
    fn label_filter_restricts_results() {
        let mut state = sample_state();
        state.edge_alive.add(
            warp_crdt::EdgeKey::new(ident("a"), ident("c"), ident("blocks")),
            Dot::new(writer(1), 5),
        );
        let provider = AdjacencyProvider::new(&state);
        let mut labels = BTreeSet::new();
        labels.insert(ident("blocks"));
        let neighbors = provider.get_neighbors(&ident("a"), Direction::Out, Some(&labels));
        assert_eq!(neighbors, vec![(ident("c"), ident("blocks"))]);
    }
}
