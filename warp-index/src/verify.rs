//! The sampling verifier: cross-checks a bitmap index against a ground
//! truth recomputed directly from state over a seeded random subset of
//! alive nodes.

use crate::error::Result;
use crate::index::BitmapIndex;
use warp_crdt::{NodeId, State};
use warp_materialize::{AdjacencyProvider, Direction, NeighborProvider};

/// A small, dependency-free PRNG (SplitMix64) so verification runs are
/// reproducible from a bare `u64` seed without pulling in a randomness
/// crate for what is, in the end, a handful of sample draws.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            0
        } else {
            (self.next_u64() % bound as u64) as usize
        }
    }
}

/// The result of a sampling cross-check.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifyReport {
    /// The seed used to draw the sample, for reproducing a failing run.
    pub seed: u64,
    /// The fraction of alive nodes sampled.
    pub sample_rate: f64,
    /// Nodes whose index-reported neighbor set matched the ground truth.
    pub passed: usize,
    /// Nodes whose index-reported neighbor set diverged from the ground
    /// truth.
    pub failed: usize,
    /// The nodes that mismatched, for diagnosis.
    pub mismatches: Vec<NodeId>,
}

/// Draws a seeded, deterministic sample of `state`'s alive nodes (sized to
/// `sample_rate` of the total), and for each one compares the bitmap
/// index's `both`-direction neighbor set against the same query answered
/// directly off `state` via the adjacency provider.
pub fn verify(index: &BitmapIndex, state: &State, seed: u64, sample_rate: f64) -> Result<VerifyReport> {
    let mut nodes: Vec<NodeId> = state.alive_nodes().cloned().collect();
    nodes.sort();

    let sample_rate = sample_rate.clamp(0.0, 1.0);
    let sample_size = ((nodes.len() as f64) * sample_rate).round() as usize;
    let sample_size = sample_size.min(nodes.len());

    let mut rng = SplitMix64::new(seed);
    let n = nodes.len();
    for i in 0..sample_size.min(n.saturating_sub(1)) {
        let j = i + rng.below(n - i);
        nodes.swap(i, j);
    }
    let sample = &nodes[..sample_size];

    let adjacency = AdjacencyProvider::new(state);
    let mut passed = 0;
    let mut failed = 0;
    let mut mismatches = Vec::new();
    for node in sample {
        let expected = adjacency.get_neighbors(node, Direction::Both, None);
        let actual = index.get_neighbors(node, Direction::Both, None)?;
        if expected == actual {
            passed += 1;
        } else {
            failed += 1;
            mismatches.push(node.clone());
        }
    }

    Ok(VerifyReport { seed, sample_rate, passed, failed, mismatches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::IndexService;
    use std::collections::BTreeMap;
    use warp_crdt::{Dot, EdgeKey, Ident, WriterId};
    use warp_store::memory::MemoryStore;

    fn ident(s: &str) -> Ident {
        Ident::new(s.as_bytes().to_vec()).unwrap()
    }

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    fn chain_state(n: usize) -> State {
        let mut state = State::new();
        let mut lamport = 1u64;
        for i in 0..n {
            state.node_alive.add(ident(&format!("n{i}")), Dot::new(writer(1), lamport));
            lamport += 1;
        }
        for i in 0..n - 1 {
            state.edge_alive.add(
                EdgeKey::new(ident(&format!("n{i}")), ident(&format!("n{}", i + 1)), ident("next")),
                Dot::new(writer(1), lamport),
            );
            lamport += 1;
        }
        state
    }

    #[test]
    fn sample_verify_of_a_thousand_node_chain_is_clean() {
        let store = MemoryStore::new();
        let state = chain_state(1000);
        let service = IndexService::new(&store, "g");
        let sha = service.build(&state, BTreeMap::new()).unwrap();
        let index = service.load(Some(sha)).unwrap().unwrap();

        let report = verify(&index, &state, 7, 0.1).unwrap();
        assert_eq!(report.seed, 7);
        assert_eq!(report.failed, 0);
        assert!(report.passed >= 100);
    }

    #[test]
    fn tampering_with_the_index_surfaces_as_a_mismatch() {
        let store = MemoryStore::new();
        let mut state = State::new();
        state.node_alive.add(ident("a"), Dot::new(writer(1), 1));
        state.node_alive.add(ident("b"), Dot::new(writer(1), 2));
        state.edge_alive.add(
            EdgeKey::new(ident("a"), ident("b"), ident("follows")),
            Dot::new(writer(1), 3),
        );
        let service = IndexService::new(&store, "g");
        let sha = service.build(&state, BTreeMap::new()).unwrap();
        let index = service.load(Some(sha)).unwrap().unwrap();

        // Simulate drift: state gains an edge the index was never rebuilt
        // to reflect.
        state.edge_alive.add(
            EdgeKey::new(ident("a"), ident("c"), ident("follows")),
            Dot::new(writer(1), 4),
        );
        state.node_alive.add(ident("c"), Dot::new(writer(1), 5));

        let report = verify(&index, &state, 1, 1.0).unwrap();
        assert!(report.failed >= 1);
        assert!(report.mismatches.contains(&ident("a")));
    }
}
