//! The deterministic fold of patches into a [`State`] (component F).

use crate::edge_key::EdgeKey;
use crate::event_id::EventId;
use crate::patch::{Op, Patch};
use crate::state::State;
use warp_crypto::Oid;

/// A patch together with the commit sha it was read from. `reduce` needs
/// the sha to build each op's [`EventId`] and to establish the canonical
/// patch ordering.
#[derive(Clone, Debug)]
pub struct PatchRecord {
    /// The commit sha the patch blob was stored under.
    pub commit_sha: Oid,
    /// The decoded patch.
    pub patch: Patch,
}

/// Applies a single op to `state`, timestamped by `event_id`.
///
/// This is the only place that knows how an [`Op`] variant maps onto a
/// [`State`] field; everything else treats ops opaquely.
pub fn apply_op(state: &mut State, op: &Op, event_id: EventId) {
    match op {
        Op::NodeAdd { node, dot } => {
            state.node_alive.add(node.clone(), *dot);
        }
        Op::NodeRemove { node, observed_dots } => {
            state.node_alive.remove(node.clone(), observed_dots.iter().copied());
        }
        Op::EdgeAdd { from, to, label, dot } => {
            let key = EdgeKey::new(from.clone(), to.clone(), label.clone());
            state.edge_alive.add(key, *dot);
        }
        Op::EdgeRemove { from, to, label, observed_dots } => {
            let key = EdgeKey::new(from.clone(), to.clone(), label.clone());
            state.edge_alive.remove(key, observed_dots.iter().copied());
        }
        Op::PropSet { scope, key, value } => {
            state
                .node_props
                .set((scope.clone(), key.clone()), event_id, value.clone());
        }
        Op::EdgePropSet { from, to, label, key, value } => {
            let edge = EdgeKey::new(from.clone(), to.clone(), label.clone());
            state
                .edge_props
                .set((edge, key.clone()), event_id, value.clone());
        }
    }
}

/// Sorts patch records into the canonical order required for a
/// deterministic fold: by `(lamport, writer, commit_sha)` lexicographically.
///
/// Two peers folding the same patch set in any starting order converge to
/// the same `State` once both apply this sort first (property P1).
pub fn canonical_order(records: &mut [PatchRecord]) {
    records.sort_by(|a, b| {
        (a.patch.lamport, a.patch.writer, a.commit_sha).cmp(&(
            b.patch.lamport,
            b.patch.writer,
            b.commit_sha,
        ))
    });
}

/// Folds a set of patches into a state, starting from `initial` (or an
/// empty state if `None`).
///
/// `records` is sorted into canonical order internally, so callers may
/// pass patches in any order (including concurrently collected order from
/// multiple writer chains).
pub fn reduce(mut records: Vec<PatchRecord>, initial: Option<State>) -> State {
    canonical_order(&mut records);
    let mut state = initial.unwrap_or_default();
    for record in &records {
        for (index, op) in record.patch.ops.iter().enumerate() {
            let event_id = EventId::new(
                record.patch.lamport,
                record.patch.writer,
                record.commit_sha,
                index as u32,
            );
            apply_op(&mut state, op, event_id);
        }
        state.version_vector = state.version_vector.join(&record.patch.context);
        state.version_vector.update(record.patch.writer, record.patch.lamport);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;
    use crate::ids::{Ident, WriterId};
    use crate::version_vector::VersionVector;
    use proptest::prelude::*;

    fn ident(s: &str) -> Ident {
        Ident::new(s.as_bytes().to_vec()).unwrap()
    }

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    fn patch_record(writer_id: WriterId, lamport: u64, sha_seed: &[u8], ops: Vec<Op>) -> PatchRecord {
        PatchRecord {
            commit_sha: Oid::hash(sha_seed),
            patch: Patch {
                schema: crate::patch::PATCH_SCHEMA,
                writer: writer_id,
                lamport,
                context: VersionVector::new(),
                ops,
                reads: None,
                writes: None,
                signature: None,
            },
        }
    }

    #[test]
    fn two_writer_convergence() {
        let p1 = patch_record(
            writer(1),
            1,
            b"p1",
            vec![Op::NodeAdd { node: ident("u:a"), dot: Dot::new(writer(1), 1) }],
        );
        let p2 = patch_record(
            writer(2),
            1,
            b"p2",
            vec![
                Op::NodeAdd { node: ident("u:b"), dot: Dot::new(writer(2), 1) },
                Op::EdgeAdd {
                    from: ident("u:a"),
                    to: ident("u:b"),
                    label: ident("follows"),
                    dot: Dot::new(writer(2), 2),
                },
            ],
        );
        let state_a = reduce(vec![p1.clone(), p2.clone()], None);
        let state_b = reduce(vec![p2, p1], None);
        assert_eq!(warp_codec::encode(&state_a.to_value()), warp_codec::encode(&state_b.to_value()));
        assert!(state_a.node_is_alive(&ident("u:a")));
        assert!(state_a.node_is_alive(&ident("u:b")));
        assert_eq!(state_a.alive_edges().count(), 1);
    }

    #[test]
    fn concurrent_remove_and_add_favors_the_add() {
        let dot1 = Dot::new(writer(1), 1);
        let dot2 = Dot::new(writer(2), 2);
        let add1 = patch_record(writer(1), 1, b"a1", vec![Op::NodeAdd { node: ident("x"), dot: dot1 }]);
        let remove = patch_record(
            writer(1),
            2,
            b"a2",
            vec![Op::NodeRemove { node: ident("x"), observed_dots: [dot1].into_iter().collect() }],
        );
        let add2 = patch_record(writer(2), 2, b"b1", vec![Op::NodeAdd { node: ident("x"), dot: dot2 }]);
        let state = reduce(vec![add1, remove, add2], None);
        assert!(state.node_is_alive(&ident("x")));
    }

    proptest! {
        /// P1: the fold is order-independent after canonical sort.
        #[test]
        fn convergence_is_independent_of_input_order(seed in 0u8..6) {
            let p1 = patch_record(writer(1), 1, b"x1", vec![Op::NodeAdd { node: ident("a"), dot: Dot::new(writer(1), 1) }]);
            let p2 = patch_record(writer(2), 1, b"x2", vec![Op::NodeAdd { node: ident("b"), dot: Dot::new(writer(2), 1) }]);
            let p3 = patch_record(writer(3), 1, b"x3", vec![Op::NodeAdd { node: ident("c"), dot: Dot::new(writer(3), 1) }]);
            let mut perms = vec![
                vec![p1.clone(), p2.clone(), p3.clone()],
                vec![p2.clone(), p3.clone(), p1.clone()],
                vec![p3.clone(), p1.clone(), p2.clone()],
                vec![p1.clone(), p3.clone(), p2.clone()],
                vec![p2.clone(), p1.clone(), p3.clone()],
                vec![p3.clone(), p2.clone(), p1.clone()],
            ];
            let records = perms.remove((seed % 6) as usize);
            let reference = reduce(vec![p1, p2, p3], None);
            let permuted = reduce(records, None);
            prop_assert_eq!(warp_codec::encode(&reference.to_value()), warp_codec::encode(&permuted.to_value()));
        }
    }
}
