//! The observed-remove set: the workhorse CRDT behind node and edge
//! aliveness.

use crate::dot::Dot;
use std::collections::{BTreeMap, BTreeSet};

/// An observed-remove set over elements of type `T`.
///
/// An element is alive iff it has at least one add-dot that has not been
/// cancelled by a remove that observed it (invariant I2). Removes only
/// cancel the specific add-dots the remover witnessed, so a concurrent add
/// racing a remove always wins (property P2): the new dot was never
/// observed, so it survives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrSet<T: Ord + Clone> {
    add_dots: BTreeMap<T, BTreeSet<Dot>>,
    remove_dots: BTreeMap<T, BTreeSet<Dot>>,
}

impl<T: Ord + Clone> OrSet<T> {
    /// An empty OR-Set.
    pub fn new() -> Self {
        Self {
            add_dots: BTreeMap::new(),
            remove_dots: BTreeMap::new(),
        }
    }

    /// Records an add of `element` tagged by `dot`.
    pub fn add(&mut self, element: T, dot: Dot) {
        self.add_dots.entry(element).or_default().insert(dot);
    }

    /// Records a remove of `element`, cancelling exactly the add-dots in
    /// `observed` (not every add-dot that might exist elsewhere).
    pub fn remove(&mut self, element: T, observed: impl IntoIterator<Item = Dot>) {
        self.remove_dots
            .entry(element)
            .or_default()
            .extend(observed);
    }

    /// The add-dots of `element` not yet cancelled by an observed remove.
    /// This is exactly what a remover should snapshot before emitting a
    /// remove op.
    pub fn alive_dots(&self, element: &T) -> BTreeSet<Dot> {
        let adds = self.add_dots.get(element);
        let removed = self.remove_dots.get(element);
        match (adds, removed) {
            (None, _) => BTreeSet::new(),
            (Some(adds), None) => adds.clone(),
            (Some(adds), Some(removed)) => adds.difference(removed).copied().collect(),
        }
    }

    /// True iff `element` has at least one surviving add-dot.
    pub fn alive(&self, element: &T) -> bool {
        !self.alive_dots(element).is_empty()
    }

    /// Iterates every element with at least one surviving add-dot.
    pub fn iter_alive(&self) -> impl Iterator<Item = &T> {
        self.add_dots
            .keys()
            .filter(move |element| self.alive(element))
    }

    /// Builds an OR-Set directly from its add-dot and remove-dot maps, for
    /// reconstructing a set from a persisted checkpoint.
    pub fn from_parts(
        add_dots: BTreeMap<T, BTreeSet<Dot>>,
        remove_dots: BTreeMap<T, BTreeSet<Dot>>,
    ) -> Self {
        Self { add_dots, remove_dots }
    }

    /// Every element with at least one add-dot on record, alive or not,
    /// together with its add-dots. Used to persist full tombstone history.
    pub fn add_dots(&self) -> &BTreeMap<T, BTreeSet<Dot>> {
        &self.add_dots
    }

    /// Every element with at least one observed remove-dot on record,
    /// together with those dots. Used to persist full tombstone history.
    pub fn remove_dots(&self) -> &BTreeMap<T, BTreeSet<Dot>> {
        &self.remove_dots
    }

    /// Pointwise union of add-dot and remove-dot sets; the CRDT merge.
    pub fn merge(&mut self, other: &Self) {
        for (element, dots) in &other.add_dots {
            self.add_dots
                .entry(element.clone())
                .or_default()
                .extend(dots.iter().copied());
        }
        for (element, dots) in &other.remove_dots {
            self.remove_dots
                .entry(element.clone())
                .or_default()
                .extend(dots.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WriterId;

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    #[test]
    fn fresh_element_is_not_alive() {
        let set: OrSet<&str> = OrSet::new();
        assert!(!set.alive(&"x"));
    }

    #[test]
    fn add_then_alive() {
        let mut set = OrSet::new();
        set.add("x", Dot::new(writer(1), 1));
        assert!(set.alive(&"x"));
    }

    #[test]
    fn remove_observed_dot_kills_it() {
        let mut set = OrSet::new();
        let d1 = Dot::new(writer(1), 1);
        set.add("x", d1);
        set.remove("x", [d1]);
        assert!(!set.alive(&"x"));
    }

    /// P2: concurrent add-after-observed-remove re-adds the element.
    #[test]
    fn concurrent_add_after_remove_wins() {
        let mut set = OrSet::new();
        let d1 = Dot::new(writer(1), 1);
        let d2 = Dot::new(writer(2), 1);
        set.add("x", d1);
        set.remove("x", [d1]);
        set.add("x", d2);
        assert!(set.alive(&"x"));
    }

    #[test]
    fn merge_is_pointwise_union() {
        let mut a = OrSet::new();
        a.add("x", Dot::new(writer(1), 1));
        let mut b = OrSet::new();
        b.add("x", Dot::new(writer(2), 1));
        a.merge(&b);
        assert_eq!(a.alive_dots(&"x").len(), 2);
    }

    #[test]
    fn remove_without_prior_add_observed_is_a_no_op_on_aliveness() {
        let mut set: OrSet<&str> = OrSet::new();
        set.remove("x", [Dot::new(writer(1), 1)]);
        assert!(!set.alive(&"x"));
    }
}
