//! The last-writer-wins register, keyed by an arbitrary `K` and timestamped
//! by [`EventId`].

use crate::event_id::EventId;
use std::collections::BTreeMap;

/// A mapping `key -> (EventId, value)` where a later write only replaces
/// an earlier one if its `EventId` is strictly greater under the total
/// order (property P3). Invariant I4 guarantees ties are impossible for
/// distinct writes, so "strictly greater" is the only comparison needed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Lww<K: Ord + Clone, V: Clone> {
    entries: BTreeMap<K, (EventId, V)>,
}

impl<K: Ord + Clone, V: Clone> Lww<K, V> {
    /// An empty register.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Sets `key` to `value` timestamped by `event_id`, keeping the
    /// existing entry if its timestamp is already greater or equal.
    pub fn set(&mut self, key: K, event_id: EventId, value: V) {
        match self.entries.get(&key) {
            Some((existing, _)) if *existing >= event_id => {}
            _ => {
                self.entries.insert(key, (event_id, value));
            }
        }
    }

    /// Reads the current value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Reads the current `(EventId, value)` pair for `key`, if any.
    pub fn get_with_event(&self, key: &K) -> Option<(&EventId, &V)> {
        self.entries.get(key).map(|(e, v)| (e, v))
    }

    /// Iterates every key currently holding a value.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, (_, v))| (k, v))
    }

    /// Builds a register directly from its `(EventId, value)` entries, for
    /// reconstructing a register from a persisted checkpoint.
    pub fn from_parts(entries: BTreeMap<K, (EventId, V)>) -> Self {
        Self { entries }
    }

    /// Every key with its full `(EventId, value)` pair. Used to persist the
    /// register so a reload can resume LWW comparisons exactly.
    pub fn entries_raw(&self) -> impl Iterator<Item = (&K, &EventId, &V)> {
        self.entries.iter().map(|(k, (e, v))| (k, e, v))
    }

    /// Merges `other` into `self`, keeping the greater `EventId` per key.
    pub fn merge(&mut self, other: &Self) {
        for (key, (event_id, value)) in &other.entries {
            self.set(key.clone(), *event_id, value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WriterId;
    use warp_crypto::Oid;

    fn eid(lamport: u64) -> EventId {
        EventId::new(lamport, WriterId::from_bytes([1; 32]), Oid::hash(b"c"), 0)
    }

    #[test]
    fn later_event_id_wins_applied_in_order() {
        let mut reg = Lww::new();
        reg.set("k", eid(1), "v1");
        reg.set("k", eid(2), "v2");
        assert_eq!(reg.get(&"k"), Some(&"v2"));
    }

    /// P3: reversed application order yields the same result.
    #[test]
    fn later_event_id_wins_applied_out_of_order() {
        let mut reg = Lww::new();
        reg.set("k", eid(2), "v2");
        reg.set("k", eid(1), "v1");
        assert_eq!(reg.get(&"k"), Some(&"v2"));
    }

    #[test]
    fn merge_keeps_the_greater_event_id_per_key() {
        let mut a = Lww::new();
        a.set("k", eid(1), "v1");
        let mut b = Lww::new();
        b.set("k", eid(5), "v5");
        a.merge(&b);
        assert_eq!(a.get(&"k"), Some(&"v5"));
    }
}
