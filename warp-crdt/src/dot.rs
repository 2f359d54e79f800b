//! [`Dot`]: a globally unique tag on a single OR-Set add.

use crate::ids::WriterId;
use std::fmt;

/// A unique tag `(writer, lamport)` identifying one add operation.
///
/// Dot uniqueness (invariant I3) follows from the lamport counter being
/// strictly monotonic per writer; this type itself is just the pair.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dot {
    /// The writer that produced this dot.
    pub writer: WriterId,
    /// The writer-local lamport counter at the time of the add.
    pub lamport: u64,
}

impl Dot {
    /// Builds a dot from a writer id and lamport counter.
    pub fn new(writer: WriterId, lamport: u64) -> Self {
        Self { writer, lamport }
    }
}

impl fmt::Debug for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?},{})", self.writer, self.lamport)
    }
}
