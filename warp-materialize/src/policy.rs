//! Auto-checkpoint and garbage-collection policy configuration.

/// Governs automatic checkpoint creation after a `materialize()` call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CheckpointPolicy {
    /// Create a new checkpoint once at least this many patches have been
    /// folded since the last one. `None` disables auto-checkpointing.
    pub every: Option<u64>,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self { every: None }
    }
}

/// Governs automatic compaction after a `materialize()` call.
///
/// Compaction is triggered when the tombstone ratio (remove-dots over
/// add-dots) exceeds `tombstone_ratio_threshold` and at least
/// `min_patches_since_compaction` patches have been folded since the last
/// compaction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GcPolicy {
    /// The tombstone ratio above which compaction becomes eligible.
    pub tombstone_ratio_threshold: f64,
    /// The minimum number of freshly folded patches before compaction can
    /// trigger again, even if the ratio stays above threshold.
    pub min_patches_since_compaction: u64,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            tombstone_ratio_threshold: 0.3,
            min_patches_since_compaction: 1,
        }
    }
}

/// Configuration for a [`crate::engine::MaterializationEngine`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterializeOptions {
    /// If true, a read against dirty cached state triggers an implicit
    /// `materialize()` first.
    pub auto_materialize: bool,
    /// If true (and `auto_materialize` is false), a read against dirty
    /// cached state fails with `QUERY_STALE_STATE` instead of serving the
    /// stale snapshot.
    pub strict_stale: bool,
    /// Gates whether `materialize()` evaluates the checkpoint and GC
    /// policies automatically after folding.
    pub auto_policies: bool,
    /// The checkpoint policy.
    pub checkpoint_policy: CheckpointPolicy,
    /// The garbage-collection policy.
    pub gc_policy: GcPolicy,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            auto_materialize: true,
            strict_stale: false,
            auto_policies: true,
            checkpoint_policy: CheckpointPolicy::default(),
            gc_policy: GcPolicy::default(),
        }
    }
}
