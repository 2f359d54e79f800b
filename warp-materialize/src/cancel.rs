//! A minimal cancellation signal, checked at suspension points by
//! long-running operations ([`crate::engine::MaterializationEngine::materialize`]
//! among them).

/// An external cancellation signal. Checked, never polled to completion:
/// once `is_cancelled` returns true, the caller must stop at the next
/// checkpointed suspension point and leave no partial writes behind (every
/// write in this system is content-addressed and only becomes visible
/// through a ref CAS, so abandoning an operation before that CAS is safe).
pub trait CancellationToken {
    /// True once cancellation has been requested.
    fn is_cancelled(&self) -> bool;
}

/// A token that never cancels, for callers with no cancellation source.
pub struct Never;

impl CancellationToken for Never {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl CancellationToken for std::sync::atomic::AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(std::sync::atomic::Ordering::Relaxed)
    }
}
