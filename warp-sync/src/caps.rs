//! DoS caps applied to every inbound sync-response before a single patch
//! is applied.

/// Resource limits a sync-response is validated against. All four are
/// configurable; the defaults mirror the public spec's stated values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DoSCaps {
    /// Maximum distinct writers named in a frontier.
    pub max_writers_in_frontier: usize,
    /// Maximum patches in a single response.
    pub max_patches: usize,
    /// Maximum ops in a single patch.
    pub max_ops_per_patch: usize,
    /// Maximum encoded body size, in bytes.
    pub max_body_bytes: usize,
}

impl Default for DoSCaps {
    fn default() -> Self {
        Self {
            max_writers_in_frontier: 1024,
            max_patches: 10_000,
            max_ops_per_patch: 10_000,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let caps = DoSCaps::default();
        assert_eq!(caps.max_writers_in_frontier, 1024);
        assert_eq!(caps.max_patches, 10_000);
        assert_eq!(caps.max_ops_per_patch, 10_000);
        assert_eq!(caps.max_body_bytes, 10 * 1024 * 1024);
    }
}
