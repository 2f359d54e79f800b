//! Ref naming scheme: `refs/warp/<graph>/...`.

/// Builds the ref names a given graph uses. Kept as free functions on a
/// unit struct so call sites read as `RefLayout::writer("g", "alice")`
/// rather than scattering string formats across every component.
pub struct RefLayout;

impl RefLayout {
    /// The tip of a writer's patch chain.
    pub fn writer(graph: &str, writer: &str) -> String {
        format!("refs/warp/{graph}/writers/{writer}")
    }

    /// The prefix under which every writer ref for a graph lives, for use
    /// with `list_refs` when discovering the writer set.
    pub fn writers_prefix(graph: &str) -> String {
        format!("refs/warp/{graph}/writers/")
    }

    /// The latest checkpoint commit.
    pub fn checkpoint_latest(graph: &str) -> String {
        format!("refs/warp/{graph}/checkpoints/latest")
    }

    /// The latest bitmap-index tree, stored as a commit for durability.
    pub fn index_latest(graph: &str) -> String {
        format!("refs/warp/{graph}/index/latest")
    }

    /// The trust chain tip.
    pub fn trust_records(graph: &str) -> String {
        format!("refs/warp/{graph}/trust/records")
    }

    /// Extracts the writer id from a writer ref name produced by
    /// [`Self::writer`], or `None` if it doesn't match that shape.
    pub fn writer_id_from_ref(graph: &str, ref_name: &str) -> Option<String> {
        ref_name
            .strip_prefix(&Self::writers_prefix(graph))
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_ref_round_trips_through_prefix() {
        let r = RefLayout::writer("g1", "alice");
        assert_eq!(r, "refs/warp/g1/writers/alice");
        assert_eq!(
            RefLayout::writer_id_from_ref("g1", &r),
            Some("alice".to_owned())
        );
    }

    #[test]
    fn unrelated_ref_does_not_match_writer_prefix() {
        assert_eq!(
            RefLayout::writer_id_from_ref("g1", "refs/warp/g1/checkpoints/latest"),
            None
        );
    }
}
