use crate::util;

/// Result of a filter operation, partitioning candidates into kept and removed.
pub struct FilterResult<C> {
    pub kept: Vec<C>,
    pub removed: Vec<C>,
}

impl<C> FilterResult<C> {
    /// Partition `candidates` by `keep`, preserving order on both sides.
    pub fn partition(candidates: Vec<C>, keep: impl FnMut(&C) -> bool) -> Self {
        let (kept, removed) = candidates.into_iter().partition(keep);
        Self { kept, removed }
    }
}

/// Filters run sequentially and partition candidates into kept and removed sets.
///
/// Filters are pure: the same query and candidates always give the same
/// partition, so a view can be recomputed from scratch on every change.
pub trait Filter<Q, C>: Send + Sync {
    /// Decide if this filter should run for the given query.
    fn enable(&self, _query: &Q) -> bool {
        true
    }

    /// Kept candidates continue to the next stage; removed ones are excluded
    /// from the view.
    fn filter(&self, query: &Q, candidates: Vec<C>) -> FilterResult<C>;

    /// Returns a stable name for logging.
    fn name(&self) -> &str {
        util::short_type_name(std::any::type_name::<Self>())
    }
}
