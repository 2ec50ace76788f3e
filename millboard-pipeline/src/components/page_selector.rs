use std::ops::Range;

use crate::query::{QuerySpec, Record, SortDirection};
use crate::selector::{Selector, SortKey};

/// Orders by the query's sort spec and returns the requested 1-based page.
pub struct PageSelector;

impl<R: Record> Selector<QuerySpec, R> for PageSelector {
    fn is_sorted(&self, query: &QuerySpec) -> bool {
        query.sort.is_some()
    }

    fn sort_key(&self, query: &QuerySpec, candidate: &R) -> SortKey {
        let Some(sort) = query.sort else {
            return SortKey::Missing;
        };
        if sort.field.is_numeric() {
            candidate
                .number(sort.field)
                .map(SortKey::Number)
                .unwrap_or(SortKey::Missing)
        } else {
            candidate
                .text(sort.field)
                .first()
                .map(|v| SortKey::text(v))
                .unwrap_or(SortKey::Missing)
        }
    }

    fn descending(&self, query: &QuerySpec) -> bool {
        matches!(
            query.sort.map(|s| s.direction),
            Some(SortDirection::Desc)
        )
    }

    fn window(&self, query: &QuerySpec, total: usize) -> Option<Range<usize>> {
        let size = query.effective_page_size();
        let start = (query.effective_page() - 1).saturating_mul(size).min(total);
        let end = start.saturating_add(size).min(total);
        Some(start..end)
    }
}
