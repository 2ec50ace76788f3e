use crate::filter::{Filter, FilterResult};
use crate::query::{QuerySpec, Record};

/// Case-insensitive substring search over each record's search fields.
pub struct SearchFilter;

impl<R: Record> Filter<QuerySpec, R> for SearchFilter {
    fn enable(&self, query: &QuerySpec) -> bool {
        query.search_term().is_some()
    }

    fn filter(&self, query: &QuerySpec, candidates: Vec<R>) -> FilterResult<R> {
        let Some(term) = query.search_term() else {
            return FilterResult::partition(candidates, |_| true);
        };
        FilterResult::partition(candidates, |record| {
            record
                .search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&term))
        })
    }
}
