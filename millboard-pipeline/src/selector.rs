use std::cmp::Ordering;
use std::ops::Range;

use crate::util;

/// Owned sort key extracted from a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Number(f64),
    /// Already lower-cased.
    Text(String),
    Missing,
}

impl SortKey {
    pub fn text(raw: &str) -> Self {
        SortKey::Text(raw.to_lowercase())
    }

    fn sorts_last(&self) -> bool {
        match self {
            SortKey::Number(n) => n.is_nan(),
            SortKey::Text(_) => false,
            SortKey::Missing => true,
        }
    }
}

/// Compare two keys in the requested direction. NaN and missing keys go to
/// the end regardless of direction.
pub fn compare_keys(a: &SortKey, b: &SortKey, descending: bool) -> Ordering {
    match (a.sorts_last(), b.sorts_last()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = match (a, b) {
                (SortKey::Number(x), SortKey::Number(y)) => {
                    x.partial_cmp(y).unwrap_or(Ordering::Equal)
                }
                (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
                (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
                (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
                _ => Ordering::Equal,
            };
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
    }
}

/// Selectors order the filtered candidates and cut the visible window.
pub trait Selector<Q, C>: Send + Sync {
    /// Default selection: sort, then slice to the window.
    fn select(&self, query: &Q, candidates: Vec<C>) -> Vec<C> {
        let sorted = if self.is_sorted(query) {
            self.sort(query, candidates)
        } else {
            candidates
        };
        match self.window(query, sorted.len()) {
            Some(range) => sorted
                .into_iter()
                .skip(range.start)
                .take(range.end.saturating_sub(range.start))
                .collect(),
            None => sorted,
        }
    }

    /// Whether the query asks for any ordering. Unsorted queries keep the
    /// input order.
    fn is_sorted(&self, _query: &Q) -> bool {
        true
    }

    /// Extract the key to sort a candidate by.
    fn sort_key(&self, query: &Q, candidate: &C) -> SortKey;

    fn descending(&self, query: &Q) -> bool;

    /// Stable sort by `sort_key`: ties keep their input order.
    fn sort(&self, query: &Q, candidates: Vec<C>) -> Vec<C> {
        let mut keyed: Vec<(SortKey, C)> = candidates
            .into_iter()
            .map(|c| (self.sort_key(query, &c), c))
            .collect();
        let descending = self.descending(query);
        keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, descending));
        keyed.into_iter().map(|(_, c)| c).collect()
    }

    /// Index range of the sorted candidates to return. Defaults to all.
    fn window(&self, _query: &Q, _total: usize) -> Option<Range<usize>> {
        None
    }

    /// Returns a stable name for logging.
    fn name(&self) -> &str {
        util::short_type_name(std::any::type_name::<Self>())
    }
}
