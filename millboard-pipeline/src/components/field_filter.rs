use crate::filter::{Filter, FilterResult};
use crate::query::{QuerySpec, Record};

/// Keeps records that satisfy every `FieldFilter` of the query.
pub struct FieldPredicateFilter;

impl<R: Record> Filter<QuerySpec, R> for FieldPredicateFilter {
    fn enable(&self, query: &QuerySpec) -> bool {
        !query.filters.is_empty()
    }

    fn filter(&self, query: &QuerySpec, candidates: Vec<R>) -> FilterResult<R> {
        FilterResult::partition(candidates, |record| {
            query.filters.iter().all(|f| f.matches(record))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Field, FieldFilter};
    use crate::types::LeadTimeRecord;

    #[test]
    fn numeric_threshold_on_derived_field() {
        let records = vec![
            LeadTimeRecord::new("A", 10.0, 7.0),
            LeadTimeRecord::new("B", 10.0, 9.5),
            LeadTimeRecord::new("C", 0.0, 0.0),
        ];
        let spec = QuerySpec::default().filter(FieldFilter::at_least(Field::EfficiencyGain, 10.0));
        let result = FieldPredicateFilter.filter(&spec, records);
        assert_eq!(result.kept.len(), 1);
        assert_eq!(result.kept[0].item_code, "A");
        assert_eq!(result.removed.len(), 2);
    }

    #[test]
    fn missing_field_never_matches() {
        let spec = QuerySpec::default().filter(FieldFilter::equals(Field::Stage, "RFM"));
        let result = FieldPredicateFilter.filter(&spec, vec![LeadTimeRecord::new("A", 1.0, 1.0)]);
        assert!(result.kept.is_empty());
    }
}
