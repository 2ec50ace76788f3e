use millboard_pipeline::metrics::{lead_time_metrics, stock_metrics};
use millboard_pipeline::query::{run_query, Field, FieldFilter, QueryEngine, QuerySpec, SortSpec};
use millboard_pipeline::types::{
    clamp_lead_times, efficiency_gain, LeadTimeRecord, StockAdequacy, StockRecord,
};
use proptest::prelude::*;

fn stock_items() -> Vec<StockRecord> {
    (0..100)
        .map(|i| StockRecord {
            // Every 14th item code carries the marker, 7 of 100 in total.
            item_code: if i % 14 == 3 {
                format!("x-abc-{i:03}")
            } else {
                format!("ITM-{i:03}")
            },
            stock_adequacy: if i % 2 == 0 {
                StockAdequacy::Adequate
            } else {
                StockAdequacy::OutOfStock
            },
        })
        .collect()
}

#[test]
fn search_abc_first_page_of_five() {
    let items = stock_items();
    let spec = QuerySpec::default().search("ABC").page(1, 5);
    let page = run_query(&items, &spec);

    assert_eq!(page.total_records, 100);
    assert_eq!(page.total_matching, 7);
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.total_pages, 2);
    assert!(page.items.iter().all(|r| r.item_code.contains("abc")));

    let second = run_query(&items, &QuerySpec::default().search("ABC").page(2, 5));
    assert_eq!(second.items.len(), 2);
}

#[test]
fn repeated_queries_are_identical() {
    let items = stock_items();
    let engine = QueryEngine::new();
    let spec = QuerySpec::default()
        .search("itm")
        .filter(FieldFilter::equals(Field::StockAdequacy, "out of stock"))
        .sort(SortSpec::desc(Field::ItemCode))
        .page(3, 7);
    let first = engine.run(&items, &spec);
    let second = engine.run(&items, &spec);
    assert_eq!(first, second);
    assert_eq!(items.len(), 100, "input untouched");
}

#[test]
fn metrics_follow_the_filtered_view() {
    let items = stock_items();
    let page = run_query(&items, &QuerySpec::default().search("abc").page(1, 100));
    let metrics = stock_metrics(&page.items);
    assert_eq!(metrics.total_items, 7);
    assert_eq!(metrics.out_of_stock + metrics.adequate, 7);
}

#[test]
fn efficiency_examples() {
    let record = LeadTimeRecord::new("A", 10.0, 7.0);
    assert!((record.time_saved_days() - 3.0).abs() < 1e-9);
    assert!((record.efficiency_gain_pct() - 30.0).abs() < 1e-9);
    assert_eq!(LeadTimeRecord::new("B", 0.0, 0.0).efficiency_gain_pct(), 0.0);
    let m = lead_time_metrics(&[record]);
    assert!((m.avg_efficiency_gain_pct - 30.0).abs() < 1e-9);
}

proptest! {
    #[test]
    fn clamped_lead_times_never_go_negative(serial in any::<f64>(), parallel in any::<f64>()) {
        let (s, p) = clamp_lead_times(serial, parallel);
        prop_assert!(s >= 0.0);
        prop_assert!(p >= 0.0);
        prop_assert!(p <= s);
        let record = LeadTimeRecord::new("P", serial, parallel);
        prop_assert!(record.time_saved_days() >= 0.0);
        let eff = record.efficiency_gain_pct();
        prop_assert!(eff.is_finite());
        prop_assert!((0.0..=100.0).contains(&eff));
        prop_assert!((eff - efficiency_gain(s, p)).abs() < 1e-9);
    }
}
