use std::io::Write;

use crate::types::ParallelizationPair;

pub const PAIR_CSV_HEADER: [&str; 10] = [
    "Item 1",
    "Item 2",
    "Item 1 Urgency",
    "Item 2 Urgency",
    "Machine 1",
    "Machine 2",
    "Sequential Time",
    "Parallel Time",
    "Time Saved",
    "Efficiency Gain",
];

fn days(value: f64) -> String {
    format!("{value:.1}")
}

/// Write `pairs` as CSV with a header row. Returns the number of data rows.
pub fn write_pairs_csv<W: Write>(writer: W, pairs: &[ParallelizationPair]) -> Result<usize, csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(PAIR_CSV_HEADER)?;
    for pair in pairs {
        let sequential = days(pair.sequential_time_days);
        let parallel = days(pair.parallel_time_days);
        let saved = days(pair.time_saved_days());
        let efficiency = format!("{:.1}%", pair.efficiency_gain_pct());
        out.write_record([
            pair.item_a.item_code.as_str(),
            pair.item_b.item_code.as_str(),
            pair.item_a.urgency.as_str(),
            pair.item_b.urgency.as_str(),
            pair.item_a.machines.as_str(),
            pair.item_b.machines.as_str(),
            sequential.as_str(),
            parallel.as_str(),
            saved.as_str(),
            efficiency.as_str(),
        ])?;
    }
    out.flush()?;
    Ok(pairs.len())
}
