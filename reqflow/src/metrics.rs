//! Cost, energy, and timing accumulators.
//!
//! Accumulators are plain functions of (record, rates, stage outputs).
//! Each call is additive; retries inside the refinement loop accumulate
//! on top of earlier iterations, which is intentional: cost and energy
//! reflect the total work a run performed, not just its final attempt.
//! Totals are re-derived from the breakdown maps on every write, so
//! `total_cost == sum(cost_breakdown)` and
//! `total_energy_wh == sum(energy_breakdown)` hold at all times.

use crate::config::ModelRates;
use crate::record::RunRecord;

/// Price a model invocation and add it to the stage's cost bucket.
/// Returns the cost of this single call.
pub fn record_cost(
    record: &mut RunRecord,
    rates: &ModelRates,
    stage: &str,
    model: &str,
    tokens_in: u64,
    tokens_out: u64,
) -> f64 {
    let price = rates.price_for(model);
    let cost = tokens_in as f64 / 1000.0 * price.input_per_1k
        + tokens_out as f64 / 1000.0 * price.output_per_1k;

    *record.cost_breakdown.entry(stage.to_string()).or_insert(0.0) += cost;
    record.total_cost = record.cost_breakdown.values().sum();
    cost
}

/// Estimate the energy of a model invocation and add it to the stage's
/// energy bucket. Returns the watt-hours of this single call.
pub fn record_energy(
    record: &mut RunRecord,
    rates: &ModelRates,
    stage: &str,
    model: &str,
    tokens_in: u64,
    tokens_out: u64,
) -> f64 {
    let coefficient = rates.energy_for(model);
    let tokens = (tokens_in + tokens_out) as f64;
    let energy_wh = tokens / 1000.0 * coefficient * rates.overhead_factor;

    *record
        .energy_breakdown
        .entry(stage.to_string())
        .or_insert(0.0) += energy_wh;
    record.total_energy_wh = record.energy_breakdown.values().sum();
    energy_wh
}

/// Add wall-clock duration to the stage's timing bucket.
pub fn record_timing(record: &mut RunRecord, stage: &str, duration_secs: f64) {
    *record
        .timing_breakdown
        .entry(stage.to_string())
        .or_insert(0.0) += duration_secs;
}
