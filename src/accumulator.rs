//! Converts raw usage counts into a priced ledger increment.

use crate::models::{CostDelta, UsageBatch, UsageDimension, UsageRecord};
use crate::pricing::PricingTable;

/// Units of `amount` that fall at or above `threshold`, given `current` units already used.
pub fn billable_units(current: u64, amount: u64, threshold: u64) -> u64 {
    if current >= threshold {
        return amount;
    }
    current
        .saturating_add(amount)
        .saturating_sub(threshold)
        .min(amount)
}

/// Prices `batch` against the all-time `totals` as they stood before the batch.
pub fn compute_delta(
    pricing: &PricingTable,
    totals: &UsageRecord,
    batch: &UsageBatch,
) -> CostDelta {
    let cost_micros = UsageDimension::ALL
        .iter()
        .map(|&dimension| {
            let entry = pricing.entry(dimension);
            billable_units(
                totals.count(dimension),
                batch.count(dimension),
                entry.free_tier_threshold,
            )
            .saturating_mul(entry.unit_price_micros)
        })
        .fold(0u64, u64::saturating_add);

    CostDelta {
        cost_micros,
        usage: *batch,
    }
}
