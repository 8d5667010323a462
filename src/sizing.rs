// ─────────────────────────────────────────────────────────────────────────────
// sizing.rs — geometric allocation of a side's budget across grid slots
//
// The weight formula (`w_i = r^i`, normalize, floor-allocate, carry the
// remainder as cache funds) is the one piece of the old quote-ladder math in
// `market_maker.rs` this crate keeps; everything else about that module
// (inventory skew, regime multiplier, shadow fills) belonged to a different
// market-making model and isn't rebuilt here.
// ─────────────────────────────────────────────────────────────────────────────
use crate::config::GridLimits;
use crate::error::GridError;
use crate::order::Side;
use crate::precision::{float_to_int, int_to_float, min_absolute_size};

#[derive(Debug, Clone)]
pub struct SizingResult {
    /// One size per slot, ordered nearest-market (index 0) to outermost.
    pub sizes: Vec<f64>,
    /// Sub-unit remainder left after integer quantization.
    pub cache_funds: f64,
}

/// Geometric weights `w_i = r^i` for `i in [0, slot_count)`, `r = 1 + increment/100`.
pub fn geometric_weights(slot_count: usize, increment_percent: f64) -> Vec<f64> {
    let r = 1.0 + increment_percent / 100.0;
    (0..slot_count).map(|i| r.powi(i as i32)).collect()
}

/// Allocates `budget` across `slot_count` slots nearest-market-first,
/// enforcing each slot size is at least `min_absolute_size(precision)`.
///
/// Deterministic in its inputs: calling this twice with the same
/// `(budget, slot_count, increment_percent, precision)` yields the same
/// `sizes` and `cache_funds` (the sizing idempotence law).
pub fn compute_side_sizes(
    budget: f64,
    slot_count: usize,
    increment_percent: f64,
    precision: u32,
) -> Result<SizingResult, GridError> {
    if slot_count == 0 {
        return Ok(SizingResult {
            sizes: Vec::new(),
            cache_funds: budget,
        });
    }

    let weights = geometric_weights(slot_count, increment_percent);
    let total_weight: f64 = weights.iter().sum();

    let budget_units = float_to_int(budget, precision);
    let mut allocated_units = 0i128;
    let mut sizes_units = Vec::with_capacity(slot_count);

    for w in &weights {
        let share = w / total_weight;
        let units = float_to_int(budget_units as f64 * share, 0).max(0);
        sizes_units.push(units);
        allocated_units += units;
    }

    let min_units = float_to_int(min_absolute_size(precision), precision).max(1);
    for units in &sizes_units {
        if *units < min_units {
            return Err(GridError::InsufficientFundsForMinimum {
                side: String::new(),
                needed: int_to_float(min_units, precision),
                available: int_to_float(*units, precision),
            });
        }
    }

    let remainder_units = (budget_units - allocated_units).max(0);
    let sizes = sizes_units.into_iter().map(|u| int_to_float(u, precision)).collect();
    let cache_funds = int_to_float(remainder_units, precision);

    Ok(SizingResult { sizes, cache_funds })
}

/// Same as `compute_side_sizes` but tags any `InsufficientFundsForMinimum`
/// error with the offending side for better diagnostics.
pub fn compute_side_sizes_for(
    side: Side,
    budget: f64,
    slot_count: usize,
    increment_percent: f64,
    precision: u32,
) -> Result<SizingResult, GridError> {
    compute_side_sizes(budget, slot_count, increment_percent, precision).map_err(|e| match e {
        GridError::InsufficientFundsForMinimum { needed, available, .. } => {
            GridError::InsufficientFundsForMinimum {
                side: format!("{:?}", side),
                needed,
                available,
            }
        }
        other => other,
    })
}

/// Reserves `multiplier * (target_buy + target_sell)` per-order creation
/// fees from a side's budget before sizing, when that side holds the chain's
/// native (fee) asset.
pub fn reserve_fees(
    budget: f64,
    side: Side,
    fee_asset: Side,
    target_buy: usize,
    target_sell: usize,
    limits: &GridLimits,
    single_order_fee: f64,
) -> f64 {
    if side != fee_asset {
        return budget;
    }
    let reservation = limits.bts_reservation_multiplier * single_order_fee * (target_buy + target_sell) as f64;
    (budget - reservation).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_grow_geometrically() {
        let w = geometric_weights(3, 10.0);
        assert_eq!(w.len(), 3);
        assert!((w[0] - 1.0).abs() < 1e-9);
        assert!((w[1] - 1.1).abs() < 1e-9);
        assert!((w[2] - 1.21).abs() < 1e-9);
    }

    #[test]
    fn sizes_sum_plus_cache_equals_budget() {
        let result = compute_side_sizes(100.0, 5, 1.0, 6).unwrap();
        let total: f64 = result.sizes.iter().sum::<f64>() + result.cache_funds;
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn idempotent_for_same_inputs() {
        let a = compute_side_sizes(37.123, 4, 2.5, 5).unwrap();
        let b = compute_side_sizes(37.123, 4, 2.5, 5).unwrap();
        assert_eq!(a.sizes, b.sizes);
        assert_eq!(a.cache_funds, b.cache_funds);
    }

    #[test]
    fn insufficient_budget_for_minimum_errors() {
        let result = compute_side_sizes(0.0000001, 10, 1.0, 2);
        assert!(result.is_err());
    }

    #[test]
    fn zero_slots_returns_full_budget_as_cache() {
        let result = compute_side_sizes(50.0, 0, 1.0, 4).unwrap();
        assert!(result.sizes.is_empty());
        assert_eq!(result.cache_funds, 50.0);
    }
}
