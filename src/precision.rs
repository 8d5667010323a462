// ─────────────────────────────────────────────────────────────────────────────
// precision.rs — integer/float quantization for on-chain asset amounts
//
// Every comparison on a slot's size is meant to happen on the integer
// representation so float drift never flips an equality. `floatToInt` /
// `intToFloat` / `quantize` are the three primitives everything else in the
// crate builds on.
// ─────────────────────────────────────────────────────────────────────────────
use crate::order::Side;

/// Above this integer-unit magnitude a size is treated as data corruption
/// rather than a legitimate on-chain amount (see `BlockchainSyncSuspicious`).
pub const SUSPICIOUS_INT_THRESHOLD: i128 = 1_000_000_000_000_000;

/// `floor(x * 10^p)`. `p` is the asset's decimal precision.
pub fn float_to_int(x: f64, precision: u32) -> i128 {
    let scale = 10f64.powi(precision as i32);
    (x * scale).floor() as i128
}

/// `n / 10^p`.
pub fn int_to_float(n: i128, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    n as f64 / scale
}

/// Round-trips `x` through the integer representation, discarding anything
/// finer than the asset's precision.
pub fn quantize(x: f64, precision: u32) -> f64 {
    int_to_float(float_to_int(x, precision), precision)
}

/// Smallest strictly-positive quantity distinguishable from zero at `precision`.
pub fn min_absolute_size(precision: u32) -> f64 {
    int_to_float(1, precision)
}

/// `(dust_pct / 100) * ideal`. `dust_pct` is
/// `GridLimits::partial_dust_threshold_percentage`, not a fraction.
pub fn single_dust_threshold(ideal: f64, dust_pct: f64) -> f64 {
    (dust_pct / 100.0) * ideal
}

/// `2 * single_dust_threshold(ideal, dust_pct)`.
pub fn double_dust_threshold(ideal: f64, dust_pct: f64) -> f64 {
    2.0 * single_dust_threshold(ideal, dust_pct)
}

/// Integer-unit equality, immune to float noise below `precision`.
pub fn int_eq(a: f64, b: f64, precision: u32) -> bool {
    float_to_int(a, precision) == float_to_int(b, precision)
}

/// Fails the amount as corrupt if its integer-unit magnitude is implausibly
/// large. Used when ingesting raw on-chain sizes during reconciliation.
pub fn check_not_suspicious(amount: f64, precision: u32, context: &str) -> Result<(), crate::error::GridError> {
    let units = float_to_int(amount.abs(), precision);
    if units > SUSPICIOUS_INT_THRESHOLD {
        return Err(crate::error::GridError::BlockchainSyncSuspicious(format!(
            "{context}: amount {amount} ({units} units) exceeds sanity threshold"
        )));
    }
    Ok(())
}

/// The side-appropriate minimum size given a pair of asset precisions.
pub fn min_absolute_size_for_side(side: Side, precision_a: u32, precision_b: u32) -> f64 {
    match side {
        Side::Buy => min_absolute_size(precision_b),
        Side::Sell => min_absolute_size(precision_a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_to_int_floors() {
        assert_eq!(float_to_int(1.23456, 4), 12345);
        assert_eq!(float_to_int(0.00009, 4), 0);
    }

    #[test]
    fn quantize_truncates_to_precision() {
        assert_eq!(quantize(1.23456, 2), 1.23);
    }

    #[test]
    fn int_eq_ignores_sub_precision_noise() {
        assert!(int_eq(1.000000001, 1.0, 6));
        assert!(!int_eq(1.01, 1.0, 6));
    }

    #[test]
    fn suspicious_amount_flagged() {
        assert!(check_not_suspicious(1.0, 8, "test").is_ok());
        assert!(check_not_suspicious(1.0e10, 8, "test").is_err());
    }
}
