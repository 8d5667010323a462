// ─────────────────────────────────────────────────────────────────────────────
// spread.rs — spread correction: detect a widened inside market and repair it
//
// Decisioning runs against a read-only grid reference (the caller holds the
// grid lock just long enough to take it); the planned op is handed back for
// the caller to submit to the chain *after* releasing the lock, the same
// split `reconcile.rs` uses for its own batch submission.
// ─────────────────────────────────────────────────────────────────────────────
use crate::chain::{PlannedOp, UpdateOrderParams};
use crate::config::GridLimits;
use crate::grid::{Funds, Grid};
use crate::order::{Side, Slot, SlotState, SlotType};
use crate::precision::{double_dust_threshold, min_absolute_size_for_side};
use crate::sizing::geometric_weights;

/// `(bestAsk - bestBid) / bestBid * 100` over chain-backed (active/partial)
/// orders only. Returns `None` if either side has no chain-backed order.
pub fn current_spread_percent(grid: &Grid) -> Option<f64> {
    let best_bid = grid
        .by_type(SlotType::Buy)
        .filter(|s| s.is_placed())
        .map(|s| s.price)
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));
    let best_ask = grid
        .by_type(SlotType::Sell)
        .filter(|s| s.is_placed())
        .map(|s| s.price)
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));

    match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => Some((ask - bid) / bid * 100.0),
        _ => None,
    }
}

/// `ceil(ln(1+current/100)/ln(1+increment/100) - ln(1+nominal/100)/ln(1+increment/100)) - toleranceSteps`,
/// clamped to 0. Either side missing a chain-backed order forces a result of 1
/// regardless of the spread math — load-bearing, preserved from the source
/// this behavior traces back to.
pub fn out_of_spread(
    grid: &Grid,
    increment_percent: f64,
    target_spread_percent: f64,
    buy_doubled: bool,
    sell_doubled: bool,
) -> i64 {
    let current = match current_spread_percent(grid) {
        Some(c) => c,
        None => return 1,
    };
    let doubled_state = if buy_doubled || sell_doubled { 1.0 } else { 0.0 };
    let nominal = target_spread_percent + increment_percent * doubled_state;
    let tolerance_steps = 1 + buy_doubled as i64 + sell_doubled as i64;

    let s = 1.0 + increment_percent / 100.0;
    let current_steps = (1.0 + current / 100.0).ln() / s.ln();
    let nominal_steps = (1.0 + nominal / 100.0).ln() / s.ln();
    let raw = (current_steps - nominal_steps).ceil() as i64 - tolerance_steps;
    raw.max(0)
}

#[derive(Debug, Clone)]
pub struct SpreadCorrectionPlan {
    pub side: Side,
    pub slot_id: String,
    pub target_size: f64,
    pub op: PlannedOp,
    pub was_spread_slot: bool,
}

fn ideal_size_for_slot(grid: &Grid, side: Side, increment_percent: f64, allocated: f64) -> f64 {
    let slot_type = match side {
        Side::Buy => SlotType::Buy,
        Side::Sell => SlotType::Sell,
    };
    let count = grid.by_type(slot_type).count().max(1);
    let weights = geometric_weights(count, increment_percent);
    let total: f64 = weights.iter().sum();
    // Uses the innermost slot's share as the representative "ideal" for a
    // freshly activated edge/partial slot, matching the nearest-market weight.
    allocated * (weights[0] / total)
}

/// §4.G edge-based candidate selection and sizing. Picks whichever side can
/// afford the correction, prefers an existing PARTIAL nearest the gap, else
/// the SPREAD slot nearest that side's wall, and rejects the candidate if
/// the funded size would still be below the double-dust floor.
pub fn plan_spread_correction(
    grid: &Grid,
    funds: &Funds,
    increment_percent: f64,
    target_spread_percent: f64,
    limits: &GridLimits,
    precision_a: u32,
    precision_b: u32,
    buy_doubled: bool,
    sell_doubled: bool,
) -> Option<SpreadCorrectionPlan> {
    if out_of_spread(grid, increment_percent, target_spread_percent, buy_doubled, sell_doubled) <= 0 {
        return None;
    }

    let candidate_side = [Side::Buy, Side::Sell]
        .into_iter()
        .max_by(|a, b| funds.side(*a).chain_free.partial_cmp(&funds.side(*b).chain_free).unwrap())?;

    let min_size = min_absolute_size_for_side(candidate_side, precision_a, precision_b);
    let available = funds.side(candidate_side).chain_free;
    if available < min_size {
        log::info!("[SPREAD] neither side can fund even one unit, skipping correction");
        return None;
    }

    let slot_type = match candidate_side {
        Side::Buy => SlotType::Buy,
        Side::Sell => SlotType::Sell,
    };
    let ideal = ideal_size_for_slot(grid, candidate_side, increment_percent, funds.side(candidate_side).allocated);

    let partial = pick_partial_nearest_gap(grid, slot_type, candidate_side);
    let (slot, was_spread_slot, target_size) = if let Some(slot) = partial {
        let target = slot.size + (ideal - slot.size).max(0.0).min(available);
        (slot, false, target)
    } else {
        let spread_slot = pick_spread_slot_nearest_wall(grid, candidate_side)?;
        let target = ideal.min(available);
        (spread_slot, true, target)
    };

    if target_size < min_size.max(double_dust_threshold(ideal, limits.partial_dust_threshold_percentage)) {
        log::info!("[SPREAD] candidate slot {} below double-dust floor, skipping", slot.id);
        return None;
    }

    let op = if was_spread_slot {
        let (sell_asset, receive_asset) = match candidate_side {
            Side::Buy => ("asset_b".to_string(), "asset_a".to_string()),
            Side::Sell => ("asset_a".to_string(), "asset_b".to_string()),
        };
        PlannedOp::Create {
            slot_id: slot.id.clone(),
            amount_to_sell: target_size,
            sell_asset_id: sell_asset,
            min_to_receive: target_size * slot.price,
            receive_asset_id: receive_asset,
        }
    } else {
        PlannedOp::Update {
            slot_id: slot.id.clone(),
            chain_order_id: slot.order_id.clone().unwrap_or_default(),
            params: UpdateOrderParams {
                amount_to_sell: target_size,
                min_to_receive: target_size * slot.price,
                new_price: Some(slot.price),
                order_type: Some(candidate_side),
            },
        }
    };

    Some(SpreadCorrectionPlan {
        side: candidate_side,
        slot_id: slot.id.clone(),
        target_size,
        op,
        was_spread_slot,
    })
}

fn pick_partial_nearest_gap(grid: &Grid, slot_type: SlotType, side: Side) -> Option<Slot> {
    let mut partials: Vec<&Slot> = grid
        .by_type(slot_type)
        .filter(|s| s.state == SlotState::Partial)
        .collect();
    match side {
        Side::Buy => partials.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap()), // highest price = nearest gap
        Side::Sell => partials.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap()), // lowest price = nearest gap
    }
    partials.first().map(|s| (*s).clone())
}

fn pick_spread_slot_nearest_wall(grid: &Grid, side: Side) -> Option<Slot> {
    let mut spreads: Vec<&Slot> = grid.by_type(SlotType::Spread).collect();
    match side {
        Side::Buy => spreads.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap()), // lowest = nearest buy wall
        Side::Sell => spreads.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap()), // highest = nearest sell wall
    }
    spreads.first().map(|s| (*s).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, GridLimits};

    fn grid_with_gap() -> Grid {
        let config = GridConfig {
            min_price: 0.90,
            max_price: 1.10,
            increment_percent: 0.5,
            target_spread_percent: 2.0,
            ..Default::default()
        };
        crate::grid::create_order_grid(&config, 1.0, &GridLimits::default()).unwrap()
    }

    #[test]
    fn missing_side_forces_out_of_spread_one() {
        let grid = grid_with_gap();
        assert_eq!(out_of_spread(&grid, 0.5, 2.0, false, false), 1);
    }

    #[test]
    fn worked_example_gives_two_steps() {
        // currentSpread=3.5%, nominal=2%, tolerance=1, increment=0.5% -> 2
        let s = 1.005_f64;
        let current_steps = (1.035_f64).ln() / s.ln();
        let nominal_steps = (1.02_f64).ln() / s.ln();
        let raw = (current_steps - nominal_steps).ceil() as i64 - 1;
        assert_eq!(raw.max(0), 2);
    }

    #[test]
    fn plan_skipped_when_neither_side_funded() {
        let grid = grid_with_gap();
        let funds = Funds::default();
        let limits = GridLimits::default();
        let plan = plan_spread_correction(&grid, &funds, 0.5, 2.0, &limits, 8, 8, false, false);
        assert!(plan.is_none());
    }
}
