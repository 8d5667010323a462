// ─────────────────────────────────────────────────────────────────────────────
// divergence.rs — ratio/RMS tests and the copy-on-write resize builder
//
// Two cheap-then-structural tests decide whether a side's grid has drifted
// far enough from its ideal geometric shape to warrant a resize. The actual
// resize is built against a cloned working grid and only ever merged back
// in by the caller after chain submission succeeds — the same commit
// discipline `manager::commit_working` enforces generally, applied here to
// the specific "which sizes changed" computation.
// ─────────────────────────────────────────────────────────────────────────────
use crate::chain::PlannedOp;
use crate::config::GridLimits;
use crate::grid::{Funds, Grid};
use crate::order::{Side, SlotState, SlotType};
use crate::precision::int_eq;
use crate::sizing::geometric_weights;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTypeFlag {
    Buy,
    Sell,
    Both,
}

#[derive(Debug, Clone)]
pub struct DivergenceReport {
    pub needs_update: bool,
    pub buy: bool,
    pub sell: bool,
    pub order_type: Option<OrderTypeFlag>,
}

/// Cheap ratio test: pending funds (whichever is larger of cache funds or
/// available-for-side) as a percentage of the side's allocation.
pub fn ratio_test(funds: &Funds, side: Side, limits: &GridLimits) -> bool {
    let side_funds = funds.side(side);
    if side_funds.allocated <= 0.0 {
        return false;
    }
    let pending = side_funds.cache_funds.max(side_funds.chain_free);
    let pct = pending / side_funds.allocated * 100.0;
    pct >= limits.grid_regeneration_percentage
}

/// Structural RMS test: `100 * sqrt(mean(((ideal - actual) / actual)^2))`
/// over the side's active/partial slots, compared against the ideal
/// geometric sizes for that many slots. A threshold of 0 disables the test.
pub fn rms_test(grid: &Grid, funds: &Funds, side: Side, increment_percent: f64, limits: &GridLimits) -> bool {
    if limits.rms_percentage <= 0.0 {
        return false;
    }
    let slot_type = match side {
        Side::Buy => SlotType::Buy,
        Side::Sell => SlotType::Sell,
    };
    let mut actual: Vec<f64> = grid
        .by_type(slot_type)
        .filter(|s| s.is_placed())
        .map(|s| s.size)
        .collect();
    if actual.is_empty() {
        return false;
    }
    // `by_type` is always ascending price; for BUY that's farthest-to-nearest,
    // so reverse to line actual[0] up with the nearest-market ideal weight.
    if side == Side::Buy {
        actual.reverse();
    }
    let weights = geometric_weights(actual.len(), increment_percent);
    let total_weight: f64 = weights.iter().sum();
    let budget = funds.side(side).allocated;
    let ideal: Vec<f64> = weights.iter().map(|w| budget * (w / total_weight)).collect();

    let mean_sq: f64 = ideal
        .iter()
        .zip(actual.iter())
        .map(|(i, a)| {
            if *a == 0.0 {
                0.0
            } else {
                ((i - a) / a).powi(2)
            }
        })
        .sum::<f64>()
        / actual.len() as f64;
    let rms_pct = 100.0 * mean_sq.sqrt();
    rms_pct > limits.rms_percentage
}

/// Runs both tests for both sides and folds the results into a single report.
pub fn run_divergence_checks(grid: &Grid, funds: &Funds, increment_percent: f64, limits: &GridLimits) -> DivergenceReport {
    let buy = ratio_test(funds, Side::Buy, limits) || rms_test(grid, funds, Side::Buy, increment_percent, limits);
    let sell = ratio_test(funds, Side::Sell, limits) || rms_test(grid, funds, Side::Sell, increment_percent, limits);

    let order_type = match (buy, sell) {
        (true, true) => Some(OrderTypeFlag::Both),
        (true, false) => Some(OrderTypeFlag::Buy),
        (false, true) => Some(OrderTypeFlag::Sell),
        (false, false) => None,
    };

    DivergenceReport {
        needs_update: buy || sell,
        buy,
        sell,
        order_type,
    }
}

pub struct WorkingUpdate {
    pub actions: Vec<PlannedOp>,
    pub working_grid: Grid,
    pub working_funds: Funds,
    pub base_version: u64,
}

/// §4.F `updateGridFromBlockchainSnapshot`. Clones the committed grid,
/// recomputes geometric sizes for the flagged side(s), and accumulates
/// `Update` actions only for slots whose *integer* size actually changed.
/// Expansion of an active/partial slot is capped by the side's free
/// balance; shrinkage releases freed balance into a running pool spent by
/// later (outward) slots on the same side. Virtual slots get their new
/// target directly, uncapped. Returns `None` if nothing would change.
pub fn update_grid_from_blockchain_snapshot(
    grid: &Grid,
    funds: &Funds,
    report: &DivergenceReport,
    increment_percent: f64,
    precision_a: u32,
    precision_b: u32,
    base_version: u64,
) -> Option<WorkingUpdate> {
    let mut working_grid = grid.clone();
    let mut working_funds = funds.clone();
    let mut actions = Vec::new();

    let sides: Vec<Side> = match report.order_type {
        Some(OrderTypeFlag::Both) => vec![Side::Buy, Side::Sell],
        Some(OrderTypeFlag::Buy) => vec![Side::Buy],
        Some(OrderTypeFlag::Sell) => vec![Side::Sell],
        None => return None,
    };

    for side in sides {
        let slot_type = match side {
            Side::Buy => SlotType::Buy,
            Side::Sell => SlotType::Sell,
        };
        let precision = match side {
            Side::Buy => precision_b,
            Side::Sell => precision_a,
        };

        let ids = working_grid.slot_ids_nearest_market_first(slot_type, side);
        let weights = geometric_weights(ids.len(), increment_percent);
        let total_weight: f64 = weights.iter().sum();
        let budget: f64 = working_funds.side(side).allocated;

        let mut free_pool = working_funds.side(side).chain_free;

        for (id, w) in ids.iter().zip(weights.iter()) {
            let ideal = budget * (w / total_weight);
            let slot = working_grid.slot(id).unwrap().clone();

            let new_size = if slot.state == SlotState::Virtual {
                ideal
            } else if ideal >= slot.size {
                let affordable = (ideal - slot.size).min(free_pool.max(0.0));
                free_pool -= affordable;
                slot.size + affordable
            } else {
                let released = slot.size - ideal;
                free_pool += released;
                ideal
            };

            if int_eq(new_size, slot.size, precision) {
                continue;
            }

            let mut updated = slot.clone();
            updated.size = new_size;

            if slot.is_placed() {
                actions.push(PlannedOp::Update {
                    slot_id: slot.id.clone(),
                    chain_order_id: slot.order_id.clone().unwrap_or_default(),
                    params: crate::chain::UpdateOrderParams {
                        amount_to_sell: new_size,
                        min_to_receive: new_size * slot.price,
                        new_price: Some(slot.price),
                        order_type: Some(side),
                    },
                });
            }
            working_grid.apply_order_update(&mut working_funds, updated, false, 0.0).ok()?;
        }
        working_funds.side_mut(side).chain_free = free_pool;
    }

    if actions.is_empty() {
        return None;
    }

    Some(WorkingUpdate {
        actions,
        working_grid,
        working_funds,
        base_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridLimits;

    #[test]
    fn ratio_test_flags_when_pending_exceeds_threshold() {
        let mut funds = Funds::default();
        funds.buy.allocated = 100.0;
        funds.buy.cache_funds = 20.0;
        let limits = GridLimits::default();
        assert!(ratio_test(&funds, Side::Buy, &limits));
    }

    #[test]
    fn ratio_test_quiet_when_allocation_zero() {
        let funds = Funds::default();
        let limits = GridLimits::default();
        assert!(!ratio_test(&funds, Side::Buy, &limits));
    }

    #[test]
    fn rms_flags_large_structural_divergence() {
        let limits = GridLimits::default();
        let config = crate::config::GridConfig {
            min_price: 0.90,
            max_price: 1.10,
            increment_percent: 0.5,
            target_spread_percent: 2.0,
            ..Default::default()
        };
        let mut grid = crate::grid::create_order_grid(&config, 1.0, &limits).unwrap();
        let buy_ids: Vec<String> = grid.by_type(SlotType::Buy).map(|s| s.id.clone()).collect();
        let mut funds = Funds::default();
        funds.buy.allocated = buy_ids.len() as f64 * 2.0;
        for (i, id) in buy_ids.iter().enumerate() {
            let mut slot = grid.slot(id).unwrap().clone();
            slot.state = SlotState::Active;
            slot.order_id = Some(format!("1.7.{i}"));
            slot.size = if i == 0 { 0.1 } else { 1.0 };
            grid.apply_order_update(&mut funds, slot, true, 0.0).unwrap();
        }
        assert!(rms_test(&grid, &funds, Side::Buy, 0.5, &limits));
    }
}
