// ─────────────────────────────────────────────────────────────────────────────
// grid.rs — grid data model: creation, role assignment, mutation discipline
//
// The grid itself is an immutable, price-ascending sequence of slots; a
// `Grid` value here is always a committed (or about-to-be-committed) snapshot.
// `GridManager` (manager.rs) is the thing that owns a `Grid` behind a lock and
// performs the copy-on-write swap — this module only knows how to build one
// and how to fold a single slot mutation into one consistently.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::{GridConfig, GridLimits};
use crate::error::GridError;
use crate::order::{Side, Slot, SlotState, SlotType};

/// Per-side funds bookkeeping. `chain_free` + `committed` must equal the
/// side's on-chain total; `cache_funds` is the sub-unit remainder left after
/// integer-quantized sizing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SideFunds {
    pub chain_free: f64,
    pub committed: f64,
    pub cache_funds: f64,
    pub allocated: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Funds {
    pub buy: SideFunds,
    pub sell: SideFunds,
    pub bts_fees_owed: f64,
}

impl Funds {
    pub fn side(&self, side: Side) -> &SideFunds {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideFunds {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }
}

/// A price-ascending, role-partitioned sequence of slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    slots: Vec<Slot>,
    by_type: HashMap<SlotType, Vec<usize>>,
    by_state: HashMap<SlotState, Vec<usize>>,
    pub boundary_idx: usize,
    pub target_spread_count: usize,
    pub current_spread_count: usize,
}

impl Grid {
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, id: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.id == id)
    }

    pub fn by_type(&self, t: SlotType) -> impl Iterator<Item = &Slot> {
        self.by_type.get(&t).into_iter().flatten().map(move |&i| &self.slots[i])
    }

    pub fn by_state(&self, s: SlotState) -> impl Iterator<Item = &Slot> {
        self.by_state.get(&s).into_iter().flatten().map(move |&i| &self.slots[i])
    }

    /// Ids of a role's slots ordered nearest-market first, matching the
    /// convention `sizing::geometric_weights` assumes (index 0 nearest
    /// market). `by_type` itself is always ascending price: for SELL that is
    /// already nearest-to-farthest, but for BUY the nearest-market slot (the
    /// one closest to the boundary) has the *highest* price and sits last,
    /// so the BUY list needs reversing before it is zipped against weights.
    pub fn slot_ids_nearest_market_first(&self, t: SlotType, side: Side) -> Vec<String> {
        let mut ids: Vec<String> = self.by_type(t).map(|s| s.id.clone()).collect();
        if side == Side::Buy {
            ids.reverse();
        }
        ids
    }

    /// Rebuilds the type/state indexes from scratch. Called whenever the
    /// slot vector itself changes shape (creation, load); per-slot mutation
    /// afterward goes through `apply_order_update`, which keeps them in sync
    /// incrementally instead.
    fn reindex(&mut self) {
        self.by_type.clear();
        self.by_state.clear();
        for (i, slot) in self.slots.iter().enumerate() {
            self.by_type.entry(slot.slot_type).or_default().push(i);
            self.by_state.entry(slot.state).or_default().push(i);
        }
    }

    /// Invariant 1: strictly ascending prices, no duplicate ids.
    pub fn check_monotonic(&self) -> bool {
        let mut ids = std::collections::HashSet::new();
        self.slots.windows(2).all(|w| w[0].price < w[1].price) && self.slots.iter().all(|s| ids.insert(&s.id))
    }

    /// Invariant 2: three contiguous role zones, buy then spread then sell,
    /// with at least one slot of each trading role.
    pub fn check_role_contiguity(&self) -> bool {
        let types: Vec<SlotType> = self.slots.iter().map(|s| s.slot_type).collect();
        let mut seen_spread = false;
        let mut seen_sell = false;
        let mut buy_count = 0;
        let mut sell_count = 0;
        for t in &types {
            match t {
                SlotType::Buy => {
                    if seen_spread || seen_sell {
                        return false;
                    }
                    buy_count += 1;
                }
                SlotType::Spread => {
                    seen_spread = true;
                    if seen_sell {
                        return false;
                    }
                }
                SlotType::Sell => {
                    seen_sell = true;
                    sell_count += 1;
                }
            }
        }
        buy_count > 0 && sell_count > 0
    }

    /// Invariant 3, checked grid-wide: no slot violates the
    /// state/order-id coherence rule.
    pub fn check_no_phantoms(&self) -> bool {
        self.slots.iter().all(|s| !s.is_phantom())
    }

    /// Folds a single slot mutation into the grid, keeping the type/state
    /// indexes consistent with the slot's new shape and, unless
    /// `skip_accounting` is set, adjusting `funds` for the realized change in
    /// committed size: `committed` moves by the delta between the old and
    /// new placed size, `chain_free` moves opposite it, and `fee` (if any)
    /// is added to `bts_fees_owed`. The side charged is whichever of the old
    /// or new slot resolves one via `Slot::side` — the old slot's side wins
    /// so a downgrade (which clears `effective_side`) still credits the side
    /// that held the commitment.
    pub fn apply_order_update(
        &mut self,
        funds: &mut Funds,
        updated: Slot,
        skip_accounting: bool,
        fee: f64,
    ) -> Result<(), GridError> {
        let idx = self
            .index_of(&updated.id)
            .ok_or_else(|| GridError::ChainOperationFailure(format!("no such slot {}", updated.id)))?;

        let old_type = self.slots[idx].slot_type;
        let old_state = self.slots[idx].state;
        let old_committed = if self.slots[idx].is_placed() { self.slots[idx].size } else { 0.0 };
        let accounting_side = self.slots[idx].side().or_else(|| updated.side());

        self.slots[idx] = updated;

        let new_type = self.slots[idx].slot_type;
        let new_state = self.slots[idx].state;
        let new_committed = if self.slots[idx].is_placed() { self.slots[idx].size } else { 0.0 };

        if old_type != new_type {
            if let Some(v) = self.by_type.get_mut(&old_type) {
                v.retain(|&i| i != idx);
            }
            self.by_type.entry(new_type).or_default().push(idx);
        }
        if old_state != new_state {
            if let Some(v) = self.by_state.get_mut(&old_state) {
                v.retain(|&i| i != idx);
            }
            self.by_state.entry(new_state).or_default().push(idx);
        }

        if !skip_accounting {
            if let Some(side) = accounting_side {
                let delta = new_committed - old_committed;
                let side_funds = funds.side_mut(side);
                side_funds.committed += delta;
                side_funds.chain_free -= delta;
                if fee > 0.0 {
                    funds.bts_fees_owed += fee;
                }
            }
        }
        Ok(())
    }
}

/// `gap_slots = max(min_spread_orders, ceil(ln(1+target/100)/ln(1+increment/100)))`,
/// with `target` first coerced to at least `increment * min_spread_factor`.
pub fn calculate_gap_slots(increment_percent: f64, target_spread_percent: f64, limits: &GridLimits) -> usize {
    let target = target_spread_percent.max(increment_percent * limits.min_spread_factor);
    let s = 1.0 + increment_percent / 100.0;
    let raw = ((1.0 + target / 100.0).ln() / s.ln()).ceil();
    (raw as usize).max(limits.min_spread_orders)
}

fn validate_config(config: &GridConfig, start_price: f64, limits: &GridLimits) -> Result<(), GridError> {
    if !start_price.is_finite() || !config.min_price.is_finite() || !config.max_price.is_finite() {
        return Err(GridError::InvalidGridConfig("non-finite price bound".into()));
    }
    if start_price <= 0.0 || config.min_price <= 0.0 || config.max_price <= 0.0 {
        return Err(GridError::InvalidGridConfig("prices must be positive".into()));
    }
    if !(config.min_price < start_price && start_price < config.max_price) {
        return Err(GridError::InvalidGridConfig(
            "require min_price < start_price < max_price".into(),
        ));
    }
    if config.increment_percent < limits.min_increment_percent || config.increment_percent > limits.max_increment_percent {
        return Err(GridError::InvalidGridConfig(format!(
            "increment_percent {} outside [{}, {}]",
            config.increment_percent, limits.min_increment_percent, limits.max_increment_percent
        )));
    }
    Ok(())
}

/// Builds a fresh, all-virtual grid from a validated config and start price.
pub fn create_order_grid(config: &GridConfig, start_price: f64, limits: &GridLimits) -> Result<Grid, GridError> {
    validate_config(config, start_price, limits)?;

    let s = 1.0 + config.increment_percent / 100.0;
    let mut prices = vec![start_price];

    let mut up = start_price * s.sqrt();
    while up <= config.max_price {
        prices.push(up);
        up *= s;
    }
    let mut down = start_price * (1.0 / s).sqrt();
    while down >= config.min_price {
        prices.push(down);
        down /= s;
    }

    prices.sort_by(|a, b| a.partial_cmp(b).unwrap());
    prices.dedup_by(|a, b| (*a - *b).abs() < 1e-12);

    let split_idx = prices.iter().position(|&p| p >= start_price).unwrap_or(prices.len());
    if split_idx == 0 || split_idx >= prices.len() {
        return Err(GridError::InvalidGridConfig(
            "grid bounds produce no slots on one side of the market".into(),
        ));
    }

    let gap_slots = calculate_gap_slots(config.increment_percent, config.target_spread_percent, limits);
    let boundary_idx = split_idx.saturating_sub(gap_slots / 2).saturating_sub(1);

    let mut slots = Vec::with_capacity(prices.len());
    for (i, price) in prices.into_iter().enumerate() {
        let slot_type = if i <= boundary_idx {
            SlotType::Buy
        } else if i <= boundary_idx + gap_slots {
            SlotType::Spread
        } else {
            SlotType::Sell
        };
        slots.push(Slot::new_virtual(format!("slot-{i}"), price, slot_type));
    }

    let mut grid = Grid {
        slots,
        by_type: HashMap::new(),
        by_state: HashMap::new(),
        boundary_idx,
        target_spread_count: gap_slots,
        current_spread_count: gap_slots,
    };
    grid.reindex();

    if grid.by_type.get(&SlotType::Buy).map(Vec::len).unwrap_or(0) == 0
        || grid.by_type.get(&SlotType::Sell).map(Vec::len).unwrap_or(0) == 0
    {
        return Err(GridError::InvalidGridConfig(
            "grid has no slots on one side after role assignment".into(),
        ));
    }

    Ok(grid)
}

/// Rebuilds type/state indexes after replacing the slot vector wholesale
/// (snapshot load). Phantom sanitization happens in `manager::load_grid`,
/// not here, since it needs the error-logging/recovery context.
pub fn rebuild_from_slots(slots: Vec<Slot>, boundary_idx: usize, target_spread_count: usize) -> Grid {
    let current_spread_count = target_spread_count;
    let mut grid = Grid {
        slots,
        by_type: HashMap::new(),
        by_state: HashMap::new(),
        boundary_idx,
        target_spread_count,
        current_spread_count,
    };
    grid.reindex();
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> GridConfig {
        GridConfig {
            min_price: 0.90,
            max_price: 1.10,
            increment_percent: 0.5,
            target_spread_percent: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn gap_slots_matches_worked_example() {
        let limits = GridLimits::default();
        assert_eq!(calculate_gap_slots(0.5, 2.0, &limits), 4);
    }

    #[test]
    fn created_grid_has_both_sides_and_contiguous_roles() {
        let limits = GridLimits::default();
        let grid = create_order_grid(&cfg(), 1.00, &limits).unwrap();
        assert!(grid.check_monotonic());
        assert!(grid.check_role_contiguity());
        assert!(grid.check_no_phantoms());
        assert!(grid.by_type(SlotType::Buy).count() > 0);
        assert!(grid.by_type(SlotType::Sell).count() > 0);
    }

    #[test]
    fn start_price_at_bound_rejected() {
        let limits = GridLimits::default();
        let mut c = cfg();
        c.min_price = 1.00;
        assert!(create_order_grid(&c, 1.00, &limits).is_err());
    }

    #[test]
    fn increment_out_of_bounds_rejected() {
        let limits = GridLimits::default();
        let mut c = cfg();
        c.increment_percent = 50.0;
        assert!(create_order_grid(&c, 1.00, &limits).is_err());
    }

    #[test]
    fn apply_order_update_moves_indexes() {
        let limits = GridLimits::default();
        let grid = create_order_grid(&cfg(), 1.00, &limits).unwrap();
        let mut grid = grid;
        let target_id = grid.by_type(SlotType::Buy).next().unwrap().id.clone();
        let mut updated = grid.slot(&target_id).unwrap().clone();
        updated.state = SlotState::Active;
        updated.order_id = Some("1.7.1".into());
        updated.size = 1.0;
        let mut funds = Funds::default();
        grid.apply_order_update(&mut funds, updated, false, 0.0).unwrap();
        assert_eq!(grid.by_state(SlotState::Active).count(), 1);
        assert_eq!(
            grid.by_state(SlotState::Virtual).count(),
            grid.slots().len() - 1
        );
    }
}
