// ─────────────────────────────────────────────────────────────────────────────
// manager.rs — the grid lock, copy-on-write commit path, and lifecycle
//
// `GridManager` is the thing every other engine (reconciliation, divergence,
// spread correction) is handed: it owns the grid, the funds bookkeeping, and
// the version counter behind a single `tokio::sync::Mutex`, generalizing the
// way `MmExecutionEngine` in the source this crate grew out of guarded its
// session state behind one async mutex for the whole quoting loop. There is
// exactly one grid lock; callers never hold two overlapping critical
// sections, and no method here recurses into another locking method.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};

use crate::config::{GridConfig, GridLimits};
use crate::error::GridError;
use crate::grid::{create_order_grid, rebuild_from_slots, Funds, Grid};
use crate::oracle::PriceOracle;
use crate::order::{Side, Slot, SlotType};
use crate::sizing::{compute_side_sizes_for, reserve_fees};

#[derive(Debug, Clone, Copy)]
pub struct AccountTotals {
    pub buy: f64,
    pub sell: f64,
}

/// Background-refreshed account balances. Generalizes `LiveExchange`'s
/// timestamped `cached_balance` field into an explicit wait-with-timeout so
/// `initialize_grid` can block on it instead of racing a 2-second TTL.
pub struct AccountTotalsCache {
    value: RwLock<Option<AccountTotals>>,
    notify: Notify,
}

impl AccountTotalsCache {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
            notify: Notify::new(),
        }
    }

    pub async fn set(&self, totals: AccountTotals) {
        *self.value.write().await = Some(totals);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self, timeout: Duration) -> Result<AccountTotals, GridError> {
        if let Some(t) = *self.value.read().await {
            return Ok(t);
        }
        let waited = tokio::time::timeout(timeout, self.notify.notified()).await;
        if waited.is_err() {
            return Err(GridError::AccountTotalsUnavailable(timeout.as_millis() as u64));
        }
        self.value
            .read()
            .await
            .ok_or_else(|| GridError::AccountTotalsUnavailable(timeout.as_millis() as u64))
    }
}

impl Default for AccountTotalsCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The pair of things the grid lock actually guards: the slot table and its
/// funds bookkeeping move together or not at all.
#[derive(Debug, Clone)]
pub struct GridState {
    pub grid: Grid,
    pub funds: Funds,
}

pub struct GridManager {
    state: Mutex<Option<GridState>>,
    version: AtomicU64,
    pub config: GridConfig,
    pub limits: GridLimits,
    pub account_totals: AccountTotalsCache,
}

impl GridManager {
    pub fn new(config: GridConfig, limits: GridLimits) -> Self {
        Self {
            state: Mutex::new(None),
            version: AtomicU64::new(0),
            config,
            limits,
            account_totals: AccountTotalsCache::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A frozen read of the current committed state — safe to read without
    /// holding the grid lock, at the cost of possibly being stale by the
    /// time the caller acts on it.
    pub async fn snapshot(&self) -> Option<GridState> {
        self.state.lock().await.clone()
    }

    /// §4.D `initializeGrid`: derive the start price if not pinned, wait for
    /// account totals, create the grid, size both sides, and commit.
    /// Fatal on any failure — this is the one-time bootstrap path, not a
    /// recoverable steady-state operation.
    pub async fn initialize_grid(&self, oracle: &dyn PriceOracle) -> Result<(), GridError> {
        let mut guard = self.state.lock().await;

        let start_price = match self.config.start_price {
            Some(p) => p,
            None => {
                oracle
                    .derive_price(&self.config.asset_a, &self.config.asset_b, self.config.price_mode)
                    .await?
            }
        };

        let totals = self
            .account_totals
            .wait(Duration::from_millis(self.limits.account_totals_timeout_ms))
            .await?;

        let mut grid = create_order_grid(&self.config, start_price, &self.limits)?;

        let mut funds = Funds::default();
        funds.buy.allocated = totals.buy * self.config.bot_funds.asset_b_pct;
        funds.sell.allocated = totals.sell * self.config.bot_funds.asset_a_pct;

        for side in [Side::Buy, Side::Sell] {
            let slot_type = match side {
                Side::Buy => SlotType::Buy,
                Side::Sell => SlotType::Sell,
            };
            let precision = match side {
                Side::Buy => self.config.precision_b,
                Side::Sell => self.config.precision_a,
            };
            let slot_count = grid.by_type(slot_type).count();
            let budget = reserve_fees(
                funds.side(side).allocated,
                side,
                self.config.fee_asset,
                self.config.active_orders.buy,
                self.config.active_orders.sell,
                &self.limits,
                self.config.order_creation_fee,
            );

            let sizing = compute_side_sizes_for(side, budget, slot_count, self.config.increment_percent, precision)?;

            // Nothing is chain-backed yet at this point (every slot is still
            // virtual), so the whole sizing budget is free; reconciliation
            // consumes it as it places real orders.
            funds.side_mut(side).chain_free = budget;

            let ids = grid.slot_ids_nearest_market_first(slot_type, side);
            for (id, size) in ids.into_iter().zip(sizing.sizes.into_iter()) {
                let mut updated = grid.slot(&id).unwrap().clone();
                updated.size = size;
                grid.apply_order_update(&mut funds, updated, true, 0.0)?;
            }
            funds.side_mut(side).cache_funds = sizing.cache_funds;
        }

        *guard = Some(GridState { grid, funds });
        self.bump_version();
        log::info!("[GRID] initialized at start_price={start_price}");
        Ok(())
    }

    /// §4.D `loadGrid`: replace the slot table from a persisted snapshot,
    /// sanitizing phantoms. Funds bookkeeping (`cache_funds`, `bts_fees_owed`)
    /// is process-owned and is preserved across the reset rather than
    /// reinitialized from the snapshot, since the snapshot layout carries no
    /// funds fields (§5).
    pub async fn load_grid(&self, mut slots: Vec<Slot>, boundary_idx: usize, target_spread_count: usize) -> Result<(), GridError> {
        let mut phantom_count = 0;
        for slot in slots.iter_mut() {
            if slot.is_phantom() {
                phantom_count += 1;
                slot.downgrade_to_virtual();
            }
        }
        if phantom_count > 0 {
            log::warn!("[GRID] loadGrid sanitized {phantom_count} phantom slot(s)");
        }

        let grid = rebuild_from_slots(slots, boundary_idx, target_spread_count);

        let mut guard = self.state.lock().await;
        let funds = guard.take().map(|s| s.funds).unwrap_or_default();
        *guard = Some(GridState { grid, funds });
        self.bump_version();
        Ok(())
    }

    /// Runs `f` against the committed state under the grid lock, exactly
    /// once, with no nested acquisition. This is the only way any other
    /// engine mutates `orders`/`funds`/`boundary_idx`/`target_spread_count`.
    pub async fn with_locked<F, R>(&self, f: F) -> Result<R, GridError>
    where
        F: FnOnce(&mut GridState) -> Result<R, GridError>,
    {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| GridError::InvalidGridConfig("grid not initialized".into()))?;
        f(state)
    }

    /// Commits a copy-on-write working grid built against `base_version`.
    /// Rejected (and discarded by the caller) if the master has moved on in
    /// the meantime — the version-conflict law.
    pub async fn commit_working(&self, working: Grid, working_funds: Funds, base_version: u64) -> Result<u64, GridError> {
        let mut guard = self.state.lock().await;
        let current = self.version.load(Ordering::SeqCst);
        if current != base_version {
            return Err(GridError::VersionConflict {
                base: base_version,
                current,
            });
        }
        *guard = Some(GridState {
            grid: working,
            funds: working_funds,
        });
        Ok(self.bump_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::FixedPriceOracle;

    fn test_config() -> GridConfig {
        GridConfig {
            asset_a: "BTS".into(),
            asset_b: "USD".into(),
            account_id: "1.2.100".into(),
            min_price: 0.90,
            max_price: 1.10,
            increment_percent: 0.5,
            target_spread_percent: 2.0,
            start_price: Some(1.0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn initialize_grid_requires_account_totals() {
        let mut limits = GridLimits::default();
        limits.account_totals_timeout_ms = 50;
        let manager = GridManager::new(test_config(), limits);
        let oracle = FixedPriceOracle::new(1.0);
        // No account totals ever posted: should time out.
        let err = manager.initialize_grid(&oracle).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn initialize_grid_commits_sized_grid() {
        let mut limits = GridLimits::default();
        limits.account_totals_timeout_ms = 200;
        let manager = GridManager::new(test_config(), limits);
        manager.account_totals.set(AccountTotals { buy: 1000.0, sell: 1000.0 }).await;
        let oracle = FixedPriceOracle::new(1.0);
        manager.initialize_grid(&oracle).await.unwrap();
        let snap = manager.snapshot().await.unwrap();
        assert!(snap.grid.check_monotonic());
        assert_eq!(manager.version(), 1);
    }

    #[tokio::test]
    async fn initialize_grid_reserves_fees_on_the_fee_holding_side() {
        let mut limits = GridLimits::default();
        limits.account_totals_timeout_ms = 200;
        let mut config = test_config();
        config.fee_asset = Side::Buy;
        config.order_creation_fee = 1.0;
        let manager = GridManager::new(config, limits);
        manager.account_totals.set(AccountTotals { buy: 1000.0, sell: 1000.0 }).await;
        let oracle = FixedPriceOracle::new(1.0);
        manager.initialize_grid(&oracle).await.unwrap();

        let snap = manager.snapshot().await.unwrap();
        let buy_committed: f64 = snap.grid.by_type(SlotType::Buy).map(|s| s.size).sum();
        let sell_committed: f64 = snap.grid.by_type(SlotType::Sell).map(|s| s.size).sum();
        let buy_headroom = snap.funds.buy.allocated - buy_committed - snap.funds.buy.cache_funds;
        let sell_headroom = snap.funds.sell.allocated - sell_committed - snap.funds.sell.cache_funds;
        // Only the fee-holding side (buy) reserves a creation-fee budget
        // before sizing, so it alone leaves unallocated headroom behind.
        assert!(buy_headroom > 0.0);
        assert!(sell_headroom.abs() < 1e-6);
    }

    #[tokio::test]
    async fn commit_working_rejects_stale_base_version() {
        let mut limits = GridLimits::default();
        limits.account_totals_timeout_ms = 200;
        let manager = GridManager::new(test_config(), limits);
        manager.account_totals.set(AccountTotals { buy: 1000.0, sell: 1000.0 }).await;
        let oracle = FixedPriceOracle::new(1.0);
        manager.initialize_grid(&oracle).await.unwrap();

        let snap = manager.snapshot().await.unwrap();
        let stale_version = 0; // the version before initialize_grid committed
        let err = manager
            .commit_working(snap.grid.clone(), snap.funds.clone(), stale_version)
            .await;
        assert!(err.is_err());
    }
}
