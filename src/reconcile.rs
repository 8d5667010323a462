// ─────────────────────────────────────────────────────────────────────────────
// reconcile.rs — startup decision and startup order reconciliation
//
// Planning (what should change) happens under the grid lock; submitting the
// plan to the chain does not — the same split `spread.rs` uses, generalized
// here to a full batch/sequential/recovery-sync pipeline. This mirrors the
// retry-then-recovery-sync shape `MmExecutionEngine::reconcile_after_reconnect`
// used for a narrower problem (just re-reading positions after a dropped
// websocket) in the codebase this crate grew out of.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashSet;
use std::time::Duration;

use crate::chain::{ChainClient, ChainOrder, PlannedOp, UpdateOrderParams};
use crate::divergence::{update_grid_from_blockchain_snapshot, DivergenceReport, OrderTypeFlag};
use crate::error::GridError;
use crate::grid::Funds;
use crate::manager::GridManager;
use crate::order::{Side, Slot, SlotState, SlotType};
use crate::precision::min_absolute_size_for_side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupAction {
    Regenerate,
    Resume,
    ResumeByPrice,
}

const PRICE_MATCH_TOLERANCE: f64 = 1e-6;
const UPDATE_BATCH_RETRIES: u32 = 3;

/// §4.E startup decision: empty persisted grid regenerates; any persisted
/// active slot whose `orderId` is corroborated on chain resumes directly;
/// otherwise a price-based match is attempted before falling back to
/// regeneration.
pub fn decide_startup_grid_action(persisted_slots: &[Slot], chain_orders: &[ChainOrder]) -> StartupAction {
    if persisted_slots.is_empty() {
        return StartupAction::Regenerate;
    }
    let chain_ids: HashSet<&str> = chain_orders.iter().map(|o| o.id.as_str()).collect();
    let has_id_match = persisted_slots
        .iter()
        .any(|s| s.is_placed() && s.order_id.as_deref().is_some_and(|id| chain_ids.contains(id)));
    if has_id_match {
        return StartupAction::Resume;
    }
    if !chain_orders.is_empty() {
        StartupAction::ResumeByPrice
    } else {
        StartupAction::Regenerate
    }
}

/// Matches unclaimed chain orders to grid slots by price/size proximity,
/// mutating matched slots to `Active` with the adopted chain id. Returns the
/// number of matches made — used both for the price-based startup decision
/// and as the id-independent half of `reconcile_startup_orders`'s matching
/// step.
pub fn match_by_price(grid: &mut crate::grid::Grid, funds: &mut Funds, chain_orders: &[ChainOrder]) -> usize {
    let mut matched = 0;
    let mut claimed: HashSet<String> = HashSet::new();

    let candidate_ids: Vec<String> = grid
        .slots()
        .iter()
        .filter(|s| s.slot_type != SlotType::Spread)
        .map(|s| s.id.clone())
        .collect();

    for id in candidate_ids {
        let slot = grid.slot(&id).unwrap().clone();
        if slot.is_placed() {
            continue;
        }
        let found = chain_orders.iter().find(|o| {
            !claimed.contains(&o.id)
                && (o.sell_price_base.amount - slot.price).abs() <= PRICE_MATCH_TOLERANCE * slot.price.max(1.0)
        });
        if let Some(order) = found {
            claimed.insert(order.id.clone());
            let mut updated = slot;
            updated.state = SlotState::Active;
            updated.order_id = Some(order.id.clone());
            updated.size = order.for_sale;
            if grid.apply_order_update(funds, updated, false, 0.0).is_ok() {
                matched += 1;
            }
        }
    }
    matched
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub phantoms_sanitized: usize,
    pub created: usize,
    pub updated: usize,
    pub cancelled: usize,
}

/// Outside-in order for a side: BUY ascending price (lowest = furthest from
/// market = outermost first), SELL descending price (highest = outermost
/// first).
fn outside_in<'a>(slots: &'a [Slot], side: Side) -> Vec<&'a Slot> {
    let mut v: Vec<&Slot> = slots
        .iter()
        .filter(|s| s.side() == Some(side))
        .collect();
    match side {
        Side::Buy => v.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap()),
        Side::Sell => v.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap()),
    }
    v
}

struct SidePlan {
    side: Side,
    ops: Vec<PlannedOp>,
    newly_active: Vec<(String, String, f64)>, // (slot_id, chain_order_id, size)
}

/// §4.E `reconcileStartupOrders`. Runs the 8-step per-side algorithm under
/// the grid lock to produce a plan, releases the lock, submits the plan
/// (batched updates with retry, outside-in paired creates, cancellations),
/// then reacquires the lock to fold the results back into the grid.
pub async fn reconcile_startup_orders(
    manager: &GridManager,
    chain: &mut dyn ChainClient,
    account_ref: &str,
) -> Result<ReconcileReport, GridError> {
    let mut report = ReconcileReport::default();

    let chain_orders = chain.read_open_orders(account_ref, Duration::from_secs(10)).await?;
    let chain_ids: HashSet<String> = chain_orders.iter().map(|o| o.id.clone()).collect();

    // Step 1: phantom sweep + step 2: match remaining, producing per-side plans.
    let plans = manager
        .with_locked(|state| {
            let grid = &mut state.grid;

            // Phantom sweep.
            let phantom_ids: Vec<String> = grid
                .slots()
                .iter()
                .filter(|s| s.is_placed() && s.order_id.as_deref().is_some_and(|id| !chain_ids.contains(id)))
                .map(|s| s.id.clone())
                .collect();
            for id in &phantom_ids {
                let mut updated = grid.slot(id).unwrap().clone();
                updated.downgrade_to_virtual();
                grid.apply_order_update(&mut state.funds, updated, false, 0.0)?;
            }
            report.phantoms_sanitized = phantom_ids.len();

            let matched_ids: HashSet<String> = grid
                .slots()
                .iter()
                .filter(|s| s.is_placed())
                .filter_map(|s| s.order_id.clone())
                .collect();
            let unmatched_chain: Vec<ChainOrder> = chain_orders
                .iter()
                .filter(|o| !matched_ids.contains(&o.id))
                .cloned()
                .collect();

            let mut plans = Vec::new();
            for side in [Side::Buy, Side::Sell] {
                let target = match side {
                    Side::Buy => manager.config.active_orders.buy,
                    Side::Sell => manager.config.active_orders.sell,
                };
                let slot_type = match side {
                    Side::Buy => SlotType::Buy,
                    Side::Sell => SlotType::Sell,
                };
                let min_size = min_absolute_size_for_side(side, manager.config.precision_a, manager.config.precision_b);

                let active_on_grid = grid.by_type(slot_type).filter(|s| s.is_placed()).count();
                // A BUY order sells asset_b for asset_a; a SELL order sells
                // asset_a for asset_b (the same pairing `create_order`'s
                // planned ops below use) — compare both asset ids, not just
                // an amount, so a SELL-direction order never leaks into the
                // BUY pass's unmatched set or vice versa.
                let (expect_sell_asset, expect_receive_asset) = match side {
                    Side::Buy => (&manager.config.asset_b, &manager.config.asset_a),
                    Side::Sell => (&manager.config.asset_a, &manager.config.asset_b),
                };
                let mut unmatched_side: Vec<ChainOrder> = unmatched_chain
                    .iter()
                    .filter(|o| {
                        o.sell_price_base.asset_id == *expect_sell_asset
                            && o.sell_price_quote.asset_id == *expect_receive_asset
                    })
                    .cloned()
                    .collect();

                // Desired slots nearest market first: `outside_in` runs furthest-first,
                // so reverse it to activate the closest-to-market virtuals.
                let desired_count = target.saturating_sub(active_on_grid);
                let all_slots: Vec<Slot> = grid.slots().to_vec();
                let desired_slots: Vec<String> = outside_in(&all_slots, side)
                    .into_iter()
                    .rev()
                    .filter(|s| s.is_available() && s.size >= min_size)
                    .take(desired_count)
                    .map(|s| s.id.clone())
                    .collect();

                let mut ops = Vec::new();
                let mut newly_active = Vec::new();
                let side_free = state.funds.side(side).chain_free;
                let mut spent = 0.0f64;

                // Step 4/5: pair unmatched chain orders against desired slots
                // index-by-index; a pair that can't be afforded is set aside
                // rather than dropped, so it still gets a chance at step 6/8.
                let pair_count = unmatched_side.len().min(desired_slots.len());
                let mut skipped_pairs: Vec<(String, ChainOrder)> = Vec::new();
                for i in 0..pair_count {
                    let order = unmatched_side[i].clone();
                    let slot_id = desired_slots[i].clone();
                    let target_slot = grid.slot(&slot_id).unwrap().clone();
                    let delta = (target_slot.size - order.for_sale).max(0.0);
                    if spent + delta > side_free {
                        skipped_pairs.push((slot_id, order));
                        continue;
                    }
                    spent += delta;
                    ops.push(PlannedOp::Update {
                        slot_id: slot_id.clone(),
                        chain_order_id: order.id.clone(),
                        params: UpdateOrderParams {
                            amount_to_sell: target_slot.size,
                            min_to_receive: target_slot.size * target_slot.price,
                            new_price: Some(target_slot.price),
                            order_type: Some(side),
                        },
                    });
                    newly_active.push((slot_id, order.id, target_slot.size));
                }

                let mut still_unmatched: Vec<ChainOrder> = unmatched_side[pair_count..].to_vec();
                still_unmatched.extend(skipped_pairs.iter().map(|(_, o)| o.clone()));
                let mut remaining_desired: Vec<String> = desired_slots[pair_count..].to_vec();
                remaining_desired.extend(skipped_pairs.iter().map(|(s, _)| s.clone()));

                // Step 6: edge-full detection. If every one of this side's
                // outermost `desired_count` slots is already chain-backed,
                // there was no room to place a pairing above — cancel the
                // single largest leftover chain order and make room for a
                // fresh create at the slot it would have paired with.
                let mut edge_full_create: Option<String> = None;
                if !skipped_pairs.is_empty() && desired_count > 0 {
                    // `outside_in` is already farthest-from-market first, so
                    // unlike the desired-slot selection above this check must
                    // NOT reverse it — step 6 inspects the outermost slots.
                    let outer_active = outside_in(&all_slots, side)
                        .into_iter()
                        .take(desired_count)
                        .all(|s| s.is_placed());
                    if outer_active {
                        if let Some((largest_idx, _)) = still_unmatched
                            .iter()
                            .enumerate()
                            .max_by(|a, b| a.1.for_sale.partial_cmp(&b.1.for_sale).unwrap())
                        {
                            let largest_order = still_unmatched.remove(largest_idx);
                            ops.push(PlannedOp::Cancel {
                                slot_id: String::new(),
                                chain_order_id: largest_order.id,
                            });
                            if let Some((slot_id, _)) = skipped_pairs.first() {
                                remaining_desired.retain(|id| id != slot_id);
                                edge_full_create = Some(slot_id.clone());
                            }
                        }
                    }
                }

                // Missing orders: remaining desired slots with no chain order to pair get creates.
                let create_slot_ids: Vec<String> = edge_full_create.into_iter().chain(remaining_desired).collect();
                for slot_id in &create_slot_ids {
                    let slot = grid.slot(slot_id).unwrap().clone();
                    let (sell_asset, receive_asset) = match side {
                        Side::Buy => (manager.config.asset_b.clone(), manager.config.asset_a.clone()),
                        Side::Sell => (manager.config.asset_a.clone(), manager.config.asset_b.clone()),
                    };
                    ops.push(PlannedOp::Create {
                        slot_id: slot.id.clone(),
                        amount_to_sell: slot.size,
                        sell_asset_id: sell_asset,
                        min_to_receive: slot.size * slot.price,
                        receive_asset_id: receive_asset,
                    });
                }

                // Step 8: excess. Cancel leftover unmatched chain orders first
                // (innermost/least favorable first); if that's still not
                // enough to hit `target`, fall back to cancelling already-
                // active grid slots outside-in.
                let total_if_kept = active_on_grid + newly_active.len() + create_slot_ids.len() + still_unmatched.len();
                let mut chain_excess = total_if_kept.saturating_sub(target);

                let mut unmatched_sorted = still_unmatched;
                match side {
                    Side::Buy => unmatched_sorted.sort_by(|a, b| a.sell_price_base.amount.partial_cmp(&b.sell_price_base.amount).unwrap()),
                    Side::Sell => unmatched_sorted.sort_by(|a, b| b.sell_price_base.amount.partial_cmp(&a.sell_price_base.amount).unwrap()),
                }
                for order in unmatched_sorted {
                    if chain_excess == 0 {
                        break;
                    }
                    ops.push(PlannedOp::Cancel {
                        slot_id: String::new(),
                        chain_order_id: order.id,
                    });
                    chain_excess -= 1;
                }
                if chain_excess > 0 {
                    let active_matched: Vec<Slot> = outside_in(&all_slots, side)
                        .into_iter()
                        .filter(|s| s.is_placed())
                        .cloned()
                        .collect();
                    for slot in active_matched {
                        if chain_excess == 0 {
                            break;
                        }
                        if let Some(order_id) = &slot.order_id {
                            ops.push(PlannedOp::Cancel {
                                slot_id: slot.id.clone(),
                                chain_order_id: order_id.clone(),
                            });
                            chain_excess -= 1;
                        }
                    }
                }

                plans.push(SidePlan { side, ops, newly_active });
            }
            Ok(plans)
        })
        .await?;

    // Step: submit each side's plan (batch with retry, recovery sync on exhaustion).
    for plan in plans {
        if plan.ops.is_empty() {
            continue;
        }
        let results = submit_with_retry(chain, &manager.config.account_id, plan.ops.clone(), account_ref, manager).await?;
        for op in &plan.ops {
            match op {
                PlannedOp::Create { .. } => report.created += 1,
                PlannedOp::Update { .. } => report.updated += 1,
                PlannedOp::Cancel { .. } => report.cancelled += 1,
            }
        }
        if plan.ops.len() != results.len() {
            log::warn!(
                "[RECONCILE] {:?} side: submitted {} op(s) but got {} result(s), only matching results are folded back",
                plan.side,
                plan.ops.len(),
                results.len()
            );
        }

        log::info!("[RECONCILE] {:?} side: {} op(s) submitted", plan.side, plan.ops.len());
        manager
            .with_locked(|state| {
                for (slot_id, chain_order_id, size) in &plan.newly_active {
                    if let Some(slot) = state.grid.slot(slot_id) {
                        let mut updated = slot.clone();
                        updated.state = SlotState::Active;
                        updated.order_id = Some(chain_order_id.clone());
                        updated.size = *size;
                        state.grid.apply_order_update(&mut state.funds, updated, false, 0.0)?;
                    }
                }
                for (op, result) in plan.ops.iter().zip(results.iter()) {
                    match op {
                        PlannedOp::Create { slot_id, amount_to_sell, .. } => {
                            if let Some(order_id) = &result.chain_order_id {
                                if let Some(slot) = state.grid.slot(slot_id) {
                                    let mut updated = slot.clone();
                                    let was_spread = updated.slot_type == SlotType::Spread;
                                    updated.state = SlotState::Active;
                                    updated.order_id = Some(order_id.clone());
                                    updated.size = *amount_to_sell;
                                    if was_spread {
                                        updated.effective_side = Some(plan.side);
                                    }
                                    state.grid.apply_order_update(
                                        &mut state.funds,
                                        updated,
                                        false,
                                        manager.config.order_creation_fee,
                                    )?;
                                }
                            }
                        }
                        PlannedOp::Cancel { slot_id, .. } if !slot_id.is_empty() => {
                            if let Some(slot) = state.grid.slot(slot_id) {
                                let mut updated = slot.clone();
                                updated.downgrade_to_virtual();
                                state.grid.apply_order_update(&mut state.funds, updated, false, 0.0)?;
                            }
                        }
                        _ => {}
                    }
                }
                Ok(())
            })
            .await?;
    }

    // Post-reconcile: if both sides are left with a dust partial, trigger a
    // full rebalance through the same COW path divergence checks use.
    let (buy_dust, sell_dust, grid_snapshot, funds_snapshot) = manager
        .with_locked(|state| {
            let buy_dust = side_has_dust_partial(&state.grid, &state.funds, Side::Buy, manager.config.increment_percent, &manager.limits);
            let sell_dust = side_has_dust_partial(&state.grid, &state.funds, Side::Sell, manager.config.increment_percent, &manager.limits);
            Ok((buy_dust, sell_dust, state.grid.clone(), state.funds.clone()))
        })
        .await?;

    if buy_dust && sell_dust {
        log::info!("[RECONCILE] both sides show dust partials, triggering full rebalance");
        let forced = DivergenceReport {
            needs_update: true,
            buy: true,
            sell: true,
            order_type: Some(OrderTypeFlag::Both),
        };
        if let Some(update) = update_grid_from_blockchain_snapshot(
            &grid_snapshot,
            &funds_snapshot,
            &forced,
            manager.config.increment_percent,
            manager.config.precision_a,
            manager.config.precision_b,
            manager.version(),
        ) {
            match chain.execute_batch(&manager.config.account_id, update.actions.clone()).await {
                Ok(_) => {
                    if let Err(e) = manager.commit_working(update.working_grid, update.working_funds, update.base_version).await {
                        log::warn!("[RECONCILE] post-reconcile rebalance commit rejected: {e}");
                    }
                }
                Err(e) => log::warn!("[RECONCILE] post-reconcile rebalance batch failed: {e}"),
            }
        }
    }

    Ok(report)
}

/// True if any active/partial slot on `side` has fallen below the dust
/// threshold measured against its geometric ideal share of the side's budget.
fn side_has_dust_partial(
    grid: &crate::grid::Grid,
    funds: &Funds,
    side: Side,
    increment_percent: f64,
    limits: &crate::config::GridLimits,
) -> bool {
    let slot_type = match side {
        Side::Buy => SlotType::Buy,
        Side::Sell => SlotType::Sell,
    };
    let ids = grid.slot_ids_nearest_market_first(slot_type, side);
    if ids.is_empty() {
        return false;
    }
    let weights = crate::sizing::geometric_weights(ids.len(), increment_percent);
    let total_weight: f64 = weights.iter().sum();
    let budget = funds.side(side).allocated;
    ids.iter().zip(weights.iter()).any(|(id, w)| {
        let ideal = budget * (w / total_weight);
        grid.slot(id).is_some_and(|s| s.is_dust(ideal, limits))
    })
}

/// Batch submission with up to `UPDATE_BATCH_RETRIES` retries; on exhaustion,
/// falls back to sequential per-op submission (or if the client lacks batch
/// support in the first place). A recovery sync (re-read chain orders) is
/// performed whenever a batch or single op fails before the next attempt.
async fn submit_with_retry(
    chain: &mut dyn ChainClient,
    account: &str,
    ops: Vec<PlannedOp>,
    account_ref: &str,
    manager: &GridManager,
) -> Result<Vec<crate::chain::ChainOpResult>, GridError> {
    if chain.supports_batch() {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match chain.execute_batch(account, ops.clone()).await {
                Ok(results) => return Ok(results),
                Err(e) => {
                    log::warn!("[RECONCILE] batch attempt {attempt} failed: {e}");
                    let _ = chain.read_open_orders(account_ref, Duration::from_secs(10)).await;
                    if attempt >= UPDATE_BATCH_RETRIES {
                        log::warn!("[RECONCILE] batch exhausted retries, falling back to sequential");
                        break;
                    }
                }
            }
        }
    }
    let _ = manager;
    sequential_submit(chain, account, ops, account_ref).await
}

async fn sequential_submit(
    chain: &mut dyn ChainClient,
    account: &str,
    ops: Vec<PlannedOp>,
    account_ref: &str,
) -> Result<Vec<crate::chain::ChainOpResult>, GridError> {
    let mut results = Vec::with_capacity(ops.len());
    for op in ops {
        let result = match op.clone() {
            PlannedOp::Create {
                amount_to_sell,
                sell_asset_id,
                min_to_receive,
                receive_asset_id,
                ..
            } => {
                chain
                    .create_order(account, amount_to_sell, &sell_asset_id, min_to_receive, &receive_asset_id, 0, false)
                    .await
            }
            PlannedOp::Update {
                chain_order_id, params, ..
            } => chain
                .update_order(account, &chain_order_id, params)
                .await
                .map(|o| o.unwrap_or(crate::chain::ChainOpResult { chain_order_id: None, skipped: true })),
            PlannedOp::Cancel { chain_order_id, .. } => chain
                .cancel_order(account, &chain_order_id)
                .await
                .map(|_| crate::chain::ChainOpResult { chain_order_id: None, skipped: false }),
        };
        match result {
            Ok(r) => results.push(r),
            Err(e) => {
                log::warn!("[RECONCILE] sequential op failed, recovery sync: {e}");
                let _ = chain.read_open_orders(account_ref, Duration::from_secs(10)).await;
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SimChainClient;

    #[test]
    fn empty_persisted_grid_regenerates() {
        assert_eq!(decide_startup_grid_action(&[], &[]), StartupAction::Regenerate);
    }

    #[test]
    fn id_match_resumes() {
        let mut slot = Slot::new_virtual("slot-0", 1.0, SlotType::Buy);
        slot.state = SlotState::Active;
        slot.order_id = Some("1.7.1".into());
        let chain_order = ChainOrder {
            id: "1.7.1".into(),
            sell_price_base: crate::chain::AssetAmount { asset_id: "1.3.0".into(), amount: 1.0 },
            sell_price_quote: crate::chain::AssetAmount { asset_id: "1.3.1".into(), amount: 1.0 },
            for_sale: 1.0,
        };
        assert_eq!(decide_startup_grid_action(&[slot], &[chain_order]), StartupAction::Resume);
    }

    #[test]
    fn no_id_match_but_chain_orders_triggers_price_resume() {
        let slot = Slot::new_virtual("slot-0", 1.0, SlotType::Buy);
        let chain_order = ChainOrder {
            id: "1.7.9".into(),
            sell_price_base: crate::chain::AssetAmount { asset_id: "1.3.0".into(), amount: 1.0 },
            sell_price_quote: crate::chain::AssetAmount { asset_id: "1.3.1".into(), amount: 1.0 },
            for_sale: 1.0,
        };
        assert_eq!(decide_startup_grid_action(&[slot], &[chain_order]), StartupAction::ResumeByPrice);
    }

    #[tokio::test]
    async fn reconcile_startup_creates_missing_orders() {
        use crate::config::{GridConfig, GridLimits};
        use crate::manager::{AccountTotals, GridManager};
        use crate::oracle::FixedPriceOracle;

        let config = GridConfig {
            asset_a: "BTS".into(),
            asset_b: "USD".into(),
            account_id: "1.2.100".into(),
            min_price: 0.90,
            max_price: 1.10,
            increment_percent: 0.5,
            target_spread_percent: 2.0,
            start_price: Some(1.0),
            ..Default::default()
        };
        let mut limits = GridLimits::default();
        limits.account_totals_timeout_ms = 200;
        let manager = GridManager::new(config, limits);
        manager
            .account_totals
            .set(AccountTotals { buy: 1000.0, sell: 1000.0 })
            .await;
        manager.initialize_grid(&FixedPriceOracle::new(1.0)).await.unwrap();

        let mut chain = SimChainClient::new();
        let report = reconcile_startup_orders(&manager, &mut chain, "1.2.100").await.unwrap();
        assert!(report.created > 0);
        assert_eq!(report.phantoms_sanitized, 0);
    }
}
