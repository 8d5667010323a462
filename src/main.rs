// ─────────────────────────────────────────────────────────────────────────────
// gridbotd: Grid Market-Making Engine host
//
// A thin driver: wires a `GridManager` to a chain client and price oracle,
// runs the startup decision once, then loops divergence checks and spread
// correction at a fixed cadence. The engine itself (gridbot_core) knows
// nothing about *how* it's driven — main.rs owns process lifetime, logging
// init, and the background account-totals refresher, the same separation of
// concerns the source this crate grew out of drew between its host loop and
// its engine modules.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;
use std::time::Duration;

use gridbot_core::chain::{ChainClient, SimChainClient};
use gridbot_core::config::{GridConfig, GridLimits};
use gridbot_core::divergence::{run_divergence_checks, update_grid_from_blockchain_snapshot};
use gridbot_core::manager::{AccountTotals, GridManager};
use gridbot_core::oracle::{FixedPriceOracle, PriceOracle};
use gridbot_core::order::SlotState;
use gridbot_core::persistence::{load_persisted_grid, persist_grid, GridSnapshot};
use gridbot_core::reconcile::{decide_startup_grid_action, match_by_price, reconcile_startup_orders, StartupAction};
use gridbot_core::spread::plan_spread_correction;

const SNAPSHOT_PATH: &str = "grid_snapshot.json";

fn load_config() -> GridConfig {
    GridConfig {
        asset_a: std::env::var("GRID_ASSET_A").unwrap_or_else(|_| "BTS".into()),
        asset_b: std::env::var("GRID_ASSET_B").unwrap_or_else(|_| "USD".into()),
        account_id: std::env::var("GRID_ACCOUNT_ID").unwrap_or_else(|_| "1.2.100".into()),
        precision_a: 5,
        precision_b: 8,
        start_price: None,
        min_price: 0.80,
        max_price: 1.25,
        increment_percent: 1.0,
        target_spread_percent: 2.0,
        dry_run: std::env::var("GRID_DRY_RUN").map(|v| v != "false" && v != "0").unwrap_or(true),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    log::info!("[GRID] gridbotd starting");

    let config = load_config();
    let limits = GridLimits::default();
    log::info!(
        "  pair:          {}/{}",
        config.asset_a, config.asset_b
    );
    log::info!("  dry_run:       {}", config.dry_run);

    let manager = Arc::new(GridManager::new(config.clone(), limits));
    let oracle: Box<dyn PriceOracle> = Box::new(FixedPriceOracle::new(1.0));
    let mut chain: Box<dyn ChainClient> = Box::new(SimChainClient::new());

    // Background account-totals refresher. A real deployment polls the
    // chain client; the dry-run driver here just seeds a fixed figure once.
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager.account_totals.set(AccountTotals { buy: 5_000.0, sell: 5_000.0 }).await;
        });
    }

    // ─── Startup decision ──────────────────────────────────────────────────
    let persisted = load_persisted_grid(SNAPSHOT_PATH);
    let chain_orders = chain
        .read_open_orders(&config.account_id, Duration::from_secs(10))
        .await
        .unwrap_or_default();

    let action = decide_startup_grid_action(
        persisted.as_ref().map(|s| s.slots.as_slice()).unwrap_or(&[]),
        &chain_orders,
    );
    log::info!("[GRID] startup decision: {action:?}");

    match action {
        StartupAction::Regenerate => {
            manager.initialize_grid(oracle.as_ref()).await.expect("grid initialization failed");
        }
        StartupAction::Resume => {
            let snapshot = persisted.expect("resume decided with no persisted snapshot");
            manager
                .load_grid(snapshot.slots, snapshot.boundary_idx, snapshot.target_spread_count)
                .await
                .expect("grid load failed");
        }
        StartupAction::ResumeByPrice => {
            let snapshot = persisted.expect("resume-by-price decided with no persisted snapshot");
            manager
                .load_grid(snapshot.slots, snapshot.boundary_idx, snapshot.target_spread_count)
                .await
                .expect("grid load failed");
            let matched = manager
                .with_locked(|state| Ok(match_by_price(&mut state.grid, &mut state.funds, &chain_orders)))
                .await
                .expect("price-match sync failed");
            log::info!("[GRID] price-based resume matched {matched} slot(s) against chain orders");
            if matched == 0 {
                log::warn!("[GRID] price-based resume matched nothing, regenerating");
                manager.initialize_grid(oracle.as_ref()).await.expect("grid initialization failed");
            }
        }
    }

    match reconcile_startup_orders(&manager, chain.as_mut(), &config.account_id).await {
        Ok(report) => log::info!(
            "[RECONCILE] startup complete: created={} updated={} cancelled={} phantoms={}",
            report.created, report.updated, report.cancelled, report.phantoms_sanitized
        ),
        Err(e) => log::error!("[RECONCILE] startup failed: {e}"),
    }

    log::info!("[GRID] entering steady-state loop");

    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;

        let snapshot = match manager.snapshot().await {
            Some(s) => s,
            None => continue,
        };

        // ── Divergence check + COW resize ───────────────────────────────────
        let report = run_divergence_checks(&snapshot.grid, &snapshot.funds, config.increment_percent, &manager.limits);
        if report.needs_update {
            log::info!("[DIVERGENCE] flagged: buy={} sell={}", report.buy, report.sell);
            if let Some(update) = update_grid_from_blockchain_snapshot(
                &snapshot.grid,
                &snapshot.funds,
                &report,
                config.increment_percent,
                config.precision_a,
                config.precision_b,
                manager.version(),
            ) {
                match chain.execute_batch(&config.account_id, update.actions).await {
                    Ok(_) => {
                        if let Err(e) = manager
                            .commit_working(update.working_grid, update.working_funds, update.base_version)
                            .await
                        {
                            log::warn!("[COW] commit rejected, discarding working grid: {e}");
                        }
                    }
                    Err(e) => log::warn!("[DIVERGENCE] resize batch failed, discarding working grid: {e}"),
                }
            }
        }

        // ── Spread correction ───────────────────────────────────────────────
        if let Some(plan) = plan_spread_correction(
            &snapshot.grid,
            &snapshot.funds,
            config.increment_percent,
            config.target_spread_percent,
            &manager.limits,
            config.precision_a,
            config.precision_b,
            false,
            false,
        ) {
            log::info!("[SPREAD] correcting via slot {} (spread_slot={})", plan.slot_id, plan.was_spread_slot);
            match chain.execute_batch(&config.account_id, vec![plan.op.clone()]).await {
                Ok(results) => {
                    if let Some(result) = results.first().cloned() {
                        let commit_result = manager
                            .with_locked(|state| {
                                if let Some(slot) = state.grid.slot(&plan.slot_id) {
                                    let mut updated = slot.clone();
                                    updated.size = plan.target_size;
                                    if plan.was_spread_slot {
                                        updated.state = SlotState::Active;
                                        updated.effective_side = Some(plan.side);
                                        if let Some(order_id) = &result.chain_order_id {
                                            updated.order_id = Some(order_id.clone());
                                        }
                                    }
                                    state.grid.apply_order_update(&mut state.funds, updated, false, 0.0)?;
                                }
                                Ok(())
                            })
                            .await;
                        if let Err(e) = commit_result {
                            log::warn!("[SPREAD] commit failed: {e}");
                        }
                    } else {
                        log::warn!("[SPREAD] batch returned no result, skipping commit");
                    }
                }
                Err(e) => log::warn!("[SPREAD] correction batch failed: {e}"),
            }
        }

        // ── Persist ──────────────────────────────────────────────────────────
        persist_grid(
            SNAPSHOT_PATH,
            &GridSnapshot {
                slots: snapshot.grid.slots().to_vec(),
                boundary_idx: snapshot.grid.boundary_idx,
                target_spread_count: snapshot.grid.target_spread_count,
            },
        );
    }
}
