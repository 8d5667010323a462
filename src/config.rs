// ─────────────────────────────────────────────────────────────────────────────
// config.rs — grid configuration and tuning constants
//
// Plain, serde-derived data: loading it from environment/CLI/file is an
// external collaborator, the same way `MmAssetConfig` used to arrive over a
// Redis channel rather than being parsed here. Everything in this file is
// just the shape the engine expects to be handed.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::order::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightDistribution {
    Geometric,
}

impl Default for WeightDistribution {
    fn default() -> Self {
        WeightDistribution::Geometric
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceMode {
    Auto,
    Pool,
    Market,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveOrdersTarget {
    pub buy: usize,
    pub sell: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotFunds {
    /// Fraction of the account's total side balance this bot may allocate, in `(0, 1]`.
    pub asset_a_pct: f64,
    pub asset_b_pct: f64,
}

impl Default for BotFunds {
    fn default() -> Self {
        Self {
            asset_a_pct: 1.0,
            asset_b_pct: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub asset_a: String,
    pub asset_b: String,
    pub account_id: String,

    /// Decimal precision of each asset's on-chain integer representation.
    pub precision_a: u32,
    pub precision_b: u32,

    /// A concrete price, or left `None` to defer to `price_mode` via the
    /// price oracle at grid-initialization time.
    pub start_price: Option<f64>,
    pub min_price: f64,
    pub max_price: f64,

    pub increment_percent: f64,
    pub target_spread_percent: f64,

    pub active_orders: ActiveOrdersTarget,
    pub weight_distribution_buy: WeightDistribution,
    pub weight_distribution_sell: WeightDistribution,

    pub bot_funds: BotFunds,
    pub price_mode: PriceMode,
    pub dry_run: bool,

    /// Which side holds the chain's native (fee) asset; fee reservation is
    /// applied against that side's sizing budget.
    pub fee_asset: Side,

    /// Cost of a single create-order operation, in the fee asset's units.
    /// Reserved `BTS_RESERVATION_MULTIPLIER` times over before sizing the
    /// fee-holding side (§4.C sizing context).
    pub order_creation_fee: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            asset_a: String::new(),
            asset_b: String::new(),
            account_id: String::new(),
            precision_a: 8,
            precision_b: 8,
            start_price: None,
            min_price: 0.0,
            max_price: 0.0,
            increment_percent: 1.0,
            target_spread_percent: 2.0,
            active_orders: ActiveOrdersTarget { buy: 5, sell: 5 },
            weight_distribution_buy: WeightDistribution::Geometric,
            weight_distribution_sell: WeightDistribution::Geometric,
            bot_funds: BotFunds::default(),
            price_mode: PriceMode::Auto,
            dry_run: false,
            fee_asset: Side::Buy,
            order_creation_fee: 0.0,
        }
    }
}

/// Tuning constants, grouped the way the config surfaces `GRID_LIMITS.*`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridLimits {
    pub min_increment_percent: f64,
    pub max_increment_percent: f64,
    pub min_spread_factor: f64,
    pub min_spread_orders: usize,
    pub grid_regeneration_percentage: f64,
    pub rms_percentage: f64,
    pub partial_dust_threshold_percentage: f64,
    pub bts_reservation_multiplier: f64,
    pub account_totals_timeout_ms: u64,
}

impl Default for GridLimits {
    fn default() -> Self {
        Self {
            min_increment_percent: 0.1,
            max_increment_percent: 20.0,
            min_spread_factor: 2.0,
            min_spread_orders: 2,
            grid_regeneration_percentage: 10.0,
            rms_percentage: 5.0,
            partial_dust_threshold_percentage: 5.0,
            bts_reservation_multiplier: 3.0,
            account_totals_timeout_ms: 10_000,
        }
    }
}
