// ─────────────────────────────────────────────────────────────────────────────
// oracle.rs — the price-derivation contract
//
// Trend detectors, AMA indicators, pool VWAPs: all out of scope, all reached
// through this one async call. Mirrors the `ChainClient` split of a real
// trait plus a fixed-value mock the manager's own tests drive.
// ─────────────────────────────────────────────────────────────────────────────
use async_trait::async_trait;

use crate::config::PriceMode;
use crate::error::GridError;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn derive_price(&self, asset_a: &str, asset_b: &str, mode: PriceMode) -> Result<f64, GridError>;
}

pub struct FixedPriceOracle {
    pub price: f64,
}

impl FixedPriceOracle {
    pub fn new(price: f64) -> Self {
        Self { price }
    }
}

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn derive_price(&self, _asset_a: &str, _asset_b: &str, _mode: PriceMode) -> Result<f64, GridError> {
        Ok(self.price)
    }
}
