// ─────────────────────────────────────────────────────────────────────────────
// order.rs — the grid slot record and its predicates
//
// A slot is the atom of the grid. `SlotType` fixes which wall it belongs to;
// `SlotState` carries the on-chain identity when one exists. Keeping them as
// separate closed enums (rather than a handful of loose booleans, the way the
// source this crate grew out of modelled `Position`) makes `is_phantom` and
// friends exhaustive pattern matches instead of ad-hoc flag combinations.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::config::GridLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotType {
    Buy,
    Sell,
    Spread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    Virtual,
    Active,
    Partial,
}

/// A chain record retained on a placed slot, used to compute the precise
/// fund release when the slot is later cancelled or filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOnChain {
    pub chain_order_id: String,
    pub amount_to_sell: f64,
    pub min_to_receive: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub price: f64,
    pub size: f64,
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    pub state: SlotState,
    pub order_id: Option<String>,
    pub raw_on_chain: Option<RawOnChain>,
    /// Which side's funds this slot draws against. `None` for ordinary
    /// Buy/Sell slots, whose `slot_type` already answers the question;
    /// `Some` only on a Spread slot once spread correction has activated it
    /// — `slot_type` stays `Spread` there to preserve role contiguity, so
    /// this is the only place that side is recorded.
    #[serde(default)]
    pub effective_side: Option<Side>,
}

impl Slot {
    pub fn new_virtual(id: impl Into<String>, price: f64, slot_type: SlotType) -> Self {
        Self {
            id: id.into(),
            price,
            size: 0.0,
            slot_type,
            state: SlotState::Virtual,
            order_id: None,
            raw_on_chain: None,
            effective_side: None,
        }
    }

    /// `state ∈ {Active, Partial} ⇔ order_id present`. A slot violating this
    /// is a phantom: it claims an on-chain identity the chain doesn't
    /// corroborate, or vice versa.
    pub fn is_phantom(&self) -> bool {
        match self.state {
            SlotState::Active | SlotState::Partial => self.order_id.is_none(),
            SlotState::Virtual => self.order_id.is_some(),
        }
    }

    pub fn is_placed(&self) -> bool {
        matches!(self.state, SlotState::Active | SlotState::Partial)
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, SlotState::Virtual)
    }

    pub fn side(&self) -> Option<Side> {
        match self.slot_type {
            SlotType::Buy => Some(Side::Buy),
            SlotType::Sell => Some(Side::Sell),
            SlotType::Spread => self.effective_side,
        }
    }

    /// True when a resting partial's remaining size has fallen below
    /// `limits.partial_dust_threshold_percentage` of the ideal size it was
    /// created at.
    pub fn is_dust(&self, ideal: f64, limits: &GridLimits) -> bool {
        self.state == SlotState::Partial
            && self.size < crate::precision::single_dust_threshold(ideal, limits.partial_dust_threshold_percentage)
    }

    pub fn downgrade_to_virtual(&mut self) {
        self.state = SlotState::Virtual;
        self.order_id = None;
        self.raw_on_chain = None;
        self.size = 0.0;
        self.effective_side = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_without_order_id_is_phantom() {
        let mut s = Slot::new_virtual("slot-0", 1.0, SlotType::Buy);
        s.state = SlotState::Active;
        assert!(s.is_phantom());
    }

    #[test]
    fn virtual_slot_is_not_phantom() {
        let s = Slot::new_virtual("slot-0", 1.0, SlotType::Buy);
        assert!(!s.is_phantom());
        assert!(s.is_available());
    }

    #[test]
    fn downgrade_clears_chain_identity() {
        let mut s = Slot::new_virtual("slot-0", 1.0, SlotType::Sell);
        s.state = SlotState::Active;
        s.order_id = Some("1.7.1".into());
        s.size = 2.0;
        s.downgrade_to_virtual();
        assert_eq!(s.state, SlotState::Virtual);
        assert!(s.order_id.is_none());
        assert_eq!(s.size, 0.0);
    }
}
