// ─────────────────────────────────────────────────────────────────────────────
// error.rs — Grid Engine error taxonomy
//
// One variant per error kind from the error-handling design: a handful carry
// enough context to log without re-deriving it, the rest are plain markers.
// Fatal kinds (config/precision/funds/corruption) are meant to surface to the
// caller; recoverable kinds (chain op, phantom, version conflict) are meant
// to be caught locally and folded into a recovery sync.
// ─────────────────────────────────────────────────────────────────────────────
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("invalid grid config: {0}")]
    InvalidGridConfig(String),

    #[error("asset precision missing for {0}")]
    AssetPrecisionMissing(String),

    #[error("account totals unavailable after {0}ms")]
    AccountTotalsUnavailable(u64),

    #[error("insufficient funds for minimum slot size on {side}: need {needed}, have {available}")]
    InsufficientFundsForMinimum {
        side: String,
        needed: f64,
        available: f64,
    },

    #[error("chain operation failed: {0}")]
    ChainOperationFailure(String),

    #[error("phantom order detected at slot {0}")]
    PhantomOrderDetected(String),

    #[error("blockchain sync suspicious: {0}")]
    BlockchainSyncSuspicious(String),

    #[error("grid version conflict: base {base}, current {current}")]
    VersionConflict { base: u64, current: u64 },
}

impl GridError {
    /// Kinds the engine recovers from locally (recovery sync / downgrade)
    /// rather than propagating to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GridError::ChainOperationFailure(_)
                | GridError::PhantomOrderDetected(_)
                | GridError::VersionConflict { .. }
        )
    }
}
