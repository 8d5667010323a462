// ─────────────────────────────────────────────────────────────────────────────
// chain.rs — the chain-client contract
//
// The shape of this trait is the same one `ExchangeClient` used for
// Hyperliquid order placement: an `async_trait` abstraction with a real
// implementation the host wires up and an in-memory `Sim*` twin the engine's
// own tests and dry runs drive instead. Unlike `ExchangeClient`, which baked
// in perpetual-futures concepts (leverage, tp/sl, positions), this contract
// only carries what the Grid Engine actually needs: reading the open-order
// book and creating/updating/cancelling limit orders, plus an optional batch
// path for outside-in reconciliation.
// ─────────────────────────────────────────────────────────────────────────────
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::GridError;
use crate::order::Side;

#[derive(Debug, Clone, PartialEq)]
pub struct AssetAmount {
    pub asset_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone)]
pub struct ChainOrder {
    pub id: String,
    pub sell_price_base: AssetAmount,
    pub sell_price_quote: AssetAmount,
    pub for_sale: f64,
}

#[derive(Debug, Clone)]
pub struct UpdateOrderParams {
    pub amount_to_sell: f64,
    pub min_to_receive: f64,
    pub new_price: Option<f64>,
    pub order_type: Option<Side>,
}

#[derive(Debug, Clone)]
pub struct ChainOpResult {
    pub chain_order_id: Option<String>,
    pub skipped: bool,
}

/// A planned create/update/cancel op, queued up by the reconciliation,
/// divergence, or spread-correction engines before being handed to a batch.
#[derive(Debug, Clone)]
pub enum PlannedOp {
    Create {
        slot_id: String,
        amount_to_sell: f64,
        sell_asset_id: String,
        min_to_receive: f64,
        receive_asset_id: String,
    },
    Update {
        slot_id: String,
        chain_order_id: String,
        params: UpdateOrderParams,
    },
    Cancel {
        slot_id: String,
        chain_order_id: String,
    },
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn read_open_orders(
        &mut self,
        account_ref: &str,
        timeout: Duration,
    ) -> Result<Vec<ChainOrder>, GridError>;

    async fn create_order(
        &mut self,
        account: &str,
        amount_to_sell: f64,
        sell_asset_id: &str,
        min_to_receive: f64,
        receive_asset_id: &str,
        expiration_secs: u64,
        fill_or_kill: bool,
    ) -> Result<ChainOpResult, GridError>;

    async fn update_order(
        &mut self,
        account: &str,
        chain_order_id: &str,
        params: UpdateOrderParams,
    ) -> Result<Option<ChainOpResult>, GridError>;

    async fn cancel_order(&mut self, account: &str, chain_order_id: &str) -> Result<(), GridError>;

    /// Batch execution is optional; a client without batch support reports
    /// `false` here and the reconciliation engine falls back to sequential
    /// per-op submission (the contract-mandated degraded path).
    fn supports_batch(&self) -> bool {
        false
    }

    async fn execute_batch(
        &mut self,
        _account: &str,
        _ops: Vec<PlannedOp>,
    ) -> Result<Vec<ChainOpResult>, GridError> {
        Err(GridError::ChainOperationFailure("batch execution not supported".into()))
    }
}

// ─── Sim Chain Client (In-Memory) ───────────────────────────────────────────

/// An in-memory chain used by dry runs and the engine's own test suite.
/// Every create/update gets a monotonically increasing synthetic chain id;
/// cancels simply remove the entry.
pub struct SimChainClient {
    orders: HashMap<String, ChainOrder>,
    next_id: u64,
    pub fail_next_batch: bool,
}

impl SimChainClient {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            next_id: 1,
            fail_next_batch: false,
        }
    }

    fn fresh_id(&mut self) -> String {
        let id = format!("1.7.{}", self.next_id);
        self.next_id += 1;
        id
    }

    pub fn seed(&mut self, order: ChainOrder) {
        self.orders.insert(order.id.clone(), order);
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

impl Default for SimChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for SimChainClient {
    async fn read_open_orders(
        &mut self,
        _account_ref: &str,
        _timeout: Duration,
    ) -> Result<Vec<ChainOrder>, GridError> {
        Ok(self.orders.values().cloned().collect())
    }

    async fn create_order(
        &mut self,
        _account: &str,
        amount_to_sell: f64,
        sell_asset_id: &str,
        min_to_receive: f64,
        receive_asset_id: &str,
        _expiration_secs: u64,
        _fill_or_kill: bool,
    ) -> Result<ChainOpResult, GridError> {
        let id = self.fresh_id();
        self.orders.insert(
            id.clone(),
            ChainOrder {
                id: id.clone(),
                sell_price_base: AssetAmount {
                    asset_id: sell_asset_id.to_string(),
                    amount: amount_to_sell,
                },
                sell_price_quote: AssetAmount {
                    asset_id: receive_asset_id.to_string(),
                    amount: min_to_receive,
                },
                for_sale: amount_to_sell,
            },
        );
        Ok(ChainOpResult {
            chain_order_id: Some(id),
            skipped: false,
        })
    }

    async fn update_order(
        &mut self,
        _account: &str,
        chain_order_id: &str,
        params: UpdateOrderParams,
    ) -> Result<Option<ChainOpResult>, GridError> {
        match self.orders.get_mut(chain_order_id) {
            Some(order) => {
                order.for_sale = params.amount_to_sell;
                order.sell_price_base.amount = params.amount_to_sell;
                order.sell_price_quote.amount = params.min_to_receive;
                Ok(Some(ChainOpResult {
                    chain_order_id: Some(chain_order_id.to_string()),
                    skipped: false,
                }))
            }
            None => Err(GridError::ChainOperationFailure(format!(
                "update: no such order {chain_order_id}"
            ))),
        }
    }

    async fn cancel_order(&mut self, _account: &str, chain_order_id: &str) -> Result<(), GridError> {
        self.orders.remove(chain_order_id);
        Ok(())
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn execute_batch(
        &mut self,
        account: &str,
        ops: Vec<PlannedOp>,
    ) -> Result<Vec<ChainOpResult>, GridError> {
        if self.fail_next_batch {
            self.fail_next_batch = false;
            return Err(GridError::ChainOperationFailure("simulated batch failure".into()));
        }
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let result = match op {
                PlannedOp::Create {
                    amount_to_sell,
                    sell_asset_id,
                    min_to_receive,
                    receive_asset_id,
                    ..
                } => {
                    self.create_order(
                        account,
                        amount_to_sell,
                        &sell_asset_id,
                        min_to_receive,
                        &receive_asset_id,
                        0,
                        false,
                    )
                    .await?
                }
                PlannedOp::Update {
                    chain_order_id,
                    params,
                    ..
                } => self
                    .update_order(account, &chain_order_id, params)
                    .await?
                    .unwrap_or(ChainOpResult {
                        chain_order_id: None,
                        skipped: true,
                    }),
                PlannedOp::Cancel { chain_order_id, .. } => {
                    self.cancel_order(account, &chain_order_id).await?;
                    ChainOpResult {
                        chain_order_id: None,
                        skipped: false,
                    }
                }
            };
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_read_roundtrips() {
        let mut client = SimChainClient::new();
        let res = client
            .create_order("acct", 1.0, "1.3.0", 2.0, "1.3.1", 0, false)
            .await
            .unwrap();
        assert!(res.chain_order_id.is_some());
        let open = client.read_open_orders("acct", Duration::from_secs(1)).await.unwrap();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn cancel_removes_order() {
        let mut client = SimChainClient::new();
        let res = client
            .create_order("acct", 1.0, "1.3.0", 2.0, "1.3.1", 0, false)
            .await
            .unwrap();
        let id = res.chain_order_id.unwrap();
        client.cancel_order("acct", &id).await.unwrap();
        assert_eq!(client.order_count(), 0);
    }
}
