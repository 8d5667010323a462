// ─────────────────────────────────────────────────────────────────────────────
// gridbot_core — grid market-making engine library
//
// Module layout mirrors the component breakdown: precision/order are the
// leaf data types, sizing/grid/manager build the committed grid and its
// mutation discipline, and reconcile/divergence/spread are the three
// engines that plan changes against it. chain/oracle are the external
// contracts the engines are generic over; persistence and config round out
// the ambient stack.
// ─────────────────────────────────────────────────────────────────────────────
pub mod chain;
pub mod config;
pub mod divergence;
pub mod error;
pub mod grid;
pub mod manager;
pub mod oracle;
pub mod order;
pub mod persistence;
pub mod precision;
pub mod reconcile;
pub mod sizing;
pub mod spread;
