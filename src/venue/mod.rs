//! C3 — venue adapter. A closed capability-set trait; three concrete venues
//! share the same contract (§9 polymorphism note: prefer a tagged enum over
//! open inheritance — there is no runtime plugin point).

pub mod aster;
pub mod binance;
pub mod hyperliquid;
pub mod klines;
pub mod signing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Balance {
    pub total_wallet: f64,
    pub available: f64,
    pub unrealized: f64,
    pub margin_pct: f64,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub margin: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub liquidation_price: f64,
    pub open_time: u64,
}

impl Position {
    /// `margin = quantity * entry_price / leverage` (§3 invariant).
    pub fn compute_margin(quantity: f64, entry_price: f64, leverage: u32) -> f64 {
        quantity * entry_price / leverage.max(1) as f64
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
}

/// Common fill shape produced by every venue, per §6 External Interfaces.
#[derive(Debug, Clone)]
pub struct Fill {
    pub side: FillSide,
    pub price: f64,
    pub quantity: f64,
    pub timestamp_ms: u64,
    pub fee: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct VenueError(pub String);

impl std::fmt::Display for VenueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for VenueError {}

pub type VenueResult<T> = Result<T, VenueError>;

#[async_trait]
pub trait Venue: Send + Sync {
    async fn balance(&self) -> VenueResult<Balance>;
    async fn positions(&self) -> VenueResult<Vec<Position>>;
    async fn open(&self, symbol: &str, side: Side, qty: f64, leverage: u32) -> VenueResult<Order>;
    /// `qty == 0.0` closes the full position.
    async fn close(&self, symbol: &str, side: Side, qty: f64) -> VenueResult<Order>;
    async fn set_stop_loss(&self, symbol: &str, side: Side, qty: f64, price: f64) -> VenueResult<Order>;
    async fn set_take_profit(&self, symbol: &str, side: Side, qty: f64, price: f64) -> VenueResult<Order>;
    async fn cancel_stop_loss(&self, symbol: &str, side: Side) -> VenueResult<()>;
    async fn cancel_take_profit(&self, symbol: &str, side: Side) -> VenueResult<()>;
    async fn recent_fills(&self, symbol: &str, start_ms: u64, end_ms: u64) -> VenueResult<Vec<Fill>>;

    fn format_price(&self, symbol: &str, v: f64) -> f64;
    fn format_quantity(&self, symbol: &str, v: f64) -> f64;
    fn minimum_notional(&self, symbol: &str) -> f64;
    fn taker_fee(&self) -> f64;
}

/// Rounds `v` down to the nearest multiple of `step` (tick/step size rounding
/// shared by every concrete venue's `format_price`/`format_quantity`).
pub fn round_to_step(v: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return v;
    }
    (v / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_matches_spec_formula() {
        let m = Position::compute_margin(1.0, 3000.0, 10);
        assert!((m - 300.0).abs() < 1e-9);
    }

    #[test]
    fn round_to_step_truncates_not_rounds() {
        assert!((round_to_step(100.567, 0.01) - 100.56).abs() < 1e-9);
        assert!((round_to_step(100.0, 0.0) - 100.0).abs() < 1e-9);
    }
}
