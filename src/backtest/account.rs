//! Simulated venue (§4.8). Implements the same `Venue` trait the live
//! adapters do so `ExecutionEngine`/`DecisionEngine` run against a backtest
//! unchanged, the way `binance.rs`/`hyperliquid.rs`/`aster.rs` each give the
//! scheduler an identical capability set over a different wire protocol.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::venue::{round_to_step, Balance, Fill, FillSide, Order, Position, Side, Venue, VenueError, VenueResult};

#[derive(Debug, Clone)]
struct SimPosition {
    side: Side,
    quantity: f64,
    entry_price: f64,
    leverage: u32,
    margin: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    liquidation_price: f64,
    open_time: u64,
}

/// One simulated execution, recorded for the run's `trades.ndjson` output.
#[derive(Debug, Clone)]
pub struct SimFill {
    pub symbol: String,
    pub side: FillSide,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub timestamp_ms: u64,
}

/// In-memory venue backed by the feed's current bar price instead of a wire
/// API. `set_bar_price` is called once per symbol at the top of each bar by
/// the runner before `Venue` methods are invoked for that bar.
pub struct SimulatedAccount {
    cash: Mutex<f64>,
    positions: Mutex<HashMap<String, SimPosition>>,
    fills: Mutex<Vec<SimFill>>,
    bar_price: Mutex<HashMap<String, f64>>,
    taker_fee_bps: f64,
    tick_size: f64,
    step_size: f64,
    min_notional: f64,
}

impl SimulatedAccount {
    pub fn new(starting_cash: f64, taker_fee_bps: f64, tick_size: f64, step_size: f64, min_notional: f64) -> Self {
        Self {
            cash: Mutex::new(starting_cash),
            positions: Mutex::new(HashMap::new()),
            fills: Mutex::new(Vec::new()),
            bar_price: Mutex::new(HashMap::new()),
            taker_fee_bps,
            tick_size,
            step_size,
            min_notional,
        }
    }

    pub fn set_bar_price(&self, symbol: &str, price: f64) {
        self.bar_price.lock().unwrap().insert(symbol.to_string(), price);
    }

    fn price_of(&self, symbol: &str) -> VenueResult<f64> {
        self.bar_price
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError(format!("no bar price loaded for {symbol}")))
    }

    pub fn take_fills(&self) -> Vec<SimFill> {
        std::mem::take(&mut *self.fills.lock().unwrap())
    }

    /// Force-closes a position at `fill_price`, used by the OHLC risk
    /// engine when a liquidation/stop_loss/take_profit trigger fires
    /// intrabar (the scan's fill price bypasses `bar_price`, which only
    /// ever reflects the bar close).
    pub fn force_close(&self, symbol: &str, fill_price: f64, timestamp_ms: u64) -> VenueResult<()> {
        let mut positions = self.positions.lock().unwrap();
        let Some(pos) = positions.remove(symbol) else {
            return Ok(());
        };
        let pnl = unrealized_pnl(&pos, fill_price);
        let fee = pos.quantity * fill_price * self.taker_fee_bps / 10_000.0;
        *self.cash.lock().unwrap() += pos.margin + pnl - fee;
        self.fills.lock().unwrap().push(SimFill {
            symbol: symbol.to_string(),
            side: close_fill_side(pos.side),
            price: fill_price,
            quantity: pos.quantity,
            fee,
            timestamp_ms,
        });
        Ok(())
    }
}

fn unrealized_pnl(pos: &SimPosition, mark: f64) -> f64 {
    match pos.side {
        Side::Long => (mark - pos.entry_price) * pos.quantity,
        Side::Short => (pos.entry_price - mark) * pos.quantity,
    }
}

fn close_fill_side(open_side: Side) -> FillSide {
    match open_side {
        Side::Long => FillSide::Sell,
        Side::Short => FillSide::Buy,
    }
}

#[async_trait]
impl Venue for SimulatedAccount {
    async fn balance(&self) -> VenueResult<Balance> {
        let cash = *self.cash.lock().unwrap();
        let positions = self.positions.lock().unwrap();
        let bar_price = self.bar_price.lock().unwrap();
        let mut unrealized = 0.0;
        let mut margin_used = 0.0;
        for (symbol, pos) in positions.iter() {
            let mark = bar_price.get(symbol).copied().unwrap_or(pos.entry_price);
            unrealized += unrealized_pnl(pos, mark);
            margin_used += pos.margin;
        }
        let total_wallet = cash + margin_used + unrealized;
        Ok(Balance {
            total_wallet,
            available: cash,
            unrealized,
            margin_pct: if total_wallet > 0.0 { margin_used / total_wallet } else { 0.0 },
        })
    }

    async fn positions(&self) -> VenueResult<Vec<Position>> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .map(|(symbol, p)| Position {
                symbol: symbol.clone(),
                side: p.side,
                quantity: p.quantity,
                entry_price: p.entry_price,
                leverage: p.leverage,
                margin: p.margin,
                stop_loss: p.stop_loss,
                take_profit: p.take_profit,
                liquidation_price: p.liquidation_price,
                open_time: p.open_time,
            })
            .collect())
    }

    async fn open(&self, symbol: &str, side: Side, qty: f64, leverage: u32) -> VenueResult<Order> {
        let price = self.price_of(symbol)?;
        let qty = self.format_quantity(symbol, qty);
        let notional = qty * price;
        if notional < self.minimum_notional(symbol) {
            return Err(VenueError(format!("{symbol} notional {notional} below minimum")));
        }
        let margin = Position::compute_margin(qty, price, leverage);
        let fee = notional * self.taker_fee_bps / 10_000.0;
        let liq_price = match side {
            Side::Long => price * (1.0 - 1.0 / leverage.max(1) as f64 * 0.9),
            Side::Short => price * (1.0 + 1.0 / leverage.max(1) as f64 * 0.9),
        };
        {
            let mut cash = self.cash.lock().unwrap();
            if *cash < margin + fee {
                return Err(VenueError(format!("{symbol} insufficient margin: need {}, have {}", margin + fee, *cash)));
            }
            *cash -= margin + fee;
        }
        self.positions.lock().unwrap().insert(
            symbol.to_string(),
            SimPosition {
                side,
                quantity: qty,
                entry_price: price,
                leverage,
                margin,
                stop_loss: None,
                take_profit: None,
                liquidation_price: liq_price,
                open_time: 0,
            },
        );
        self.fills.lock().unwrap().push(SimFill {
            symbol: symbol.to_string(),
            side: match side {
                Side::Long => FillSide::Buy,
                Side::Short => FillSide::Sell,
            },
            price,
            quantity: qty,
            fee,
            timestamp_ms: 0,
        });
        Ok(Order { order_id: format!("sim-open-{symbol}"), symbol: symbol.to_string() })
    }

    async fn close(&self, symbol: &str, side: Side, qty: f64) -> VenueResult<Order> {
        let price = self.price_of(symbol)?;
        let mut positions = self.positions.lock().unwrap();
        let Some(pos) = positions.get_mut(symbol) else {
            return Err(VenueError(format!("{symbol} has no open position")));
        };
        if pos.side != side {
            return Err(VenueError(format!("{symbol} side mismatch on close")));
        }
        let close_qty = if qty <= 0.0 { pos.quantity } else { qty.min(pos.quantity) };
        let pnl = unrealized_pnl(pos, price) * (close_qty / pos.quantity);
        let margin_released = pos.margin * (close_qty / pos.quantity);
        let fee = close_qty * price * self.taker_fee_bps / 10_000.0;
        pos.quantity -= close_qty;
        pos.margin -= margin_released;
        let fully_closed = pos.quantity <= 1e-12;
        if fully_closed {
            positions.remove(symbol);
        }
        drop(positions);
        *self.cash.lock().unwrap() += margin_released + pnl - fee;
        self.fills.lock().unwrap().push(SimFill { symbol: symbol.to_string(), side: close_fill_side(side), price, quantity: close_qty, fee, timestamp_ms: 0 });
        Ok(Order { order_id: format!("sim-close-{symbol}"), symbol: symbol.to_string() })
    }

    async fn set_stop_loss(&self, symbol: &str, _side: Side, _qty: f64, price: f64) -> VenueResult<Order> {
        if let Some(pos) = self.positions.lock().unwrap().get_mut(symbol) {
            pos.stop_loss = Some(price);
        }
        Ok(Order { order_id: format!("sim-sl-{symbol}"), symbol: symbol.to_string() })
    }

    async fn set_take_profit(&self, symbol: &str, _side: Side, _qty: f64, price: f64) -> VenueResult<Order> {
        if let Some(pos) = self.positions.lock().unwrap().get_mut(symbol) {
            pos.take_profit = Some(price);
        }
        Ok(Order { order_id: format!("sim-tp-{symbol}"), symbol: symbol.to_string() })
    }

    async fn cancel_stop_loss(&self, symbol: &str, _side: Side) -> VenueResult<()> {
        if let Some(pos) = self.positions.lock().unwrap().get_mut(symbol) {
            pos.stop_loss = None;
        }
        Ok(())
    }

    async fn cancel_take_profit(&self, symbol: &str, _side: Side) -> VenueResult<()> {
        if let Some(pos) = self.positions.lock().unwrap().get_mut(symbol) {
            pos.take_profit = None;
        }
        Ok(())
    }

    async fn recent_fills(&self, symbol: &str, start_ms: u64, end_ms: u64) -> VenueResult<Vec<Fill>> {
        Ok(self
            .fills
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.symbol == symbol && f.timestamp_ms >= start_ms && f.timestamp_ms <= end_ms)
            .map(|f| Fill { side: f.side, price: f.price, quantity: f.quantity, timestamp_ms: f.timestamp_ms, fee: Some(f.fee) })
            .collect())
    }

    fn format_price(&self, _symbol: &str, v: f64) -> f64 {
        round_to_step(v, self.tick_size)
    }

    fn format_quantity(&self, _symbol: &str, v: f64) -> f64 {
        round_to_step(v, self.step_size)
    }

    fn minimum_notional(&self, _symbol: &str) -> f64 {
        self.min_notional
    }

    fn taker_fee(&self) -> f64 {
        self.taker_fee_bps / 10_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_then_close_returns_margin_and_pnl() {
        let acct = SimulatedAccount::new(10_000.0, 5.0, 0.01, 0.001, 5.0);
        acct.set_bar_price("BTCUSDT", 100.0);
        acct.open("BTCUSDT", Side::Long, 1.0, 10).await.unwrap();
        let bal = acct.balance().await.unwrap();
        assert!(bal.available < 10_000.0);

        acct.set_bar_price("BTCUSDT", 110.0);
        acct.close("BTCUSDT", Side::Long, 0.0).await.unwrap();
        let bal = acct.balance().await.unwrap();
        assert!(bal.available > 10_000.0);
        assert!(acct.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_rejected_when_notional_below_minimum() {
        let acct = SimulatedAccount::new(10_000.0, 5.0, 0.01, 0.001, 50.0);
        acct.set_bar_price("XRPUSDT", 1.0);
        let err = acct.open("XRPUSDT", Side::Long, 1.0, 10).await.unwrap_err();
        assert!(err.0.contains("below minimum"));
    }

    #[tokio::test]
    async fn force_close_settles_cash_and_records_fill() {
        let acct = SimulatedAccount::new(10_000.0, 5.0, 0.01, 0.001, 5.0);
        acct.set_bar_price("ETHUSDT", 2000.0);
        acct.open("ETHUSDT", Side::Long, 1.0, 5).await.unwrap();
        acct.force_close("ETHUSDT", 1800.0, 1).await.unwrap();
        assert!(acct.positions().await.unwrap().is_empty());
        let fills = acct.take_fills();
        assert!(fills.iter().any(|f| f.price == 1800.0));
    }
}
