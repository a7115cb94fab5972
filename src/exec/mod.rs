//! C5 — execution engine. Serialises decisions against a venue, reconciles
//! real fill prices, maintains stop-loss/take-profit memory, and detects
//! auto-closed positions (§4.5).

pub mod position_sm;

use std::collections::HashMap;

use crate::decision::DecisionAction;
use crate::venue::{Fill, FillSide, Position, Side, Venue};
use position_sm::{apply_event, OpenPosition, PositionEvent, PositionKey};

#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub leverage: u32,
    pub open_price: f64,
    pub close_price: f64,
    pub position_value: f64,
    pub margin_used: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub duration_secs: u64,
    pub open_time: u64,
    pub close_time: u64,
    pub was_stop_loss: bool,
    pub prompt_hash: String,
}

#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Opened { symbol: String, side: Side, entry_price: f64, quantity: f64, leverage: u32, open_time: u64 },
    Closed { outcome: TradeOutcome },
    PartiallyClosed { symbol: String, side: Side, closed_qty: f64, close_price: f64, fragment_pnl: f64 },
    StopLossUpdated { symbol: String, side: Side, price: f64 },
    TakeProfitUpdated { symbol: String, side: Side, price: f64 },
    Skipped { symbol: String, reason: String },
}

const RESIDUAL_FULL_CLOSE_THRESHOLD_USD: f64 = 10.0;
const RISK_PCT_CAP: f64 = 0.02;
const FILL_RECONCILE_WINDOW_MS: u64 = 10_000;

pub struct ExecutionEngine {
    memory: HashMap<PositionKey, OpenPosition>,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self { memory: HashMap::new() }
    }

    /// Sorts decisions by action priority (`close_* < open_* < hold/wait`,
    /// stable on ties) and executes each against `venue` in order.
    pub async fn execute(
        &mut self,
        venue: &dyn Venue,
        mut decisions: Vec<DecisionAction>,
        mark_prices: &HashMap<String, f64>,
        available_margin: f64,
        prompt_hash: &str,
        now_ms: u64,
    ) -> Vec<ExecutionEvent> {
        decisions.sort_by_key(|d| d.priority());

        let mut events = Vec::new();
        let mut available = available_margin;

        for decision in decisions {
            let event = self.execute_one(venue, &decision, mark_prices, &mut available, prompt_hash, now_ms).await;
            events.push(event);
        }

        events
    }

    async fn execute_one(
        &mut self,
        venue: &dyn Venue,
        decision: &DecisionAction,
        mark_prices: &HashMap<String, f64>,
        available: &mut f64,
        prompt_hash: &str,
        now_ms: u64,
    ) -> ExecutionEvent {
        match decision {
            DecisionAction::OpenLong { symbol, leverage, position_size_usd, stop_loss, take_profit } => {
                self.open(venue, symbol, Side::Long, *leverage, *position_size_usd, *stop_loss, *take_profit, mark_prices, available, now_ms)
                    .await
            }
            DecisionAction::OpenShort { symbol, leverage, position_size_usd, stop_loss, take_profit } => {
                self.open(venue, symbol, Side::Short, *leverage, *position_size_usd, *stop_loss, *take_profit, mark_prices, available, now_ms)
                    .await
            }
            DecisionAction::CloseLong { symbol } => self.close(venue, symbol, Side::Long, prompt_hash, now_ms, false).await,
            DecisionAction::CloseShort { symbol } => self.close(venue, symbol, Side::Short, prompt_hash, now_ms, false).await,
            DecisionAction::AutoCloseLong { symbol } => self.close(venue, symbol, Side::Long, prompt_hash, now_ms, false).await,
            DecisionAction::AutoCloseShort { symbol } => self.close(venue, symbol, Side::Short, prompt_hash, now_ms, false).await,
            DecisionAction::PartialClose { symbol, close_percentage, new_stop_loss, new_take_profit } => {
                self.partial_close(venue, symbol, *close_percentage, *new_stop_loss, *new_take_profit, mark_prices, prompt_hash, now_ms)
                    .await
            }
            DecisionAction::UpdateStopLoss { symbol, new_stop_loss } => self.update_stop_loss(venue, symbol, *new_stop_loss, mark_prices).await,
            DecisionAction::UpdateTakeProfit { symbol, new_take_profit } => {
                self.update_take_profit(venue, symbol, *new_take_profit, mark_prices).await
            }
            DecisionAction::Hold { symbol } | DecisionAction::Wait { symbol } => {
                ExecutionEvent::Skipped { symbol: symbol.clone(), reason: "hold_or_wait".into() }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn open(
        &mut self,
        venue: &dyn Venue,
        symbol: &str,
        side: Side,
        leverage: u32,
        size_usd: f64,
        stop_loss: f64,
        take_profit: f64,
        mark_prices: &HashMap<String, f64>,
        available: &mut f64,
        now_ms: u64,
    ) -> ExecutionEvent {
        let key = PositionKey::new(symbol, side);
        if self.memory.contains_key(&key) {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "already_open_same_side".into() };
        }
        let Some(&mark) = mark_prices.get(symbol) else {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "no_mark_price".into() };
        };

        let est_fee = size_usd * venue.taker_fee();
        let required_margin = size_usd / leverage.max(1) as f64 + est_fee;
        if required_margin > *available {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "insufficient_margin".into() };
        }

        let open_time = now_ms;
        let qty = venue.format_quantity(symbol, size_usd / mark);
        let order = match venue.open(symbol, side, qty, leverage).await {
            Ok(o) => o,
            Err(e) => return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: format!("open_failed: {e}") },
        };
        let _ = order;

        let entry_price = reconcile_fill_price(venue, symbol, side_to_fill_side(side, true), open_time, mark).await;

        let mut effective_sl = Some(stop_loss);
        let risk_pct = match side {
            Side::Long => (entry_price - stop_loss) / entry_price,
            Side::Short => (stop_loss - entry_price) / entry_price,
        };
        if risk_pct > RISK_PCT_CAP {
            let max_sl = match side {
                Side::Long => entry_price * (1.0 - RISK_PCT_CAP),
                Side::Short => entry_price * (1.0 + RISK_PCT_CAP),
            };
            effective_sl = Some(venue.format_price(symbol, max_sl));
        }

        if let Some(sl) = effective_sl {
            let _ = venue.set_stop_loss(symbol, side, qty, venue.format_price(symbol, sl)).await;
        }
        let _ = venue.set_take_profit(symbol, side, qty, venue.format_price(symbol, take_profit)).await;

        *available -= required_margin;

        self.memory.insert(
            key,
            OpenPosition {
                quantity: qty,
                entry_price,
                leverage,
                stop_loss: effective_sl,
                take_profit: Some(take_profit),
                open_time,
                state: position_sm::PositionState::Open,
            },
        );

        ExecutionEvent::Opened { symbol: symbol.to_string(), side, entry_price, quantity: qty, leverage, open_time }
    }

    async fn close(&mut self, venue: &dyn Venue, symbol: &str, side: Side, prompt_hash: &str, now_ms: u64, was_stop_loss: bool) -> ExecutionEvent {
        let key = PositionKey::new(symbol, side);
        let Some(pos) = self.memory.get(&key).cloned() else {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "no_open_position".into() };
        };

        let close_time = now_ms;
        if venue.close(symbol, side, 0.0).await.is_err() {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "close_failed".into() };
        }
        let close_price = reconcile_fill_price(venue, symbol, side_to_fill_side(side, false), close_time, pos.entry_price).await;

        let mut memory_opt = Some(pos.clone());
        let _ = apply_event(&mut memory_opt, PositionEvent::Close { close_price, close_time, was_stop_loss });
        self.memory.remove(&key);

        let outcome = build_trade_outcome(symbol, side, &pos, close_price, close_time, was_stop_loss, prompt_hash);
        ExecutionEvent::Closed { outcome }
    }

    async fn partial_close(
        &mut self,
        venue: &dyn Venue,
        symbol: &str,
        close_percentage: f64,
        new_stop_loss: Option<f64>,
        new_take_profit: Option<f64>,
        mark_prices: &HashMap<String, f64>,
        prompt_hash: &str,
        now_ms: u64,
    ) -> ExecutionEvent {
        let side = match self.find_side(symbol) {
            Some(s) => s,
            None => return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "no_open_position".into() },
        };
        let key = PositionKey::new(symbol, side);
        let pos = self.memory.get(&key).cloned().unwrap();
        let entry_price = pos.entry_price;

        let close_qty = pos.quantity * close_percentage / 100.0;
        let residual_qty = pos.quantity - close_qty;
        let mark = mark_prices.get(symbol).copied().unwrap_or(pos.entry_price);
        let residual_notional = residual_qty * mark;

        if residual_notional <= RESIDUAL_FULL_CLOSE_THRESHOLD_USD {
            return self.close(venue, symbol, side, prompt_hash, now_ms, false).await;
        }

        if venue.close(symbol, side, venue.format_quantity(symbol, close_qty)).await.is_err() {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "partial_close_failed".into() };
        }
        let close_price = reconcile_fill_price(venue, symbol, side_to_fill_side(side, false), now_ms, mark).await;

        let sl = new_stop_loss.or(pos.stop_loss);
        let tp = new_take_profit.or(pos.take_profit);
        if let Some(sl) = sl {
            let _ = venue.set_stop_loss(symbol, side, venue.format_quantity(symbol, residual_qty), venue.format_price(symbol, sl)).await;
        }
        if let Some(tp) = tp {
            let _ = venue.set_take_profit(symbol, side, venue.format_quantity(symbol, residual_qty), venue.format_price(symbol, tp)).await;
        }

        let mut memory_opt = Some(pos);
        let _ = apply_event(&mut memory_opt, PositionEvent::PartialClose { closed_qty: close_qty, close_price });
        if let Some(mut remaining) = memory_opt {
            remaining.stop_loss = sl;
            remaining.take_profit = tp;
            self.memory.insert(key, remaining);
        }

        let fragment_pnl = match side {
            Side::Long => (close_price - entry_price) * close_qty,
            Side::Short => (entry_price - close_price) * close_qty,
        };

        ExecutionEvent::PartiallyClosed { symbol: symbol.to_string(), side, closed_qty: close_qty, close_price, fragment_pnl }
    }

    async fn update_stop_loss(&mut self, venue: &dyn Venue, symbol: &str, new_stop_loss: f64, mark_prices: &HashMap<String, f64>) -> ExecutionEvent {
        let side = match self.find_side(symbol) {
            Some(s) => s,
            None => return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "no_open_position".into() },
        };
        let mark = mark_prices.get(symbol).copied().unwrap_or(0.0);
        let valid_side = match side {
            Side::Long => new_stop_loss < mark,
            Side::Short => new_stop_loss > mark,
        };
        if !valid_side {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "stop_loss_wrong_side".into() };
        }

        let key = PositionKey::new(symbol, side);
        let pos = self.memory.get(&key).unwrap();
        if pos.stop_loss == Some(new_stop_loss) {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "unchanged".into() };
        }
        let _ = venue.cancel_stop_loss(symbol, side).await;
        let price = venue.format_price(symbol, new_stop_loss);
        let qty = pos.quantity;
        let _ = venue.set_stop_loss(symbol, side, qty, price).await;

        self.memory.get_mut(&key).unwrap().stop_loss = Some(price);
        ExecutionEvent::StopLossUpdated { symbol: symbol.to_string(), side, price }
    }

    async fn update_take_profit(&mut self, venue: &dyn Venue, symbol: &str, new_take_profit: f64, mark_prices: &HashMap<String, f64>) -> ExecutionEvent {
        let side = match self.find_side(symbol) {
            Some(s) => s,
            None => return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "no_open_position".into() },
        };
        let mark = mark_prices.get(symbol).copied().unwrap_or(0.0);
        let valid_side = match side {
            Side::Long => new_take_profit > mark,
            Side::Short => new_take_profit < mark,
        };
        if !valid_side {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "take_profit_wrong_side".into() };
        }

        let key = PositionKey::new(symbol, side);
        let pos = self.memory.get(&key).unwrap();
        if pos.take_profit == Some(new_take_profit) {
            return ExecutionEvent::Skipped { symbol: symbol.to_string(), reason: "unchanged".into() };
        }
        let _ = venue.cancel_take_profit(symbol, side).await;
        let price = venue.format_price(symbol, new_take_profit);
        let qty = pos.quantity;
        let _ = venue.set_take_profit(symbol, side, qty, price).await;

        self.memory.get_mut(&key).unwrap().take_profit = Some(price);
        ExecutionEvent::TakeProfitUpdated { symbol: symbol.to_string(), side, price }
    }

    /// A key held in memory but absent from `live_positions` is an
    /// auto-close event (§4.5); synthesises the corresponding close.
    pub async fn detect_auto_closes(&mut self, venue: &dyn Venue, live_positions: &[Position], prompt_hash: &str, now_ms: u64) -> Vec<ExecutionEvent> {
        let live: std::collections::HashSet<PositionKey> =
            live_positions.iter().map(|p| PositionKey::new(p.symbol.clone(), p.side)).collect();
        let missing: Vec<PositionKey> = self.memory.keys().filter(|k| !live.contains(*k)).cloned().collect();

        let mut events = Vec::new();
        for key in missing {
            let pos = self.memory.get(&key).cloned().unwrap();
            let close_price = reconcile_fill_price(venue, &key.symbol, side_to_fill_side(key.side, false), now_ms, pos.entry_price).await;
            self.memory.remove(&key);
            let outcome = build_trade_outcome(&key.symbol, key.side, &pos, close_price, now_ms, false, prompt_hash);
            events.push(ExecutionEvent::Closed { outcome });
        }
        events
    }

    fn find_side(&self, symbol: &str) -> Option<Side> {
        if self.memory.contains_key(&PositionKey::new(symbol, Side::Long)) {
            Some(Side::Long)
        } else if self.memory.contains_key(&PositionKey::new(symbol, Side::Short)) {
            Some(Side::Short)
        } else {
            None
        }
    }
}

fn side_to_fill_side(side: Side, is_open: bool) -> FillSide {
    match (side, is_open) {
        (Side::Long, true) | (Side::Short, false) => FillSide::Buy,
        (Side::Short, true) | (Side::Long, false) => FillSide::Sell,
    }
}

/// Quantity-weighted average fill price within `±10s` of `ts_ms`, falling
/// back to the estimate if no matching fills are found (safe degradation).
async fn reconcile_fill_price(venue: &dyn Venue, symbol: &str, side: FillSide, ts_ms: u64, estimate: f64) -> f64 {
    let start = ts_ms.saturating_sub(FILL_RECONCILE_WINDOW_MS);
    let end = ts_ms + FILL_RECONCILE_WINDOW_MS;
    let fills = match venue.recent_fills(symbol, start, end).await {
        Ok(f) => f,
        Err(_) => return estimate,
    };
    weighted_average_price(&fills, side).unwrap_or(estimate)
}

fn weighted_average_price(fills: &[Fill], side: FillSide) -> Option<f64> {
    let matching: Vec<&Fill> = fills.iter().filter(|f| f.side == side).collect();
    if matching.is_empty() {
        return None;
    }
    let total_qty: f64 = matching.iter().map(|f| f.quantity).sum();
    if total_qty <= 0.0 {
        return None;
    }
    let weighted: f64 = matching.iter().map(|f| f.price * f.quantity).sum();
    Some(weighted / total_qty)
}

fn build_trade_outcome(
    symbol: &str,
    side: Side,
    pos: &OpenPosition,
    close_price: f64,
    close_time: u64,
    was_stop_loss: bool,
    prompt_hash: &str,
) -> TradeOutcome {
    let position_value = pos.quantity * pos.entry_price;
    let margin_used = Position::compute_margin(pos.quantity, pos.entry_price, pos.leverage);
    let pnl = match side {
        Side::Long => (close_price - pos.entry_price) * pos.quantity,
        Side::Short => (pos.entry_price - close_price) * pos.quantity,
    };
    let pnl_pct = if margin_used > 0.0 { pnl / margin_used * 100.0 } else { 0.0 };

    TradeOutcome {
        symbol: symbol.to_string(),
        side,
        quantity: pos.quantity,
        leverage: pos.leverage,
        open_price: pos.entry_price,
        close_price,
        position_value,
        margin_used,
        pnl,
        pnl_pct,
        duration_secs: close_time.saturating_sub(pos.open_time) / 1000,
        open_time: pos.open_time,
        close_time,
        was_stop_loss,
        prompt_hash: prompt_hash.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{Balance, Order, VenueResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockVenue {
        fills: Mutex<Vec<Fill>>,
    }

    #[async_trait]
    impl Venue for MockVenue {
        async fn balance(&self) -> VenueResult<Balance> {
            Ok(Balance::default())
        }
        async fn positions(&self) -> VenueResult<Vec<Position>> {
            Ok(Vec::new())
        }
        async fn open(&self, symbol: &str, _side: Side, _qty: f64, _leverage: u32) -> VenueResult<Order> {
            Ok(Order { order_id: "1".into(), symbol: symbol.to_string() })
        }
        async fn close(&self, symbol: &str, _side: Side, _qty: f64) -> VenueResult<Order> {
            Ok(Order { order_id: "2".into(), symbol: symbol.to_string() })
        }
        async fn set_stop_loss(&self, symbol: &str, _side: Side, _qty: f64, _price: f64) -> VenueResult<Order> {
            Ok(Order { order_id: "3".into(), symbol: symbol.to_string() })
        }
        async fn set_take_profit(&self, symbol: &str, _side: Side, _qty: f64, _price: f64) -> VenueResult<Order> {
            Ok(Order { order_id: "4".into(), symbol: symbol.to_string() })
        }
        async fn cancel_stop_loss(&self, _symbol: &str, _side: Side) -> VenueResult<()> {
            Ok(())
        }
        async fn cancel_take_profit(&self, _symbol: &str, _side: Side) -> VenueResult<()> {
            Ok(())
        }
        async fn recent_fills(&self, _symbol: &str, _start_ms: u64, _end_ms: u64) -> VenueResult<Vec<Fill>> {
            Ok(self.fills.lock().unwrap().clone())
        }
        fn format_price(&self, _symbol: &str, v: f64) -> f64 {
            v
        }
        fn format_quantity(&self, _symbol: &str, v: f64) -> f64 {
            v
        }
        fn minimum_notional(&self, _symbol: &str) -> f64 {
            10.0
        }
        fn taker_fee(&self) -> f64 {
            0.0005
        }
    }

    #[tokio::test]
    async fn open_then_close_produces_trade_outcome() {
        let venue = MockVenue { fills: Mutex::new(vec![Fill { side: FillSide::Buy, price: 50000.0, quantity: 0.1, timestamp_ms: 0, fee: None }]) };
        let mut engine = ExecutionEngine::new();
        let mut marks = HashMap::new();
        marks.insert("BTCUSDT".to_string(), 50000.0);

        let decisions = vec![DecisionAction::OpenLong {
            symbol: "BTCUSDT".into(),
            leverage: 5,
            position_size_usd: 5000.0,
            stop_loss: 49000.0,
            take_profit: 51000.0,
        }];
        let events = engine.execute(&venue, decisions, &marks, 10000.0, "hash1", 1_000_000).await;
        assert!(matches!(events[0], ExecutionEvent::Opened { .. }));

        *venue.fills.lock().unwrap() = vec![Fill { side: FillSide::Sell, price: 51000.0, quantity: 0.1, timestamp_ms: 0, fee: None }];
        let decisions = vec![DecisionAction::CloseLong { symbol: "BTCUSDT".into() }];
        let events = engine.execute(&venue, decisions, &marks, 10000.0, "hash1", 2_000_000).await;
        match &events[0] {
            ExecutionEvent::Closed { outcome } => {
                assert!(outcome.pnl > 0.0);
                assert_eq!(outcome.symbol, "BTCUSDT");
            }
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_same_side_open_is_skipped() {
        let venue = MockVenue { fills: Mutex::new(Vec::new()) };
        let mut engine = ExecutionEngine::new();
        let mut marks = HashMap::new();
        marks.insert("ETHUSDT".to_string(), 3000.0);

        let decision = DecisionAction::OpenLong { symbol: "ETHUSDT".into(), leverage: 5, position_size_usd: 3000.0, stop_loss: 2900.0, take_profit: 3100.0 };
        engine.execute(&venue, vec![decision.clone()], &marks, 10000.0, "h", 0).await;
        let events = engine.execute(&venue, vec![decision], &marks, 10000.0, "h", 1).await;
        assert!(matches!(events[0], ExecutionEvent::Skipped { .. }));
    }

    #[tokio::test]
    async fn auto_close_detects_position_missing_from_venue() {
        let venue = MockVenue { fills: Mutex::new(Vec::new()) };
        let mut engine = ExecutionEngine::new();
        let mut marks = HashMap::new();
        marks.insert("BTCUSDT".to_string(), 50000.0);
        let decision = DecisionAction::OpenLong { symbol: "BTCUSDT".into(), leverage: 5, position_size_usd: 5000.0, stop_loss: 49000.0, take_profit: 51000.0 };
        engine.execute(&venue, vec![decision], &marks, 10000.0, "h", 0).await;

        let events = engine.detect_auto_closes(&venue, &[], "h", 5000).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ExecutionEvent::Closed { .. }));
    }
}
