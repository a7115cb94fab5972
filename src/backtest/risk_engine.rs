//! OHLC-aware risk engine, backtest-only (§4.5.BT). Invoked twice per tick
//! (pre- and post-execution) so AI-modified SL/TP and newly opened positions
//! are honoured within the same bar, using the bar's `(low, high, close)`
//! instead of a single mark price the way the live engine does.

use crate::venue::{Position, Side};

#[derive(Debug, Clone, Copy)]
pub struct OhlcBar {
    pub low: f64,
    pub high: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskEventKind {
    Liquidation,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone)]
pub struct RiskEvent {
    pub symbol: String,
    pub side: Side,
    pub kind: RiskEventKind,
    pub fill_price: f64,
}

/// Priority per position: liquidation > stop_loss > take_profit. At most one
/// event per position per scan, since a position closed by one trigger is no
/// longer open for the others.
pub fn scan(positions: &[Position], bars: &std::collections::HashMap<String, OhlcBar>) -> Vec<RiskEvent> {
    let mut events = Vec::new();

    for pos in positions {
        let Some(bar) = bars.get(&pos.symbol) else {
            continue;
        };

        let event = match pos.side {
            Side::Long => {
                if pos.liquidation_price > 0.0 && bar.low <= pos.liquidation_price {
                    Some((RiskEventKind::Liquidation, bar.low.min(pos.liquidation_price)))
                } else if pos.stop_loss.is_some_and(|sl| sl > 0.0 && bar.low <= sl) {
                    let sl = pos.stop_loss.unwrap();
                    Some((RiskEventKind::StopLoss, bar.low.min(sl)))
                } else if pos.take_profit.is_some_and(|tp| tp > 0.0 && bar.high >= tp) {
                    let tp = pos.take_profit.unwrap();
                    Some((RiskEventKind::TakeProfit, tp))
                } else {
                    None
                }
            }
            Side::Short => {
                if pos.liquidation_price > 0.0 && bar.high >= pos.liquidation_price {
                    Some((RiskEventKind::Liquidation, bar.high.max(pos.liquidation_price)))
                } else if pos.stop_loss.is_some_and(|sl| sl > 0.0 && bar.high >= sl) {
                    let sl = pos.stop_loss.unwrap();
                    Some((RiskEventKind::StopLoss, bar.high.max(sl)))
                } else if pos.take_profit.is_some_and(|tp| tp > 0.0 && bar.low <= tp) {
                    let tp = pos.take_profit.unwrap();
                    Some((RiskEventKind::TakeProfit, tp))
                } else {
                    None
                }
            }
        };

        if let Some((kind, fill_price)) = event {
            events.push(RiskEvent { symbol: pos.symbol.clone(), side: pos.side, kind, fill_price });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position(symbol: &str, liq: f64, sl: Option<f64>, tp: Option<f64>) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: Side::Long,
            quantity: 1.0,
            entry_price: 100.0,
            leverage: 10,
            margin: 10.0,
            stop_loss: sl,
            take_profit: tp,
            liquidation_price: liq,
            open_time: 0,
        }
    }

    #[test]
    fn long_liquidation_takes_priority_over_stop_loss() {
        let pos = long_position("BTCUSDT", 90.0, Some(95.0), Some(120.0));
        let mut bars = std::collections::HashMap::new();
        bars.insert("BTCUSDT".to_string(), OhlcBar { low: 85.0, high: 101.0, close: 96.0 });
        let events = scan(&[pos], &bars);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RiskEventKind::Liquidation);
    }

    #[test]
    fn long_take_profit_triggers_on_high() {
        let pos = long_position("ETHUSDT", 0.0, None, Some(110.0));
        let mut bars = std::collections::HashMap::new();
        bars.insert("ETHUSDT".to_string(), OhlcBar { low: 99.0, high: 111.0, close: 105.0 });
        let events = scan(&[pos], &bars);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RiskEventKind::TakeProfit);
        assert!((events[0].fill_price - 110.0).abs() < 1e-9);
    }

    #[test]
    fn short_stop_loss_uses_high_side() {
        let pos = Position {
            symbol: "SOLUSDT".to_string(),
            side: Side::Short,
            quantity: 1.0,
            entry_price: 100.0,
            leverage: 5,
            margin: 20.0,
            stop_loss: Some(105.0),
            take_profit: Some(90.0),
            liquidation_price: 0.0,
            open_time: 0,
        };
        let mut bars = std::collections::HashMap::new();
        bars.insert("SOLUSDT".to_string(), OhlcBar { low: 88.0, high: 106.0, close: 95.0 });
        let events = scan(&[pos], &bars);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RiskEventKind::StopLoss);
        assert!((events[0].fill_price - 106.0).abs() < 1e-9);
    }

    #[test]
    fn no_trigger_when_price_stays_within_bounds() {
        let pos = long_position("BNBUSDT", 80.0, Some(90.0), Some(120.0));
        let mut bars = std::collections::HashMap::new();
        bars.insert("BNBUSDT".to_string(), OhlcBar { low: 95.0, high: 110.0, close: 100.0 });
        assert!(scan(&[pos], &bars).is_empty());
    }
}
