//! Error taxonomy for the trading engine.
//!
//! Mirrors `anyhow::Result` usage at I/O boundaries (venue/LM transport) but
//! gives cycle-level failures a closed shape so the scheduler and journal can
//! apply the right propagation rule without string-matching messages.

use std::fmt;

#[derive(Debug, Clone)]
pub enum TradingError {
    /// Network/timeout/stream/5xx — retried with backoff by the caller.
    TransientIo { context: String, detail: String },
    /// Leverage out of range, insufficient notional, SL on wrong side, missing price.
    Validation { symbol: String, detail: String },
    /// Duplicate same-side position, insufficient margin.
    PreTradeGuard { symbol: String, detail: String },
    /// recent_fills lookback found nothing; estimated price was retained.
    ReconciliationMiss { symbol: String, intent_id: String },
    /// Backtest: fatal for the run. Live: treated as auto-close upstream.
    Liquidation { symbol: String, side: String },
    /// A decision log, checkpoint, or journal file could not be written.
    Persistence { path: String, detail: String },
    /// Missing/invalid configuration; the process aborts at startup.
    Config { detail: String },
}

impl fmt::Display for TradingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingError::TransientIo { context, detail } => {
                write!(f, "transient io in {context}: {detail}")
            }
            TradingError::Validation { symbol, detail } => {
                write!(f, "validation failed for {symbol}: {detail}")
            }
            TradingError::PreTradeGuard { symbol, detail } => {
                write!(f, "pre-trade guard blocked {symbol}: {detail}")
            }
            TradingError::ReconciliationMiss { symbol, intent_id } => {
                write!(f, "no fill found for {symbol} intent {intent_id}")
            }
            TradingError::Liquidation { symbol, side } => {
                write!(f, "liquidation on {symbol} {side}")
            }
            TradingError::Persistence { path, detail } => {
                write!(f, "failed to persist {path}: {detail}")
            }
            TradingError::Config { detail } => write!(f, "configuration error: {detail}"),
        }
    }
}

impl std::error::Error for TradingError {}

impl TradingError {
    /// Whether this kind should abort the whole cycle rather than just drop one action.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            TradingError::Liquidation { .. } | TradingError::Persistence { .. } | TradingError::Config { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_not_cycle_fatal() {
        let e = TradingError::Validation { symbol: "BTCUSDT".into(), detail: "bad sl".into() };
        assert!(!e.is_cycle_fatal());
    }

    #[test]
    fn liquidation_is_cycle_fatal() {
        let e = TradingError::Liquidation { symbol: "BTCUSDT".into(), side: "long".into() };
        assert!(e.is_cycle_fatal());
    }

    #[test]
    fn display_includes_symbol() {
        let e = TradingError::PreTradeGuard { symbol: "ETHUSDT".into(), detail: "duplicate position".into() };
        assert!(e.to_string().contains("ETHUSDT"));
    }
}
