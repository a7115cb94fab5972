//! Response parsing and per-venue validation (§4.4 steps 4-5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DecisionAction {
    OpenLong { symbol: String, leverage: u32, position_size_usd: f64, stop_loss: f64, take_profit: f64 },
    OpenShort { symbol: String, leverage: u32, position_size_usd: f64, stop_loss: f64, take_profit: f64 },
    CloseLong { symbol: String },
    CloseShort { symbol: String },
    PartialClose { symbol: String, close_percentage: f64, new_stop_loss: Option<f64>, new_take_profit: Option<f64> },
    UpdateStopLoss { symbol: String, new_stop_loss: f64 },
    UpdateTakeProfit { symbol: String, new_take_profit: f64 },
    Hold { symbol: String },
    Wait { symbol: String },
    AutoCloseLong { symbol: String },
    AutoCloseShort { symbol: String },
}

impl DecisionAction {
    pub fn symbol(&self) -> &str {
        match self {
            DecisionAction::OpenLong { symbol, .. }
            | DecisionAction::OpenShort { symbol, .. }
            | DecisionAction::CloseLong { symbol }
            | DecisionAction::CloseShort { symbol }
            | DecisionAction::PartialClose { symbol, .. }
            | DecisionAction::UpdateStopLoss { symbol, .. }
            | DecisionAction::UpdateTakeProfit { symbol, .. }
            | DecisionAction::Hold { symbol }
            | DecisionAction::Wait { symbol }
            | DecisionAction::AutoCloseLong { symbol }
            | DecisionAction::AutoCloseShort { symbol } => symbol,
        }
    }

    /// Sort key for the execution engine's pre-ordering: `close_* < open_* < hold/wait` (§4.5).
    pub fn priority(&self) -> u8 {
        match self {
            DecisionAction::CloseLong { .. }
            | DecisionAction::CloseShort { .. }
            | DecisionAction::PartialClose { .. }
            | DecisionAction::AutoCloseLong { .. }
            | DecisionAction::AutoCloseShort { .. } => 0,
            DecisionAction::OpenLong { .. } | DecisionAction::OpenShort { .. } => 1,
            DecisionAction::UpdateStopLoss { .. } | DecisionAction::UpdateTakeProfit { .. } => 1,
            DecisionAction::Hold { .. } | DecisionAction::Wait { .. } => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedDecisions {
    pub decisions: Vec<DecisionAction>,
    pub cot_trace: String,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    cot_trace: String,
    decisions: Vec<DecisionAction>,
}

pub fn parse_response(raw: &str) -> anyhow::Result<ParsedDecisions> {
    let parsed: RawResponse = serde_json::from_str(raw)?;
    Ok(ParsedDecisions { decisions: parsed.decisions, cot_trace: parsed.cot_trace })
}

#[derive(Debug, Clone)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ValidationError {}

/// Per-venue validation rules (§4.4 step 5). `leverage_cap` and
/// `minimum_notional` are resolved by the caller from the symbol/exchange.
pub fn validate_decision(action: &DecisionAction, leverage_cap: u32, minimum_notional: f64) -> Result<(), ValidationError> {
    match action {
        DecisionAction::OpenLong { leverage, position_size_usd, stop_loss, take_profit, .. } => {
            check_leverage(*leverage, leverage_cap)?;
            if *position_size_usd < minimum_notional {
                return Err(ValidationError(format!("position_size_usd {position_size_usd} below minimum notional {minimum_notional}")));
            }
            // Long: SL below entry is protective; we don't know entry here, so
            // only reject obviously invalid (non-positive) values; the
            // execution engine re-validates against the true entry price.
            if *stop_loss <= 0.0 || *take_profit <= 0.0 {
                return Err(ValidationError("stop_loss/take_profit must be positive".into()));
            }
            Ok(())
        }
        DecisionAction::OpenShort { leverage, position_size_usd, stop_loss, take_profit, .. } => {
            check_leverage(*leverage, leverage_cap)?;
            if *position_size_usd < minimum_notional {
                return Err(ValidationError(format!("position_size_usd {position_size_usd} below minimum notional {minimum_notional}")));
            }
            if *stop_loss <= 0.0 || *take_profit <= 0.0 {
                return Err(ValidationError("stop_loss/take_profit must be positive".into()));
            }
            Ok(())
        }
        DecisionAction::UpdateStopLoss { new_stop_loss, .. } => {
            if *new_stop_loss <= 0.0 {
                return Err(ValidationError("new_stop_loss must be > 0".into()));
            }
            Ok(())
        }
        DecisionAction::UpdateTakeProfit { new_take_profit, .. } => {
            if *new_take_profit <= 0.0 {
                return Err(ValidationError("new_take_profit must be > 0".into()));
            }
            Ok(())
        }
        DecisionAction::PartialClose { close_percentage, .. } => {
            if *close_percentage <= 0.0 || *close_percentage > 100.0 {
                return Err(ValidationError(format!("close_percentage {close_percentage} out of (0,100]")));
            }
            Ok(())
        }
        DecisionAction::CloseLong { .. }
        | DecisionAction::CloseShort { .. }
        | DecisionAction::Hold { .. }
        | DecisionAction::Wait { .. }
        | DecisionAction::AutoCloseLong { .. }
        | DecisionAction::AutoCloseShort { .. } => Ok(()),
    }
}

fn check_leverage(leverage: u32, cap: u32) -> Result<(), ValidationError> {
    if leverage == 0 {
        return Err(ValidationError("leverage must be > 0".into()));
    }
    if leverage > cap {
        return Err(ValidationError(format!("leverage {leverage} exceeds cap {cap}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_response() {
        let raw = r#"{"cot_trace":"reasoning","decisions":[{"action":"hold","symbol":"BTCUSDT"}]}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.decisions.len(), 1);
        assert_eq!(parsed.cot_trace, "reasoning");
    }

    #[test]
    fn priority_sorts_close_before_open_before_hold() {
        let close = DecisionAction::CloseLong { symbol: "BTCUSDT".into() };
        let open = DecisionAction::OpenLong {
            symbol: "BTCUSDT".into(),
            leverage: 5,
            position_size_usd: 200.0,
            stop_loss: 49000.0,
            take_profit: 51000.0,
        };
        let hold = DecisionAction::Hold { symbol: "BTCUSDT".into() };
        assert!(close.priority() < open.priority());
        assert!(open.priority() < hold.priority());
    }

    #[test]
    fn rejects_leverage_over_cap() {
        let action = DecisionAction::OpenLong {
            symbol: "DOGEUSDT".into(),
            leverage: 20,
            position_size_usd: 200.0,
            stop_loss: 0.1,
            take_profit: 0.2,
        };
        assert!(validate_decision(&action, 5, 100.0).is_err());
    }

    #[test]
    fn rejects_notional_below_minimum() {
        let action = DecisionAction::OpenLong {
            symbol: "BTCUSDT".into(),
            leverage: 5,
            position_size_usd: 50.0,
            stop_loss: 49000.0,
            take_profit: 51000.0,
        };
        assert!(validate_decision(&action, 10, 100.0).is_err());
    }

    #[test]
    fn rejects_partial_close_out_of_range() {
        let action = DecisionAction::PartialClose {
            symbol: "BTCUSDT".into(),
            close_percentage: 150.0,
            new_stop_loss: None,
            new_take_profit: None,
        };
        assert!(validate_decision(&action, 10, 100.0).is_err());
    }

    #[test]
    fn accepts_well_formed_open() {
        let action = DecisionAction::OpenLong {
            symbol: "BTCUSDT".into(),
            leverage: 5,
            position_size_usd: 200.0,
            stop_loss: 49000.0,
            take_profit: 51000.0,
        };
        assert!(validate_decision(&action, 10, 100.0).is_ok());
    }
}
