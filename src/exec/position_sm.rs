//! Per-position-key state machine, generalised from the order lifecycle in
//! `verify/order_sm.rs`/`reliability/state.rs`: `absent -> open -> (partially_closed)* -> closed`.

use crate::venue::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Absent,
    Open,
    PartiallyClosed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub symbol: String,
    pub side: Side,
}

impl PositionKey {
    pub fn new(symbol: impl Into<String>, side: Side) -> Self {
        Self { symbol: symbol.into(), side }
    }
}

#[derive(Debug, Clone)]
pub enum PositionEvent {
    Open { quantity: f64, entry_price: f64, leverage: u32, stop_loss: Option<f64>, take_profit: Option<f64>, open_time: u64 },
    PartialClose { closed_qty: f64, close_price: f64 },
    Close { close_price: f64, close_time: u64, was_stop_loss: bool },
    AutoClose { close_price: f64, close_time: u64 },
}

#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub quantity: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub open_time: u64,
    pub state: PositionState,
}

#[derive(Debug, Clone)]
pub struct TransitionError(pub String);

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for TransitionError {}

/// Applies `event` to `position`, mutating it in place. `position` is `None`
/// for an absent key; `Open` creates it. Returns the position after the
/// transition, or `None` once fully closed (the caller removes the key).
pub fn apply_event(position: &mut Option<OpenPosition>, event: PositionEvent) -> Result<(), TransitionError> {
    match (position.as_mut(), event) {
        (None, PositionEvent::Open { quantity, entry_price, leverage, stop_loss, take_profit, open_time }) => {
            *position = Some(OpenPosition {
                quantity,
                entry_price,
                leverage,
                stop_loss,
                take_profit,
                open_time,
                state: PositionState::Open,
            });
            Ok(())
        }
        (Some(_), PositionEvent::Open { .. }) => Err(TransitionError("position already open for this key".into())),
        (Some(pos), PositionEvent::PartialClose { closed_qty, .. }) => {
            if closed_qty <= 0.0 || closed_qty >= pos.quantity {
                return Err(TransitionError("partial close quantity out of range".into()));
            }
            pos.quantity -= closed_qty;
            pos.state = PositionState::PartiallyClosed;
            Ok(())
        }
        (Some(_), PositionEvent::Close { .. }) | (Some(_), PositionEvent::AutoClose { .. }) => {
            *position = None;
            Ok(())
        }
        (None, PositionEvent::PartialClose { .. }) | (None, PositionEvent::Close { .. }) | (None, PositionEvent::AutoClose { .. }) => {
            Err(TransitionError("no position open for this key".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_close_returns_to_absent() {
        let mut pos: Option<OpenPosition> = None;
        apply_event(
            &mut pos,
            PositionEvent::Open { quantity: 1.0, entry_price: 100.0, leverage: 5, stop_loss: None, take_profit: None, open_time: 0 },
        )
        .unwrap();
        assert!(pos.is_some());
        apply_event(&mut pos, PositionEvent::Close { close_price: 110.0, close_time: 10, was_stop_loss: false }).unwrap();
        assert!(pos.is_none());
    }

    #[test]
    fn partial_close_reduces_quantity_and_marks_partially_closed() {
        let mut pos: Option<OpenPosition> = None;
        apply_event(
            &mut pos,
            PositionEvent::Open { quantity: 2.0, entry_price: 100.0, leverage: 5, stop_loss: None, take_profit: None, open_time: 0 },
        )
        .unwrap();
        apply_event(&mut pos, PositionEvent::PartialClose { closed_qty: 0.5, close_price: 101.0 }).unwrap();
        let p = pos.unwrap();
        assert!((p.quantity - 1.5).abs() < 1e-9);
        assert_eq!(p.state, PositionState::PartiallyClosed);
    }

    #[test]
    fn closing_absent_position_errors() {
        let mut pos: Option<OpenPosition> = None;
        let err = apply_event(&mut pos, PositionEvent::Close { close_price: 100.0, close_time: 0, was_stop_loss: false });
        assert!(err.is_err());
    }

    #[test]
    fn double_open_errors() {
        let mut pos: Option<OpenPosition> = None;
        apply_event(
            &mut pos,
            PositionEvent::Open { quantity: 1.0, entry_price: 100.0, leverage: 5, stop_loss: None, take_profit: None, open_time: 0 },
        )
        .unwrap();
        let err = apply_event(
            &mut pos,
            PositionEvent::Open { quantity: 1.0, entry_price: 100.0, leverage: 5, stop_loss: None, take_profit: None, open_time: 1 },
        );
        assert!(err.is_err());
    }
}
