//! Paper Broker (C8): simulated fills over arbitrary-priced LONG/SHORT
//! positions, generalizing the vault's prediction-market (0-1 price) ledger
//! to real instrument prices with stop-loss/take-profit and margin
//! accounting (§4.8).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::output::TradeSignalAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn direction(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    RiskHalt,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: String,
    pub instrument: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_margin: f64,
    pub entry_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub exit_price: Option<f64>,
    pub exit_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderResult {
    pub status: OrderStatus,
    pub trade_id: Option<String>,
    pub fill_price: Option<f64>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Filled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePositionResult {
    pub status: OrderStatus,
    pub pnl: Option<f64>,
}

struct LedgerState {
    capital: f64,
    available_cash: f64,
    open_positions: HashMap<String, Position>,
    closed_positions: Vec<Position>,
}

pub struct PaperBroker {
    commission_per_trade: f64,
    slippage_bps: f64,
    margin_fraction: f64,
    max_concurrent_positions: usize,
    state: Mutex<LedgerState>,
}

impl PaperBroker {
    pub fn new(initial_capital: f64, commission_per_trade: f64, slippage_bps: f64, margin_fraction: f64, max_concurrent_positions: usize) -> Self {
        Self {
            commission_per_trade,
            slippage_bps,
            margin_fraction,
            max_concurrent_positions,
            state: Mutex::new(LedgerState {
                capital: initial_capital,
                available_cash: initial_capital,
                open_positions: HashMap::new(),
                closed_positions: Vec::new(),
            }),
        }
    }

    fn fill_price(&self, last_price: f64, side: PositionSide) -> f64 {
        last_price * (1.0 + side.direction() * self.slippage_bps / 10_000.0)
    }

    /// §4.8 `place_order`.
    pub fn place_order(&self, instrument: &str, signal: TradeSignalAction, quantity: f64, last_price: f64, stop_loss: f64, take_profit: f64, halted: bool) -> PlaceOrderResult {
        if halted {
            return PlaceOrderResult { status: OrderStatus::Rejected, trade_id: None, fill_price: None, rejection_reason: Some("trading halted".to_string()) };
        }
        let side = match signal {
            TradeSignalAction::Buy => PositionSide::Long,
            TradeSignalAction::Sell => PositionSide::Short,
            TradeSignalAction::Hold => {
                return PlaceOrderResult { status: OrderStatus::Rejected, trade_id: None, fill_price: None, rejection_reason: Some("signal is HOLD".to_string()) };
            }
        };
        if quantity <= 0.0 {
            return PlaceOrderResult { status: OrderStatus::Rejected, trade_id: None, fill_price: None, rejection_reason: Some("quantity must be positive".to_string()) };
        }

        let fill_price = self.fill_price(last_price, side);
        let required_margin = fill_price * quantity * self.margin_fraction;

        let mut state = self.state.lock();
        if state.open_positions.len() >= self.max_concurrent_positions {
            return PlaceOrderResult { status: OrderStatus::Rejected, trade_id: None, fill_price: None, rejection_reason: Some("max_concurrent_positions reached".to_string()) };
        }
        if state.available_cash < required_margin + self.commission_per_trade {
            return PlaceOrderResult { status: OrderStatus::Rejected, trade_id: None, fill_price: None, rejection_reason: Some("insufficient capital".to_string()) };
        }

        state.available_cash -= required_margin + self.commission_per_trade;
        state.capital -= self.commission_per_trade;

        let trade_id = Uuid::new_v4().to_string();
        let position = Position {
            trade_id: trade_id.clone(),
            instrument: instrument.to_string(),
            side,
            quantity,
            entry_price: fill_price,
            stop_loss,
            take_profit,
            entry_margin: required_margin,
            entry_at: Utc::now(),
            status: PositionStatus::Open,
            exit_price: None,
            exit_at: None,
            exit_reason: None,
            pnl: None,
        };
        state.open_positions.insert(trade_id.clone(), position);
        metrics::counter!("orders_filled_total", "instrument" => instrument.to_string(), "side" => format!("{side:?}")).increment(1);

        PlaceOrderResult { status: OrderStatus::Filled, trade_id: Some(trade_id), fill_price: Some(fill_price), rejection_reason: None }
    }

    /// §4.8 `close_position`. Idempotent: a second call on an already-closed
    /// trade returns the recorded result without recomputation.
    pub fn close_position(&self, trade_id: &str, exit_price: f64, reason: ExitReason) -> ClosePositionResult {
        let mut state = self.state.lock();

        if let Some(closed) = state.closed_positions.iter().find(|p| p.trade_id == trade_id) {
            return ClosePositionResult { status: OrderStatus::Filled, pnl: closed.pnl };
        }

        let Some(mut position) = state.open_positions.remove(trade_id) else {
            return ClosePositionResult { status: OrderStatus::Rejected, pnl: None };
        };

        let pnl = (exit_price - position.entry_price) * position.quantity * position.side.direction();

        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.exit_at = Some(Utc::now());
        position.exit_reason = Some(reason);
        position.pnl = Some(pnl);

        state.available_cash += position.entry_margin + pnl - self.commission_per_trade;
        state.capital += pnl - self.commission_per_trade;
        metrics::counter!("orders_closed_total", "reason" => format!("{reason:?}")).increment(1);
        metrics::gauge!("broker_capital").set(state.capital);
        state.closed_positions.push(position);

        ClosePositionResult { status: OrderStatus::Filled, pnl: Some(pnl) }
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.state.lock().open_positions.values().cloned().collect()
    }

    pub fn closed_positions(&self) -> Vec<Position> {
        self.state.lock().closed_positions.clone()
    }

    pub fn capital(&self) -> f64 {
        self.state.lock().capital
    }

    pub fn available_cash(&self) -> f64 {
        self.state.lock().available_cash
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_positions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> PaperBroker {
        PaperBroker::new(100_000.0, 20.0, 5.0, 1.0, 5)
    }

    #[test]
    fn place_order_fills_long_with_slippage() {
        let b = broker();
        let result = b.place_order("NIFTY", TradeSignalAction::Buy, 10.0, 100.0, 95.0, 110.0, false);
        assert_eq!(result.status, OrderStatus::Filled);
        assert!(result.fill_price.unwrap() > 100.0);
    }

    #[test]
    fn s1_long_take_profit_closes_with_protective_price() {
        let b = broker();
        let result = b.place_order("NIFTY", TradeSignalAction::Buy, 10.0, 100.0, 95.0, 110.0, false);
        let trade_id = result.trade_id.unwrap();
        let close = b.close_position(&trade_id, 110.0, ExitReason::TakeProfit);
        assert_eq!(close.pnl.unwrap(), (110.0 - result.fill_price.unwrap()) * 10.0);
    }

    #[test]
    fn close_position_is_idempotent() {
        let b = broker();
        let result = b.place_order("NIFTY", TradeSignalAction::Buy, 10.0, 100.0, 95.0, 110.0, false);
        let trade_id = result.trade_id.unwrap();
        let first = b.close_position(&trade_id, 110.0, ExitReason::TakeProfit);
        let second = b.close_position(&trade_id, 999.0, ExitReason::TakeProfit);
        assert_eq!(first.pnl, second.pnl);
    }

    /// §8 P4: `capital` must absorb both the entry and exit commission of a
    /// round trip, not just the exit one.
    #[test]
    fn capital_ledger_absorbs_both_entry_and_exit_commission() {
        let b = PaperBroker::new(100_000.0, 20.0, 0.0, 1.0, 5);
        let result = b.place_order("NIFTY", TradeSignalAction::Buy, 10.0, 100.0, 95.0, 110.0, false);
        let trade_id = result.trade_id.unwrap();
        let close = b.close_position(&trade_id, 110.0, ExitReason::TakeProfit);

        let expected_capital = 100_000.0 + close.pnl.unwrap() - 2.0 * 20.0;
        assert_eq!(b.capital(), expected_capital);
        assert_eq!(b.capital(), b.available_cash());
    }

    #[test]
    fn place_order_rejects_over_max_concurrent_positions() {
        let b = PaperBroker::new(1_000_000.0, 20.0, 5.0, 1.0, 1);
        let first = b.place_order("NIFTY", TradeSignalAction::Buy, 10.0, 100.0, 95.0, 110.0, false);
        assert_eq!(first.status, OrderStatus::Filled);
        let second = b.place_order("NIFTY", TradeSignalAction::Buy, 10.0, 100.0, 95.0, 110.0, false);
        assert_eq!(second.status, OrderStatus::Rejected);
    }
}
