// 14.0: signal port. strategies are external collaborators behind a closed
// trait: a required update hook plus optional capabilities declared with a
// flag and checked at the call site. no reflection, no duck typing.

use crate::market_data::Candle;
use crate::trade::Trade;
use crate::types::{Pct, Symbol};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub action: Action,
    pub symbol: Symbol,
    pub stop_loss_pct: Option<Pct>,
    pub take_profit_pct: Option<Pct>,
    // close conflicting positions before opening this one
    pub force_close: bool,
}

impl Signal {
    pub fn hold(symbol: Symbol) -> Self {
        Self {
            action: Action::Hold,
            symbol,
            stop_loss_pct: None,
            take_profit_pct: None,
            force_close: false,
        }
    }

    pub fn entry(action: Action, symbol: Symbol) -> Self {
        Self {
            action,
            symbol,
            stop_loss_pct: None,
            take_profit_pct: None,
            force_close: false,
        }
    }
}

pub trait Strategy {
    fn name(&self) -> &str;

    fn update(&mut self, candle: &Candle) -> Option<Signal>;

    // capability flag: the engine only calls check_exit when this is true
    fn has_exit_hook(&self) -> bool {
        false
    }

    // true asks the engine to close the trade this tick
    fn check_exit(&mut self, _trade: &Trade, _candle: &Candle) -> bool {
        false
    }

    fn on_position_opened(&mut self, _trade: &Trade) {}

    fn on_position_closed(&mut self, _trade: &Trade) {}
}

// never trades; useful as a placeholder and for exercising the engine's
// no-signal path
#[derive(Debug, Default)]
pub struct HoldStrategy;

impl Strategy for HoldStrategy {
    fn name(&self) -> &str {
        "hold"
    }

    fn update(&mut self, _candle: &Candle) -> Option<Signal> {
        None
    }
}

// 14.1: replays a queue of pre-scripted signals, one per update call. used by
// backtests and the engine tests to drive deterministic entries/exits.
#[derive(Debug, Default)]
pub struct ScriptedStrategy {
    signals: VecDeque<Option<Signal>>,
    exit_requests: VecDeque<bool>,
    pub opened: Vec<Trade>,
    pub closed: Vec<Trade>,
}

impl ScriptedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_signal(&mut self, signal: Signal) {
        self.signals.push_back(Some(signal));
    }

    pub fn push_silence(&mut self) {
        self.signals.push_back(None);
    }

    pub fn push_exit_request(&mut self, exit: bool) {
        self.exit_requests.push_back(exit);
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn update(&mut self, _candle: &Candle) -> Option<Signal> {
        self.signals.pop_front().flatten()
    }

    fn has_exit_hook(&self) -> bool {
        !self.exit_requests.is_empty()
    }

    fn check_exit(&mut self, _trade: &Trade, _candle: &Candle) -> bool {
        self.exit_requests.pop_front().unwrap_or(false)
    }

    fn on_position_opened(&mut self, trade: &Trade) {
        self.opened.push(trade.clone());
    }

    fn on_position_closed(&mut self, trade: &Trade) {
        self.closed.push(trade.clone());
    }
}
