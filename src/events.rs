// 16.0: audit events. every state change the engine makes is mirrored as an
// event, which is the operator surface for the acknowledged gap between an
// order filling and the trade row being persisted.

use crate::trade::ExitReason;
use crate::types::{Price, Quote, Symbol, Timestamp, TradeId};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EventPayload {
    TradeOpened {
        trade_id: TradeId,
        symbol: Symbol,
        entry_price: Price,
        margin: Quote,
    },
    TradeClosed {
        trade_id: TradeId,
        symbol: Symbol,
        exit_price: Price,
        realized_pnl: Quote,
        reason: ExitReason,
    },
    StopMoved {
        trade_id: TradeId,
        new_stop: Price,
    },
    OrderRejected {
        symbol: Symbol,
        detail: String,
    },
    DrawdownHalted {
        symbol: Symbol,
        balance: Quote,
    },
    CommissionSettled {
        trade_id: TradeId,
        amount: Quote,
    },
    SnapshotSaved {
        equity: Quote,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

pub trait EventSink {
    fn emit(&self, timestamp: Timestamp, payload: EventPayload);
}

// in-memory collector; tests and the sim binary read it back
#[derive(Debug, Default)]
pub struct EventLog {
    events: RefCell<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

impl EventSink for EventLog {
    fn emit(&self, timestamp: Timestamp, payload: EventPayload) {
        let mut events = self.events.borrow_mut();
        let id = events.len() as u64 + 1;
        events.push(Event {
            id,
            timestamp,
            payload,
        });
    }
}

// sink that drops everything; for callers that do not care about the trail
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _timestamp: Timestamp, _payload: EventPayload) {}
}
