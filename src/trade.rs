// 6.0: the persisted Trade record. this is the system of record across process
// restarts: the engine rebuilds all open-position state from these rows at the
// top of every tick.

use crate::types::{Leverage, Pct, Price, Qty, Quote, Side, Symbol, Timestamp, TradeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    StrategyExit,
    Liquidation,
    ManualClose,
}

// 6.1: trailing-stop bookkeeping. the watermark is the most favorable price
// seen since activation (high for longs, low for shorts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingState {
    pub enabled: bool,
    pub activated: bool,
    pub activation_pct: Pct,
    pub trail_pct: Pct,
    pub watermark: Option<Price>,
}

impl TrailingState {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            activated: false,
            activation_pct: Pct::new(rust_decimal::Decimal::ZERO),
            trail_pct: Pct::new(rust_decimal::Decimal::ZERO),
            watermark: None,
        }
    }

    pub fn new(activation_pct: Pct, trail_pct: Pct) -> Self {
        Self {
            enabled: true,
            activated: false,
            activation_pct,
            trail_pct,
            watermark: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Qty,
    pub entry_price: Price,
    pub entry_time: Timestamp,
    pub status: TradeStatus,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub leverage: Leverage,
    // margin actually posted at open; older rows may miss it, see margin_or_derived
    pub margin: Option<Quote>,
    pub strategy: Option<String>,
    pub trailing: TrailingState,
    pub breakeven_activated: bool,
    pub exit_price: Option<Price>,
    pub exit_time: Option<Timestamp>,
    pub exit_reason: Option<ExitReason>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    pub fn notional(&self) -> Quote {
        Quote::new(self.quantity.value() * self.entry_price.value())
    }

    // margin as persisted, falling back to notional/leverage for rows that
    // predate margin persistence
    pub fn margin_or_derived(&self) -> Quote {
        self.margin
            .unwrap_or_else(|| self.notional().mul(self.leverage.margin_fraction()))
    }

    // realized pnl of a closed trade; zero while still open. losses are
    // floored at posted margin, the same cap the exchange applies, so the
    // ledger-derived wallet never diverges from the simulator balance.
    pub fn realized_pnl(&self) -> Quote {
        match self.exit_price {
            Some(exit) => {
                let diff = exit.value() - self.entry_price.value();
                let raw = Quote::new(self.side.sign() * diff * self.quantity.value());
                raw.max(self.margin_or_derived().negate())
            }
            None => Quote::zero(),
        }
    }

    pub fn unrealized_pnl(&self, mark: Price) -> Quote {
        let diff = mark.value() - self.entry_price.value();
        Quote::new(self.side.sign() * diff * self.quantity.value())
    }

    pub fn close(&mut self, exit_price: Price, exit_time: Timestamp, reason: ExitReason) {
        self.status = TradeStatus::Closed;
        self.exit_price = Some(exit_price);
        self.exit_time = Some(exit_time);
        self.exit_reason = Some(reason);
    }
}
