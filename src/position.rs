// 5.0: simulator-internal position tracking. at most one position per symbol.
// margin = notional / leverage at open, reduced pro-rata on partial close.
// 5.2 has the liquidation cap: realized loss never exceeds posted margin.

use crate::types::{Leverage, Price, Qty, Quote, Side, Symbol, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Qty,
    pub entry_price: Price,
    pub margin: Quote,
    pub leverage: Leverage,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Position {
    pub fn open(
        symbol: Symbol,
        side: Side,
        quantity: Qty,
        entry_price: Price,
        leverage: Leverage,
        timestamp: Timestamp,
    ) -> Self {
        let margin = required_margin(quantity, entry_price, leverage);
        Self {
            symbol,
            side,
            quantity,
            entry_price,
            margin,
            leverage,
            opened_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn notional(&self) -> Quote {
        Quote::new(self.quantity.value() * self.entry_price.value())
    }

    // 5.1: paper gains/losses at the given mark, sign-aware
    pub fn unrealized_pnl(&self, mark: Price) -> Quote {
        let diff = mark.value() - self.entry_price.value();
        Quote::new(self.side.sign() * diff * self.quantity.value())
    }
}

pub fn required_margin(quantity: Qty, price: Price, leverage: Leverage) -> Quote {
    Quote::new(quantity.value() * price.value() * leverage.margin_fraction())
}

// raw pnl before the liquidation cap: (exit-entry)*qty for longs, flipped for shorts
pub fn realized_pnl(side: Side, entry: Price, exit: Price, quantity: Qty) -> Quote {
    let diff = exit.value() - entry.value();
    Quote::new(side.sign() * diff * quantity.value())
}

// 5.2: adds to an existing same-side position. entry becomes the volume
// weighted average; margin for the added slice is posted on top.
pub fn increase_position(
    position: &Position,
    add_qty: Qty,
    fill_price: Price,
    timestamp: Timestamp,
) -> Position {
    let old_qty = position.quantity.value();
    let new_qty = old_qty + add_qty.value();

    let weighted =
        old_qty * position.entry_price.value() + add_qty.value() * fill_price.value();
    let new_entry = Price::new_unchecked(weighted / new_qty);

    let added_margin = required_margin(add_qty, fill_price, position.leverage);

    Position {
        symbol: position.symbol.clone(),
        side: position.side,
        quantity: Qty::new_unchecked(new_qty),
        entry_price: new_entry,
        margin: position.margin.add(added_margin),
        leverage: position.leverage,
        opened_at: position.opened_at,
        updated_at: timestamp,
    }
}

#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub remaining: Option<Position>,
    // pnl after the liquidation cap; what the account actually realizes
    pub realized_pnl: Quote,
    // pnl before the cap, kept for audit
    pub raw_pnl: Quote,
    pub margin_released: Quote,
    pub closed_quantity: Qty,
    // cash returned to the balance: margin_released + realized_pnl, never negative
    pub cash_returned: Quote,
}

// 5.3: close or reduce. close_qty is clamped to the position size. losses are
// floored at the margin posted for the closed portion: the shortfall beyond
// margin is simply not realized (forced liquidation at zero equity, never
// negative equity).
pub fn close_position(
    position: &Position,
    close_qty: Qty,
    exit_price: Price,
    timestamp: Timestamp,
) -> CloseOutcome {
    let close_qty = close_qty.min(position.quantity);
    let fraction = close_qty.value() / position.quantity.value();

    let margin_released = position.margin.mul(fraction);
    let raw = realized_pnl(position.side, position.entry_price, exit_price, close_qty);
    let clamped = raw.max(margin_released.negate());

    let cash_returned = margin_released.add(clamped);
    debug_assert!(!cash_returned.is_negative());

    let remaining_qty = position.quantity.value() - close_qty.value();
    let remaining = if remaining_qty.is_zero() {
        None
    } else {
        Some(Position {
            symbol: position.symbol.clone(),
            side: position.side,
            quantity: Qty::new_unchecked(remaining_qty),
            entry_price: position.entry_price,
            margin: position.margin.sub(margin_released),
            leverage: position.leverage,
            opened_at: position.opened_at,
            updated_at: timestamp,
        })
    };

    CloseOutcome {
        remaining,
        realized_pnl: clamped,
        raw_pnl: raw,
        margin_released,
        closed_quantity: close_qty,
        cash_returned,
    }
}
