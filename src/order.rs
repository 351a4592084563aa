// 4.0: order requests and fill records. requests are ephemeral; the exchange
// turns an accepted request into an immutable fill record (status may still
// flip to Canceled).

use crate::types::{OrderId, Price, Qty, Side, Symbol, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Filled,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Qty,
    // required for Limit, ignored for Market
    pub price: Option<Price>,
}

impl OrderRequest {
    pub fn market(symbol: Symbol, side: Side, quantity: Qty) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }

    pub fn limit(symbol: Symbol, side: Side, quantity: Qty, price: Price) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub quantity: Qty,
    pub filled_quantity: Qty,
    // execution price, from the injected clock's tick, not wall time
    pub price: Price,
    pub timestamp: Timestamp,
}
