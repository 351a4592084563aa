// 7.0: margin exchange simulator. owns the simulated cash balance and one
// position per symbol, and turns order requests into immediate fills.
// there is no order book: market orders fill at the ticker, limit orders fill
// at their limit price only if already marketable. nothing rests.
//
// money invariants enforced here:
//   balance >= 0 for any order sequence
//   margin posted <= available balance, with a 5% safety buffer on top
//   losses on close <= margin posted for the closed quantity (see position.rs)

use crate::clock::Clock;
use crate::market_data::{MarketData, MarketDataError, Ticker};
use crate::order::{Order, OrderRequest, OrderStatus, OrderType};
use crate::position::{close_position, increase_position, required_margin, CloseOutcome, Position};
use crate::types::{Leverage, OrderId, Price, Quote, Side, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

// margin above this fraction of the balance is rejected even when affordable,
// to absorb slippage before the next tick
const MARGIN_BUFFER: Decimal = dec!(0.95);

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Quote, available: Quote },

    #[error("margin too high: required {required}, limit {limit}")]
    MarginTooHigh { required: Quote, limit: Quote },

    #[error("limit order not marketable: limit {limit}, market {market}")]
    NotMarketable { limit: Price, market: Price },

    #[error("limit order missing a price")]
    MissingLimitPrice,

    #[error("order {0:?} not found")]
    OrderNotFound(OrderId),

    #[error("order {0:?} already filled")]
    NotCancelable(OrderId),

    #[error(transparent)]
    MarketData(#[from] MarketDataError),
}

// what an accepted order did to the working set, reported alongside the fill
#[derive(Debug, Clone)]
pub enum FillEffect {
    Opened(Position),
    Increased(Position),
    Reduced(CloseOutcome),
    Closed(CloseOutcome),
}

#[derive(Debug, Clone)]
pub struct FillReport {
    pub order: Order,
    pub effect: FillEffect,
}

#[derive(Debug)]
pub struct PaperExchange<M: MarketData, C: Clock> {
    market_data: M,
    clock: C,
    balance: Quote,
    balance_asset: String,
    leverage: Leverage,
    positions: HashMap<Symbol, Position>,
    orders: HashMap<OrderId, Order>,
    next_order_id: u64,
}

impl<M: MarketData, C: Clock> PaperExchange<M, C> {
    pub fn new(
        market_data: M,
        clock: C,
        initial_balance: Quote,
        balance_asset: impl Into<String>,
        leverage: Leverage,
    ) -> Self {
        Self {
            market_data,
            clock,
            balance: initial_balance,
            balance_asset: balance_asset.into(),
            leverage,
            positions: HashMap::new(),
            orders: HashMap::new(),
            next_order_id: 1,
        }
    }

    pub fn balance(&self) -> Quote {
        self.balance
    }

    // cold-start rebuild from persisted trade records. balance is the derived
    // wallet minus margin in use; positions are merged per symbol.
    pub fn restore_balance(&mut self, balance: Quote) {
        debug_assert!(!balance.is_negative());
        self.balance = balance;
    }

    pub fn restore_position(&mut self, position: Position) {
        match self.positions.get(&position.symbol).cloned() {
            Some(existing) if existing.side == position.side => {
                let merged = increase_position(
                    &existing,
                    position.quantity,
                    position.entry_price,
                    position.updated_at,
                );
                self.positions.insert(position.symbol.clone(), merged);
            }
            _ => {
                self.positions.insert(position.symbol.clone(), position);
            }
        }
    }

    pub fn balance_asset(&self) -> &str {
        &self.balance_asset
    }

    pub fn ticker(&self, symbol: &Symbol) -> Result<Ticker, ExchangeError> {
        Ok(self.market_data.ticker(symbol)?)
    }

    pub fn market_data(&self) -> &M {
        &self.market_data
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn get_order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    // all orders fill on acceptance, so there is never anything to cancel;
    // the method exists to satisfy the exchange contract
    pub fn cancel_order(&mut self, id: OrderId) -> Result<(), ExchangeError> {
        match self.orders.get(&id) {
            Some(order) if order.status == OrderStatus::Filled => {
                Err(ExchangeError::NotCancelable(id))
            }
            Some(_) => Ok(()),
            None => Err(ExchangeError::OrderNotFound(id)),
        }
    }

    fn next_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    // 7.1: resolve the execution price. market orders take the ticker; limit
    // orders must be at-or-better than the ticker or they are rejected outright.
    fn fill_price(&self, req: &OrderRequest) -> Result<Price, ExchangeError> {
        let ticker = self.market_data.ticker(&req.symbol)?;
        match req.order_type {
            OrderType::Market => Ok(ticker.price),
            OrderType::Limit => {
                let limit = req.price.ok_or(ExchangeError::MissingLimitPrice)?;
                let marketable = match req.side {
                    Side::Buy => limit >= ticker.price,
                    Side::Sell => limit <= ticker.price,
                };
                if marketable {
                    Ok(limit)
                } else {
                    Err(ExchangeError::NotMarketable {
                        limit,
                        market: ticker.price,
                    })
                }
            }
        }
    }

    // 7.2: margin admission for new exposure. the hard check is affordability,
    // the soft check keeps 5% of the balance unencumbered.
    fn check_margin(&self, margin: Quote) -> Result<(), ExchangeError> {
        if margin > self.balance {
            return Err(ExchangeError::InsufficientFunds {
                required: margin,
                available: self.balance,
            });
        }
        let limit = self.balance.mul(MARGIN_BUFFER);
        if margin > limit {
            return Err(ExchangeError::MarginTooHigh {
                required: margin,
                limit,
            });
        }
        Ok(())
    }

    pub fn place_order(&mut self, req: &OrderRequest) -> Result<FillReport, ExchangeError> {
        let fill = self.fill_price(req)?;
        let now = self.clock.now();

        let effect = match self.positions.get(&req.symbol).cloned() {
            // opposite-direction order reduces or closes the position; any
            // quantity beyond the position is ignored, not flipped
            Some(pos) if pos.side != req.side => {
                let outcome = close_position(&pos, req.quantity, fill, now);
                self.balance = self.balance.add(outcome.cash_returned);

                match outcome.remaining.clone() {
                    Some(reduced) => {
                        self.positions.insert(req.symbol.clone(), reduced);
                        FillEffect::Reduced(outcome)
                    }
                    None => {
                        self.positions.remove(&req.symbol);
                        FillEffect::Closed(outcome)
                    }
                }
            }
            // same-direction order adds to the position at VWAP
            Some(pos) => {
                let added = required_margin(req.quantity, fill, pos.leverage);
                self.check_margin(added)?;
                self.balance = self.balance.sub(added);

                let grown = increase_position(&pos, req.quantity, fill, now);
                self.positions.insert(req.symbol.clone(), grown.clone());
                FillEffect::Increased(grown)
            }
            None => {
                let margin = required_margin(req.quantity, fill, self.leverage);
                self.check_margin(margin)?;
                self.balance = self.balance.sub(margin);

                let pos = Position::open(
                    req.symbol.clone(),
                    req.side,
                    req.quantity,
                    fill,
                    self.leverage,
                    now,
                );
                self.positions.insert(req.symbol.clone(), pos.clone());
                FillEffect::Opened(pos)
            }
        };

        debug_assert!(!self.balance.is_negative());

        let order = Order {
            id: self.next_order_id(),
            symbol: req.symbol.clone(),
            side: req.side,
            order_type: req.order_type,
            status: OrderStatus::Filled,
            quantity: req.quantity,
            filled_quantity: req.quantity,
            price: fill,
            timestamp: now,
        };
        self.orders.insert(order.id, order.clone());

        Ok(FillReport { order, effect })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::market_data::ScriptedFeed;
    use crate::types::{Qty, Timestamp};
    use rust_decimal_macros::dec;

    fn setup(price: Decimal, balance: Decimal, lev: Decimal) -> PaperExchange<ScriptedFeed, SimClock> {
        let symbol = Symbol::new("BTCUSDT");
        let clock = SimClock::new(Timestamp::from_millis(1000));
        let feed = ScriptedFeed::new();
        feed.set_price(symbol, Price::new_unchecked(price), Timestamp::from_millis(1000));
        PaperExchange::new(
            feed,
            clock,
            Quote::new(balance),
            "USDT",
            Leverage::new(lev).unwrap(),
        )
    }

    fn buy(qty: Decimal) -> OrderRequest {
        OrderRequest::market(Symbol::new("BTCUSDT"), Side::Buy, Qty::new_unchecked(qty))
    }

    fn sell(qty: Decimal) -> OrderRequest {
        OrderRequest::market(Symbol::new("BTCUSDT"), Side::Sell, Qty::new_unchecked(qty))
    }

    #[test]
    fn open_charges_margin() {
        let mut ex = setup(dec!(50000), dec!(10000), dec!(5));
        let report = ex.place_order(&buy(dec!(0.2))).unwrap();

        // 0.2 * 50000 / 5 = 2000
        assert_eq!(ex.balance().value(), dec!(8000));
        assert!(matches!(report.effect, FillEffect::Opened(_)));
        assert_eq!(report.order.price.value(), dec!(50000));
        assert_eq!(report.order.status, OrderStatus::Filled);
    }

    #[test]
    fn rejects_unaffordable_margin() {
        let mut ex = setup(dec!(50000), dec!(1000), dec!(5));
        // 1 BTC needs 10000 margin against a 1000 balance
        let err = ex.place_order(&buy(dec!(1))).unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientFunds { .. }));
        assert_eq!(ex.balance().value(), dec!(1000)); // untouched
    }

    #[test]
    fn rejects_margin_above_buffer() {
        let mut ex = setup(dec!(50000), dec!(10000), dec!(5));
        // 0.98 BTC needs 9800 margin: affordable, but above 95% of 10000
        let err = ex.place_order(&buy(dec!(0.98))).unwrap_err();
        assert!(matches!(err, ExchangeError::MarginTooHigh { .. }));
        assert_eq!(ex.balance().value(), dec!(10000));
    }

    #[test]
    fn limit_order_marketability() {
        let mut ex = setup(dec!(50000), dec!(10000), dec!(5));
        let symbol = Symbol::new("BTCUSDT");

        // buy limit below market rests nowhere: rejected
        let below = OrderRequest::limit(
            symbol.clone(),
            Side::Buy,
            Qty::new_unchecked(dec!(0.1)),
            Price::new_unchecked(dec!(49000)),
        );
        assert!(matches!(
            ex.place_order(&below).unwrap_err(),
            ExchangeError::NotMarketable { .. }
        ));

        // buy limit at-or-above market fills at the limit price
        let at = OrderRequest::limit(
            symbol,
            Side::Buy,
            Qty::new_unchecked(dec!(0.1)),
            Price::new_unchecked(dec!(50100)),
        );
        let report = ex.place_order(&at).unwrap();
        assert_eq!(report.order.price.value(), dec!(50100));
    }

    #[test]
    fn close_round_trip_restores_balance() {
        let mut ex = setup(dec!(50000), dec!(10000), dec!(5));
        ex.place_order(&buy(dec!(0.2))).unwrap();
        let report = ex.place_order(&sell(dec!(0.2))).unwrap();

        assert!(matches!(report.effect, FillEffect::Closed(_)));
        assert_eq!(ex.balance().value(), dec!(10000));
        assert!(ex.position(&Symbol::new("BTCUSDT")).is_none());
    }

    #[test]
    fn profitable_close_credits_pnl() {
        let mut ex = setup(dec!(50000), dec!(10000), dec!(5));
        ex.place_order(&buy(dec!(0.2))).unwrap();

        // price rises 2%: $200 on $10k notional, independent of leverage
        ex.market_data().set_price(
            Symbol::new("BTCUSDT"),
            Price::new_unchecked(dec!(51000)),
            Timestamp::from_millis(2000),
        );

        ex.place_order(&sell(dec!(0.2))).unwrap();
        assert_eq!(ex.balance().value(), dec!(10200));
    }

    #[test]
    fn losing_close_capped_at_margin() {
        let mut ex = setup(dec!(50000), dec!(10000), dec!(10));
        ex.place_order(&buy(dec!(1))).unwrap(); // margin 5000, balance 5000

        ex.market_data().set_price(
            Symbol::new("BTCUSDT"),
            Price::new_unchecked(dec!(40000)),
            Timestamp::from_millis(2000),
        );

        // raw loss 10000 > margin 5000: balance floors at the remaining 5000
        ex.place_order(&sell(dec!(1))).unwrap();
        assert_eq!(ex.balance().value(), dec!(5000));
        assert!(!ex.balance().is_negative());
    }

    #[test]
    fn oversized_close_does_not_flip() {
        let mut ex = setup(dec!(50000), dec!(10000), dec!(5));
        ex.place_order(&buy(dec!(0.2))).unwrap();

        let report = ex.place_order(&sell(dec!(1))).unwrap();
        match report.effect {
            FillEffect::Closed(outcome) => {
                assert_eq!(outcome.closed_quantity.value(), dec!(0.2))
            }
            other => panic!("expected full close, got {other:?}"),
        }
        assert!(ex.position(&Symbol::new("BTCUSDT")).is_none());
    }

    #[test]
    fn same_side_order_increases() {
        let mut ex = setup(dec!(50000), dec!(10000), dec!(5));
        ex.place_order(&buy(dec!(0.2))).unwrap();
        let report = ex.place_order(&buy(dec!(0.2))).unwrap();

        match report.effect {
            FillEffect::Increased(pos) => {
                assert_eq!(pos.quantity.value(), dec!(0.4));
                assert_eq!(pos.margin.value(), dec!(4000));
            }
            other => panic!("expected increase, got {other:?}"),
        }
        assert_eq!(ex.balance().value(), dec!(6000));
    }

    #[test]
    fn fills_use_injected_clock() {
        let symbol = Symbol::new("BTCUSDT");
        let clock = SimClock::new(Timestamp::from_millis(777));
        let feed = ScriptedFeed::new();
        feed.set_price(symbol, Price::new_unchecked(dec!(50000)), Timestamp::from_millis(777));
        let mut ex = PaperExchange::new(
            feed,
            clock.clone(),
            Quote::new(dec!(10000)),
            "USDT",
            Leverage::new(dec!(5)).unwrap(),
        );

        clock.set(Timestamp::from_millis(123_456));
        let report = ex.place_order(&buy(dec!(0.1))).unwrap();
        assert_eq!(report.order.timestamp.as_millis(), 123_456);
    }
}
