// 3.0: market data port. the engine is agnostic to whether candles come from a
// live venue, a historical dump, or a scripted test feed. implementations only
// promise candles and a last-trade price per symbol.
// errors are propagated, never swallowed: trading on a stale or zero price is
// worse than halting the tick.

use crate::types::{Price, Symbol, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub interval: String,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Decimal,
    pub start_time: Timestamp,
    pub close_time: Option<Timestamp>,
}

impl Candle {
    // true when `price` falls inside the candle's traded range, wick included
    pub fn touched(&self, price: Price) -> bool {
        price >= self.low && price <= self.high
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ticker {
    pub price: Price,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketDataError {
    #[error("market data unavailable for {0}")]
    Unavailable(Symbol),

    #[error("unknown symbol {0}")]
    UnknownSymbol(Symbol),
}

pub trait MarketData {
    fn candles(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: usize,
        end_time: Option<Timestamp>,
    ) -> Result<Vec<Candle>, MarketDataError>;

    fn ticker(&self, symbol: &Symbol) -> Result<Ticker, MarketDataError>;

    // 3.1: one batched read for a set of symbols. the reconciler issues exactly
    // one of these per snapshot, before any mutation (read-before-write).
    fn tickers(&self, symbols: &[Symbol]) -> Result<HashMap<Symbol, Ticker>, MarketDataError> {
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            out.insert(symbol.clone(), self.ticker(symbol)?);
        }
        Ok(out)
    }
}

// a shared feed is still a feed; the exchange and the reconciler read the
// same Rc'd instance
impl<M: MarketData + ?Sized> MarketData for std::rc::Rc<M> {
    fn candles(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: usize,
        end_time: Option<Timestamp>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        (**self).candles(symbol, interval, limit, end_time)
    }

    fn ticker(&self, symbol: &Symbol) -> Result<Ticker, MarketDataError> {
        (**self).ticker(symbol)
    }

    fn tickers(&self, symbols: &[Symbol]) -> Result<HashMap<Symbol, Ticker>, MarketDataError> {
        (**self).tickers(symbols)
    }
}

// 3.2: scripted feed for backtests and tests. preloaded candle series plus a
// settable last price, advanced in lockstep with the sim clock.
// interior mutability so a feed shared behind an Rc can still be advanced by
// the driver between ticks
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    candles: std::cell::RefCell<HashMap<Symbol, Vec<Candle>>>,
    last_price: std::cell::RefCell<HashMap<Symbol, Ticker>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_candle(&self, candle: Candle) {
        let ticker = Ticker {
            price: candle.close,
            timestamp: candle.close_time.unwrap_or(candle.start_time),
        };
        self.last_price.borrow_mut().insert(candle.symbol.clone(), ticker);
        self.candles
            .borrow_mut()
            .entry(candle.symbol.clone())
            .or_default()
            .push(candle);
    }

    pub fn set_price(&self, symbol: Symbol, price: Price, timestamp: Timestamp) {
        self.last_price
            .borrow_mut()
            .insert(symbol, Ticker { price, timestamp });
    }

    pub fn latest_candle(&self, symbol: &Symbol) -> Option<Candle> {
        self.candles
            .borrow()
            .get(symbol)
            .and_then(|c| c.last().cloned())
    }
}

impl MarketData for ScriptedFeed {
    fn candles(
        &self,
        symbol: &Symbol,
        _interval: &str,
        limit: usize,
        end_time: Option<Timestamp>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let candles = self.candles.borrow();
        let series = candles
            .get(symbol)
            .ok_or_else(|| MarketDataError::UnknownSymbol(symbol.clone()))?;

        let filtered: Vec<Candle> = series
            .iter()
            .filter(|c| end_time.map_or(true, |end| c.start_time <= end))
            .cloned()
            .collect();

        let start = filtered.len().saturating_sub(limit);
        Ok(filtered[start..].to_vec())
    }

    fn ticker(&self, symbol: &Symbol) -> Result<Ticker, MarketDataError> {
        self.last_price
            .borrow()
            .get(symbol)
            .copied()
            .ok_or_else(|| MarketDataError::Unavailable(symbol.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(symbol: &str, low: Decimal, high: Decimal, close: Decimal, start_ms: i64) -> Candle {
        Candle {
            symbol: Symbol::new(symbol),
            interval: "1m".to_string(),
            open: Price::new_unchecked(close),
            high: Price::new_unchecked(high),
            low: Price::new_unchecked(low),
            close: Price::new_unchecked(close),
            volume: dec!(10),
            start_time: Timestamp::from_millis(start_ms),
            close_time: Some(Timestamp::from_millis(start_ms + 59_999)),
        }
    }

    #[test]
    fn wick_touch_detection() {
        let c = candle("BTCUSDT", dec!(49000), dec!(51000), dec!(50500), 0);
        assert!(c.touched(Price::new_unchecked(dec!(49000))));
        assert!(c.touched(Price::new_unchecked(dec!(51000))));
        assert!(!c.touched(Price::new_unchecked(dec!(48999))));
    }

    #[test]
    fn scripted_feed_ticker_follows_last_candle() {
        let feed = ScriptedFeed::new();
        let symbol = Symbol::new("BTCUSDT");

        feed.push_candle(candle("BTCUSDT", dec!(49000), dec!(51000), dec!(50000), 0));
        feed.push_candle(candle("BTCUSDT", dec!(50000), dec!(52000), dec!(51500), 60_000));

        let ticker = feed.ticker(&symbol).unwrap();
        assert_eq!(ticker.price.value(), dec!(51500));
    }

    #[test]
    fn candles_respect_as_of_filter() {
        let feed = ScriptedFeed::new();
        let symbol = Symbol::new("BTCUSDT");

        for i in 0..5 {
            feed.push_candle(candle("BTCUSDT", dec!(49000), dec!(51000), dec!(50000), i * 60_000));
        }

        // replay must not see candles that start after the as-of time
        let visible = feed
            .candles(&symbol, "1m", 10, Some(Timestamp::from_millis(120_000)))
            .unwrap();
        assert_eq!(visible.len(), 3);

        let limited = feed.candles(&symbol, "1m", 2, None).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].start_time.as_millis(), 4 * 60_000);
    }

    #[test]
    fn unknown_symbol_is_an_error() {
        let feed = ScriptedFeed::new();
        let err = feed.ticker(&Symbol::new("NOPE"));
        assert!(matches!(err, Err(MarketDataError::Unavailable(_))));
    }

    #[test]
    fn batched_tickers_cover_all_symbols() {
        let feed = ScriptedFeed::new();
        feed.push_candle(candle("BTCUSDT", dec!(49000), dec!(51000), dec!(50000), 0));
        feed.push_candle(candle("ETHUSDT", dec!(2900), dec!(3100), dec!(3000), 0));

        let symbols = [Symbol::new("BTCUSDT"), Symbol::new("ETHUSDT")];
        let prices = feed.tickers(&symbols).unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[&Symbol::new("ETHUSDT")].price.value(), dec!(3000));
    }
}
