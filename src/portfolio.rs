// 13.0: portfolio reconciler. recomputes the whole snapshot from the trade
// ledger every time, never accumulates increments, so derived figures cannot
// drift from the records they come from. prices for open trades are fetched
// in one batched ticker call before anything is computed.

use crate::clock::Clock;
use crate::market_data::{MarketData, MarketDataError};
use crate::store::{StateStore, StoreError};
use crate::trade::{Trade, TradeStatus};
use crate::types::{Qty, Quote, Symbol, Timestamp};
use crate::vault::EquityProvider;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PortfolioError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    MarketData(#[from] MarketDataError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: Timestamp,
    pub holdings: HashMap<Symbol, Qty>,
    pub realized_pnl: Quote,
    pub pnl_percentage: Decimal,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub open_trades: Vec<Trade>,
    pub closed_trades: Vec<Trade>,
    pub current_equity: Quote,
    pub current_balance: Quote,
}

pub struct Reconciler<S: StateStore, M: MarketData, C: Clock> {
    store: Rc<S>,
    market_data: Rc<M>,
    clock: C,
    initial_balance: Quote,
}

impl<S: StateStore, M: MarketData, C: Clock> Reconciler<S, M, C> {
    pub fn new(store: Rc<S>, market_data: Rc<M>, clock: C, initial_balance: Quote) -> Self {
        Self {
            store,
            market_data,
            clock,
            initial_balance,
        }
    }

    // 13.1: full recompute. `live_balance` is the exchange's figure when that
    // read succeeded; the ledger-derived value is the fallback, not the
    // primary.
    pub fn snapshot(&self, live_balance: Option<Quote>) -> Result<PortfolioSnapshot, PortfolioError> {
        let now = self.clock.now();
        let all = self.store.trades(None, usize::MAX, 0, now)?;

        let (open, closed): (Vec<Trade>, Vec<Trade>) = all
            .into_iter()
            .partition(|t| t.status == TradeStatus::Open);

        let realized: Quote = closed.iter().map(|t| t.realized_pnl()).sum();
        let wallet = self.initial_balance.add(realized);
        let margin_used: Quote = open.iter().map(|t| t.margin_or_derived()).sum();

        let derived_balance = wallet.sub(margin_used).max(Quote::zero());
        let current_balance = live_balance.unwrap_or(derived_balance);

        // one batched read over the distinct open symbols, before any math
        let mut symbols: Vec<Symbol> = open.iter().map(|t| t.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        let marks = self.market_data.tickers(&symbols)?;

        let unrealized: Quote = open
            .iter()
            .map(|t| t.unrealized_pnl(marks[&t.symbol].price))
            .sum();
        let current_equity = wallet.add(unrealized);

        let winning_trades = closed
            .iter()
            .filter(|t| t.realized_pnl().value() > Decimal::ZERO)
            .count();
        let losing_trades = closed.len() - winning_trades;

        let win_rate = if closed.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(winning_trades as u64) / Decimal::from(closed.len() as u64)
        };

        let gross_profit: Decimal = closed
            .iter()
            .map(|t| t.realized_pnl().value())
            .filter(|p| *p > Decimal::ZERO)
            .sum();
        let gross_loss: Decimal = closed
            .iter()
            .map(|t| t.realized_pnl().value())
            .filter(|p| *p < Decimal::ZERO)
            .map(|p| -p)
            .sum();
        let profit_factor = profit_factor(gross_profit, gross_loss);

        let pnl_percentage = if self.initial_balance.value() > Decimal::ZERO {
            realized.value() / self.initial_balance.value() * dec!(100)
        } else {
            Decimal::ZERO
        };

        let mut holdings = HashMap::new();
        for trade in &open {
            holdings
                .entry(trade.symbol.clone())
                .and_modify(|q: &mut Qty| {
                    *q = Qty::new_unchecked(q.value() + trade.quantity.value())
                })
                .or_insert(trade.quantity);
        }

        Ok(PortfolioSnapshot {
            timestamp: now,
            holdings,
            realized_pnl: realized,
            pnl_percentage,
            win_rate,
            profit_factor,
            winning_trades,
            losing_trades,
            open_trades: open,
            closed_trades: closed,
            current_equity,
            current_balance,
        })
    }

    pub fn save_snapshot(
        &self,
        live_balance: Option<Quote>,
    ) -> Result<PortfolioSnapshot, PortfolioError> {
        let snapshot = self.snapshot(live_balance)?;
        self.store.save_snapshot(&snapshot)?;
        Ok(snapshot)
    }
}

// gross_profit / gross_loss; all-profit sets saturate to Decimal::MAX, empty
// or all-loss sets are zero
fn profit_factor(gross_profit: Decimal, gross_loss: Decimal) -> Decimal {
    if gross_profit.is_zero() {
        Decimal::ZERO
    } else if gross_loss.is_zero() {
        Decimal::MAX
    } else {
        gross_profit / gross_loss
    }
}

impl<S: StateStore, M: MarketData, C: Clock> EquityProvider for Reconciler<S, M, C> {
    fn live_equity(&self) -> Option<Quote> {
        self.snapshot(None).ok().map(|s| s.current_equity)
    }
}
