// 9.0: risk manager. sizes orders from equity and stop distance, computes
// protective exit prices, and gates entries behind a daily drawdown limit.
// the drawdown baseline is persisted, so a restart mid-day measures from the
// same start-of-day balance as the process that crashed, not from whatever
// balance is read at cold-start.

use crate::clock::Clock;
use crate::store::{StateStore, StoreError};
use crate::types::{Pct, Price, Qty, Quote, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub risk_per_trade_pct: Pct,
    pub default_stop_loss_pct: Pct,
    pub default_take_profit_pct: Pct,
    pub max_daily_drawdown_pct: Pct,
}

impl Default for RiskConfig {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            risk_per_trade_pct: Pct::new(dec!(1)),
            default_stop_loss_pct: Pct::new(dec!(2)),
            default_take_profit_pct: Pct::new(dec!(4)),
            max_daily_drawdown_pct: Pct::new(dec!(5)),
        }
    }
}

// persisted across restarts; last_reset_day is the UTC calendar day key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub start_of_day_balance: Quote,
    pub last_reset_day: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ExitPrices {
    pub stop_loss: Price,
    pub take_profit: Price,
}

#[derive(Debug)]
pub struct RiskManager<S: StateStore, C: Clock> {
    store: Rc<S>,
    clock: C,
    config: RiskConfig,
    state: RefCell<Option<RiskState>>,
}

impl<S: StateStore, C: Clock> RiskManager<S, C> {
    pub fn new(store: Rc<S>, clock: C, config: RiskConfig) -> Self {
        Self {
            store,
            clock,
            config,
            state: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    // 9.1: load the persisted baseline, or establish one from the current
    // balance on first run. the first-run baseline is persisted immediately so
    // a crash right after init still leaves a stable baseline behind.
    pub fn init(&self, current_balance: Quote) -> Result<(), StoreError> {
        let state = match self.store.risk_state()? {
            Some(state) => state,
            None => {
                let fresh = RiskState {
                    start_of_day_balance: current_balance,
                    last_reset_day: self.clock.now().day_key(),
                };
                self.store.save_risk_state(&fresh)?;
                fresh
            }
        };
        *self.state.borrow_mut() = Some(state);
        Ok(())
    }

    // 9.2: fixed-fractional sizing. risk_amount = equity * risk%, stop
    // distance = price * sl%, quantity = risk_amount / distance. leverage
    // changes capital efficiency, never risk per trade.
    pub fn calculate_quantity(
        &self,
        price: Price,
        equity: Quote,
        sl_pct: Option<Pct>,
    ) -> Option<Qty> {
        let sl_pct = sl_pct.unwrap_or(self.config.default_stop_loss_pct);

        let risk_amount = equity.value() * self.config.risk_per_trade_pct.as_fraction();
        let sl_distance = price.value() * sl_pct.as_fraction();
        if sl_distance <= Decimal::ZERO {
            return None;
        }
        Qty::new(risk_amount / sl_distance)
    }

    // 9.3: percentage-of-entry offsets, mirrored for shorts. never absolute
    // levels.
    pub fn calculate_exit_prices(
        &self,
        entry: Price,
        side: Side,
        sl_pct: Option<Pct>,
        tp_pct: Option<Pct>,
    ) -> ExitPrices {
        let sl = sl_pct.unwrap_or(self.config.default_stop_loss_pct).as_fraction();
        let tp = tp_pct.unwrap_or(self.config.default_take_profit_pct).as_fraction();

        let (sl_price, tp_price) = match side {
            Side::Buy => (
                entry.value() * (Decimal::ONE - sl),
                entry.value() * (Decimal::ONE + tp),
            ),
            Side::Sell => (
                entry.value() * (Decimal::ONE + sl),
                entry.value() * (Decimal::ONE - tp),
            ),
        };

        ExitPrices {
            stop_loss: Price::new_unchecked(sl_price),
            take_profit: Price::new_unchecked(tp_price),
        }
    }

    // 9.4: daily drawdown gate. a false here is a halt, not an error; callers
    // must check the boolean. losses are directionless, so the gate applies to
    // short entries exactly as it does to longs.
    pub fn validate_order(&self, _side: Side, current_balance: Quote) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let state = self.rollover_if_needed(now, current_balance)?;

        let baseline = state.start_of_day_balance.value();
        if baseline <= Decimal::ZERO {
            return Ok(true);
        }

        let drop = (baseline - current_balance.value()) / baseline;
        Ok(drop <= self.config.max_daily_drawdown_pct.as_fraction())
    }

    pub fn state(&self) -> Option<RiskState> {
        self.state.borrow().clone()
    }

    // on a UTC day rollover the baseline resets to the current balance and is
    // persisted before any check runs. within the same day the persisted
    // baseline is authoritative.
    fn rollover_if_needed(
        &self,
        now: Timestamp,
        current_balance: Quote,
    ) -> Result<RiskState, StoreError> {
        let mut slot = self.state.borrow_mut();
        let state = match slot.as_ref() {
            Some(state) => state.clone(),
            None => self.store.risk_state()?.unwrap_or(RiskState {
                start_of_day_balance: current_balance,
                last_reset_day: now.day_key(),
            }),
        };

        let state = if now.day_key() != state.last_reset_day {
            let reset = RiskState {
                start_of_day_balance: current_balance,
                last_reset_day: now.day_key(),
            };
            self.store.save_risk_state(&reset)?;
            reset
        } else {
            state
        };

        *slot = Some(state.clone());
        Ok(state)
    }
}
