// 12.0: referral commission split. paid only on a closed, profitable trade:
// an earned credit to the inviter and a matching negative debit to the
// invited account, written in one paired ledger append and both tagged with
// the trade id and rate. no referrer relationship means no-op, not an error.

use crate::clock::Clock;
use crate::store::{StateStore, StoreError};
use crate::trade::{Trade, TradeStatus};
use crate::types::{Pct, Quote};
use crate::vault::{VaultTransaction, VaultTxKind};
use rust_decimal::Decimal;
use std::rc::Rc;

pub fn calculate_commission(trade: &Trade, rate: Pct) -> Quote {
    if trade.status != TradeStatus::Closed {
        return Quote::zero();
    }
    let pnl = trade.realized_pnl();
    if pnl.value() <= Decimal::ZERO {
        return Quote::zero();
    }
    pnl.mul(rate.as_fraction())
}

#[derive(Debug, Clone)]
pub struct CommissionSplit {
    pub earned: VaultTransaction,
    pub paid: VaultTransaction,
}

pub struct CommissionDistributor<S: StateStore, C: Clock> {
    store: Rc<S>,
    clock: C,
    rate: Pct,
    // the trading account whose referrer (if any) earns the commission
    account: String,
}

impl<S: StateStore, C: Clock> CommissionDistributor<S, C> {
    pub fn new(store: Rc<S>, clock: C, rate: Pct, account: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            rate,
            account: account.into(),
        }
    }

    pub fn process_trade_close(&self, trade: &Trade) -> Result<Option<CommissionSplit>, StoreError> {
        let commission = calculate_commission(trade, self.rate);
        if commission.value() <= Decimal::ZERO {
            return Ok(None);
        }

        let referrer = match self.store.referrer_of(&self.account)? {
            Some(referrer) => referrer,
            None => return Ok(None),
        };

        let now = self.clock.now();
        let earned = VaultTransaction {
            account: referrer,
            amount: commission,
            shares: Decimal::ZERO,
            kind: VaultTxKind::CommissionEarned,
            trade_id: Some(trade.id),
            rate: Some(self.rate),
            timestamp: now,
        };
        let paid = VaultTransaction {
            account: self.account.clone(),
            amount: commission.negate(),
            shares: Decimal::ZERO,
            kind: VaultTxKind::CommissionPaid,
            trade_id: Some(trade.id),
            rate: Some(self.rate),
            timestamp: now,
        };

        // one paired append: the split must never be half-written
        let rows = [earned, paid];
        self.store.append_vault_txs(&rows)?;
        let [earned, paid] = rows;

        Ok(Some(CommissionSplit { earned, paid }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::portfolio::PortfolioSnapshot;
    use crate::risk::RiskState;
    use crate::store::MemoryStore;
    use crate::trade::{ExitReason, TrailingState};
    use crate::types::{Leverage, Price, Qty, Side, Symbol, Timestamp, TradeId};
    use crate::vault::VaultState;
    use rust_decimal_macros::dec;

    // ledger whose paired append always fails; everything else delegates
    struct BrokenLedger(MemoryStore);

    impl StateStore for BrokenLedger {
        fn next_trade_id(&self) -> TradeId {
            self.0.next_trade_id()
        }

        fn save_trade(&self, trade: &Trade) -> Result<(), StoreError> {
            self.0.save_trade(trade)
        }

        fn update_trade<F>(&self, id: TradeId, f: F) -> Result<Trade, StoreError>
        where
            F: FnOnce(&mut Trade),
        {
            self.0.update_trade(id, f)
        }

        fn open_trades(&self, as_of: Timestamp) -> Result<Vec<Trade>, StoreError> {
            self.0.open_trades(as_of)
        }

        fn active_trade(
            &self,
            symbol: &Symbol,
            as_of: Timestamp,
        ) -> Result<Option<Trade>, StoreError> {
            self.0.active_trade(symbol, as_of)
        }

        fn trades(
            &self,
            symbol: Option<&Symbol>,
            limit: usize,
            offset: usize,
            as_of: Timestamp,
        ) -> Result<Vec<Trade>, StoreError> {
            self.0.trades(symbol, limit, offset, as_of)
        }

        fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), StoreError> {
            self.0.save_snapshot(snapshot)
        }

        fn latest_snapshot(
            &self,
            as_of: Timestamp,
        ) -> Result<Option<PortfolioSnapshot>, StoreError> {
            self.0.latest_snapshot(as_of)
        }

        fn append_vault_tx(&self, tx: &VaultTransaction) -> Result<(), StoreError> {
            self.0.append_vault_tx(tx)
        }

        fn append_vault_txs(&self, _txs: &[VaultTransaction]) -> Result<(), StoreError> {
            Err(StoreError::Backend("ledger write failed".to_string()))
        }

        fn vault_txs(&self, as_of: Timestamp) -> Result<Vec<VaultTransaction>, StoreError> {
            self.0.vault_txs(as_of)
        }

        fn save_vault_state(&self, state: &VaultState) -> Result<(), StoreError> {
            self.0.save_vault_state(state)
        }

        fn vault_state(&self) -> Result<Option<VaultState>, StoreError> {
            self.0.vault_state()
        }

        fn save_risk_state(&self, state: &RiskState) -> Result<(), StoreError> {
            self.0.save_risk_state(state)
        }

        fn risk_state(&self) -> Result<Option<RiskState>, StoreError> {
            self.0.risk_state()
        }

        fn referrer_of(&self, account: &str) -> Result<Option<String>, StoreError> {
            self.0.referrer_of(account)
        }
    }

    fn closed_trade(entry: Decimal, exit: Decimal) -> Trade {
        let mut trade = Trade {
            id: TradeId(7),
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            quantity: Qty::new_unchecked(dec!(1)),
            entry_price: Price::new_unchecked(entry),
            entry_time: Timestamp::from_millis(0),
            status: TradeStatus::Open,
            stop_loss: None,
            take_profit: None,
            leverage: Leverage::new(dec!(5)).unwrap(),
            margin: None,
            strategy: None,
            trailing: TrailingState::disabled(),
            breakeven_activated: false,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
        };
        trade.close(
            Price::new_unchecked(exit),
            Timestamp::from_millis(1000),
            ExitReason::TakeProfit,
        );
        trade
    }

    #[test]
    fn commission_only_on_profit() {
        let rate = Pct::new(dec!(10));

        let winner = closed_trade(dec!(50000), dec!(51000));
        assert_eq!(calculate_commission(&winner, rate).value(), dec!(100));

        let loser = closed_trade(dec!(50000), dec!(49000));
        assert_eq!(calculate_commission(&loser, rate).value(), Decimal::ZERO);
    }

    #[test]
    fn open_trade_earns_nothing() {
        let mut trade = closed_trade(dec!(50000), dec!(51000));
        trade.status = TradeStatus::Open;
        assert_eq!(
            calculate_commission(&trade, Pct::new(dec!(10))).value(),
            Decimal::ZERO
        );
    }

    #[test]
    fn split_writes_two_linked_entries() {
        let store = Rc::new(MemoryStore::new());
        store.set_referrer("trader@fund.io", "inviter@fund.io");
        let clock = SimClock::new(Timestamp::from_millis(5000));
        let dist = CommissionDistributor::new(
            store.clone(),
            clock,
            Pct::new(dec!(10)),
            "trader@fund.io",
        );

        let split = dist
            .process_trade_close(&closed_trade(dec!(50000), dec!(51000)))
            .unwrap()
            .unwrap();

        assert_eq!(split.earned.account, "inviter@fund.io");
        assert_eq!(split.earned.amount.value(), dec!(100));
        assert_eq!(split.paid.account, "trader@fund.io");
        assert_eq!(split.paid.amount.value(), dec!(-100));
        assert_eq!(split.earned.trade_id, Some(TradeId(7)));
        assert_eq!(split.paid.trade_id, Some(TradeId(7)));

        // both rows landed in the ledger and net to zero
        let txs = store.vault_txs(Timestamp::from_millis(5000)).unwrap();
        assert_eq!(txs.len(), 2);
        let net: Decimal = txs.iter().map(|t| t.amount.value()).sum();
        assert_eq!(net, Decimal::ZERO);
    }

    #[test]
    fn failed_split_append_leaves_no_one_sided_row() {
        let store = Rc::new(BrokenLedger(MemoryStore::new()));
        store.0.set_referrer("trader@fund.io", "inviter@fund.io");
        let clock = SimClock::new(Timestamp::from_millis(5000));
        let dist = CommissionDistributor::new(
            store.clone(),
            clock,
            Pct::new(dec!(10)),
            "trader@fund.io",
        );

        let err = dist
            .process_trade_close(&closed_trade(dec!(50000), dec!(51000)))
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        // the failing write dropped both rows, not just the second one
        assert!(store
            .vault_txs(Timestamp::from_millis(5000))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn no_referrer_is_a_noop() {
        let store = Rc::new(MemoryStore::new());
        let clock = SimClock::new(Timestamp::from_millis(0));
        let dist =
            CommissionDistributor::new(store.clone(), clock, Pct::new(dec!(10)), "trader@fund.io");

        let result = dist
            .process_trade_close(&closed_trade(dec!(50000), dec!(51000)))
            .unwrap();
        assert!(result.is_none());
        assert!(store.vault_txs(Timestamp::from_millis(0)).unwrap().is_empty());
    }

    #[test]
    fn losing_trade_is_a_noop_even_with_referrer() {
        let store = Rc::new(MemoryStore::new());
        store.set_referrer("trader@fund.io", "inviter@fund.io");
        let clock = SimClock::new(Timestamp::from_millis(0));
        let dist =
            CommissionDistributor::new(store.clone(), clock, Pct::new(dec!(10)), "trader@fund.io");

        let result = dist
            .process_trade_close(&closed_trade(dec!(50000), dec!(49000)))
            .unwrap();
        assert!(result.is_none());
    }
}
