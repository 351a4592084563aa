// 11.0: pooled-capital vault. deposits and withdrawals convert to ownership
// shares at a computed share price; the ledger is append-only and the rollup
// is recomputable from it. the vault and the portfolio reconciler depend on
// each other (equity needs trades, trades need capital, capital needs the
// vault), so the equity source is injected after construction and falls back
// through an explicit chain when the live provider is absent.

use crate::clock::Clock;
use crate::store::{StateStore, StoreError};
use crate::types::{Pct, Quote, Timestamp, TradeId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultTxKind {
    Deposit,
    Withdrawal,
    CommissionEarned,
    CommissionPaid,
}

// append-only ledger row. withdrawal amounts are stored positive and signed
// at summation time; commission debits are stored already-negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultTransaction {
    pub account: String,
    pub amount: Quote,
    pub shares: Decimal,
    pub kind: VaultTxKind,
    pub trade_id: Option<TradeId>,
    pub rate: Option<Pct>,
    pub timestamp: Timestamp,
}

// cached rollup, floored at zero on both dimensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultState {
    pub total_assets: Quote,
    pub total_shares: Decimal,
}

impl VaultState {
    pub fn empty() -> Self {
        Self {
            total_assets: Quote::zero(),
            total_shares: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VaultError {
    #[error("insufficient shares: requested {requested}, available {available}")]
    InsufficientShares {
        requested: Decimal,
        available: Decimal,
    },

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Quote),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub trait EquityProvider {
    // None means the provider cannot produce a figure right now
    fn live_equity(&self) -> Option<Quote>;
}

// where the assets figure came from, surfaced for audit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetsSource {
    LiveEquity,
    SnapshotEquity,
    NetDeposits,
}

pub struct Vault<S: StateStore, C: Clock> {
    store: Rc<S>,
    clock: C,
    equity: RefCell<Option<Rc<dyn EquityProvider>>>,
    state: RefCell<VaultState>,
}

impl<S: StateStore, C: Clock> Vault<S, C> {
    pub fn new(store: Rc<S>, clock: C) -> Result<Self, VaultError> {
        let state = store.vault_state()?.unwrap_or_else(VaultState::empty);
        Ok(Self {
            store,
            clock,
            equity: RefCell::new(None),
            state: RefCell::new(state),
        })
    }

    // second phase of the two-phase wiring: called once the reconciler exists
    pub fn set_equity_provider(&self, provider: Rc<dyn EquityProvider>) {
        *self.equity.borrow_mut() = Some(provider);
    }

    pub fn total_shares(&self) -> Decimal {
        self.state.borrow().total_shares
    }

    // 11.1: the fallback chain. live equity when the provider answers, else
    // the latest persisted snapshot's equity, else net deposits from the
    // ledger. each tier exists to break the vault/portfolio cycle at startup.
    pub fn total_assets(&self) -> Result<(Quote, AssetsSource), VaultError> {
        if let Some(provider) = self.equity.borrow().as_ref() {
            if let Some(equity) = provider.live_equity() {
                return Ok((equity, AssetsSource::LiveEquity));
            }
        }
        if let Some(snapshot) = self.store.latest_snapshot(self.clock.now())? {
            return Ok((snapshot.current_equity, AssetsSource::SnapshotEquity));
        }
        Ok((self.total_deposited_balance()?, AssetsSource::NetDeposits))
    }

    // share price = assets / shares, defined as 1.0 for an empty vault
    pub fn share_price(&self) -> Result<Decimal, VaultError> {
        let shares = self.total_shares();
        if shares.is_zero() {
            return Ok(Decimal::ONE);
        }
        let (assets, _) = self.total_assets()?;
        Ok(assets.value() / shares)
    }

    pub fn deposit(&self, account: &str, amount: Quote) -> Result<VaultTransaction, VaultError> {
        if amount.value() <= Decimal::ZERO {
            return Err(VaultError::InvalidAmount(amount));
        }
        let price = self.share_price()?;
        let shares = amount.value() / price;

        let tx = VaultTransaction {
            account: account.to_string(),
            amount,
            shares,
            kind: VaultTxKind::Deposit,
            trade_id: None,
            rate: None,
            timestamp: self.clock.now(),
        };
        self.store.append_vault_tx(&tx)?;

        {
            let mut state = self.state.borrow_mut();
            state.total_assets = state.total_assets.add(amount);
            state.total_shares += shares;
            self.store.save_vault_state(&state)?;
        }
        Ok(tx)
    }

    pub fn withdraw(&self, account: &str, shares: Decimal) -> Result<VaultTransaction, VaultError> {
        let available = self.total_shares();
        if shares > available {
            return Err(VaultError::InsufficientShares {
                requested: shares,
                available,
            });
        }
        let price = self.share_price()?;
        let amount = Quote::new(shares * price);

        let tx = VaultTransaction {
            account: account.to_string(),
            amount,
            shares,
            kind: VaultTxKind::Withdrawal,
            trade_id: None,
            rate: None,
            timestamp: self.clock.now(),
        };
        self.store.append_vault_tx(&tx)?;

        {
            let mut state = self.state.borrow_mut();
            state.total_assets = state.total_assets.sub(amount).max(Quote::zero());
            state.total_shares = (state.total_shares - shares).max(Decimal::ZERO);
            self.store.save_vault_state(&state)?;
        }
        Ok(tx)
    }

    // 11.2: signed sum of the ledger up to the current (possibly simulated)
    // time. the time filter is what lets a replay not see future deposits.
    pub fn total_deposited_balance(&self) -> Result<Quote, VaultError> {
        let now = self.clock.now();
        let total = self
            .store
            .vault_txs(now)?
            .iter()
            .map(|tx| match tx.kind {
                VaultTxKind::Deposit | VaultTxKind::CommissionEarned => tx.amount,
                VaultTxKind::Withdrawal => tx.amount.negate(),
                // already stored negative
                VaultTxKind::CommissionPaid => tx.amount,
            })
            .sum();
        Ok(total)
    }
}
