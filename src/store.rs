// 8.0: persistence port. the storage technology is a collaborator; only the
// data-access contract lives here. every read takes an as-of timestamp so a
// replay never observes records from its own future: rows entered later are
// absent, and a close that postdates the as-of instant reads as still open.

use crate::portfolio::PortfolioSnapshot;
use crate::risk::RiskState;
use crate::trade::{Trade, TradeStatus};
use crate::types::{Symbol, Timestamp, TradeId};
use crate::vault::{VaultState, VaultTransaction};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("trade {0:?} not found")]
    TradeNotFound(TradeId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub trait StateStore {
    fn next_trade_id(&self) -> TradeId;

    fn save_trade(&self, trade: &Trade) -> Result<(), StoreError>;

    fn update_trade<F>(&self, id: TradeId, f: F) -> Result<Trade, StoreError>
    where
        F: FnOnce(&mut Trade);

    fn open_trades(&self, as_of: Timestamp) -> Result<Vec<Trade>, StoreError>;

    // the single Open trade for a symbol, when multi-position mode is off
    fn active_trade(&self, symbol: &Symbol, as_of: Timestamp) -> Result<Option<Trade>, StoreError>;

    fn trades(
        &self,
        symbol: Option<&Symbol>,
        limit: usize,
        offset: usize,
        as_of: Timestamp,
    ) -> Result<Vec<Trade>, StoreError>;

    fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), StoreError>;

    fn latest_snapshot(&self, as_of: Timestamp) -> Result<Option<PortfolioSnapshot>, StoreError>;

    fn append_vault_tx(&self, tx: &VaultTransaction) -> Result<(), StoreError>;

    // linked rows (a commission split) land together or not at all
    fn append_vault_txs(&self, txs: &[VaultTransaction]) -> Result<(), StoreError>;

    fn vault_txs(&self, as_of: Timestamp) -> Result<Vec<VaultTransaction>, StoreError>;

    fn save_vault_state(&self, state: &VaultState) -> Result<(), StoreError>;

    fn vault_state(&self) -> Result<Option<VaultState>, StoreError>;

    fn save_risk_state(&self, state: &RiskState) -> Result<(), StoreError>;

    fn risk_state(&self) -> Result<Option<RiskState>, StoreError>;

    fn referrer_of(&self, account: &str) -> Result<Option<String>, StoreError>;
}

// 8.1: the as-of view of a trade row. a row entered after the instant does
// not exist yet; a row whose close lies beyond the instant was still open
// then, so its exit fields are masked back out.
fn as_of_view(trade: &Trade, as_of: Timestamp) -> Option<Trade> {
    if trade.entry_time > as_of {
        return None;
    }
    let mut view = trade.clone();
    if view.exit_time.map_or(false, |exit| exit > as_of) {
        view.status = TradeStatus::Open;
        view.exit_price = None;
        view.exit_time = None;
        view.exit_reason = None;
    }
    Some(view)
}

// 8.2: in-memory store backing tests, backtests and the sim binary. interior
// mutability so the engine, risk manager and vault can share one instance
// behind an Rc without threading &mut through every component.
#[derive(Debug, Default)]
pub struct MemoryStore {
    trades: RefCell<Vec<Trade>>,
    snapshots: RefCell<Vec<PortfolioSnapshot>>,
    vault_txs: RefCell<Vec<VaultTransaction>>,
    vault_state: RefCell<Option<VaultState>>,
    risk_state: RefCell<Option<RiskState>>,
    referrers: RefCell<HashMap<String, String>>,
    next_trade_id: Cell<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_trade_id: Cell::new(1),
            ..Self::default()
        }
    }

    pub fn set_referrer(&self, account: impl Into<String>, referrer: impl Into<String>) {
        self.referrers
            .borrow_mut()
            .insert(account.into(), referrer.into());
    }

    pub fn trade_count(&self) -> usize {
        self.trades.borrow().len()
    }
}

impl StateStore for MemoryStore {
    fn next_trade_id(&self) -> TradeId {
        let id = self.next_trade_id.get();
        self.next_trade_id.set(id + 1);
        TradeId(id)
    }

    fn save_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        let mut trades = self.trades.borrow_mut();
        match trades.iter_mut().find(|t| t.id == trade.id) {
            Some(existing) => *existing = trade.clone(),
            None => trades.push(trade.clone()),
        }
        Ok(())
    }

    fn update_trade<F>(&self, id: TradeId, f: F) -> Result<Trade, StoreError>
    where
        F: FnOnce(&mut Trade),
    {
        let mut trades = self.trades.borrow_mut();
        let trade = trades
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::TradeNotFound(id))?;
        f(trade);
        Ok(trade.clone())
    }

    fn open_trades(&self, as_of: Timestamp) -> Result<Vec<Trade>, StoreError> {
        Ok(self
            .trades
            .borrow()
            .iter()
            .filter_map(|t| as_of_view(t, as_of))
            .filter(|t| t.status == TradeStatus::Open)
            .collect())
    }

    fn active_trade(&self, symbol: &Symbol, as_of: Timestamp) -> Result<Option<Trade>, StoreError> {
        Ok(self
            .trades
            .borrow()
            .iter()
            .filter(|t| &t.symbol == symbol)
            .filter_map(|t| as_of_view(t, as_of))
            .filter(|t| t.status == TradeStatus::Open)
            .last())
    }

    fn trades(
        &self,
        symbol: Option<&Symbol>,
        limit: usize,
        offset: usize,
        as_of: Timestamp,
    ) -> Result<Vec<Trade>, StoreError> {
        Ok(self
            .trades
            .borrow()
            .iter()
            .filter(|t| symbol.map_or(true, |s| &t.symbol == s))
            .filter_map(|t| as_of_view(t, as_of))
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), StoreError> {
        self.snapshots.borrow_mut().push(snapshot.clone());
        Ok(())
    }

    fn latest_snapshot(&self, as_of: Timestamp) -> Result<Option<PortfolioSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .borrow()
            .iter()
            .filter(|s| s.timestamp <= as_of)
            .last()
            .cloned())
    }

    fn append_vault_tx(&self, tx: &VaultTransaction) -> Result<(), StoreError> {
        self.vault_txs.borrow_mut().push(tx.clone());
        Ok(())
    }

    fn append_vault_txs(&self, txs: &[VaultTransaction]) -> Result<(), StoreError> {
        self.vault_txs.borrow_mut().extend_from_slice(txs);
        Ok(())
    }

    fn vault_txs(&self, as_of: Timestamp) -> Result<Vec<VaultTransaction>, StoreError> {
        Ok(self
            .vault_txs
            .borrow()
            .iter()
            .filter(|tx| tx.timestamp <= as_of)
            .cloned()
            .collect())
    }

    fn save_vault_state(&self, state: &VaultState) -> Result<(), StoreError> {
        *self.vault_state.borrow_mut() = Some(state.clone());
        Ok(())
    }

    fn vault_state(&self) -> Result<Option<VaultState>, StoreError> {
        Ok(self.vault_state.borrow().clone())
    }

    fn save_risk_state(&self, state: &RiskState) -> Result<(), StoreError> {
        *self.risk_state.borrow_mut() = Some(state.clone());
        Ok(())
    }

    fn risk_state(&self) -> Result<Option<RiskState>, StoreError> {
        Ok(self.risk_state.borrow().clone())
    }

    fn referrer_of(&self, account: &str) -> Result<Option<String>, StoreError> {
        Ok(self.referrers.borrow().get(account).cloned())
    }
}
