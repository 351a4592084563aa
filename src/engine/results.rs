// 15.3: tick outcomes and the engine error taxonomy.

use crate::config::ConfigError;
use crate::exchange::ExchangeError;
use crate::market_data::MarketDataError;
use crate::portfolio::PortfolioError;
use crate::signal::Action;
use crate::store::StoreError;
use crate::trade::ExitReason;
use crate::types::{Symbol, Timestamp, TradeId};
use crate::vault::VaultError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("no candle available for {0}")]
    NoCandle(Symbol),

    #[error("sizing produced a non-positive quantity for {0}")]
    UnsizableOrder(Symbol),
}

// the state-machine phases, in tick order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Recovering,
    Evaluating,
    Exiting,
    Signaling,
    Settling,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EnginePhase::Idle => "idle",
            EnginePhase::Recovering => "recovering",
            EnginePhase::Evaluating => "evaluating",
            EnginePhase::Exiting => "exiting",
            EnginePhase::Signaling => "signaling",
            EnginePhase::Settling => "settling",
        };
        write!(f, "{name}")
    }
}

// what one tick did; the engine's public account of itself
#[derive(Debug, Clone)]
pub struct TickReport {
    pub timestamp: Timestamp,
    pub recovered: usize,
    pub stop_adjustments: usize,
    pub exits: Vec<(TradeId, ExitReason)>,
    pub signal: Option<Action>,
    pub opened: Option<TradeId>,
    pub drawdown_halted: bool,
    pub order_rejected: Option<String>,
}

impl TickReport {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            recovered: 0,
            stop_adjustments: 0,
            exits: Vec::new(),
            signal: None,
            opened: None,
            drawdown_halted: false,
            order_rejected: None,
        }
    }
}
