// 17.0: settings. one explicit struct handed to each component's constructor.
// nothing reads ambient global config inside business logic, and tests build
// their own instance per case.

use crate::risk::RiskConfig;
use crate::types::{Leverage, Pct, Quote, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingConfig {
    pub enabled: bool,
    pub activation_pct: Pct,
    pub trail_pct: Pct,
}

impl TrailingConfig {
    pub fn off() -> Self {
        Self {
            enabled: false,
            activation_pct: Pct::new(Decimal::ZERO),
            trail_pct: Pct::new(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("initial balance must be positive, got {0}")]
    NonPositiveBalance(Quote),

    #[error("max open trades must be at least 1")]
    ZeroMaxOpenTrades,

    #[error("{name} must be within (0, 100], got {value}")]
    PercentOutOfRange { name: &'static str, value: Decimal },

    #[error("trailing trail% must be positive when trailing is enabled")]
    EmptyTrail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub symbol: Symbol,
    pub interval: String,
    pub account: String,
    pub initial_balance: Quote,
    pub balance_asset: String,
    pub leverage_enabled: bool,
    pub leverage: Leverage,
    pub risk: RiskConfig,
    // per-position overrides; None falls through to the risk defaults
    pub position_sl_pct: Option<Pct>,
    pub position_tp_pct: Option<Pct>,
    pub trailing: TrailingConfig,
    pub breakeven_trigger_pct: Option<Pct>,
    pub allow_multiple_positions: bool,
    pub max_open_trades: usize,
    pub close_on_opposite_signal: bool,
    pub commission_rate: Pct,
    // pooled capital: when on, the engine trades the vault ledger's net
    // deposits instead of initial_balance
    pub vault_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbol: Symbol::new("BTCUSDT"),
            interval: "1h".to_string(),
            account: "default".to_string(),
            initial_balance: Quote::new(dec!(10000)),
            balance_asset: "USDT".to_string(),
            leverage_enabled: true,
            leverage: Leverage::new(dec!(5)).unwrap_or_else(Leverage::one),
            risk: RiskConfig::default(),
            position_sl_pct: None,
            position_tp_pct: None,
            trailing: TrailingConfig::off(),
            breakeven_trigger_pct: None,
            allow_multiple_positions: false,
            max_open_trades: 1,
            close_on_opposite_signal: true,
            commission_rate: Pct::new(dec!(10)),
            vault_enabled: false,
        }
    }
}

impl Settings {
    // tight stops, no leverage, small risk slice
    pub fn conservative() -> Self {
        Self {
            leverage_enabled: false,
            leverage: Leverage::one(),
            risk: RiskConfig {
                risk_per_trade_pct: Pct::new(dec!(0.5)),
                default_stop_loss_pct: Pct::new(dec!(1)),
                default_take_profit_pct: Pct::new(dec!(2)),
                max_daily_drawdown_pct: Pct::new(dec!(2)),
            },
            ..Self::default()
        }
    }

    // protective automation on: trailing plus breakeven promotion
    pub fn backtest() -> Self {
        Self {
            trailing: TrailingConfig {
                enabled: true,
                activation_pct: Pct::new(dec!(1)),
                trail_pct: Pct::new(dec!(0.5)),
            },
            breakeven_trigger_pct: Some(Pct::new(dec!(1))),
            ..Self::default()
        }
    }

    pub fn effective_leverage(&self) -> Leverage {
        if self.leverage_enabled {
            self.leverage
        } else {
            Leverage::one()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_balance.value() <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveBalance(self.initial_balance));
        }
        if self.max_open_trades == 0 {
            return Err(ConfigError::ZeroMaxOpenTrades);
        }

        let percents: [(&'static str, Decimal); 3] = [
            ("risk_per_trade_pct", self.risk.risk_per_trade_pct.value()),
            ("default_stop_loss_pct", self.risk.default_stop_loss_pct.value()),
            (
                "max_daily_drawdown_pct",
                self.risk.max_daily_drawdown_pct.value(),
            ),
        ];
        for (name, value) in percents {
            if value <= Decimal::ZERO || value > dec!(100) {
                return Err(ConfigError::PercentOutOfRange { name, value });
            }
        }

        if self.trailing.enabled && self.trailing.trail_pct.value() <= Decimal::ZERO {
            return Err(ConfigError::EmptyTrail);
        }
        Ok(())
    }
}
