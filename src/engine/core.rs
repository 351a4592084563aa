// 15.0: engine assembly. wires the exchange, risk manager, reconciler,
// commission distributor and strategy around one shared store, clock and
// market-data feed. the tick state machine itself lives in tick.rs.

use crate::clock::Clock;
use crate::commission::CommissionDistributor;
use crate::config::Settings;
use crate::engine::results::EngineError;
use crate::events::{EventPayload, EventSink};
use crate::exchange::{ExchangeError, FillEffect, PaperExchange};
use crate::market_data::MarketData;
use crate::order::OrderRequest;
use crate::portfolio::Reconciler;
use crate::position::required_margin;
use crate::risk::RiskManager;
use crate::signal::{Signal, Strategy};
use crate::store::StateStore;
use crate::trade::{ExitReason, Trade, TradeStatus, TrailingState};
use crate::types::{Pct, Side, TradeId};
use crate::vault::Vault;
use std::rc::Rc;

pub struct Engine<M, S, C, E>
where
    M: MarketData,
    S: StateStore,
    C: Clock + Clone,
    E: EventSink,
{
    pub(crate) settings: Settings,
    pub(crate) clock: C,
    pub(crate) store: Rc<S>,
    pub(crate) market_data: Rc<M>,
    pub(crate) exchange: PaperExchange<Rc<M>, C>,
    pub(crate) risk: RiskManager<S, C>,
    pub(crate) reconciler: Reconciler<S, M, C>,
    pub(crate) commission: CommissionDistributor<S, C>,
    pub(crate) strategy: Box<dyn Strategy>,
    pub(crate) events: Rc<E>,
}

impl<M, S, C, E> Engine<M, S, C, E>
where
    M: MarketData,
    S: StateStore,
    C: Clock + Clone,
    E: EventSink,
{
    pub fn new(
        settings: Settings,
        store: Rc<S>,
        market_data: Rc<M>,
        clock: C,
        strategy: Box<dyn Strategy>,
        events: Rc<E>,
    ) -> Result<Self, EngineError> {
        settings.validate()?;

        // with the vault on, the working capital is the share ledger's net
        // deposits; the configured balance only seeds a standalone account
        let base_capital = if settings.vault_enabled {
            Vault::new(store.clone(), clock.clone())?.total_deposited_balance()?
        } else {
            settings.initial_balance
        };

        let mut exchange = PaperExchange::new(
            market_data.clone(),
            clock.clone(),
            base_capital,
            settings.balance_asset.clone(),
            settings.effective_leverage(),
        );

        // cold start: the simulator's cash and positions are rebuilt from the
        // trade ledger, the same derivation the reconciler uses
        let now = clock.now();
        let history = store.trades(None, usize::MAX, 0, now)?;
        let realized: crate::types::Quote = history
            .iter()
            .filter(|t| t.status == TradeStatus::Closed)
            .map(|t| t.realized_pnl())
            .sum();
        let mut wallet = base_capital.add(realized);
        for trade in history.iter().filter(|t| t.status == TradeStatus::Open) {
            wallet = wallet.sub(trade.margin_or_derived());
            exchange.restore_position(crate::position::Position {
                symbol: trade.symbol.clone(),
                side: trade.side,
                quantity: trade.quantity,
                entry_price: trade.entry_price,
                margin: trade.margin_or_derived(),
                leverage: trade.leverage,
                opened_at: trade.entry_time,
                updated_at: trade.entry_time,
            });
        }
        exchange.restore_balance(wallet.max(crate::types::Quote::zero()));

        let risk = RiskManager::new(store.clone(), clock.clone(), settings.risk.clone());
        risk.init(exchange.balance())?;

        let reconciler = Reconciler::new(
            store.clone(),
            market_data.clone(),
            clock.clone(),
            base_capital,
        );
        let commission = CommissionDistributor::new(
            store.clone(),
            clock.clone(),
            settings.commission_rate,
            settings.account.clone(),
        );

        Ok(Self {
            settings,
            clock,
            store,
            market_data,
            exchange,
            risk,
            reconciler,
            commission,
            strategy,
            events,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn exchange(&self) -> &PaperExchange<Rc<M>, C> {
        &self.exchange
    }

    pub fn risk(&self) -> &RiskManager<S, C> {
        &self.risk
    }

    pub fn reconciler(&self) -> &Reconciler<S, M, C> {
        &self.reconciler
    }

    // 15.1: submit the opposite-side order, mark the trade closed at the fill
    // price, settle commission, notify the strategy.
    pub(crate) fn close_trade(
        &mut self,
        trade: &Trade,
        reason: ExitReason,
    ) -> Result<Trade, EngineError> {
        let req = OrderRequest::market(trade.symbol.clone(), trade.side.opposite(), trade.quantity);
        let fill = self.exchange.place_order(&req)?;

        // a close whose raw loss exceeded posted margin was a forced
        // liquidation, whatever condition triggered it
        let reason = match &fill.effect {
            FillEffect::Closed(outcome) | FillEffect::Reduced(outcome)
                if outcome.raw_pnl < outcome.realized_pnl =>
            {
                ExitReason::Liquidation
            }
            _ => reason,
        };

        let exit_price = fill.order.price;
        let exit_time = fill.order.timestamp;
        let closed = self.store.update_trade(trade.id, |t| {
            t.close(exit_price, exit_time, reason);
        })?;

        self.events.emit(
            exit_time,
            EventPayload::TradeClosed {
                trade_id: closed.id,
                symbol: closed.symbol.clone(),
                exit_price,
                realized_pnl: closed.realized_pnl(),
                reason,
            },
        );

        if let Some(split) = self.commission.process_trade_close(&closed)? {
            self.events.emit(
                exit_time,
                EventPayload::CommissionSettled {
                    trade_id: closed.id,
                    amount: split.earned.amount,
                },
            );
        }

        self.strategy.on_position_closed(&closed);
        Ok(closed)
    }

    // 15.2: size, fill and persist a new trade from a signal. a margin or
    // marketability rejection is reported, not escalated; the tick goes on.
    pub(crate) fn open_trade(
        &mut self,
        signal: &Signal,
        side: Side,
    ) -> Result<Result<TradeId, ExchangeError>, EngineError> {
        let sl_pct: Option<Pct> = signal.stop_loss_pct.or(self.settings.position_sl_pct);
        let tp_pct: Option<Pct> = signal.take_profit_pct.or(self.settings.position_tp_pct);

        let last = self
            .market_data
            .ticker(&self.settings.symbol)?
            .price;
        let balance = self.exchange.balance();
        let quantity = self
            .risk
            .calculate_quantity(last, balance, sl_pct)
            .ok_or_else(|| EngineError::UnsizableOrder(self.settings.symbol.clone()))?;

        let req = OrderRequest::market(self.settings.symbol.clone(), side, quantity);
        let fill = match self.exchange.place_order(&req) {
            Ok(fill) => fill,
            Err(
                err @ (ExchangeError::InsufficientFunds { .. }
                | ExchangeError::MarginTooHigh { .. }
                | ExchangeError::NotMarketable { .. }),
            ) => {
                self.events.emit(
                    self.clock.now(),
                    EventPayload::OrderRejected {
                        symbol: self.settings.symbol.clone(),
                        detail: err.to_string(),
                    },
                );
                return Ok(Err(err));
            }
            Err(err) => return Err(err.into()),
        };

        let entry = fill.order.price;
        let exits = self.risk.calculate_exit_prices(entry, side, sl_pct, tp_pct);
        let margin = required_margin(quantity, entry, self.settings.effective_leverage());

        let trailing = if self.settings.trailing.enabled {
            TrailingState::new(
                self.settings.trailing.activation_pct,
                self.settings.trailing.trail_pct,
            )
        } else {
            TrailingState::disabled()
        };

        let trade = Trade {
            id: self.store.next_trade_id(),
            symbol: self.settings.symbol.clone(),
            side,
            quantity,
            entry_price: entry,
            entry_time: fill.order.timestamp,
            status: TradeStatus::Open,
            stop_loss: Some(exits.stop_loss),
            take_profit: Some(exits.take_profit),
            leverage: self.settings.effective_leverage(),
            margin: Some(margin),
            strategy: Some(self.strategy.name().to_string()),
            trailing,
            breakeven_activated: false,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
        };

        // the order has already filled; a persistence failure here is the
        // acknowledged fill-vs-persist gap and must reach the operator
        if let Err(err) = self.store.save_trade(&trade) {
            log::warn!(
                "order {:?} filled but trade row not persisted: {err}",
                fill.order.id
            );
            return Err(err.into());
        }

        self.events.emit(
            fill.order.timestamp,
            EventPayload::TradeOpened {
                trade_id: trade.id,
                symbol: trade.symbol.clone(),
                entry_price: entry,
                margin,
            },
        );
        self.strategy.on_position_opened(&trade);
        Ok(Ok(trade.id))
    }
}
