// 15.4: the tick state machine. Idle -> Recovering -> Evaluating ->
// (Exiting | Signaling) -> Settling -> Idle, one pass per candle boundary.
// Recovering always re-derives open trades from the store, so a long-running
// loop and a cold-started single invocation produce identical outcomes from
// identical persisted state and market data.

use crate::engine::core::Engine;
use crate::engine::results::{EngineError, EnginePhase, TickReport};
use crate::clock::Clock;
use crate::events::{EventPayload, EventSink};
use crate::exits::{apply_breakeven, apply_trailing, check_static_exits};
use crate::market_data::MarketData;
use crate::signal::Action;
use crate::store::StateStore;
use crate::trade::{ExitReason, Trade};
use crate::types::Side;

impl<M, S, C, E> Engine<M, S, C, E>
where
    M: MarketData,
    S: StateStore,
    C: Clock + Clone,
    E: EventSink,
{
    pub fn tick(&mut self) -> Result<TickReport, EngineError> {
        let now = self.clock.now();
        let mut report = TickReport::new(now);

        // Recovering: nothing in memory is trusted; the store is the truth
        log::debug!("{} {}", self.settings.symbol, EnginePhase::Recovering);
        let open: Vec<Trade> = self
            .store
            .open_trades(now)?
            .into_iter()
            .filter(|t| t.symbol == self.settings.symbol)
            .collect();
        report.recovered = open.len();

        let candle = self
            .market_data
            .candles(&self.settings.symbol, &self.settings.interval, 1, Some(now))?
            .pop()
            .ok_or_else(|| EngineError::NoCandle(self.settings.symbol.clone()))?;
        let last = self.market_data.ticker(&self.settings.symbol)?.price;

        // Evaluating: strategy-requested close outranks everything; then the
        // static/wick checks; then stop maintenance, breakeven before trailing
        log::debug!("{} {}", self.settings.symbol, EnginePhase::Evaluating);
        let mut exits: Vec<(Trade, ExitReason)> = Vec::new();
        let mut survivors: Vec<Trade> = Vec::new();
        for mut trade in open {
            if self.strategy.has_exit_hook() && self.strategy.check_exit(&trade, &candle) {
                exits.push((trade, ExitReason::StrategyExit));
                continue;
            }

            if let Some(reason) = check_static_exits(&trade, last, Some(&candle)) {
                exits.push((trade, reason));
                continue;
            }

            let mut moved = false;
            if let Some(trigger) = self.settings.breakeven_trigger_pct {
                moved |= apply_breakeven(&mut trade, last, trigger);
            }
            moved |= apply_trailing(&mut trade, last);

            if moved {
                report.stop_adjustments += 1;
                let stop_loss = trade.stop_loss;
                let breakeven = trade.breakeven_activated;
                let trailing = trade.trailing.clone();
                self.store.update_trade(trade.id, |t| {
                    t.stop_loss = stop_loss;
                    t.breakeven_activated = breakeven;
                    t.trailing = trailing;
                })?;
                if let Some(stop) = trade.stop_loss {
                    self.events.emit(
                        now,
                        EventPayload::StopMoved {
                            trade_id: trade.id,
                            new_stop: stop,
                        },
                    );
                }
                // the wick predates the freshly moved stop, so only the last
                // price decides here
                if let Some(reason) = check_static_exits(&trade, last, None) {
                    exits.push((trade, reason));
                    continue;
                }
            }
            survivors.push(trade);
        }

        // Exiting
        if !exits.is_empty() {
            log::debug!("{} {}", self.settings.symbol, EnginePhase::Exiting);
        }
        for (trade, reason) in exits {
            let closed = self.close_trade(&trade, reason)?;
            report.exits.push((closed.id, reason));
        }

        // Signaling: skipped when an exit fired this tick, unless multiple
        // positions are allowed
        let mut open_now = survivors;
        if report.exits.is_empty() || self.settings.allow_multiple_positions {
            log::debug!("{} {}", self.settings.symbol, EnginePhase::Signaling);
            if let Some(signal) = self.strategy.update(&candle) {
                report.signal = Some(signal.action);
                let side = match signal.action {
                    Action::Buy => Some(Side::Buy),
                    Action::Sell => Some(Side::Sell),
                    Action::Hold => None,
                };
                if let Some(side) = side {
                    let conflicting: Vec<Trade> = open_now
                        .iter()
                        .filter(|t| t.side != side)
                        .cloned()
                        .collect();
                    if !conflicting.is_empty()
                        && (signal.force_close || self.settings.close_on_opposite_signal)
                    {
                        let reason = if signal.force_close {
                            ExitReason::ManualClose
                        } else {
                            ExitReason::StrategyExit
                        };
                        for trade in &conflicting {
                            let closed = self.close_trade(trade, reason)?;
                            report.exits.push((closed.id, reason));
                        }
                        open_now.retain(|t| t.side == side);
                    }

                    let at_capacity = (!self.settings.allow_multiple_positions
                        && !open_now.is_empty())
                        || open_now.len() >= self.settings.max_open_trades;

                    if !at_capacity {
                        let balance = self.exchange.balance();
                        if self.risk.validate_order(side, balance)? {
                            match self.open_trade(&signal, side)? {
                                Ok(id) => report.opened = Some(id),
                                Err(err) => report.order_rejected = Some(err.to_string()),
                            }
                        } else {
                            report.drawdown_halted = true;
                            self.events.emit(
                                now,
                                EventPayload::DrawdownHalted {
                                    symbol: self.settings.symbol.clone(),
                                    balance,
                                },
                            );
                        }
                    }
                }
            }
        }

        // Settling: persist the snapshot so downstream consumers (vault
        // fallback included) see this tick's state
        log::debug!("{} {}", self.settings.symbol, EnginePhase::Settling);
        let snapshot = self
            .reconciler
            .save_snapshot(Some(self.exchange.balance()))?;
        self.events.emit(
            now,
            EventPayload::SnapshotSaved {
                equity: snapshot.current_equity,
            },
        );

        Ok(report)
    }

    // tick-boundary error handling: log and drop. nothing in memory was
    // mutated ahead of persistence, so the next tick re-derives and self-heals.
    pub fn safe_tick(&mut self) -> Option<TickReport> {
        match self.tick() {
            Ok(report) => Some(report),
            Err(err) => {
                log::warn!(
                    "tick for {} aborted: {err}",
                    self.settings.symbol
                );
                None
            }
        }
    }
}
