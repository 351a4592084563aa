// 10.0: protective exit evaluation. pure functions over an open trade, the
// last price and the latest candle. stop checks consult the candle high/low
// as well as the last price, so an intrabar wick through the stop still
// triggers even when the close recovered.
//
// ordering per tick: breakeven promotion runs before trailing, and a promoted
// breakeven stop is a floor the trailing logic may tighten but never loosen.

use crate::market_data::Candle;
use crate::trade::{ExitReason, Trade};
use crate::types::{Pct, Price, Side};
use rust_decimal::Decimal;

// profit as a fraction of entry, sign-aware. 0.02 = 2% in the money.
fn profit_fraction(trade: &Trade, last: Price) -> Decimal {
    trade.side.sign() * (last.value() - trade.entry_price.value()) / trade.entry_price.value()
}

// true when the stop level was traded through, by the last price or a wick.
// a level outside the candle's range on the adverse side is caught by the
// last-price check, so the wick test reduces to range membership.
fn stop_hit(trade: &Trade, stop: Price, last: Price, candle: Option<&Candle>) -> bool {
    let wick = candle.map_or(false, |c| c.touched(stop));
    let tick = match trade.side {
        Side::Buy => last <= stop,
        Side::Sell => last >= stop,
    };
    tick || wick
}

fn target_hit(trade: &Trade, target: Price, last: Price, candle: Option<&Candle>) -> bool {
    let wick = candle.map_or(false, |c| c.touched(target));
    let tick = match trade.side {
        Side::Buy => last >= target,
        Side::Sell => last <= target,
    };
    tick || wick
}

// 10.1: static stop-loss / take-profit check. when the stop that fired was a
// trailing stop (trailing activated), the reason says so.
pub fn check_static_exits(trade: &Trade, last: Price, candle: Option<&Candle>) -> Option<ExitReason> {
    if let Some(stop) = trade.stop_loss {
        if stop_hit(trade, stop, last, candle) {
            return Some(if trade.trailing.activated {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            });
        }
    }
    if let Some(target) = trade.take_profit {
        if target_hit(trade, target, last, candle) {
            return Some(ExitReason::TakeProfit);
        }
    }
    None
}

// 10.2: breakeven promotion. once profit reaches the trigger, the stop moves
// to entry and stays there; the flag is what stops trailing from loosening it.
pub fn apply_breakeven(trade: &mut Trade, last: Price, trigger_pct: Pct) -> bool {
    if trade.breakeven_activated {
        return false;
    }
    if profit_fraction(trade, last) >= trigger_pct.as_fraction() {
        trade.stop_loss = Some(trade.entry_price);
        trade.breakeven_activated = true;
        return true;
    }
    false
}

// 10.3: trailing-stop watermark tracking. after the activation threshold the
// watermark ratchets toward the favorable extreme, and the stop follows at
// trail% behind it. the stop only ever tightens, and never crosses the
// breakeven floor once that is set.
pub fn apply_trailing(trade: &mut Trade, last: Price) -> bool {
    if !trade.trailing.enabled {
        return false;
    }

    if !trade.trailing.activated {
        if profit_fraction(trade, last) < trade.trailing.activation_pct.as_fraction() {
            return false;
        }
        trade.trailing.activated = true;
        trade.trailing.watermark = Some(last);
    }

    // ratchet: high-water for longs, low-water for shorts
    let watermark = match (trade.trailing.watermark, trade.side) {
        (Some(w), Side::Buy) => Price::new_unchecked(w.value().max(last.value())),
        (Some(w), Side::Sell) => Price::new_unchecked(w.value().min(last.value())),
        (None, _) => last,
    };
    trade.trailing.watermark = Some(watermark);

    let trail = trade.trailing.trail_pct.as_fraction();
    let candidate = match trade.side {
        Side::Buy => watermark.value() * (Decimal::ONE - trail),
        Side::Sell => watermark.value() * (Decimal::ONE + trail),
    };

    let floored = if trade.breakeven_activated {
        match trade.side {
            Side::Buy => candidate.max(trade.entry_price.value()),
            Side::Sell => candidate.min(trade.entry_price.value()),
        }
    } else {
        candidate
    };

    let tightens = match (trade.stop_loss, trade.side) {
        (Some(current), Side::Buy) => floored > current.value(),
        (Some(current), Side::Sell) => floored < current.value(),
        (None, _) => true,
    };
    if tightens {
        trade.stop_loss = Some(Price::new_unchecked(floored));
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::{TradeStatus, TrailingState};
    use crate::types::{Leverage, Qty, Quote, Symbol, Timestamp, TradeId};
    use rust_decimal_macros::dec;

    fn open_long(sl: Decimal, tp: Decimal) -> Trade {
        Trade {
            id: TradeId(1),
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            quantity: Qty::new_unchecked(dec!(0.1)),
            entry_price: Price::new_unchecked(dec!(50000)),
            entry_time: Timestamp::from_millis(0),
            status: TradeStatus::Open,
            stop_loss: Some(Price::new_unchecked(sl)),
            take_profit: Some(Price::new_unchecked(tp)),
            leverage: Leverage::new(dec!(5)).unwrap(),
            margin: Some(Quote::new(dec!(1000))),
            strategy: None,
            trailing: TrailingState::disabled(),
            breakeven_activated: false,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
        }
    }

    fn candle(low: Decimal, high: Decimal, close: Decimal) -> Candle {
        Candle {
            symbol: Symbol::new("BTCUSDT"),
            interval: "1m".to_string(),
            open: Price::new_unchecked(close),
            high: Price::new_unchecked(high),
            low: Price::new_unchecked(low),
            close: Price::new_unchecked(close),
            volume: dec!(1),
            start_time: Timestamp::from_millis(0),
            close_time: None,
        }
    }

    #[test]
    fn stop_loss_on_last_price() {
        let trade = open_long(dec!(49000), dec!(52000));
        let reason = check_static_exits(&trade, Price::new_unchecked(dec!(48900)), None);
        assert_eq!(reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn wick_through_stop_triggers_even_when_close_recovers() {
        let trade = open_long(dec!(49000), dec!(52000));
        // close at 50500, but the low wicked to 48800
        let c = candle(dec!(48800), dec!(50600), dec!(50500));
        let reason = check_static_exits(&trade, Price::new_unchecked(dec!(50500)), Some(&c));
        assert_eq!(reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn take_profit_on_wick_high() {
        let trade = open_long(dec!(49000), dec!(52000));
        let c = candle(dec!(50000), dec!(52100), dec!(51500));
        let reason = check_static_exits(&trade, Price::new_unchecked(dec!(51500)), Some(&c));
        assert_eq!(reason, Some(ExitReason::TakeProfit));
    }

    #[test]
    fn no_exit_inside_the_band() {
        let trade = open_long(dec!(49000), dec!(52000));
        let c = candle(dec!(49500), dec!(51000), dec!(50500));
        assert!(check_static_exits(&trade, Price::new_unchecked(dec!(50500)), Some(&c)).is_none());
    }

    #[test]
    fn short_stop_is_above_entry() {
        let mut trade = open_long(dec!(51000), dec!(48000));
        trade.side = Side::Sell;
        let reason = check_static_exits(&trade, Price::new_unchecked(dec!(51100)), None);
        assert_eq!(reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn breakeven_promotes_at_trigger() {
        let mut trade = open_long(dec!(49000), dec!(55000));

        // 1% profit against a 2% trigger: nothing moves
        assert!(!apply_breakeven(
            &mut trade,
            Price::new_unchecked(dec!(50500)),
            Pct::new(dec!(2))
        ));
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(49000));

        // 2% profit: stop moves to entry exactly once
        assert!(apply_breakeven(
            &mut trade,
            Price::new_unchecked(dec!(51000)),
            Pct::new(dec!(2))
        ));
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(50000));
        assert!(trade.breakeven_activated);

        assert!(!apply_breakeven(
            &mut trade,
            Price::new_unchecked(dec!(52000)),
            Pct::new(dec!(2))
        ));
    }

    #[test]
    fn trailing_activates_and_ratchets() {
        let mut trade = open_long(dec!(49000), dec!(60000));
        trade.trailing = TrailingState::new(Pct::new(dec!(1)), Pct::new(dec!(0.5)));

        // below activation: untouched
        assert!(!apply_trailing(&mut trade, Price::new_unchecked(dec!(50200))));
        assert!(!trade.trailing.activated);

        // 1% up: activates, stop = 50500 * 0.995 = 50247.5
        assert!(apply_trailing(&mut trade, Price::new_unchecked(dec!(50500))));
        assert!(trade.trailing.activated);
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(50247.500));

        // higher watermark tightens the stop
        assert!(apply_trailing(&mut trade, Price::new_unchecked(dec!(51000))));
        assert_eq!(trade.trailing.watermark.unwrap().value(), dec!(51000));
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(50745.000));

        // pullback must not loosen it
        assert!(!apply_trailing(&mut trade, Price::new_unchecked(dec!(50600))));
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(50745.000));
        assert_eq!(trade.trailing.watermark.unwrap().value(), dec!(51000));
    }

    #[test]
    fn trailing_never_crosses_breakeven_floor() {
        let mut trade = open_long(dec!(49000), dec!(60000));
        // wide trail so the raw candidate lands below entry
        trade.trailing = TrailingState::new(Pct::new(dec!(1)), Pct::new(dec!(3)));

        apply_breakeven(&mut trade, Price::new_unchecked(dec!(51000)), Pct::new(dec!(2)));
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(50000));

        // trailing candidate 51000 * 0.97 = 49470, below the breakeven floor;
        // the stop must hold at entry
        apply_trailing(&mut trade, Price::new_unchecked(dec!(51000)));
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(50000));

        // a watermark high enough to clear entry tightens normally:
        // 52000 * 0.97 = 50440
        assert!(apply_trailing(&mut trade, Price::new_unchecked(dec!(52000))));
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(50440.00));
    }

    #[test]
    fn activated_trailing_stop_reports_trailing_reason() {
        let mut trade = open_long(dec!(49000), dec!(60000));
        trade.trailing = TrailingState::new(Pct::new(dec!(1)), Pct::new(dec!(0.5)));

        apply_trailing(&mut trade, Price::new_unchecked(dec!(51000)));
        let stop = trade.stop_loss.unwrap();

        let reason = check_static_exits(
            &trade,
            Price::new_unchecked(stop.value() - dec!(1)),
            None,
        );
        assert_eq!(reason, Some(ExitReason::TrailingStop));
    }

    #[test]
    fn short_trailing_tracks_low_water() {
        let mut trade = open_long(dec!(51000), dec!(45000));
        trade.side = Side::Sell;
        trade.trailing = TrailingState::new(Pct::new(dec!(1)), Pct::new(dec!(0.5)));

        // 1% down from 50000: activates, stop = 49500 * 1.005 = 49747.5
        assert!(apply_trailing(&mut trade, Price::new_unchecked(dec!(49500))));
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(49747.500));

        // lower low tightens downward
        assert!(apply_trailing(&mut trade, Price::new_unchecked(dec!(49000))));
        assert_eq!(trade.stop_loss.unwrap().value(), dec!(49245.000));
    }
}
