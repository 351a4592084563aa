//! Trading-State Engine Simulation.
//!
//! Drives the full tick lifecycle against the scripted feed: entries, stop
//! and trailing exits, liquidation-capped losses, the drawdown halt, vault
//! share accounting and a cold-start recovery.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::rc::Rc;
use tradeloop_core::*;

fn main() {
    env_logger::init();

    println!("Trading-State Engine Simulation");
    println!("Single Symbol, Margin Account, Candle-Close Ticks\n");

    scenario_1_entry_and_take_profit();
    scenario_2_stop_loss_wick();
    scenario_3_trailing_ratchet();
    scenario_4_liquidation_cap();
    scenario_5_drawdown_halt();
    scenario_6_vault_and_commission();
    scenario_7_cold_start_recovery();

    println!("\nAll simulations completed successfully.");
}

fn candle(low: Decimal, high: Decimal, close: Decimal, start_ms: i64) -> Candle {
    Candle {
        symbol: Symbol::new("BTCUSDT"),
        interval: "1h".to_string(),
        open: Price::new_unchecked(close),
        high: Price::new_unchecked(high),
        low: Price::new_unchecked(low),
        close: Price::new_unchecked(close),
        volume: dec!(100),
        start_time: Timestamp::from_millis(start_ms),
        close_time: Some(Timestamp::from_millis(start_ms + 3_599_999)),
    }
}

struct Sim {
    feed: Rc<ScriptedFeed>,
    clock: SimClock,
    store: Rc<MemoryStore>,
    events: Rc<EventLog>,
    engine: Engine<ScriptedFeed, MemoryStore, SimClock, EventLog>,
}

fn sim(settings: Settings, strategy: ScriptedStrategy) -> Sim {
    let feed = Rc::new(ScriptedFeed::new());
    let clock = SimClock::new(Timestamp::from_millis(0));
    let store = Rc::new(MemoryStore::new());
    let events = Rc::new(EventLog::new());
    let engine = Engine::new(
        settings,
        store.clone(),
        feed.clone(),
        clock.clone(),
        Box::new(strategy),
        events.clone(),
    )
    .expect("settings validate");
    Sim {
        feed,
        clock,
        store,
        events,
        engine,
    }
}

/// Buy signal fills, price runs to the target, the trade closes at +4%.
fn scenario_1_entry_and_take_profit() {
    println!("Scenario 1: Entry and Take Profit\n");

    let mut strategy = ScriptedStrategy::new();
    strategy.push_signal(Signal::entry(Action::Buy, Symbol::new("BTCUSDT")));

    let mut s = sim(Settings::default(), strategy);
    s.feed.push_candle(candle(dec!(49800), dec!(50100), dec!(50000), 0));
    let report = s.engine.tick().expect("tick");
    println!("  tick 1: opened trade {:?}", report.opened);
    println!("  balance after margin: {}", s.engine.exchange().balance());

    s.clock.advance(3_600_000);
    s.feed.push_candle(candle(dec!(50000), dec!(52100), dec!(52000), 3_600_000));
    let report = s.engine.tick().expect("tick");
    println!("  tick 2: exits {:?}", report.exits);

    let snap = s.engine.reconciler().snapshot(None).expect("snapshot");
    println!("  realized pnl: {}", snap.realized_pnl);
    println!("  final balance: {}\n", s.engine.exchange().balance());
}

/// An intrabar wick through the stop closes the trade even though the candle
/// recovered above it.
fn scenario_2_stop_loss_wick() {
    println!("Scenario 2: Stop-Loss on a Wick\n");

    let mut strategy = ScriptedStrategy::new();
    strategy.push_signal(Signal::entry(Action::Buy, Symbol::new("BTCUSDT")));

    let mut s = sim(Settings::default(), strategy);
    s.feed.push_candle(candle(dec!(49800), dec!(50100), dec!(50000), 0));
    s.engine.tick().expect("tick");

    // stop sits at 49000 (2% below); the wick reaches 48800, the close does not
    s.clock.advance(3_600_000);
    s.feed.push_candle(candle(dec!(48800), dec!(50200), dec!(49900), 3_600_000));
    let report = s.engine.tick().expect("tick");
    println!("  exits: {:?}", report.exits);
    println!("  balance: {}\n", s.engine.exchange().balance());
}

/// Trailing stop activates, ratchets behind the high-water mark, then fires
/// on the pullback.
fn scenario_3_trailing_ratchet() {
    println!("Scenario 3: Trailing Stop Ratchet\n");

    let mut strategy = ScriptedStrategy::new();
    strategy.push_signal(Signal::entry(Action::Buy, Symbol::new("BTCUSDT")));

    let mut s = sim(Settings::backtest(), strategy);
    s.feed.push_candle(candle(dec!(49800), dec!(50100), dec!(50000), 0));
    s.engine.tick().expect("tick");

    for (i, close) in [dec!(50600), dec!(51400), dec!(52300)].iter().enumerate() {
        let start = (i as i64 + 1) * 3_600_000;
        s.clock.advance(3_600_000);
        s.feed.push_candle(candle(*close - dec!(100), *close + dec!(100), *close, start));
        let report = s.engine.tick().expect("tick");
        println!("  close {}: stop adjustments {}", close, report.stop_adjustments);
    }

    s.clock.advance(3_600_000);
    s.feed.push_candle(candle(dec!(51500), dec!(52000), dec!(51600), 4 * 3_600_000));
    let report = s.engine.tick().expect("tick");
    println!("  pullback exits: {:?}", report.exits);

    let snap = s.engine.reconciler().snapshot(None).expect("snapshot");
    println!("  realized pnl: {}\n", snap.realized_pnl);
}

/// A crash bigger than the posted margin realizes only the margin.
fn scenario_4_liquidation_cap() {
    println!("Scenario 4: Liquidation Cap\n");

    let settings = Settings {
        leverage: Leverage::new(dec!(10)).unwrap(),
        risk: RiskConfig {
            risk_per_trade_pct: Pct::new(dec!(5)),
            default_stop_loss_pct: Pct::new(dec!(2)),
            default_take_profit_pct: Pct::new(dec!(50)),
            max_daily_drawdown_pct: Pct::new(dec!(100)),
        },
        ..Settings::default()
    };

    let mut strategy = ScriptedStrategy::new();
    strategy.push_signal(Signal::entry(Action::Buy, Symbol::new("BTCUSDT")));

    let mut s = sim(settings, strategy);
    s.feed.push_candle(candle(dec!(49800), dec!(50100), dec!(50000), 0));
    s.engine.tick().expect("tick");
    let margin_held = Quote::new(dec!(10000)).sub(s.engine.exchange().balance());
    println!("  margin posted: {margin_held}");

    // 40% crash: raw loss far beyond margin, stop fires, loss capped
    s.clock.advance(3_600_000);
    s.feed.push_candle(candle(dec!(30000), dec!(49000), dec!(30000), 3_600_000));
    s.engine.tick().expect("tick");

    let balance = s.engine.exchange().balance();
    println!("  balance after crash close: {balance}");
    println!("  loss realized: {}\n", Quote::new(dec!(10000)).sub(balance));
}

/// Daily drawdown gate blocks fresh entries until the UTC day rolls over.
fn scenario_5_drawdown_halt() {
    println!("Scenario 5: Drawdown Halt\n");

    let mut strategy = ScriptedStrategy::new();
    strategy.push_signal(Signal::entry(Action::Buy, Symbol::new("BTCUSDT")));
    strategy.push_signal(Signal::entry(Action::Buy, Symbol::new("BTCUSDT")));
    strategy.push_signal(Signal::entry(Action::Buy, Symbol::new("BTCUSDT")));

    let settings = Settings {
        risk: RiskConfig {
            risk_per_trade_pct: Pct::new(dec!(5)),
            default_stop_loss_pct: Pct::new(dec!(2)),
            default_take_profit_pct: Pct::new(dec!(50)),
            max_daily_drawdown_pct: Pct::new(dec!(5)),
        },
        ..Settings::default()
    };

    let mut s = sim(settings, strategy);
    s.feed.push_candle(candle(dec!(49800), dec!(50100), dec!(50000), 0));
    s.engine.tick().expect("tick");

    // stop out for a 2% account hit scaled by sizing: balance drops under the gate
    s.clock.advance(3_600_000);
    s.feed.push_candle(candle(dec!(48500), dec!(50100), dec!(48600), 3_600_000));
    let report = s.engine.tick().expect("tick");
    println!("  after stop-out: exits {:?}", report.exits);

    s.clock.advance(3_600_000);
    s.feed.push_candle(candle(dec!(48500), dec!(48800), dec!(48600), 2 * 3_600_000));
    let report = s.engine.tick().expect("tick");
    println!("  re-entry halted by drawdown gate: {}", report.drawdown_halted);

    // next UTC day the baseline resets and the entry goes through
    s.clock.set(Timestamp::from_millis(86_400_000 + 3_600_000));
    s.feed.push_candle(candle(dec!(48500), dec!(48800), dec!(48600), 86_400_000));
    let report = s.engine.tick().expect("tick");
    println!("  next day opened: {:?}\n", report.opened);
}

/// Vault shares, a profitable close and the referral split.
fn scenario_6_vault_and_commission() {
    println!("Scenario 6: Vault Shares and Commission Split\n");

    let mut strategy = ScriptedStrategy::new();
    strategy.push_signal(Signal::entry(Action::Buy, Symbol::new("BTCUSDT")));

    let mut s = sim(Settings::default(), strategy);
    s.store.set_referrer("default", "inviter@fund.io");

    let vault = Vault::new(s.store.clone(), s.clock.clone()).expect("vault");
    let tx = vault.deposit("alice@fund.io", Quote::new(dec!(1000))).expect("deposit");
    println!("  deposit 1000 -> {} shares at price 1.0", tx.shares);

    s.feed.push_candle(candle(dec!(49800), dec!(50100), dec!(50000), 0));
    s.engine.tick().expect("tick");

    s.clock.advance(3_600_000);
    s.feed.push_candle(candle(dec!(50000), dec!(52100), dec!(52000), 3_600_000));
    s.engine.tick().expect("tick");

    let commissions: Vec<_> = s
        .store
        .vault_txs(s.clock.now())
        .expect("ledger")
        .into_iter()
        .filter(|tx| {
            matches!(
                tx.kind,
                VaultTxKind::CommissionEarned | VaultTxKind::CommissionPaid
            )
        })
        .collect();
    for tx in &commissions {
        println!("  {} {:?} {}", tx.account, tx.kind, tx.amount);
    }
    println!("  events recorded: {}\n", s.events.len());
}

/// A fresh engine over the same store resumes the open trade and closes it
/// exactly as the original process would have.
fn scenario_7_cold_start_recovery() {
    println!("Scenario 7: Cold-Start Recovery\n");

    let mut strategy = ScriptedStrategy::new();
    strategy.push_signal(Signal::entry(Action::Buy, Symbol::new("BTCUSDT")));

    let mut s = sim(Settings::default(), strategy);
    s.feed.push_candle(candle(dec!(49800), dec!(50100), dec!(50000), 0));
    s.engine.tick().expect("tick");
    println!("  process 1 opened a trade, then died");

    // new process: same store and feed, fresh engine and strategy
    s.clock.advance(3_600_000);
    s.feed.push_candle(candle(dec!(50000), dec!(52100), dec!(52000), 3_600_000));
    let mut engine2 = Engine::new(
        Settings::default(),
        s.store.clone(),
        s.feed.clone(),
        s.clock.clone(),
        Box::new(ScriptedStrategy::new()),
        Rc::new(EventLog::new()),
    )
    .expect("engine");

    let report = engine2.tick().expect("tick");
    println!("  process 2 recovered {} trade(s)", report.recovered);
    println!("  exits: {:?}", report.exits);
    println!("  balance: {}", engine2.exchange().balance());
}
