// tradeloop-core: candle-driven trading-state engine.
// money-invariant-first architecture: margin math, the liquidation cap and
// the drawdown gate take priority. all computation is deterministic; market
// data, time and persistence arrive through injected ports.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Symbol, Side, Price, Quote, Qty, Leverage, Pct
//   2.x  clock.rs: injectable time source, system + simulated
//   3.x  market_data.rs: candle/ticker port, scripted test feed
//   4.x  order.rs: order requests and fill records
//   5.x  position.rs: position math: VWAP increase, pro-rata close, pnl
//   6.x  trade.rs: persisted trade records, trailing/breakeven state
//   7.x  exchange.rs: margin exchange simulator, balance custody
//   8.x  store.rs: persistence port with as-of reads, memory backend
//   9.x  risk.rs: fixed-fractional sizing, exit prices, drawdown gate
//   10.x exits.rs: stop/target/wick checks, breakeven, trailing
//   11.x vault.rs: share ledger, equity fallback chain
//   12.x commission.rs: referral split on profitable closes
//   13.x portfolio.rs: snapshot reconciler, win rate, profit factor
//   14.x signal.rs: strategy port, scripted test strategy
//   15.x engine/: tick state machine, reports, error taxonomy
//   16.x events.rs: audit events for every state change
//   17.x config.rs: settings struct, presets, validation

// core trading modules
pub mod engine;
pub mod exchange;
pub mod exits;
pub mod market_data;
pub mod order;
pub mod position;
pub mod trade;
pub mod types;

// risk and accounting modules
pub mod commission;
pub mod portfolio;
pub mod risk;
pub mod vault;

// integration modules
pub mod clock;
pub mod config;
pub mod events;
pub mod signal;
pub mod store;

// re exports for convenience
pub use clock::*;
pub use commission::*;
pub use config::*;
pub use engine::*;
pub use events::*;
pub use exchange::*;
pub use exits::*;
pub use market_data::*;
pub use order::*;
pub use portfolio::*;
pub use position::*;
pub use risk::*;
pub use signal::*;
pub use store::*;
pub use trade::*;
pub use types::*;
pub use vault::*;
