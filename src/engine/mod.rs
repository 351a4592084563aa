// 15: tick engine. core.rs wires the components, tick.rs runs the state
// machine, results.rs carries reports and errors.

mod core;
mod results;
mod tick;

pub use self::core::Engine;
pub use self::results::{EngineError, EnginePhase, TickReport};
