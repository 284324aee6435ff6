// 8.0: market maker. owns the poll loop, sanity checks and the cleanup path,
// and drives convergence and brackets once per cycle.
// every cycle rebuilds what it wants from a fresh snapshot. no order state survives a cycle.

mod bracket;
mod converge;
mod core;
mod lifecycle;
mod quoting;
mod results;

pub use core::MarketMaker;
pub use lifecycle::LifecycleState;
pub use quoting::StatusReport;
pub use results::{BracketOutcome, ConvergeResult, CycleOutcome, EngineError};
