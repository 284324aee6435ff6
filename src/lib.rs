// mm-core: market-making order lifecycle and convergence engine.
// every cycle re-reads the exchange and reconciles; nothing about live orders is cached.
// all prices and sizes are Decimal, all exchange I/O goes through one gateway trait.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Symbol, OrderId, Side, Price, SignedSize, TradeDirective
//   2.x  order.rs: Order, OrderType, OrderRequest, Amendment
//   2.1  bracket.rs: entry + stop + take-profit planning, trailing stop ratchet
//   3.x  portfolio.rs: settlement-aware delta, order cost and margin
//   4.x  quote.rs: quote anchors and ladder price offsets
//   5.x  convergence.rs: desired ladder, diff against live quotes
//   6.x  risk.rs: position limits
//   7.x  config.rs: settings tree, TOML loading, CLI overrides, validation
//   8.x  engine/: MarketMaker: lifecycle, quoting, convergence, brackets
//   9.x  gateway.rs: exchange trait, errors, adapter (dry-run, pacing, retries)
//   9.1  sim.rs: in-memory exchange
//   10.x signal.rs: entry signals
//   11.x events.rs: audit events for every order action
//   11.1 watcher.rs: restart on watched file change
//   11.2 shutdown.rs: run-once cleanup hook
//   12.x market.rs: instrument, ticker, depth, position, snapshot

// core modules
pub mod engine;
pub mod events;
pub mod market;
pub mod order;
pub mod types;

// quoting and reconciliation
pub mod bracket;
pub mod convergence;
pub mod portfolio;
pub mod quote;
pub mod risk;
pub mod signal;

// integration modules
pub mod config;
pub mod gateway;
pub mod shutdown;
pub mod sim;
pub mod watcher;

// re exports for convenience
pub use bracket::*;
pub use convergence::*;
pub use engine::*;
pub use events::*;
pub use market::*;
pub use order::*;
pub use portfolio::*;
pub use quote::*;
pub use risk::*;
pub use signal::*;
pub use types::*;
pub use config::{ConfigError, ExchangeSettings, Overrides, QuotingSettings, RuntimeSettings, Settings};
pub use gateway::{ExchangeAdapter, ExchangeGateway, GatewayError, GatewayResult};
pub use shutdown::{ShutdownGuard, ShutdownHook};
pub use sim::{SimCall, SimulatedExchange};
pub use watcher::ResourceWatcher;
