// 8.0.2: result types and errors for engine operations.

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::market::{MarketError, MarketState};
use crate::order::Order;
use crate::types::Symbol;
use rust_decimal::Decimal;

/// What one convergence pass sent to the exchange.
#[derive(Debug, Clone, Default)]
pub struct ConvergeResult {
    pub amended: Vec<Order>,
    pub created: Vec<Order>,
    pub canceled: Vec<Order>,
    /// Full reconciliations re-run after an amend race.
    pub retries: u32,
}

impl ConvergeResult {
    pub fn is_noop(&self) -> bool {
        self.amended.is_empty() && self.created.is_empty() && self.canceled.is_empty()
    }
}

/// What the bracket manager did this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BracketOutcome {
    /// Signal said hold, or the entry was blocked.
    Idle,
    /// New entry with its protection.
    Placed { entry: Order, stop: Order, take_profit: Order },
    /// Existing protection amended, repaired or cleaned up.
    Managed { amended: usize, created: usize, canceled: usize },
}

/// How the run loop should continue after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    /// Watched file changed or the feed dropped. The process should exit and be restarted.
    Restart,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Market {symbol} is not open: {state:?}")]
    MarketClosed { symbol: Symbol, state: MarketState },

    #[error("Order book for {0} is empty")]
    MarketEmpty(Symbol),

    #[error("Sanity check failed: {reason}")]
    SanityCheckFailed { reason: String },

    #[error("Unknown settlement class for {0}")]
    UnknownSettlementClass(Symbol),

    #[error("{symbol} has no {field}")]
    MissingPrice { symbol: Symbol, field: &'static str },

    #[error("Invalid price {0}")]
    InvalidPrice(Decimal),

    #[error("Invalid tick size {0}")]
    InvalidTickSize(Decimal),

    #[error("Amend retries exhausted after {attempts} attempts")]
    AmendRetriesExhausted { attempts: u32 },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn is_invalid_order_state(&self) -> bool {
        matches!(self, EngineError::Gateway(GatewayError::InvalidOrderState(_)))
    }
}

impl From<MarketError> for EngineError {
    fn from(err: MarketError) -> Self {
        match err {
            MarketError::UnknownSettlementClass(symbol) => EngineError::UnknownSettlementClass(symbol),
            MarketError::MissingField { symbol, field } => EngineError::MissingPrice { symbol, field },
            MarketError::InvalidPrice(value) => EngineError::InvalidPrice(value),
            MarketError::InvalidTickSize(value) => EngineError::InvalidTickSize(value),
        }
    }
}
