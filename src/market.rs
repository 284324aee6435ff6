//! Market data as read from the exchange.
//!
//! Everything here is re-fetched every poll cycle and replaced wholesale. Nothing is
//! patched field by field, so a reader either sees the previous snapshot or the new
//! one, never a mix of the two.

use crate::order::{Order, OrderType};
use crate::portfolio::PortfolioItem;
use crate::types::{Price, Side, SignedSize, Symbol, Timestamp};
use parking_lot::RwLock;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Trading state the exchange reports for an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketState {
    Open,
    /// Outside trading hours but still quotable.
    Closed,
    /// Anything else (settled, unlisted, halted...). Carries the raw state.
    Other(String),
}

impl MarketState {
    pub fn is_tradable(&self) -> bool {
        matches!(self, MarketState::Open | MarketState::Closed)
    }
}

/// How a contract's value converts into the settlement currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementClass {
    Linear,
    Inverse,
    Quanto,
}

/// Static and slow-moving instrument metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Decimal places used when printing prices.
    pub tick_log: usize,
    pub multiplier: Decimal,
    pub underlying_to_settle_multiplier: Option<Decimal>,
    pub quote_to_settle_multiplier: Option<Decimal>,
    pub is_quanto: bool,
    pub is_inverse: bool,
    pub state: MarketState,
    /// None means the book is currently unquotable.
    pub mid_price: Option<Price>,
    pub mark_price: Option<Price>,
    /// Spot reference used for the spot delta.
    pub indicative_settle_price: Option<Price>,
    /// Initial margin as a fraction of cost.
    pub init_margin: Decimal,
}

impl Instrument {
    /// Inverse perpetual with XBTUSD-like parameters. Used by the paper exchange and tests.
    pub fn xbtusd() -> Self {
        Self {
            symbol: Symbol::new("XBTUSD"),
            tick_size: Decimal::new(5, 1),
            tick_log: 1,
            multiplier: Decimal::new(-100_000_000, 0),
            underlying_to_settle_multiplier: None,
            quote_to_settle_multiplier: Some(Decimal::new(-100_000_000, 0)),
            is_quanto: false,
            is_inverse: true,
            state: MarketState::Open,
            mid_price: None,
            mark_price: None,
            indicative_settle_price: None,
            init_margin: Decimal::new(1, 2),
        }
    }

    /// Quanto and inverse at the same time is not a contract we know how to value.
    pub fn settlement_class(&self) -> Result<SettlementClass, MarketError> {
        match (self.is_quanto, self.is_inverse) {
            (true, false) => Ok(SettlementClass::Quanto),
            (false, true) => Ok(SettlementClass::Inverse),
            (false, false) => Ok(SettlementClass::Linear),
            (true, true) => Err(MarketError::UnknownSettlementClass(self.symbol.clone())),
        }
    }

    /// Contract multiplier expressed in settlement currency units.
    pub fn effective_multiplier(&self) -> Result<Decimal, MarketError> {
        let divisor = self
            .underlying_to_settle_multiplier
            .or(self.quote_to_settle_multiplier)
            .ok_or_else(|| MarketError::MissingField {
                symbol: self.symbol.clone(),
                field: "settle multiplier",
            })?;

        self.multiplier
            .checked_div(divisor)
            .ok_or_else(|| MarketError::MissingField {
                symbol: self.symbol.clone(),
                field: "settle multiplier",
            })
    }

    /// Round a raw price to the nearest tick.
    pub fn round_to_tick(&self, value: Decimal) -> Result<Price, MarketError> {
        let rounded = to_nearest(value, self.tick_size)
            .ok_or(MarketError::InvalidTickSize(self.tick_size))?;
        Price::new(rounded).ok_or(MarketError::InvalidPrice(rounded))
    }
}

// 12.1: nearest multiple of `tick`, halves away from zero. None on a zero tick.
pub fn to_nearest(value: Decimal, tick: Decimal) -> Option<Decimal> {
    if tick <= Decimal::ZERO {
        return None;
    }
    let ticks = value
        .checked_div(tick)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Some(ticks * tick)
}

/// Top of book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub best_bid: Price,
    pub best_ask: Price,
    pub mid: Price,
}

impl Ticker {
    pub fn new(best_bid: Price, best_ask: Price, mid: Price) -> Self {
        Self {
            best_bid,
            best_ask,
            mid,
        }
    }

    /// Mid halfway between bid and ask, rounded to the tick like the exchange does.
    pub fn from_bid_ask(best_bid: Price, best_ask: Price, tick_size: Decimal) -> Option<Self> {
        let raw_mid = (best_bid.value() + best_ask.value()) / Decimal::TWO;
        let mid = Price::new(to_nearest(raw_mid, tick_size)?)?;
        Some(Self::new(best_bid, best_ask, mid))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub size: Decimal,
}

/// Aggregated top-N levels, best first on both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookDepth {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl OrderBookDepth {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn total_bid_size(&self) -> Decimal {
        self.bids.iter().map(|l| l.size).sum()
    }

    pub fn total_ask_size(&self) -> Decimal {
        self.asks.iter().map(|l| l.size).sum()
    }

    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.asks.first()
    }

    pub fn truncated(mut self, depth: usize) -> Self {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
        self
    }
}

/// Account funds in settlement currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Margin {
    pub margin_balance: Decimal,
    pub available_funds: Decimal,
}

impl Margin {
    pub fn uniform(amount: Decimal) -> Self {
        Self {
            margin_balance: amount,
            available_funds: amount,
        }
    }
}

/// Exchange-reported position for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: SignedSize,
    pub avg_entry_price: Option<Price>,
    pub avg_cost_price: Option<Price>,
    pub liquidation_price: Option<Price>,
}

impl Position {
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            quantity: SignedSize::zero(),
            avg_entry_price: None,
            avg_cost_price: None,
            liquidation_price: None,
        }
    }

    // open iff quantity != 0, derived so the two can't disagree
    pub fn is_open(&self) -> bool {
        !self.quantity.is_zero()
    }

    pub fn side(&self) -> Option<Side> {
        self.quantity.side()
    }
}

/// Everything one poll cycle needs, read in one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub instrument: Instrument,
    pub ticker: Ticker,
    pub depth: OrderBookDepth,
    pub position: Position,
    pub margin: Margin,
    pub open_orders: Vec<Order>,
    pub portfolio: Vec<PortfolioItem>,
    pub taken_at: Timestamp,
}

impl MarketSnapshot {
    /// Best own resting buy limit, if any.
    pub fn highest_own_buy(&self) -> Option<Price> {
        own_limit_prices(&self.open_orders, Side::Buy).max()
    }

    /// Best own resting sell limit, if any.
    pub fn lowest_own_sell(&self) -> Option<Price> {
        own_limit_prices(&self.open_orders, Side::Sell).min()
    }
}

fn own_limit_prices(orders: &[Order], side: Side) -> impl Iterator<Item = Price> + '_ {
    orders
        .iter()
        .filter(move |o| o.side == side)
        .filter_map(|o| match o.order_type {
            OrderType::Limit { price } => Some(price),
            _ => None,
        })
}

// 12.2: latest snapshot, swapped whole. readers get an Arc to a finished value.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: RwLock<Option<Arc<MarketSnapshot>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: MarketSnapshot) -> Arc<MarketSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub fn load(&self) -> Option<Arc<MarketSnapshot>> {
        self.current.read().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error("Unknown settlement class for {0}: both quanto and inverse")]
    UnknownSettlementClass(Symbol),

    #[error("Instrument {symbol} is missing {field}")]
    MissingField { symbol: Symbol, field: &'static str },

    #[error("Invalid tick size {0}")]
    InvalidTickSize(Decimal),

    #[error("Invalid price {0}")]
    InvalidPrice(Decimal),
}
