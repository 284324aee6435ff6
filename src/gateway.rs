//! Exchange access.
//!
//! [`ExchangeGateway`] is the raw capability: one blocking call per exchange endpoint,
//! returning normalized entities. [`ExchangeAdapter`] wraps a gateway with what the
//! engine needs on top: dry-run, pacing between mutating calls, retries on flaky
//! reads and a one-pass [`MarketSnapshot`].

use crate::config::ExchangeSettings;
use crate::engine::EngineError;
use crate::market::{Instrument, Margin, MarketSnapshot, OrderBookDepth, Position, Ticker};
use crate::order::{Amendment, Order, OrderRequest};
use crate::portfolio::PortfolioItem;
use crate::types::{OrderId, Price, Side, Symbol, Timestamp};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure of a single gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Credentials rejected or missing.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// An order referenced by the call was filled or canceled in the meantime.
    #[error("invalid order state: {0}")]
    InvalidOrderState(String),
    /// Network or timeout. Reads retry these.
    #[error("transport error: {0}")]
    Transport(String),
    /// Any other exchange-side rejection.
    #[error("rejected: {reason}")]
    Rejected { reason: String },
    /// The adapter was closed for shutdown. No new orders go out.
    #[error("gateway closed")]
    Closed,
}

impl GatewayError {
    /// Classify the machine-readable reason an exchange returns.
    pub fn from_reason(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let lower = reason.to_ascii_lowercase();

        if lower.contains("invalid ordstatus") {
            GatewayError::InvalidOrderState(reason)
        } else if lower.contains("unauthorized")
            || lower.contains("invalid api key")
            || lower.contains("signature not valid")
        {
            GatewayError::Authentication(reason)
        } else {
            GatewayError::Rejected { reason }
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }
}

/// Blocking exchange capability. Timeouts are the transport's job.
pub trait ExchangeGateway: Send + Sync {
    fn position(&self, symbol: &Symbol) -> GatewayResult<Position>;
    fn instrument(&self, symbol: &Symbol) -> GatewayResult<Instrument>;
    fn margin(&self) -> GatewayResult<Margin>;
    /// All of our resting orders.
    fn open_orders(&self) -> GatewayResult<Vec<Order>>;
    fn market_depth(&self, symbol: &Symbol, depth: usize) -> GatewayResult<OrderBookDepth>;
    fn ticker(&self, symbol: &Symbol) -> GatewayResult<Ticker>;
    fn create_orders(&self, requests: &[OrderRequest]) -> GatewayResult<Vec<Order>>;
    fn amend_orders(&self, amendments: &[Amendment]) -> GatewayResult<Vec<Order>>;
    fn cancel_orders(&self, ids: &[OrderId]) -> GatewayResult<Vec<Order>>;
    /// Whether the market-data stream is still alive.
    fn is_connection_open(&self) -> bool;
    fn close(&self);
}

impl<G: ExchangeGateway + ?Sized> ExchangeGateway for Arc<G> {
    fn position(&self, symbol: &Symbol) -> GatewayResult<Position> {
        (**self).position(symbol)
    }
    fn instrument(&self, symbol: &Symbol) -> GatewayResult<Instrument> {
        (**self).instrument(symbol)
    }
    fn margin(&self) -> GatewayResult<Margin> {
        (**self).margin()
    }
    fn open_orders(&self) -> GatewayResult<Vec<Order>> {
        (**self).open_orders()
    }
    fn market_depth(&self, symbol: &Symbol, depth: usize) -> GatewayResult<OrderBookDepth> {
        (**self).market_depth(symbol, depth)
    }
    fn ticker(&self, symbol: &Symbol) -> GatewayResult<Ticker> {
        (**self).ticker(symbol)
    }
    fn create_orders(&self, requests: &[OrderRequest]) -> GatewayResult<Vec<Order>> {
        (**self).create_orders(requests)
    }
    fn amend_orders(&self, amendments: &[Amendment]) -> GatewayResult<Vec<Order>> {
        (**self).amend_orders(amendments)
    }
    fn cancel_orders(&self, ids: &[OrderId]) -> GatewayResult<Vec<Order>> {
        (**self).cancel_orders(ids)
    }
    fn is_connection_open(&self) -> bool {
        (**self).is_connection_open()
    }
    fn close(&self) {
        (**self).close()
    }
}

// 9.1: the engine only ever talks to this.
pub struct ExchangeAdapter<G> {
    gateway: G,
    symbol: Symbol,
    contracts: Vec<Symbol>,
    dry_run: bool,
    dry_run_balance: Decimal,
    depth: usize,
    rest_interval: Duration,
    error_interval: Duration,
    max_read_retries: u32,
    dry_seq: AtomicU64,
    closed: AtomicBool,
}

impl<G: ExchangeGateway> ExchangeAdapter<G> {
    pub fn new(gateway: G, settings: &ExchangeSettings) -> Self {
        Self {
            gateway,
            symbol: settings.symbol.clone(),
            contracts: settings.contracts.clone(),
            dry_run: settings.dry_run,
            dry_run_balance: settings.dry_run_balance,
            depth: settings.depth,
            rest_interval: settings.api_rest_interval(),
            error_interval: settings.api_error_interval(),
            max_read_retries: settings.max_read_retries,
            dry_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    // reads retry transport errors; everything else goes straight up
    fn read<T>(&self, what: &str, call: impl Fn(&G) -> GatewayResult<T>) -> GatewayResult<T> {
        let mut attempt = 0;
        loop {
            match call(&self.gateway) {
                Err(err) if err.is_transport() && attempt < self.max_read_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retrying in {:?} [{}/{}]",
                        what, err, self.error_interval, attempt, self.max_read_retries
                    );
                    pause(self.error_interval);
                }
                result => return result,
            }
        }
    }

    pub fn position(&self) -> GatewayResult<Position> {
        self.position_of(&self.symbol)
    }

    pub fn position_of(&self, symbol: &Symbol) -> GatewayResult<Position> {
        self.read("position", |g| g.position(symbol))
    }

    pub fn instrument(&self) -> GatewayResult<Instrument> {
        self.instrument_of(&self.symbol)
    }

    pub fn instrument_of(&self, symbol: &Symbol) -> GatewayResult<Instrument> {
        self.read("instrument", |g| g.instrument(symbol))
    }

    pub fn margin(&self) -> GatewayResult<Margin> {
        if self.dry_run {
            return Ok(Margin::uniform(self.dry_run_balance));
        }
        self.read("margin", |g| g.margin())
    }

    /// Our resting orders on the traded symbol. Always empty in dry-run.
    pub fn open_orders(&self) -> GatewayResult<Vec<Order>> {
        if self.dry_run {
            return Ok(Vec::new());
        }
        let orders = self.read("open orders", |g| g.open_orders())?;
        Ok(orders.into_iter().filter(|o| o.symbol == self.symbol).collect())
    }

    pub fn market_depth(&self) -> GatewayResult<OrderBookDepth> {
        self.read("market depth", |g| g.market_depth(&self.symbol, self.depth))
    }

    pub fn ticker(&self) -> GatewayResult<Ticker> {
        self.read("ticker", |g| g.ticker(&self.symbol))
    }

    pub fn highest_buy(&self) -> GatewayResult<Option<Price>> {
        Ok(best_limit(&self.open_orders()?, Side::Buy))
    }

    pub fn lowest_sell(&self) -> GatewayResult<Option<Price>> {
        Ok(best_limit(&self.open_orders()?, Side::Sell))
    }

    pub fn create_orders(&self, requests: &[OrderRequest]) -> GatewayResult<Vec<Order>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_open("create")?;
        if self.dry_run {
            return Ok(requests
                .iter()
                .map(|r| Order::from_request(OrderId::dry_run(self.next_dry_seq()), r))
                .collect());
        }
        let created = self.gateway.create_orders(requests)?;
        debug!("Created {} orders", created.len());
        pause(self.rest_interval);
        Ok(created)
    }

    pub fn amend_orders(&self, amendments: &[Amendment]) -> GatewayResult<Vec<Order>> {
        if amendments.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_open("amend")?;
        if self.dry_run {
            return Ok(amendments.iter().map(Amendment::applied).collect());
        }
        let amended = self.gateway.amend_orders(amendments)?;
        debug!("Amended {} orders", amended.len());
        pause(self.rest_interval);
        Ok(amended)
    }

    pub fn cancel_orders(&self, orders: &[Order]) -> GatewayResult<Vec<Order>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        if self.dry_run {
            return Ok(orders.to_vec());
        }
        let ids: Vec<OrderId> = orders.iter().map(|o| o.id.clone()).collect();
        let canceled = self.gateway.cancel_orders(&ids)?;
        debug!("Canceled {} orders", canceled.len());
        pause(self.rest_interval);
        Ok(canceled)
    }

    /// Cancel every resting order on the traded symbol, read fresh.
    pub fn cancel_all_orders(&self) -> GatewayResult<Vec<Order>> {
        if self.dry_run {
            return Ok(Vec::new());
        }

        info!("Resetting current position. Canceling all existing orders.");
        let orders = self.open_orders()?;
        for order in &orders {
            let price = order.order_type.reference_price().map(|p| p.value());
            info!(
                "Canceling: {} {} {} @ {:?}",
                order.side,
                order.remaining(),
                order.order_type,
                price
            );
        }
        self.cancel_orders(&orders)
    }

    /// Read everything one cycle needs.
    pub fn snapshot(&self) -> Result<MarketSnapshot, EngineError> {
        let instrument = self.instrument()?;
        let ticker = self.ticker()?;
        let depth = self.market_depth()?;
        let position = self.position()?;
        let margin = self.margin()?;
        let open_orders = self.open_orders()?;

        let mut portfolio = Vec::with_capacity(self.contracts.len());
        for symbol in &self.contracts {
            let item = if *symbol == self.symbol {
                PortfolioItem::from_parts(&position, &instrument)?
            } else {
                PortfolioItem::from_parts(&self.position_of(symbol)?, &self.instrument_of(symbol)?)?
            };
            portfolio.push(item);
        }

        Ok(MarketSnapshot {
            symbol: self.symbol.clone(),
            instrument,
            ticker,
            depth,
            position,
            margin,
            open_orders,
            portfolio,
            taken_at: Timestamp::now(),
        })
    }

    pub fn is_connection_open(&self) -> bool {
        self.gateway.is_connection_open()
    }

    /// Close the feed. Creates and amends are refused from here on, cancels still go through.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.gateway.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self, what: &str) -> GatewayResult<()> {
        if self.is_closed() {
            warn!("Refusing to {} orders, the exchange connection is closed", what);
            return Err(GatewayError::Closed);
        }
        Ok(())
    }

    fn next_dry_seq(&self) -> u64 {
        self.dry_seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub fn check_market_open(instrument: &Instrument) -> Result<(), EngineError> {
    if !instrument.state.is_tradable() {
        return Err(EngineError::MarketClosed {
            symbol: instrument.symbol.clone(),
            state: instrument.state.clone(),
        });
    }
    Ok(())
}

pub fn check_if_orderbook_empty(instrument: &Instrument) -> Result<(), EngineError> {
    if instrument.mid_price.is_none() {
        return Err(EngineError::MarketEmpty(instrument.symbol.clone()));
    }
    Ok(())
}

fn best_limit(orders: &[Order], side: Side) -> Option<Price> {
    let prices = orders
        .iter()
        .filter(|o| o.side == side)
        .filter_map(Order::limit_price);
    match side {
        Side::Buy => prices.max(),
        Side::Sell => prices.min(),
    }
}

fn pause(interval: Duration) {
    if !interval.is_zero() {
        thread::sleep(interval);
    }
}
