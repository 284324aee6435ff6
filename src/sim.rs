// 9.1: in-memory paper exchange. market orders fill at mid, everything else rests.
// test hooks: queue a failure for any call, count calls, drop the connection.

use crate::gateway::{ExchangeGateway, GatewayError, GatewayResult};
use crate::market::{
    DepthLevel, Instrument, Margin, MarketState, OrderBookDepth, Position, Ticker,
};
use crate::order::{Amendment, Order, OrderRequest, OrderType};
use crate::types::{OrderId, Price, SignedSize, Symbol};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};

/// One gateway endpoint, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimCall {
    Position,
    Instrument,
    Margin,
    OpenOrders,
    MarketDepth,
    Ticker,
    Create,
    Amend,
    Cancel,
    Close,
}

struct SimState {
    instrument: Instrument,
    ticker: Ticker,
    depth: OrderBookDepth,
    position: Position,
    margin: Margin,
    orders: Vec<Order>,
    other_contracts: HashMap<Symbol, (Instrument, Position)>,
    next_id: u64,
    connected: bool,
    failures: HashMap<SimCall, VecDeque<GatewayError>>,
    calls: HashMap<SimCall, u32>,
}

impl SimState {
    // count the call, then hand out a queued failure if there is one
    fn enter(&mut self, call: SimCall) -> GatewayResult<()> {
        *self.calls.entry(call).or_insert(0) += 1;
        match self.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> OrderId {
        self.next_id += 1;
        OrderId::new(format!("SIM-{}", self.next_id))
    }

    fn fill_market(&mut self, request: &OrderRequest) {
        let fill_price = self.ticker.mid.value();
        let signed = SignedSize::from_side(request.side, request.quantity);
        let old = self.position.quantity;
        let new = old.add(signed.value());

        let entry = match (old.side(), new.side()) {
            (_, None) => None,
            // opening or adding: weighted average
            (None, Some(_)) => Some(fill_price),
            (Some(before), Some(after)) if before == after && before == request.side => {
                let prev = self.position.avg_entry_price.map_or(fill_price, |p| p.value());
                Some((prev * old.abs() + fill_price * signed.abs()) / new.abs())
            }
            // reducing keeps the entry
            (Some(before), Some(after)) if before == after => {
                self.position.avg_entry_price.map(|p| p.value())
            }
            // flipped through zero
            (Some(_), Some(_)) => Some(fill_price),
        };

        self.position.quantity = new;
        self.position.avg_entry_price = entry.and_then(Price::new);
        self.position.avg_cost_price = self.position.avg_entry_price;
    }
}

pub struct SimulatedExchange {
    state: Mutex<SimState>,
}

impl SimulatedExchange {
    pub fn new(instrument: Instrument, ticker: Ticker) -> Self {
        let position = Position::flat(instrument.symbol.clone());
        let depth = ladder_depth(&ticker, instrument.tick_size);
        Self {
            state: Mutex::new(SimState {
                instrument,
                ticker,
                depth,
                position,
                margin: Margin::uniform(dec!(1)),
                orders: Vec::new(),
                other_contracts: HashMap::new(),
                next_id: 0,
                connected: true,
                failures: HashMap::new(),
                calls: HashMap::new(),
            }),
        }
    }

    /// XBTUSD-like inverse market around the given touch.
    pub fn xbtusd(best_bid: Decimal, best_ask: Decimal) -> Self {
        let instrument = Instrument::xbtusd();
        let tick = instrument.tick_size;
        let ticker = Ticker::from_bid_ask(
            Price::new_unchecked(best_bid),
            Price::new_unchecked(best_ask),
            tick,
        )
        .unwrap_or_else(|| {
            let bid = Price::new_unchecked(best_bid);
            Ticker::new(bid, Price::new_unchecked(best_ask), bid)
        });
        let sim = Self::new(instrument, ticker);
        sim.set_ticker(ticker);
        sim
    }

    /// Move the market. Instrument mid, mark and spot follow the ticker mid.
    pub fn set_ticker(&self, ticker: Ticker) {
        let mut state = self.state.lock();
        state.ticker = ticker;
        state.instrument.mid_price = Some(ticker.mid);
        state.instrument.mark_price = Some(ticker.mid);
        state.instrument.indicative_settle_price = Some(ticker.mid);
        state.depth = ladder_depth(&ticker, state.instrument.tick_size);
    }

    pub fn set_depth(&self, depth: OrderBookDepth) {
        self.state.lock().depth = depth;
    }

    pub fn set_market_state(&self, market_state: MarketState) {
        self.state.lock().instrument.state = market_state;
    }

    /// None empties the book as far as the instrument is concerned.
    pub fn set_mid_price(&self, mid: Option<Price>) {
        self.state.lock().instrument.mid_price = mid;
    }

    pub fn set_mark_price(&self, mark: Price) {
        self.state.lock().instrument.mark_price = Some(mark);
    }

    pub fn set_position(&self, position: Position) {
        self.state.lock().position = position;
    }

    pub fn set_margin(&self, margin: Margin) {
        self.state.lock().margin = margin;
    }

    pub fn add_contract(&self, instrument: Instrument, position: Position) {
        self.state
            .lock()
            .other_contracts
            .insert(instrument.symbol.clone(), (instrument, position));
    }

    /// Rest an order directly, as if placed by an earlier run.
    pub fn seed_order(&self, request: &OrderRequest) -> Order {
        let mut state = self.state.lock();
        let order = Order::from_request(state.next_id(), request);
        state.orders.push(order.clone());
        order
    }

    /// Partially fill a resting order without touching the position.
    pub fn fill(&self, id: &OrderId, quantity: Decimal) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.iter_mut().find(|o| &o.id == id) {
            order.filled_quantity = (order.filled_quantity + quantity).min(order.quantity);
        }
        state.orders.retain(|o| o.remaining() > Decimal::ZERO);
    }

    /// Drop an order exchange-side, as a concurrent fill or cancel would.
    pub fn remove_order(&self, id: &OrderId) {
        self.state.lock().orders.retain(|o| &o.id != id);
    }

    pub fn fail_next(&self, call: SimCall, err: GatewayError) {
        self.state
            .lock()
            .failures
            .entry(call)
            .or_default()
            .push_back(err);
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    pub fn calls(&self, call: SimCall) -> u32 {
        self.state.lock().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn resting_orders(&self) -> Vec<Order> {
        self.state.lock().orders.clone()
    }

    pub fn current_position(&self) -> Position {
        self.state.lock().position.clone()
    }
}

impl ExchangeGateway for SimulatedExchange {
    fn position(&self, symbol: &Symbol) -> GatewayResult<Position> {
        let mut state = self.state.lock();
        state.enter(SimCall::Position)?;
        if *symbol == state.position.symbol {
            return Ok(state.position.clone());
        }
        Ok(state
            .other_contracts
            .get(symbol)
            .map(|(_, p)| p.clone())
            .unwrap_or_else(|| Position::flat(symbol.clone())))
    }

    fn instrument(&self, symbol: &Symbol) -> GatewayResult<Instrument> {
        let mut state = self.state.lock();
        state.enter(SimCall::Instrument)?;
        if *symbol == state.instrument.symbol {
            return Ok(state.instrument.clone());
        }
        state
            .other_contracts
            .get(symbol)
            .map(|(i, _)| i.clone())
            .ok_or_else(|| GatewayError::Rejected {
                reason: format!("Unknown symbol {}", symbol),
            })
    }

    fn margin(&self) -> GatewayResult<Margin> {
        let mut state = self.state.lock();
        state.enter(SimCall::Margin)?;
        Ok(state.margin)
    }

    fn open_orders(&self) -> GatewayResult<Vec<Order>> {
        let mut state = self.state.lock();
        state.enter(SimCall::OpenOrders)?;
        Ok(state.orders.clone())
    }

    fn market_depth(&self, _symbol: &Symbol, depth: usize) -> GatewayResult<OrderBookDepth> {
        let mut state = self.state.lock();
        state.enter(SimCall::MarketDepth)?;
        Ok(state.depth.clone().truncated(depth))
    }

    fn ticker(&self, _symbol: &Symbol) -> GatewayResult<Ticker> {
        let mut state = self.state.lock();
        state.enter(SimCall::Ticker)?;
        Ok(state.ticker)
    }

    fn create_orders(&self, requests: &[OrderRequest]) -> GatewayResult<Vec<Order>> {
        let mut state = self.state.lock();
        state.enter(SimCall::Create)?;

        let mut created = Vec::with_capacity(requests.len());
        for request in requests {
            if request.close_only && request.order_type.is_limit() && !state.position.is_open() {
                return Err(GatewayError::Rejected {
                    reason: "Close-only limit order with no open position".to_string(),
                });
            }

            let mut order = Order::from_request(state.next_id(), request);
            if request.order_type == OrderType::Market {
                state.fill_market(request);
                order.filled_quantity = order.quantity;
            } else {
                state.orders.push(order.clone());
            }
            created.push(order);
        }
        Ok(created)
    }

    fn amend_orders(&self, amendments: &[Amendment]) -> GatewayResult<Vec<Order>> {
        let mut state = self.state.lock();
        state.enter(SimCall::Amend)?;

        // all or nothing, like a bulk amend
        if amendments
            .iter()
            .any(|a| !state.orders.iter().any(|o| o.id == a.order_id))
        {
            return Err(GatewayError::from_reason("Invalid ordStatus"));
        }

        let mut amended = Vec::with_capacity(amendments.len());
        for amendment in amendments {
            if let Some(order) = state.orders.iter_mut().find(|o| o.id == amendment.order_id) {
                if let Some(quantity) = amendment.quantity {
                    order.quantity = quantity;
                }
                order.order_type = match order.order_type {
                    OrderType::Limit { price } => OrderType::Limit {
                        price: amendment.price.unwrap_or(price),
                    },
                    OrderType::Stop { trigger_price } => OrderType::Stop {
                        trigger_price: amendment.trigger_price.unwrap_or(trigger_price),
                    },
                    OrderType::Market => OrderType::Market,
                };
                amended.push(order.clone());
            }
        }
        state.orders.retain(|o| o.remaining() > Decimal::ZERO);
        Ok(amended)
    }

    fn cancel_orders(&self, ids: &[OrderId]) -> GatewayResult<Vec<Order>> {
        let mut state = self.state.lock();
        state.enter(SimCall::Cancel)?;

        let (canceled, kept): (Vec<Order>, Vec<Order>) =
            state.orders.drain(..).partition(|o| ids.contains(&o.id));
        state.orders = kept;
        Ok(canceled)
    }

    fn is_connection_open(&self) -> bool {
        self.state.lock().connected
    }

    fn close(&self) {
        let mut state = self.state.lock();
        // close never fails
        *state.calls.entry(SimCall::Close).or_insert(0) += 1;
        state.connected = false;
    }
}

// five levels a side, one tick apart, growing size
fn ladder_depth(ticker: &Ticker, tick: Decimal) -> OrderBookDepth {
    let level = |base: Decimal, step: Decimal, i: usize| {
        let price = Price::new(base + step * Decimal::from(i))?;
        Some(DepthLevel {
            price,
            size: dec!(1000) * Decimal::from(i + 1),
        })
    };
    OrderBookDepth {
        bids: (0..5)
            .filter_map(|i| level(ticker.best_bid.value(), -tick, i))
            .collect(),
        asks: (0..5)
            .filter_map(|i| level(ticker.best_ask.value(), tick, i))
            .collect(),
    }
}
