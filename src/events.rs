// 11.0: every order action the engine takes produces an event. used for the audit trail,
// status output and tests. the EventPayload enum lists all event types.

use crate::order::Order;
use crate::types::{OrderId, Price, Side, Symbol, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Convergence events
    OrdersAmended(OrdersAmendedEvent),
    OrdersCreated(OrdersCreatedEvent),
    OrdersCanceled(OrdersCanceledEvent),
    AmendRetried(AmendRetriedEvent),

    // Bracket events
    BracketPlaced(BracketPlacedEvent),
    ProtectionAdjusted(ProtectionAdjustedEvent),

    // Lifecycle events
    ShutdownCompleted(ShutdownCompletedEvent),
}

/// Flattened view of an order, enough to audit what was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub side: Side,
    pub kind: String,
    pub quantity: Decimal,
    pub remaining: Decimal,
    pub price: Option<Price>,
    pub close_only: bool,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            side: order.side,
            kind: order.order_type.to_string(),
            quantity: order.quantity,
            remaining: order.remaining(),
            price: order.order_type.reference_price(),
            close_only: order.close_only,
        }
    }
}

pub fn summarize(orders: &[Order]) -> Vec<OrderSummary> {
    orders.iter().map(OrderSummary::from).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersAmendedEvent {
    pub symbol: Symbol,
    pub orders: Vec<OrderSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersCreatedEvent {
    pub symbol: Symbol,
    pub orders: Vec<OrderSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersCanceledEvent {
    pub symbol: Symbol,
    pub orders: Vec<OrderSummary>,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Live quote beyond the desired ladder.
    Surplus,
    /// Protection left over after the position closed.
    Orphaned,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmendRetriedEvent {
    pub symbol: Symbol,
    pub attempt: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketPlacedEvent {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub stop_price: Option<Price>,
    pub take_profit_price: Option<Price>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionKind {
    Stop,
    TakeProfit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionAdjustedEvent {
    pub symbol: Symbol,
    pub order_id: OrderId,
    pub kind: ProtectionKind,
    pub from: Option<Price>,
    pub to: Option<Price>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownCompletedEvent {
    pub reason: String,
    pub canceled: usize,
}

// 11.0.1: bounded. oldest events drop off once max_events is reached.
#[derive(Debug)]
pub struct EventLog {
    events: Vec<Event>,
    next_id: u64,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
            max_events,
        }
    }

    pub fn emit(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push(Event::new(id, timestamp, payload));

        if self.events.len() > self.max_events {
            let drain_count = self.events.len() - self.max_events;
            self.events.drain(0..drain_count);
        }
        id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(100_000)
    }
}
