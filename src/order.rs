//! Order types as the exchange reports them.
//!
//! Orders are owned by the exchange. The core only ever holds a copy read back from
//! the gateway, asks for new ones through [`OrderRequest`] and changes existing ones
//! through [`Amendment`]. Price fields live on the [`OrderType`] variant so a Stop
//! can never be missing its trigger and a Limit can never be missing its price.

use crate::types::{OrderId, Price, Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order type with the price fields that only make sense for that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Executes immediately at the best available price.
    Market,
    /// Rests on the book at `price`.
    Limit { price: Price },
    /// Becomes a market order once the last price crosses `trigger_price`.
    Stop { trigger_price: Price },
}

impl OrderType {
    pub fn is_limit(&self) -> bool {
        matches!(self, OrderType::Limit { .. })
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, OrderType::Stop { .. })
    }

    /// Limit price or stop trigger, whichever the variant carries.
    pub fn reference_price(&self) -> Option<Price> {
        match self {
            OrderType::Market => None,
            OrderType::Limit { price } => Some(*price),
            OrderType::Stop { trigger_price } => Some(*trigger_price),
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => f.write_str("Market"),
            OrderType::Limit { .. } => f.write_str("Limit"),
            OrderType::Stop { .. } => f.write_str("Stop"),
        }
    }
}

/// A live order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    /// Total order quantity, filled part included.
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    /// Can only reduce an existing position.
    pub close_only: bool,
}

impl Order {
    pub fn new(
        id: OrderId,
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        filled_quantity: Decimal,
        close_only: bool,
    ) -> Self {
        debug_assert!(filled_quantity >= Decimal::ZERO);
        Self {
            id,
            symbol,
            side,
            order_type,
            quantity,
            filled_quantity,
            close_only,
        }
    }

    /// Builds the order the exchange would hand back for `request`.
    pub fn from_request(id: OrderId, request: &OrderRequest) -> Self {
        Self::new(
            id,
            request.symbol.clone(),
            request.side,
            request.order_type,
            request.quantity,
            Decimal::ZERO,
            request.close_only,
        )
    }

    /// Leaves quantity. Never negative, even if the exchange over-reports fills.
    pub fn remaining(&self) -> Decimal {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }

    pub fn limit_price(&self) -> Option<Price> {
        match self.order_type {
            OrderType::Limit { price } => Some(price),
            _ => None,
        }
    }

    pub fn trigger_price(&self) -> Option<Price> {
        match self.order_type {
            OrderType::Stop { trigger_price } => Some(trigger_price),
            _ => None,
        }
    }

    /// Plain resting limit order, i.e. part of the quoting ladder.
    pub fn is_quote(&self) -> bool {
        self.order_type.is_limit() && !self.close_only
    }
}

/// Request for a new order. The exchange assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub close_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: Symbol, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            close_only: false,
        }
    }

    pub fn limit(symbol: Symbol, side: Side, quantity: Decimal, price: Price) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Limit { price },
            quantity,
            close_only: false,
        }
    }

    pub fn stop(symbol: Symbol, side: Side, quantity: Decimal, trigger_price: Price) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Stop { trigger_price },
            quantity,
            close_only: false,
        }
    }

    pub fn close_only(mut self) -> Self {
        self.close_only = true;
        self
    }
}

/// Change to an existing order, referencing it by id.
///
/// `quantity` is the new cumulative order quantity (filled part included), which is
/// what the exchange expects on amend. The order as it was read is kept alongside so
/// logs can show the before/after and dry-run can answer without an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amendment {
    pub order_id: OrderId,
    pub quantity: Option<Decimal>,
    pub price: Option<Price>,
    pub trigger_price: Option<Price>,
    pub original: Order,
}

impl Amendment {
    pub fn new(original: &Order) -> Self {
        Self {
            order_id: original.id.clone(),
            quantity: None,
            price: None,
            trigger_price: None,
            original: original.clone(),
        }
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_trigger_price(mut self, trigger_price: Price) -> Self {
        self.trigger_price = Some(trigger_price);
        self
    }

    pub fn side(&self) -> Side {
        self.original.side
    }

    /// Remaining quantity the order will have once the amend lands.
    pub fn target_remaining(&self) -> Decimal {
        match self.quantity {
            Some(total) => (total - self.original.filled_quantity).max(Decimal::ZERO),
            None => self.original.remaining(),
        }
    }

    /// The order as it would look after the exchange applied this amendment.
    pub fn applied(&self) -> Order {
        let mut order = self.original.clone();
        if let Some(quantity) = self.quantity {
            order.quantity = quantity;
        }
        order.order_type = match order.order_type {
            OrderType::Limit { price } => OrderType::Limit {
                price: self.price.unwrap_or(price),
            },
            OrderType::Stop { trigger_price } => OrderType::Stop {
                trigger_price: self.trigger_price.unwrap_or(trigger_price),
            },
            OrderType::Market => OrderType::Market,
        };
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit(filled: Decimal) -> Order {
        Order::new(
            OrderId::new("a1"),
            Symbol::new("XBTUSD"),
            Side::Buy,
            OrderType::Limit { price: Price::new_unchecked(dec!(100)) },
            dec!(100),
            filled,
            false,
        )
    }

    #[test]
    fn remaining_never_negative() {
        assert_eq!(limit(dec!(40)).remaining(), dec!(60));
        assert_eq!(limit(dec!(150)).remaining(), dec!(0));
    }

    #[test]
    fn price_fields_follow_variant() {
        let stop = OrderRequest::stop(
            Symbol::new("XBTUSD"),
            Side::Sell,
            dec!(100),
            Price::new_unchecked(dec!(95)),
        )
        .close_only();
        let order = Order::from_request(OrderId::new("s1"), &stop);

        assert_eq!(order.trigger_price().map(|p| p.value()), Some(dec!(95)));
        assert!(order.limit_price().is_none());
        assert!(order.close_only);
        assert!(!order.is_quote());
    }

    #[test]
    fn amendment_applies_cumulative_quantity() {
        let order = limit(dec!(40));
        let amend = Amendment::new(&order)
            .with_quantity(dec!(90))
            .with_price(Price::new_unchecked(dec!(101)));

        assert_eq!(amend.target_remaining(), dec!(50));

        let applied = amend.applied();
        assert_eq!(applied.remaining(), dec!(50));
        assert_eq!(applied.limit_price().map(|p| p.value()), Some(dec!(101)));
        assert_eq!(applied.id, order.id);
    }

    #[test]
    fn amending_a_stop_moves_only_the_trigger() {
        let stop = Order::new(
            OrderId::new("s1"),
            Symbol::new("XBTUSD"),
            Side::Sell,
            OrderType::Stop { trigger_price: Price::new_unchecked(dec!(95)) },
            dec!(100),
            dec!(0),
            true,
        );
        let applied = Amendment::new(&stop)
            .with_trigger_price(Price::new_unchecked(dec!(97)))
            .applied();

        assert_eq!(applied.trigger_price().map(|p| p.value()), Some(dec!(97)));
        assert_eq!(applied.quantity, dec!(100));
    }
}
