// 10.0: directional signal. the engine only ever sees a TradeDirective.
// the snapshot is passed in every call, signals keep no market state between calls.

use crate::market::MarketSnapshot;
use crate::types::TradeDirective;
use log::debug;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub trait SignalEngine: Send + Sync {
    fn evaluate(&self, snapshot: &MarketSnapshot) -> TradeDirective;
}

/// Never trades. Quoting only.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldSignal;

impl SignalEngine for HoldSignal {
    fn evaluate(&self, _snapshot: &MarketSnapshot) -> TradeDirective {
        TradeDirective::Hold
    }
}

// 10.1: book pressure. needs all three: heavier side overall, lopsided top level,
// and mid pulled away from mark in the same direction.
#[derive(Debug, Clone)]
pub struct DepthImbalanceSignal {
    /// Top level on one side must be this many times the other.
    pub top_level_factor: Decimal,
    /// Mid must sit this far from mark, in price units.
    pub mark_divergence: Decimal,
}

impl Default for DepthImbalanceSignal {
    fn default() -> Self {
        Self {
            top_level_factor: dec!(10),
            mark_divergence: dec!(10),
        }
    }
}

impl SignalEngine for DepthImbalanceSignal {
    fn evaluate(&self, snapshot: &MarketSnapshot) -> TradeDirective {
        let depth = &snapshot.depth;
        let (Some(top_bid), Some(top_ask)) = (depth.best_bid(), depth.best_ask()) else {
            return TradeDirective::Hold;
        };
        let Some(mark) = snapshot.instrument.mark_price else {
            return TradeDirective::Hold;
        };

        let bids = depth.total_bid_size();
        let asks = depth.total_ask_size();
        let mid = snapshot.ticker.mid.value();
        let mark = mark.value();

        debug!(
            "bids: {}, asks: {}, top bid: {}, top ask: {}, mark: {}, mid: {}",
            bids, asks, top_bid.size, top_ask.size, mark, mid
        );

        if bids < asks
            && top_bid.size * self.top_level_factor < top_ask.size
            && mark + self.mark_divergence < mid
        {
            TradeDirective::Sell
        } else if bids > asks
            && top_bid.size > top_ask.size * self.top_level_factor
            && mark - self.mark_divergence > mid
        {
            TradeDirective::Buy
        } else {
            TradeDirective::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{DepthLevel, Instrument, Margin, OrderBookDepth, Position, Ticker};
    use crate::types::{Price, Symbol, Timestamp};

    fn p(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn snapshot(bid_size: Decimal, ask_size: Decimal, mark: Decimal) -> MarketSnapshot {
        let mut instrument = Instrument::xbtusd();
        instrument.mark_price = Some(p(mark));
        MarketSnapshot {
            symbol: Symbol::new("XBTUSD"),
            instrument,
            ticker: Ticker::new(p(dec!(999.5)), p(dec!(1000.5)), p(dec!(1000))),
            depth: OrderBookDepth {
                bids: vec![DepthLevel { price: p(dec!(999.5)), size: bid_size }],
                asks: vec![DepthLevel { price: p(dec!(1000.5)), size: ask_size }],
            },
            position: Position::flat(Symbol::new("XBTUSD")),
            margin: Margin::uniform(dec!(1)),
            open_orders: Vec::new(),
            portfolio: Vec::new(),
            taken_at: Timestamp::from_millis(0),
        }
    }

    #[test]
    fn hold_always_holds() {
        assert_eq!(HoldSignal.evaluate(&snapshot(dec!(1), dec!(100), dec!(900))), TradeDirective::Hold);
    }

    #[test]
    fn heavy_asks_above_mark_sell() {
        let signal = DepthImbalanceSignal::default();
        assert_eq!(signal.evaluate(&snapshot(dec!(10), dec!(500), dec!(980))), TradeDirective::Sell);
    }

    #[test]
    fn heavy_bids_below_mark_buy() {
        let signal = DepthImbalanceSignal::default();
        assert_eq!(signal.evaluate(&snapshot(dec!(500), dec!(10), dec!(1020))), TradeDirective::Buy);
    }

    #[test]
    fn pressure_without_divergence_holds() {
        let signal = DepthImbalanceSignal::default();
        assert_eq!(signal.evaluate(&snapshot(dec!(10), dec!(500), dec!(1000))), TradeDirective::Hold);
    }

    #[test]
    fn empty_book_holds() {
        let mut snap = snapshot(dec!(10), dec!(500), dec!(980));
        snap.depth = OrderBookDepth::default();
        assert_eq!(DepthImbalanceSignal::default().evaluate(&snap), TradeDirective::Hold);
    }
}
