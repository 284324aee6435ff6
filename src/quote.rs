//! Reference prices for quoting.
//!
//! Anchors start one tick inside the touch, widen when the spread is too tight and are
//! rounded to the tick. Every ladder rung is priced from these anchors by
//! [`QuoteAnchors::price_offset`].

use crate::config::QuotingSettings;
use crate::market::{to_nearest, MarketError, MarketSnapshot};
use crate::types::Price;
use log::info;
use rust_decimal::{Decimal, MathematicalOps};

/// Buy/sell/mid anchors for one cycle. Invariant: `start_buy < start_sell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteAnchors {
    pub start_buy: Price,
    pub start_sell: Price,
    pub mid: Price,
    pub tick_size: Decimal,
    pub tick_log: usize,
    interval: Decimal,
    maintain_spreads: bool,
}

impl QuoteAnchors {
    pub fn compute(snapshot: &MarketSnapshot, params: &QuotingSettings) -> Result<Self, MarketError> {
        let instrument = &snapshot.instrument;
        let ticker = &snapshot.ticker;
        let tick = instrument.tick_size;
        let tick_log = instrument.tick_log;

        let mut buy = ticker.best_bid.value() + tick;
        let mut sell = ticker.best_ask.value() - tick;

        // don't step in front of our own order at the touch
        if params.maintain_spreads {
            if snapshot.highest_own_buy() == Some(ticker.best_bid) {
                buy = ticker.best_bid.value();
            }
            if snapshot.lowest_own_sell() == Some(ticker.best_ask) {
                sell = ticker.best_ask.value();
            }
        }

        if buy * (Decimal::ONE + params.min_spread) > sell {
            let half = params.min_spread / Decimal::TWO;
            buy *= Decimal::ONE - half;
            sell *= Decimal::ONE + half;
        }

        let (buy, sell) = uncross(
            to_nearest(buy, tick).ok_or(MarketError::InvalidTickSize(tick))?,
            to_nearest(sell, tick).ok_or(MarketError::InvalidTickSize(tick))?,
            tick,
        );

        let anchors = Self {
            start_buy: Price::new(buy).ok_or(MarketError::InvalidPrice(buy))?,
            start_sell: Price::new(sell).ok_or(MarketError::InvalidPrice(sell))?,
            mid: ticker.mid,
            tick_size: tick,
            tick_log,
            interval: params.interval,
            maintain_spreads: params.maintain_spreads,
        };

        info!(
            "{} Ticker: Buy: {:.*}, Sell: {:.*}",
            instrument.symbol, tick_log, ticker.best_bid, tick_log, ticker.best_ask
        );
        info!(
            "Start Positions: Buy: {:.*}, Sell: {:.*}, Mid: {:.*}",
            tick_log, anchors.start_buy, tick_log, anchors.start_sell, tick_log, anchors.mid
        );

        Ok(anchors)
    }

    /// Price for ladder rung `index`. Negative is a buy, positive a sell. Zero is the mid.
    pub fn price_offset(&self, index: i32) -> Result<Price, MarketError> {
        if index == 0 {
            return Ok(self.mid);
        }

        let (anchor, steps) = if self.maintain_spreads {
            // rung +-1 sits right on the anchor
            let anchor = if index < 0 { self.start_buy } else { self.start_sell };
            (anchor, index - index.signum())
        } else {
            // a rung never anchors on the wrong side of the book
            let anchor = if index < 0 {
                self.start_buy.min(self.start_sell)
            } else {
                self.start_sell.max(self.start_buy)
            };
            (anchor, index)
        };

        let factor = (Decimal::ONE + self.interval).powu(u64::from(steps.unsigned_abs()));
        let raw = if steps < 0 {
            anchor
                .value()
                .checked_div(factor)
                .ok_or(MarketError::InvalidPrice(anchor.value()))?
        } else {
            anchor.value() * factor
        };

        let rounded = to_nearest(raw, self.tick_size).ok_or(MarketError::InvalidTickSize(self.tick_size))?;
        Price::new(rounded).ok_or(MarketError::InvalidPrice(rounded))
    }
}

// 4.1: rounding can collapse a tight spread. push both sides out by whole ticks until buy < sell.
fn uncross(buy: Decimal, sell: Decimal, tick: Decimal) -> (Decimal, Decimal) {
    if buy < sell {
        return (buy, sell);
    }
    let gap_ticks = ((buy - sell) / tick).floor();
    let shift = ((gap_ticks / Decimal::TWO).floor() + Decimal::ONE) * tick;
    (buy - shift, sell + shift)
}
