//! Bracket orders: a market entry plus its protective stop and take-profit.
//!
//! Everything here is planning only. Functions look at the position, the current mid
//! and the close-only orders resting on the exchange, and return the requests or
//! amendments the engine should send. Sending them (and the delay before the
//! take-profit) belongs to the engine.

use crate::market::{to_nearest, MarketError, Position};
use crate::order::{Amendment, Order, OrderRequest, OrderType};
use crate::types::{Price, Side, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Distances are in price units, sizes in contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BracketParams {
    pub entry_size: Decimal,
    /// Initial stop distance from mid.
    pub stop_distance: Decimal,
    /// Initial take-profit distance from mid.
    pub limit_distance: Decimal,
    /// How close mid may get to the take-profit before it is pushed out.
    pub limit_step: Decimal,
    /// Extra room added when the take-profit is pushed out.
    pub limit_nudge: Decimal,
    /// Distance a trailed stop keeps from mid.
    pub stop_step: Decimal,
    /// Unrealized move past entry needed before the stop starts trailing.
    pub move_trigger: Decimal,
    pub take_profit_delay_ms: u64,
    /// Recreate a missing stop or take-profit for an open position.
    pub repair_protection: bool,
    /// Cancel close-only leftovers once the position is flat.
    pub cancel_orphaned_protection: bool,
}

impl Default for BracketParams {
    fn default() -> Self {
        Self {
            entry_size: dec!(100),
            stop_distance: dec!(50),
            limit_distance: dec!(100),
            limit_step: dec!(20),
            limit_nudge: dec!(10),
            stop_step: dec!(30),
            move_trigger: dec!(40),
            take_profit_delay_ms: 15_000,
            repair_protection: true,
            cancel_orphaned_protection: true,
        }
    }
}

impl BracketParams {
    pub fn take_profit_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.take_profit_delay_ms)
    }
}

/// Orders for a fresh entry. `take_profit` must go out in a later batch, once the
/// position exists, or the exchange rejects the close-only limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketPlan {
    pub entry: OrderRequest,
    pub stop: OrderRequest,
    pub take_profit: OrderRequest,
}

impl BracketPlan {
    pub fn new(
        symbol: &Symbol,
        side: Side,
        quantity: Decimal,
        mid: Price,
        tick_size: Decimal,
        params: &BracketParams,
    ) -> Result<Self, MarketError> {
        let exit = side.opposite();
        Ok(Self {
            entry: OrderRequest::market(symbol.clone(), side, quantity),
            stop: OrderRequest::stop(
                symbol.clone(),
                exit,
                quantity,
                stop_price(side, mid, params.stop_distance, tick_size)?,
            )
            .close_only(),
            take_profit: OrderRequest::limit(
                symbol.clone(),
                exit,
                quantity,
                take_profit_price(side, mid, params.limit_distance, tick_size)?,
            )
            .close_only(),
        })
    }

    /// Entry and stop, sent together.
    pub fn first_batch(&self) -> Vec<OrderRequest> {
        vec![self.entry.clone(), self.stop.clone()]
    }
}

// stop sits on the losing side of the entry
fn stop_price(entry_side: Side, mid: Price, distance: Decimal, tick: Decimal) -> Result<Price, MarketError> {
    round(mid.value() - entry_side.sign() * distance, tick)
}

fn take_profit_price(entry_side: Side, mid: Price, distance: Decimal, tick: Decimal) -> Result<Price, MarketError> {
    round(mid.value() + entry_side.sign() * distance, tick)
}

fn round(value: Decimal, tick: Decimal) -> Result<Price, MarketError> {
    let rounded = to_nearest(value, tick).ok_or(MarketError::InvalidTickSize(tick))?;
    Price::new(rounded).ok_or(MarketError::InvalidPrice(rounded))
}

/// Close-only orders that protect a position. Limits are take-profits, Stops are stops.
pub fn protective_orders(orders: &[Order]) -> impl Iterator<Item = &Order> {
    orders.iter().filter(|o| o.close_only)
}

/// Leftover protection once the position is gone.
pub fn orphaned_protection<'a>(orders: &'a [Order], position: &Position) -> Vec<&'a Order> {
    if position.is_open() {
        return Vec::new();
    }
    protective_orders(orders).collect()
}

// 2.1: trailing stop. one-directional: a long's stop only goes up, a short's only down.
pub fn ratchet_stop(
    position_side: Side,
    entry: Price,
    current_stop: Price,
    mid: Price,
    tick: Decimal,
    params: &BracketParams,
) -> Result<Option<Price>, MarketError> {
    let sign = position_side.sign();
    let profit = (mid.value() - entry.value()) * sign;
    let room = (mid.value() - current_stop.value()) * sign;

    if profit < params.move_trigger || room <= params.stop_step {
        return Ok(None);
    }

    let mut target =
        to_nearest(mid.value() - sign * params.stop_step, tick).ok_or(MarketError::InvalidTickSize(tick))?;
    // rounded toward mid: back off one tick so the gap stays at least stop_step
    if (mid.value() - target) * sign < params.stop_step {
        target -= sign * tick;
    }
    let candidate = Price::new(target).ok_or(MarketError::InvalidPrice(target))?;
    // rounding can eat the improvement
    let improves = (candidate.value() - current_stop.value()) * sign > Decimal::ZERO;
    Ok(improves.then_some(candidate))
}

// take-profit that mid has caught up with gets pushed out past mid
pub fn nudge_take_profit(
    position_side: Side,
    current: Price,
    mid: Price,
    tick: Decimal,
    params: &BracketParams,
) -> Result<Option<Price>, MarketError> {
    let sign = position_side.sign();
    let threshold = mid.value() + sign * params.limit_step;

    if (threshold - current.value()) * sign <= Decimal::ZERO {
        return Ok(None);
    }
    let target = round(threshold + sign * params.limit_nudge, tick)?;
    Ok((target != current).then_some(target))
}

/// Amendments for the protective orders of an open position. Orders that need no
/// change are left out.
pub fn plan_adjustments(
    position: &Position,
    orders: &[Order],
    mid: Price,
    tick: Decimal,
    params: &BracketParams,
) -> Result<Vec<Amendment>, MarketError> {
    let Some(side) = position.side() else {
        return Ok(Vec::new());
    };
    let exit = side.opposite();

    let mut amendments = Vec::new();
    for order in protective_orders(orders).filter(|o| o.side == exit) {
        match order.order_type {
            OrderType::Limit { price } => {
                if let Some(new_price) = nudge_take_profit(side, price, mid, tick, params)? {
                    amendments.push(Amendment::new(order).with_price(new_price));
                }
            }
            OrderType::Stop { trigger_price } => {
                let Some(entry) = position.avg_entry_price else {
                    continue;
                };
                if let Some(new_stop) = ratchet_stop(side, entry, trigger_price, mid, tick, params)? {
                    amendments.push(Amendment::new(order).with_trigger_price(new_stop));
                }
            }
            OrderType::Market => {}
        }
    }
    Ok(amendments)
}

/// Protection an open position should have but doesn't.
pub fn plan_repairs(
    position: &Position,
    orders: &[Order],
    mid: Price,
    tick: Decimal,
    params: &BracketParams,
) -> Result<Vec<OrderRequest>, MarketError> {
    let Some(side) = position.side() else {
        return Ok(Vec::new());
    };
    let exit = side.opposite();
    let quantity = position.quantity.abs();

    let mut has_stop = false;
    let mut has_take_profit = false;
    for order in protective_orders(orders).filter(|o| o.side == exit) {
        has_stop |= order.order_type.is_stop();
        has_take_profit |= order.order_type.is_limit();
    }

    let mut repairs = Vec::new();
    if !has_take_profit {
        let price = take_profit_price(side, mid, params.limit_distance, tick)?;
        repairs.push(OrderRequest::limit(position.symbol.clone(), exit, quantity, price).close_only());
    }
    if !has_stop {
        let trigger = stop_price(side, mid, params.stop_distance, tick)?;
        repairs.push(OrderRequest::stop(position.symbol.clone(), exit, quantity, trigger).close_only());
    }
    Ok(repairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderId, SignedSize};

    fn p(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn symbol() -> Symbol {
        Symbol::new("XBTUSD")
    }

    fn long(entry: Decimal) -> Position {
        Position {
            quantity: SignedSize::new(dec!(100)),
            avg_entry_price: Some(p(entry)),
            ..Position::flat(symbol())
        }
    }

    fn short(entry: Decimal) -> Position {
        Position {
            quantity: SignedSize::new(dec!(-100)),
            avg_entry_price: Some(p(entry)),
            ..Position::flat(symbol())
        }
    }

    fn close_only(id: &str, side: Side, order_type: OrderType) -> Order {
        Order::new(OrderId::new(id), symbol(), side, order_type, dec!(100), dec!(0), true)
    }

    #[test]
    fn buy_bracket_layout() {
        let plan = BracketPlan::new(&symbol(), Side::Buy, dec!(100), p(dec!(1000)), dec!(0.5), &BracketParams::default()).unwrap();

        assert_eq!(plan.entry.order_type, OrderType::Market);
        assert_eq!(plan.entry.side, Side::Buy);
        assert_eq!(plan.stop.side, Side::Sell);
        assert!(plan.stop.close_only);
        assert_eq!(plan.stop.order_type, OrderType::Stop { trigger_price: p(dec!(950)) });
        assert_eq!(plan.take_profit.side, Side::Sell);
        assert!(plan.take_profit.close_only);
        assert_eq!(plan.take_profit.order_type, OrderType::Limit { price: p(dec!(1100)) });

        let first = plan.first_batch();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|r| !r.order_type.is_limit()));
    }

    #[test]
    fn sell_bracket_mirrors() {
        let plan = BracketPlan::new(&symbol(), Side::Sell, dec!(100), p(dec!(1000)), dec!(0.5), &BracketParams::default()).unwrap();
        assert_eq!(plan.stop.order_type, OrderType::Stop { trigger_price: p(dec!(1050)) });
        assert_eq!(plan.take_profit.order_type, OrderType::Limit { price: p(dec!(900)) });
        assert_eq!(plan.stop.side, Side::Buy);
    }

    #[test]
    fn bracket_below_zero_is_invalid_price() {
        let result = BracketPlan::new(&symbol(), Side::Buy, dec!(100), p(dec!(10)), dec!(0.5), &BracketParams::default());
        assert!(matches!(result, Err(MarketError::InvalidPrice(_))));
    }

    #[test]
    fn stop_waits_for_move_trigger() {
        let params = BracketParams::default();
        // up 30, trigger is 40
        let r = ratchet_stop(Side::Buy, p(dec!(1000)), p(dec!(950)), p(dec!(1030)), dec!(0.5), &params).unwrap();
        assert_eq!(r, None);

        // up 60: new stop at 1060 - 30
        let r = ratchet_stop(Side::Buy, p(dec!(1000)), p(dec!(950)), p(dec!(1060)), dec!(0.5), &params).unwrap();
        assert_eq!(r, Some(p(dec!(1030))));
    }

    #[test]
    fn stop_never_loosens() {
        let params = BracketParams::default();
        // already within stop_step of mid: no change
        let r = ratchet_stop(Side::Buy, p(dec!(1000)), p(dec!(1040)), p(dec!(1060)), dec!(0.5), &params).unwrap();
        assert_eq!(r, None);

        // short: stop moves down only
        let r = ratchet_stop(Side::Sell, p(dec!(1000)), p(dec!(1050)), p(dec!(940)), dec!(0.5), &params).unwrap();
        assert_eq!(r, Some(p(dec!(970))));
    }

    #[test]
    fn stop_keeps_min_step_after_rounding() {
        let params = BracketParams {
            stop_step: dec!(30.4),
            ..BracketParams::default()
        };
        // 1100 - 30.4 = 1069.6, nearest tick 1070 is only 30 from mid
        let r = ratchet_stop(Side::Buy, p(dec!(1000)), p(dec!(900)), p(dec!(1100)), dec!(1), &params).unwrap();
        assert_eq!(r, Some(p(dec!(1069))));

        let r = ratchet_stop(Side::Sell, p(dec!(1000)), p(dec!(1100)), p(dec!(900)), dec!(1), &params).unwrap();
        assert_eq!(r, Some(p(dec!(931))));

        // already a whole tick away: nearest is fine
        let r = ratchet_stop(Side::Buy, p(dec!(1000)), p(dec!(900)), p(dec!(1100)), dec!(0.5), &BracketParams::default()).unwrap();
        assert_eq!(r, Some(p(dec!(1070))));
    }

    #[test]
    fn take_profit_pushed_out_when_caught() {
        let params = BracketParams::default();
        // long TP at 1100, mid 1090: 1090 + 20 > 1100 -> 1120
        let r = nudge_take_profit(Side::Buy, p(dec!(1100)), p(dec!(1090)), dec!(0.5), &params).unwrap();
        assert_eq!(r, Some(p(dec!(1120))));

        // mid far away: untouched
        let r = nudge_take_profit(Side::Buy, p(dec!(1100)), p(dec!(1000)), dec!(0.5), &params).unwrap();
        assert_eq!(r, None);

        // short TP at 900, mid 910: 890 < 900 -> 880
        let r = nudge_take_profit(Side::Sell, p(dec!(900)), p(dec!(910)), dec!(0.5), &params).unwrap();
        assert_eq!(r, Some(p(dec!(880))));
    }

    #[test]
    fn adjustments_reference_order_ids() {
        let orders = vec![
            close_only("tp", Side::Sell, OrderType::Limit { price: p(dec!(1100)) }),
            close_only("sl", Side::Sell, OrderType::Stop { trigger_price: p(dec!(950)) }),
        ];
        let amends = plan_adjustments(&long(dec!(1000)), &orders, p(dec!(1090)), dec!(0.5), &BracketParams::default()).unwrap();

        assert_eq!(amends.len(), 2);
        assert_eq!(amends[0].order_id.as_str(), "tp");
        assert_eq!(amends[0].price, Some(p(dec!(1120))));
        assert_eq!(amends[1].order_id.as_str(), "sl");
        assert_eq!(amends[1].trigger_price, Some(p(dec!(1060))));
    }

    #[test]
    fn quotes_are_not_protection() {
        let quote = Order::new(OrderId::new("q"), symbol(), Side::Sell, OrderType::Limit { price: p(dec!(1001)) }, dec!(10), dec!(0), false);
        let amends = plan_adjustments(&long(dec!(1000)), &[quote], p(dec!(1090)), dec!(0.5), &BracketParams::default()).unwrap();
        assert!(amends.is_empty());
    }

    #[test]
    fn repairs_fill_missing_protection() {
        let tp = close_only("tp", Side::Buy, OrderType::Limit { price: p(dec!(900)) });
        let repairs = plan_repairs(&short(dec!(1000)), &[tp], p(dec!(1000)), dec!(0.5), &BracketParams::default()).unwrap();

        assert_eq!(repairs.len(), 1);
        assert_eq!(repairs[0].side, Side::Buy);
        assert_eq!(repairs[0].order_type, OrderType::Stop { trigger_price: p(dec!(1050)) });
        assert_eq!(repairs[0].quantity, dec!(100));

        let flat = plan_repairs(&Position::flat(symbol()), &[], p(dec!(1000)), dec!(0.5), &BracketParams::default()).unwrap();
        assert!(flat.is_empty());
    }

    #[test]
    fn orphans_only_when_flat() {
        let orders = vec![close_only("sl", Side::Sell, OrderType::Stop { trigger_price: p(dec!(950)) })];
        assert!(orphaned_protection(&orders, &long(dec!(1000))).is_empty());
        assert_eq!(orphaned_protection(&orders, &Position::flat(symbol())).len(), 1);
    }
}
