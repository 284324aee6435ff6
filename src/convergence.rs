//! Reconciliation of desired quotes against live quotes.
//!
//! Each cycle builds the ladder it wants from scratch ([`build_ladder`]) and diffs it
//! against what the exchange says is resting ([`diff`]). Orders are matched by
//! position within each side, not by price: the i-th live buy is compared with the
//! i-th desired buy. Both lists run outermost price first, so when the inner quote
//! gets taken only the inside moves and the outer rungs stay put.
//!
//! Only plain limit orders take part. Close-only orders belong to the bracket manager.

use crate::config::QuotingSettings;
use crate::market::MarketError;
use crate::order::{Amendment, Order, OrderRequest};
use crate::quote::QuoteAnchors;
use crate::risk::RiskGuard;
use crate::types::{Price, Side, SignedSize, Symbol};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// One rung of the ladder we want resting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredOrder {
    pub side: Side,
    pub price: Price,
    /// Remaining quantity we want on the book.
    pub quantity: Decimal,
}

/// Desired ladder, each side ordered outermost price first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredOrderSet {
    pub buys: Vec<DesiredOrder>,
    pub sells: Vec<DesiredOrder>,
}

impl DesiredOrderSet {
    pub fn is_empty(&self) -> bool {
        self.buys.is_empty() && self.sells.is_empty()
    }

    pub fn side(&self, side: Side) -> &[DesiredOrder] {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }
}

/// Actions one diff produces. Every element references the live order it touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingActions {
    pub to_amend: Vec<Amendment>,
    pub to_create: Vec<OrderRequest>,
    pub to_cancel: Vec<Order>,
}

impl PendingActions {
    pub fn is_empty(&self) -> bool {
        self.to_amend.is_empty() && self.to_create.is_empty() && self.to_cancel.is_empty()
    }
}

/// Size and price for rung `index` (negative buys, positive sells).
pub fn prepare_order<R: Rng + ?Sized>(
    index: i32,
    anchors: &QuoteAnchors,
    params: &QuotingSettings,
    rng: &mut R,
) -> Result<DesiredOrder, MarketError> {
    let quantity = if params.random_order_size {
        random_size(params.min_order_size, params.max_order_size, rng)
    } else {
        params.order_start_size
            + Decimal::from(index.unsigned_abs().saturating_sub(1)) * params.order_step_size
    };

    Ok(DesiredOrder {
        side: if index < 0 { Side::Buy } else { Side::Sell },
        price: anchors.price_offset(index)?,
        quantity,
    })
}

// whole contracts in [min, max]
fn random_size<R: Rng + ?Sized>(min: Decimal, max: Decimal, rng: &mut R) -> Decimal {
    match (min.ceil().to_i64(), max.floor().to_i64()) {
        (Some(lo), Some(hi)) if lo <= hi => Decimal::from(rng.gen_range(lo..=hi)),
        _ => min,
    }
}

/// Build the full ladder, outside in. A side whose position limit is hit gets no rungs.
pub fn build_ladder<R: Rng + ?Sized>(
    anchors: &QuoteAnchors,
    params: &QuotingSettings,
    guard: &RiskGuard,
    position: SignedSize,
    rng: &mut R,
) -> Result<DesiredOrderSet, MarketError> {
    let mut set = DesiredOrderSet::default();
    let pairs = i32::try_from(params.order_pairs).unwrap_or(i32::MAX);

    for i in (1..=pairs).rev() {
        if !guard.long_limit_exceeded(position) {
            set.buys.push(prepare_order(-i, anchors, params, rng)?);
        }
        if !guard.short_limit_exceeded(position) {
            set.sells.push(prepare_order(i, anchors, params, rng)?);
        }
    }
    Ok(set)
}

/// True when `desired` has drifted from `live` by more than the tolerance.
pub fn relist_exceeded(desired: Price, live: Price, relist_interval: Decimal) -> bool {
    // Price is positive, the division is safe
    (desired.value() / live.value() - Decimal::ONE).abs() > relist_interval
}

/// Diff live quotes against the desired ladder.
///
/// `live` is taken in exchange order. Close-only and non-limit orders are ignored.
pub fn diff(
    symbol: &Symbol,
    live: &[Order],
    desired: &DesiredOrderSet,
    relist_interval: Decimal,
) -> PendingActions {
    let mut actions = PendingActions::default();

    for side in [Side::Buy, Side::Sell] {
        let live_side: Vec<&Order> = live.iter().filter(|o| o.is_quote() && o.side == side).collect();
        let wanted = desired.side(side);
        let (first_amend, first_cancel) = (actions.to_amend.len(), actions.to_cancel.len());

        for (i, order) in live_side.iter().enumerate() {
            let Some(want) = wanted.get(i) else {
                actions.to_cancel.push((*order).clone());
                continue;
            };
            let Some(live_price) = order.limit_price() else {
                continue;
            };

            if want.quantity != order.remaining()
                || relist_exceeded(want.price, live_price, relist_interval)
            {
                actions.to_amend.push(
                    Amendment::new(order)
                        .with_quantity(order.filled_quantity + want.quantity)
                        .with_price(want.price),
                );
            }
        }

        for want in wanted.iter().skip(live_side.len()) {
            actions
                .to_create
                .push(OrderRequest::limit(symbol.clone(), want.side, want.quantity, want.price));
        }

        // the exchange lists live orders in its own order
        actions.to_amend[first_amend..].sort_by(|a, b| outermost_first(side, a.price, b.price));
        actions.to_cancel[first_cancel..].sort_by(|a, b| outermost_first(side, a.limit_price(), b.limit_price()));
    }

    actions
}

fn outermost_first(side: Side, a: Option<Price>, b: Option<Price>) -> Ordering {
    match side {
        Side::Buy => a.cmp(&b),
        Side::Sell => b.cmp(&a),
    }
}

/// Re-base amendments on a fresh read of the live orders.
///
/// Cumulative quantity is recomputed from the fresh fill so a fill that landed after
/// the diff isn't double counted. None if any referenced order is gone.
pub fn refresh_amendments(amendments: &[Amendment], fresh: &[Order]) -> Option<Vec<Amendment>> {
    amendments
        .iter()
        .map(|amend| {
            let current = fresh.iter().find(|o| o.id == amend.order_id)?;
            let mut refreshed = amend.clone();
            if let Some(total) = amend.quantity {
                let wanted_remaining = total - amend.original.filled_quantity;
                refreshed.quantity = Some(current.filled_quantity + wanted_remaining);
            }
            refreshed.original = current.clone();
            Some(refreshed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderType;
    use crate::types::OrderId;
    use rust_decimal_macros::dec;

    fn p(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn sym() -> Symbol {
        Symbol::new("XBTUSD")
    }

    fn live(id: &str, side: Side, price: Decimal, qty: Decimal, filled: Decimal) -> Order {
        Order::new(OrderId::new(id), sym(), side, OrderType::Limit { price: p(price) }, qty, filled, false)
    }

    fn want(side: Side, price: Decimal, qty: Decimal) -> DesiredOrder {
        DesiredOrder { side, price: p(price), quantity: qty }
    }

    #[test]
    fn matching_state_is_a_noop() {
        let orders = vec![
            live("b2", Side::Buy, dec!(98), dec!(200), dec!(0)),
            live("b1", Side::Buy, dec!(99), dec!(150), dec!(50)),
            live("s1", Side::Sell, dec!(101), dec!(100), dec!(0)),
        ];
        let desired = DesiredOrderSet {
            buys: vec![want(Side::Buy, dec!(98), dec!(200)), want(Side::Buy, dec!(99.5), dec!(100))],
            sells: vec![want(Side::Sell, dec!(101), dec!(100))],
        };
        // 99.5 vs 99 is ~0.5%, inside a 1% relist interval
        assert!(diff(&sym(), &orders, &desired, dec!(0.01)).is_empty());
    }

    #[test]
    fn quantity_change_amends_cumulative() {
        let orders = vec![live("b1", Side::Buy, dec!(99), dec!(100), dec!(40))];
        let desired = DesiredOrderSet {
            buys: vec![want(Side::Buy, dec!(99), dec!(100))],
            sells: vec![],
        };
        let actions = diff(&sym(), &orders, &desired, dec!(0.01));

        assert_eq!(actions.to_amend.len(), 1);
        assert_eq!(actions.to_amend[0].quantity, Some(dec!(140)));
        assert_eq!(actions.to_amend[0].target_remaining(), dec!(100));
    }

    #[test]
    fn price_drift_beyond_tolerance_amends() {
        let orders = vec![live("s1", Side::Sell, dec!(100), dec!(100), dec!(0))];
        let desired = DesiredOrderSet {
            buys: vec![],
            sells: vec![want(Side::Sell, dec!(102), dec!(100))],
        };
        let actions = diff(&sym(), &orders, &desired, dec!(0.01));
        assert_eq!(actions.to_amend.len(), 1);
        assert_eq!(actions.to_amend[0].price, Some(p(dec!(102))));
    }

    #[test]
    fn tails_are_created_and_canceled() {
        let orders = vec![
            live("b1", Side::Buy, dec!(99), dec!(100), dec!(0)),
            live("s1", Side::Sell, dec!(101), dec!(100), dec!(0)),
            live("s2", Side::Sell, dec!(102), dec!(100), dec!(0)),
        ];
        let desired = DesiredOrderSet {
            buys: vec![want(Side::Buy, dec!(99), dec!(100)), want(Side::Buy, dec!(98), dec!(100))],
            sells: vec![want(Side::Sell, dec!(101), dec!(100))],
        };
        let actions = diff(&sym(), &orders, &desired, dec!(0.01));

        assert!(actions.to_amend.is_empty());
        assert_eq!(actions.to_create.len(), 1);
        assert_eq!(actions.to_create[0].order_type, OrderType::Limit { price: p(dec!(98)) });
        assert_eq!(actions.to_cancel.len(), 1);
        assert_eq!(actions.to_cancel[0].id.as_str(), "s2");
    }

    #[test]
    fn actions_run_outermost_first() {
        let orders = vec![
            live("b1", Side::Buy, dec!(90), dec!(100), dec!(0)),
            live("b2", Side::Buy, dec!(91), dec!(100), dec!(0)),
            live("s1", Side::Sell, dec!(101), dec!(100), dec!(0)),
            live("s2", Side::Sell, dec!(102), dec!(100), dec!(0)),
            live("s3", Side::Sell, dec!(103), dec!(100), dec!(0)),
        ];
        let desired = DesiredOrderSet {
            buys: vec![want(Side::Buy, dec!(97), dec!(100)), want(Side::Buy, dec!(95), dec!(100))],
            sells: vec![want(Side::Sell, dec!(101), dec!(100))],
        };
        let actions = diff(&sym(), &orders, &desired, dec!(0.01));

        let amended: Vec<&str> = actions.to_amend.iter().map(|a| a.order_id.as_str()).collect();
        assert_eq!(amended, vec!["b2", "b1"]);
        let canceled: Vec<&str> = actions.to_cancel.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(canceled, vec!["s3", "s2"]);
    }

    #[test]
    fn protective_orders_are_invisible() {
        let stop = Order::new(
            OrderId::new("sl"),
            sym(),
            Side::Sell,
            OrderType::Stop { trigger_price: p(dec!(90)) },
            dec!(100),
            dec!(0),
            true,
        );
        let mut tp = live("tp", Side::Sell, dec!(120), dec!(100), dec!(0));
        tp.close_only = true;

        let actions = diff(&sym(), &[stop, tp], &DesiredOrderSet::default(), dec!(0.01));
        assert!(actions.is_empty());
    }

    #[test]
    fn refresh_uses_fresh_fills() {
        let order = live("b1", Side::Buy, dec!(99), dec!(100), dec!(0));
        let amend = Amendment::new(&order).with_quantity(dec!(150)).with_price(p(dec!(98)));

        let mut fresh = order.clone();
        fresh.filled_quantity = dec!(30);
        let refreshed = refresh_amendments(&[amend.clone()], &[fresh]).unwrap();
        assert_eq!(refreshed[0].quantity, Some(dec!(180)));
        assert_eq!(refreshed[0].target_remaining(), dec!(150));

        assert!(refresh_amendments(&[amend], &[]).is_none());
    }

    #[test]
    fn random_size_stays_in_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let size = random_size(dec!(50), dec!(200), &mut rng);
            assert!(size >= dec!(50) && size <= dec!(200));
            assert_eq!(size, size.trunc());
        }
    }
}
