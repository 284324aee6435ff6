// 3.0: cross-instrument exposure. one PortfolioItem per tracked contract, summed into a currency delta.
// the settlement class decides how contracts convert into settlement currency.

use crate::market::{Instrument, MarketError, Position, SettlementClass};
use crate::types::{Price, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioItem {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub settlement: SettlementClass,
    /// Effective multiplier, already in settlement units.
    pub multiplier: Decimal,
    pub mark_price: Price,
    pub spot_price: Price,
}

impl PortfolioItem {
    pub fn from_parts(position: &Position, instrument: &Instrument) -> Result<Self, MarketError> {
        let missing = |field| MarketError::MissingField {
            symbol: instrument.symbol.clone(),
            field,
        };

        Ok(Self {
            symbol: instrument.symbol.clone(),
            quantity: position.quantity.value(),
            settlement: instrument.settlement_class()?,
            multiplier: instrument.effective_multiplier()?,
            mark_price: instrument.mark_price.ok_or_else(|| missing("mark price"))?,
            spot_price: instrument
                .indicative_settle_price
                .ok_or_else(|| missing("spot price"))?,
        })
    }

    // 3.1: one settlement-class formula, evaluated at whichever price is passed
    pub fn delta_at(&self, price: Price) -> Decimal {
        match self.settlement {
            SettlementClass::Quanto => self.quantity * self.multiplier * price.value(),
            // Price is never zero so the division can't fail
            SettlementClass::Inverse => (self.multiplier / price.value()) * self.quantity,
            SettlementClass::Linear => self.multiplier * self.quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioDelta {
    pub spot: Decimal,
    pub mark: Decimal,
    pub basis: Decimal,
}

pub fn calc_delta(items: &[PortfolioItem]) -> PortfolioDelta {
    let (spot, mark) = items.iter().fold((Decimal::ZERO, Decimal::ZERO), |(s, m), item| {
        (s + item.delta_at(item.spot_price), m + item.delta_at(item.mark_price))
    });

    PortfolioDelta {
        spot,
        mark,
        basis: mark - spot,
    }
}

// 3.2: cost of an order in settlement currency. negative raw multipliers mean inverse pricing.
pub fn order_cost(instrument: &Instrument, quantity: Decimal, price: Price) -> Decimal {
    let per_contract = if instrument.multiplier >= Decimal::ZERO {
        instrument.multiplier * price.value()
    } else {
        instrument.multiplier / price.value()
    };

    let settle = instrument
        .underlying_to_settle_multiplier
        .or(instrument.quote_to_settle_multiplier)
        .filter(|m| !m.is_zero())
        .map(|m| m.abs())
        .unwrap_or(Decimal::ONE);

    (quantity * per_contract).abs() / settle
}

pub fn order_margin(instrument: &Instrument, quantity: Decimal, price: Price) -> Decimal {
    order_cost(instrument, quantity, price) * instrument.init_margin
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignedSize;
    use rust_decimal_macros::dec;

    fn item(settlement: SettlementClass, multiplier: Decimal, qty: Decimal) -> PortfolioItem {
        PortfolioItem {
            symbol: Symbol::new("TEST"),
            quantity: qty,
            settlement,
            multiplier,
            mark_price: Price::new_unchecked(dec!(110)),
            spot_price: Price::new_unchecked(dec!(100)),
        }
    }

    #[test]
    fn linear_delta_ignores_price() {
        let d = calc_delta(&[item(SettlementClass::Linear, dec!(2), dec!(-30))]);
        assert_eq!(d.spot, dec!(-60));
        assert_eq!(d.mark, dec!(-60));
        assert_eq!(d.basis, dec!(0));
    }

    #[test]
    fn inverse_delta_divides_by_price() {
        let d = calc_delta(&[item(SettlementClass::Inverse, dec!(1), dec!(1000))]);
        assert_eq!(d.spot, dec!(10));
        assert_eq!(d.mark, dec!(1) / dec!(110) * dec!(1000));
        assert_eq!(d.basis, d.mark - d.spot);
    }

    #[test]
    fn quanto_delta_multiplies_price() {
        let d = calc_delta(&[item(SettlementClass::Quanto, dec!(0.001), dec!(10))]);
        assert_eq!(d.spot, dec!(1.000));
        assert_eq!(d.mark, dec!(1.100));
    }

    #[test]
    fn deltas_sum_across_items() {
        let d = calc_delta(&[
            item(SettlementClass::Linear, dec!(1), dec!(5)),
            item(SettlementClass::Linear, dec!(1), dec!(-2)),
        ]);
        assert_eq!(d.spot, dec!(3));
    }

    #[test]
    fn item_requires_prices() {
        let mut inst = Instrument::xbtusd();
        let pos = Position {
            quantity: SignedSize::new(dec!(100)),
            ..Position::flat(inst.symbol.clone())
        };
        assert!(PortfolioItem::from_parts(&pos, &inst).is_err());

        inst.mark_price = Some(Price::new_unchecked(dec!(10000)));
        inst.indicative_settle_price = Some(Price::new_unchecked(dec!(10000)));
        let item = PortfolioItem::from_parts(&pos, &inst).unwrap();
        assert_eq!(item.settlement, SettlementClass::Inverse);
        assert_eq!(item.multiplier, dec!(1));
    }

    #[test]
    fn inverse_cost_in_settlement_units() {
        let inst = Instrument::xbtusd();
        let price = Price::new_unchecked(dec!(10000));
        assert_eq!(order_cost(&inst, dec!(100), price), dec!(0.01));
        assert_eq!(order_margin(&inst, dec!(100), price), dec!(0.0001));
    }
}
