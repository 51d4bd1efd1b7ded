//! Pricing engine: line items in, totals breakdown out.
//!
//! Pure and deterministic. Sums are taken exactly and rounded once at the
//! end, which keeps the result independent of item order.

use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::cart::LineItem;
use crate::domain::value_objects::Money;

/// Carts below this subtotal pay the flat delivery fee.
pub const FREE_DELIVERY_THRESHOLD: Money = Money::new(dec!(399));
pub const FLAT_DELIVERY_FEE: Money = Money::new(dec!(50));
pub const PLATFORM_FEE: Money = Money::new(dec!(10));

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_items: u32,
    pub subtotal: Money,
    pub discount: Money,
    pub delivery_charges: Money,
    pub platform_fees: Money,
    pub total_amount: Money,
}

pub fn compute_totals(items: &[LineItem]) -> Totals {
    if items.is_empty() {
        return Totals::default();
    }

    let total_items = items.iter().map(|i| i.quantity.value()).sum();
    let subtotal: Money = items.iter().map(LineItem::line_total).sum();
    // Coupons are not modelled yet.
    let discount = Money::ZERO;

    let charged: Vec<&LineItem> = items.iter().filter(|i| i.delivery_charge.is_positive()).collect();
    let delivery_charges = if !charged.is_empty() {
        charged.iter().map(|i| i.delivery_charge.multiply(i.quantity.value())).sum()
    } else if subtotal < FREE_DELIVERY_THRESHOLD {
        FLAT_DELIVERY_FEE
    } else {
        Money::ZERO
    };

    let platform_fees = if subtotal.is_positive() { PLATFORM_FEE } else { Money::ZERO };
    let total_amount = (subtotal - discount + delivery_charges + platform_fees).max_zero();

    Totals {
        total_items,
        subtotal: subtotal.rounded(),
        discount: discount.rounded(),
        delivery_charges: delivery_charges.rounded(),
        platform_fees: platform_fees.rounded(),
        total_amount: total_amount.rounded(),
    }
}

/// Totals plus the MRP comparison shown on the order review.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    #[serde(flatten)]
    pub totals: Totals,
    pub mrp_total: Money,
    /// `mrp_total - subtotal`, never negative.
    pub savings: Money,
}

impl OrderSummary {
    pub fn from_items(items: &[LineItem]) -> Self {
        let totals = compute_totals(items);
        let mrp_total: Money = items
            .iter()
            .map(|i| i.original_price.unwrap_or(i.unit_price).multiply(i.quantity.value()))
            .sum();
        let savings = (mrp_total - totals.subtotal).max_zero().rounded();
        Self { totals, mrp_total: mrp_total.rounded(), savings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::test_support::line;
    use rust_decimal::Decimal;

    fn m(v: Decimal) -> Money { Money::new(v) }

    #[test]
    fn test_empty_is_all_zero() {
        assert_eq!(compute_totals(&[]), Totals::default());
    }

    #[test]
    fn test_delivery_fee_boundary() {
        let below = compute_totals(&[line("A", dec!(398.99), 1, Decimal::ZERO)]);
        assert_eq!(below.delivery_charges, m(dec!(50)));
        assert_eq!(below.platform_fees, m(dec!(10)));
        assert_eq!(below.total_amount, m(dec!(458.99)));

        let at = compute_totals(&[line("A", dec!(399.00), 1, Decimal::ZERO)]);
        assert_eq!(at.delivery_charges, Money::ZERO);
        assert_eq!(at.total_amount, m(dec!(409)));
    }

    #[test]
    fn test_item_delivery_charges_override_flat_rule() {
        let items = vec![line("A", dec!(1200), 1, Decimal::ZERO), line("B", dec!(30), 2, dec!(40))];
        let totals = compute_totals(&items);
        assert_eq!(totals.delivery_charges, m(dec!(80)));
        assert_eq!(totals.total_items, 3);

        let cheap = compute_totals(&[line("A", dec!(5), 1, Decimal::ZERO), line("B", dec!(5), 2, dec!(40))]);
        assert_eq!(cheap.delivery_charges, m(dec!(80)));
    }

    #[test]
    fn test_summary_savings_against_mrp() {
        let mut item = line("A", dec!(800), 2, Decimal::ZERO);
        item.original_price = Some(m(dec!(1000)));
        let summary = OrderSummary::from_items(&[item, line("B", dec!(100), 1, Decimal::ZERO)]);
        assert_eq!(summary.mrp_total, m(dec!(2100)));
        assert_eq!(summary.savings, m(dec!(400)));
    }
}
