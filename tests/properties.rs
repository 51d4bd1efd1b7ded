use opensase_checkout::domain::aggregates::{CartState, LineItem, Product};
use opensase_checkout::domain::pricing::{compute_totals, FLAT_DELIVERY_FEE, FREE_DELIVERY_THRESHOLD, PLATFORM_FEE};
use opensase_checkout::{Money, Quantity};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn line(id: usize, cents: i64, qty: u32, delivery_cents: i64) -> LineItem {
    let product = Product {
        id: format!("P{id}"),
        title: format!("Product {id}"),
        sku: format!("SKU-{id}"),
        base_price: Money::new(Decimal::new(cents, 2)),
        original_price: None,
        delivery_charge: Some(Money::new(Decimal::new(delivery_cents, 2))),
        variants: vec![],
    };
    LineItem::from_product(&product, None, Quantity::clamped(qty.into()).unwrap())
}

fn items() -> impl Strategy<Value = Vec<LineItem>> {
    prop::collection::vec((1i64..100_000, 1u32..20, prop_oneof![Just(0i64), 1i64..5_000]), 0..8).prop_map(|specs| {
        specs.into_iter().enumerate().map(|(id, (cents, qty, delivery))| line(id, cents, qty, delivery)).collect()
    })
}

proptest! {
    #[test]
    fn test_totals_ignore_item_order(items in items()) {
        let mut reversed = items.clone();
        reversed.reverse();
        prop_assert_eq!(compute_totals(&items), compute_totals(&reversed));
    }

    #[test]
    fn test_totals_are_deterministic(items in items()) {
        prop_assert_eq!(compute_totals(&items), compute_totals(&items));
    }

    #[test]
    fn test_total_is_sum_of_parts(items in items()) {
        let t = compute_totals(&items);
        if items.is_empty() {
            prop_assert_eq!(t.total_amount, Money::ZERO);
            prop_assert_eq!(t.platform_fees, Money::ZERO);
        } else {
            prop_assert_eq!(t.platform_fees, PLATFORM_FEE);
            prop_assert_eq!(t.total_amount, (t.subtotal - t.discount + t.delivery_charges + t.platform_fees).max_zero());
            let any_charged = items.iter().any(|i| i.delivery_charge.is_positive());
            if !any_charged && t.subtotal < FREE_DELIVERY_THRESHOLD {
                prop_assert_eq!(t.delivery_charges, FLAT_DELIVERY_FEE);
            }
        }
    }

    #[test]
    fn test_quantity_clamp(requested in -5_000i64..5_000) {
        match Quantity::clamped(requested) {
            None => prop_assert!(requested <= 0),
            Some(q) => {
                prop_assert!((Quantity::MIN..=Quantity::MAX).contains(&q.value()));
                prop_assert_eq!(i64::from(q.value()), requested.min(i64::from(Quantity::MAX)));
            }
        }
    }

    #[test]
    fn test_buy_now_round_trip_returns_original_cart(items in items(), extra in 1u32..5) {
        let mut state = CartState::default();
        for item in items {
            state = state.add_item(item);
        }
        let before = state.cart().clone();

        let session = state.start_buy_now(line(99, 1_000, extra, 0)).start_buy_now(line(98, 2_000, 1, 0));
        prop_assert!(session.is_buy_now());
        prop_assert_eq!(session.cart().item_count(), 1);
        prop_assert_eq!(session.backup(), Some(&before));

        let restored = session.restore();
        prop_assert!(!restored.is_buy_now());
        prop_assert_eq!(restored.cart(), &before);
    }
}
