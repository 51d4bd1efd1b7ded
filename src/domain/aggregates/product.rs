//! Product Aggregate
//!
//! Read-only catalog view of a product as the storefront sees it. The same
//! shape is captured into cart lines as a snapshot and fetched live again
//! when an order is validated.

use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub sku: String,
    pub base_price: Money,
    /// MRP shown struck through next to the selling price.
    #[serde(default)]
    pub original_price: Option<Money>,
    /// Per-unit delivery charge. Absent or zero means the general delivery rule applies.
    #[serde(default)]
    pub delivery_charge: Option<Money>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sku: Option<String>,
    /// Overrides the product's base price when present.
    #[serde(default)]
    pub price: Option<Money>,
    #[serde(default)]
    pub original_price: Option<Money>,
    #[serde(default)]
    pub options: Vec<VariantOption>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantOption {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub price_modifier: Money,
}

impl Product {
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Selling price for one unit: the variant override (or base price) plus
    /// every option modifier, never below zero.
    pub fn unit_price(&self, variant: Option<&Variant>) -> Money {
        let base = variant.and_then(|v| v.price).unwrap_or(self.base_price);
        let modifiers: Money = variant.map(|v| v.options.iter().map(|o| o.price_modifier).sum()).unwrap_or_default();
        (base + modifiers).max_zero()
    }

    /// Live price for a cart line's product/variant pair. Falls back to the
    /// base price when the variant no longer exists.
    pub fn current_price(&self, variant_id: Option<&str>) -> Money {
        self.unit_price(variant_id.and_then(|id| self.variant(id)))
    }

    pub fn original_price_for(&self, variant: Option<&Variant>) -> Option<Money> {
        variant.and_then(|v| v.original_price).or(self.original_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product() -> Product {
        Product {
            id: "P1".into(), title: "Blazer".into(), sku: "BLZ".into(),
            base_price: Money::new(dec!(800)), original_price: Some(Money::new(dec!(1000))), delivery_charge: None,
            variants: vec![Variant {
                id: "V1".into(), title: "XL".into(), sku: None, price: Some(Money::new(dec!(850))), original_price: None,
                options: vec![
                    VariantOption { name: "size".into(), value: "XL".into(), price_modifier: Money::new(dec!(25)) },
                    VariantOption { name: "fit".into(), value: "slim".into(), price_modifier: Money::new(dec!(-5)) },
                ],
            }],
        }
    }

    #[test]
    fn test_unit_price_applies_override_and_modifiers() {
        let p = product();
        assert_eq!(p.unit_price(None).amount(), dec!(800));
        assert_eq!(p.unit_price(p.variant("V1")).amount(), dec!(870));
        assert_eq!(p.current_price(Some("gone")).amount(), dec!(800));
    }

    #[test]
    fn test_unit_price_floors_at_zero() {
        let mut p = product();
        p.variants[0].options[1].price_modifier = Money::new(dec!(-5000));
        assert_eq!(p.unit_price(p.variant("V1")), Money::ZERO);
    }

    #[test]
    fn test_deserializes_backend_shape() {
        let p: Product = serde_json::from_str(r#"{"id":"P9","title":"Tie","basePrice":199,"variants":[]}"#).unwrap();
        assert_eq!(p.base_price.amount(), dec!(199));
        assert!(p.delivery_charge.is_none());
    }
}
