//! Pre-submission order validation.
//!
//! Four checks: the cart has items, the address is structurally complete,
//! every line is in stock, and every line's captured price still matches
//! the live price. Stock and price lookups for all lines are issued at once
//! and every result is collected; a lookup that errors counts against its
//! line rather than being skipped.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, instrument, warn};

use crate::api::StorefrontApi;
use crate::domain::aggregates::cart::LineItem;
use crate::domain::aggregates::order::{Address, PaymentMethod};
use crate::domain::value_objects::Money;

/// Largest difference between captured and live price that still counts as unchanged.
pub const PRICE_TOLERANCE: Decimal = dec!(0.01);

#[derive(Clone, Debug, PartialEq)]
pub enum ValidationIssue {
    EmptyCart,
    MissingAddress,
    IncompleteAddress { missing: Vec<&'static str> },
    OutOfStock { product_id: String, title: String, requested: u32, available: Option<u32> },
    StockCheckFailed { product_id: String, title: String, reason: String },
    PriceChanged { product_id: String, title: String, cart_price: Money, current_price: Money },
    PriceCheckFailed { product_id: String, title: String, reason: String },
}

impl ValidationIssue {
    pub fn is_stock(&self) -> bool {
        matches!(self, ValidationIssue::OutOfStock { .. } | ValidationIssue::StockCheckFailed { .. })
    }

    pub fn is_price(&self) -> bool {
        matches!(self, ValidationIssue::PriceChanged { .. } | ValidationIssue::PriceCheckFailed { .. })
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCart => write!(f, "Your cart is empty"),
            Self::MissingAddress => write!(f, "Please select a delivery address"),
            Self::IncompleteAddress { missing } => write!(f, "Delivery address is missing: {}", missing.join(", ")),
            Self::OutOfStock { title, requested, available: Some(available), .. } => {
                write!(f, "{title}: only {available} available, {requested} requested")
            }
            Self::OutOfStock { title, .. } => write!(f, "{title} is out of stock"),
            Self::StockCheckFailed { title, .. } => write!(f, "Could not confirm stock for {title}"),
            Self::PriceChanged { title, cart_price, current_price, .. } => {
                write!(f, "Price of {title} changed from {cart_price} to {current_price}")
            }
            Self::PriceCheckFailed { title, .. } => write!(f, "Could not confirm the price of {title}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderValidation {
    pub cart_valid: bool,
    pub address_valid: bool,
    pub stock_valid: bool,
    pub price_valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl OrderValidation {
    pub fn is_valid(&self) -> bool {
        self.cart_valid && self.address_valid && self.stock_valid && self.price_valid
    }

    pub fn errors(&self) -> Vec<String> { self.issues.iter().map(ToString::to_string).collect() }
}

pub struct OrderValidator {
    api: Arc<dyn StorefrontApi>,
}

impl OrderValidator {
    pub fn new(api: Arc<dyn StorefrontApi>) -> Self { Self { api } }

    #[instrument(skip(self, items, address), fields(items = items.len(), ?payment_method))]
    pub async fn validate(&self, items: &[LineItem], address: Option<&Address>, payment_method: PaymentMethod) -> OrderValidation {
        if items.is_empty() {
            return OrderValidation {
                cart_valid: false, address_valid: false, stock_valid: false, price_valid: false,
                issues: vec![ValidationIssue::EmptyCart],
            };
        }

        let mut issues = Vec::new();
        let address_valid = match address {
            None => {
                issues.push(ValidationIssue::MissingAddress);
                false
            }
            Some(address) => {
                let missing = address.missing_fields();
                let complete = missing.is_empty();
                if !complete {
                    issues.push(ValidationIssue::IncompleteAddress { missing });
                }
                complete
            }
        };

        let stock = join_all(items.iter().map(|item| self.check_stock(item)));
        let price = join_all(items.iter().map(|item| self.check_price(item)));
        let (stock, price) = futures::join!(stock, price);

        let stock_issues: Vec<_> = stock.into_iter().flatten().collect();
        let price_issues: Vec<_> = price.into_iter().flatten().collect();
        let stock_valid = stock_issues.is_empty();
        let price_valid = price_issues.is_empty();
        issues.extend(stock_issues);
        issues.extend(price_issues);

        let validation = OrderValidation { cart_valid: true, address_valid, stock_valid, price_valid, issues };
        debug!(valid = validation.is_valid(), issues = validation.issues.len(), "order validated");
        validation
    }

    async fn check_stock(&self, item: &LineItem) -> Option<ValidationIssue> {
        let requested = item.quantity.value();
        match self.api.check_availability(&item.product_id, item.variant_id.as_deref(), requested).await {
            Ok(a) if a.available && a.available_quantity.map_or(true, |q| q >= requested) => None,
            Ok(a) => Some(ValidationIssue::OutOfStock {
                product_id: item.product_id.clone(), title: item.title.clone(), requested, available: a.available_quantity,
            }),
            Err(e) => {
                warn!(product_id = %item.product_id, error = %e, "stock check failed");
                Some(ValidationIssue::StockCheckFailed { product_id: item.product_id.clone(), title: item.title.clone(), reason: e.to_string() })
            }
        }
    }

    async fn check_price(&self, item: &LineItem) -> Option<ValidationIssue> {
        match self.api.get_product(&item.product_id).await {
            Ok(product) => {
                let current_price = product.current_price(item.variant_id.as_deref());
                if current_price.drifted_from(&item.unit_price, PRICE_TOLERANCE) {
                    Some(ValidationIssue::PriceChanged {
                        product_id: item.product_id.clone(), title: item.title.clone(), cart_price: item.unit_price, current_price,
                    })
                } else {
                    None
                }
            }
            Err(e) => {
                warn!(product_id = %item.product_id, error = %e, "price check failed");
                Some(ValidationIssue::PriceCheckFailed { product_id: item.product_id.clone(), title: item.title.clone(), reason: e.to_string() })
            }
        }
    }
}
