//! Domain events
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Cart(CartEvent),
    Checkout(CheckoutEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    ItemAdded { product_id: String, variant_id: Option<String>, quantity: u32 },
    ItemRemoved { product_id: String, variant_id: Option<String> },
    QuantityUpdated { product_id: String, variant_id: Option<String>, quantity: u32 },
    Cleared,
    BuyNowStarted { product_id: String, quantity: u32 },
    Restored { items: usize },
    OrphanedBackupRecovered { items: usize },
    DanglingSessionCleared,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutEvent {
    OrderPlaced { order_id: String, order_number: String, total: Money },
    PaymentStarted { order_id: String, gateway_order_id: String },
    PaymentVerified { order_id: String, payment_id: String },
    PaymentCancelled { order_id: String },
    PaymentFailed { order_id: String, reason: String },
    ReconciliationRequested { order_id: String },
    SubmissionFailed { reason: String },
}

/// How loudly a shopper should be told about an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity { Info, Success, Warning, Error }

impl DomainEvent {
    pub fn severity(&self) -> Severity {
        match self {
            DomainEvent::Cart(CartEvent::OrphanedBackupRecovered { .. } | CartEvent::DanglingSessionCleared) => Severity::Warning,
            DomainEvent::Cart(_) => Severity::Info,
            DomainEvent::Checkout(CheckoutEvent::OrderPlaced { .. } | CheckoutEvent::PaymentVerified { .. }) => Severity::Success,
            DomainEvent::Checkout(CheckoutEvent::PaymentCancelled { .. } | CheckoutEvent::ReconciliationRequested { .. }) => Severity::Warning,
            DomainEvent::Checkout(CheckoutEvent::PaymentFailed { .. } | CheckoutEvent::SubmissionFailed { .. }) => Severity::Error,
            DomainEvent::Checkout(CheckoutEvent::PaymentStarted { .. }) => Severity::Info,
        }
    }

    /// Dotted name used as a message subject, e.g. `cart.item_added`.
    pub fn name(&self) -> String {
        let (prefix, value) = match self {
            DomainEvent::Cart(e) => ("cart", serde_json::to_value(e)),
            DomainEvent::Checkout(e) => ("checkout", serde_json::to_value(e)),
        };
        let kind = value.ok().and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_owned)).unwrap_or_default();
        format!("{prefix}.{kind}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_a_warning_failure_an_error() {
        let cancelled = DomainEvent::Checkout(CheckoutEvent::PaymentCancelled { order_id: "o1".into() });
        let failed = DomainEvent::Checkout(CheckoutEvent::PaymentFailed { order_id: "o1".into(), reason: "declined".into() });
        assert_eq!(cancelled.severity(), Severity::Warning);
        assert_eq!(failed.severity(), Severity::Error);
    }

    #[test]
    fn test_event_name() {
        assert_eq!(DomainEvent::Cart(CartEvent::Cleared).name(), "cart.cleared");
        assert_eq!(DomainEvent::Cart(CartEvent::Restored { items: 2 }).name(), "cart.restored");
    }
}
