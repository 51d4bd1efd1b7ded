//! Order Aggregate
//!
//! Orders are created and owned by the backend; the client builds an
//! `OrderDraft` from the cart, submits it, and from then on only reads the
//! returned `Order`. A `PaymentIntent` tracks one online payment attempt for
//! that order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};
use crate::domain::aggregates::cart::LineItem;
use crate::domain::pricing::OrderSummary;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub order_number: String,
    #[serde(default)]
    pub items: Vec<OrderLine>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub status: OrderStatus,
    pub total_amount: Money,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub quantity: u32,
    pub price: Money,
}

impl From<&LineItem> for OrderLine {
    fn from(item: &LineItem) -> Self {
        Self { product_id: item.product_id.clone(), variant_id: item.variant_id.clone(), quantity: item.quantity.value(), price: item.unit_price }
    }
}

/// Structural address check only: the four fields an order cannot ship without.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    #[validate(custom = "not_blank")]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(custom = "not_blank")]
    pub city: String,
    #[validate(custom = "not_blank")]
    pub state: String,
    #[validate(custom = "not_blank")]
    pub postal_code: String,
    pub country: Option<String>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() { Err(ValidationError::new("blank")) } else { Ok(()) }
}

impl Address {
    /// Names of the required fields that are missing or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        match self.validate() {
            Ok(()) => vec![],
            Err(errors) => {
                let mut fields: Vec<&'static str> = errors.field_errors().keys().copied().collect();
                fields.sort_unstable();
                fields
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    Online,
}

impl PaymentMethod {
    pub fn is_online(&self) -> bool { matches!(self, PaymentMethod::Online) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    PaymentPending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
    #[serde(other)]
    Unknown,
}

/// Body of `POST /orders`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub items: Vec<OrderLine>,
    pub shipping_address: Address,
    pub payment_method: PaymentMethod,
    #[serde(flatten)]
    pub summary: OrderSummary,
    pub buy_now: bool,
}

impl OrderDraft {
    pub fn new(items: &[LineItem], address: Address, payment_method: PaymentMethod, buy_now: bool) -> Self {
        Self {
            items: items.iter().map(OrderLine::from).collect(),
            shipping_address: address,
            payment_method,
            summary: OrderSummary::from_items(items),
            buy_now,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Verifying,
    Verified,
    Failed,
    Cancelled,
}

/// One online payment attempt, keyed by the gateway's order id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub gateway_order_id: String,
    pub order_id: String,
    status: PaymentStatus,
}

impl PaymentIntent {
    pub fn new(gateway_order_id: impl Into<String>, order_id: impl Into<String>) -> Self {
        Self { gateway_order_id: gateway_order_id.into(), order_id: order_id.into(), status: PaymentStatus::Pending }
    }

    pub fn status(&self) -> PaymentStatus { self.status }

    pub fn begin_verification(&mut self) -> Result<(), OrderError> { self.transition(PaymentStatus::Verifying) }
    pub fn mark_verified(&mut self) -> Result<(), OrderError> { self.transition(PaymentStatus::Verified) }
    pub fn mark_failed(&mut self) -> Result<(), OrderError> { self.transition(PaymentStatus::Failed) }
    pub fn mark_cancelled(&mut self) -> Result<(), OrderError> { self.transition(PaymentStatus::Cancelled) }

    fn transition(&mut self, to: PaymentStatus) -> Result<(), OrderError> {
        use PaymentStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Pending, Verifying) | (Pending, Failed) | (Pending, Cancelled) | (Verifying, Verified) | (Verifying, Failed)
        );
        if !allowed { return Err(OrderError::InvalidTransition { from: self.status, to }); }
        self.status = to;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { InvalidTransition { from: PaymentStatus, to: PaymentStatus } }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::InvalidTransition { from, to } => write!(f, "Payment cannot move from {:?} to {:?}", from, to) }
    }
}
