//! REST collaborators consumed by validation, submission and payment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::aggregates::order::{Order, OrderDraft, PaymentStatus};
use crate::domain::aggregates::product::Product;
use crate::domain::value_objects::Money;

pub mod http;

pub use http::{HttpStorefrontApi, HttpTokenRefresher, StaticToken, TokenRefresher};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("session expired")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => ApiError::BadRequest(message),
            401 => ApiError::Unauthorized,
            404 => ApiError::NotFound(message),
            409 => ApiError::Conflict(message),
            422 => ApiError::Unprocessable(message),
            _ => ApiError::Status { status, message },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available: bool,
    #[serde(default)]
    pub available_quantity: Option<u32>,
}

/// Gateway-side order created for one of our orders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    pub amount: Money,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub key_id: Option<String>,
}

fn default_currency() -> String { "INR".to_string() }

/// Callback fields returned by the gateway on success.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSuccess {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
    pub order_id: String,
    #[serde(flatten)]
    pub payment: PaymentSuccess,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verified: bool,
    #[serde(default)]
    pub order: Option<Order>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailureReport {
    pub order_id: String,
    pub gateway_order_id: String,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub status: PaymentStatus,
    #[serde(default)]
    pub order: Option<Order>,
}

/// Backend endpoints the checkout core depends on.
#[async_trait]
pub trait StorefrontApi: Send + Sync {
    async fn check_availability(&self, product_id: &str, variant_id: Option<&str>, quantity: u32) -> Result<Availability, ApiError>;
    async fn get_product(&self, product_id: &str) -> Result<Product, ApiError>;
    async fn create_order(&self, draft: &OrderDraft, idempotency_key: &str) -> Result<Order, ApiError>;
    async fn create_payment_order(&self, order_id: &str) -> Result<GatewayOrder, ApiError>;
    async fn verify_payment(&self, verification: &PaymentVerification) -> Result<VerificationResult, ApiError>;
    async fn report_payment_failure(&self, report: &PaymentFailureReport) -> Result<(), ApiError>;
    async fn reconcile_payment(&self, order_id: &str, gateway_order_id: &str) -> Result<ReconciliationResult, ApiError>;
}
