//! Checkout error taxonomy.

use serde::Serialize;
use thiserror::Error;

use crate::api::ApiError;
use crate::payment::PaymentError;
use crate::services::cart::CartStoreError;
use crate::services::validation::{OrderValidation, ValidationIssue};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckoutError {
    #[error("your cart is empty")]
    EmptyCart,

    /// Address missing or incomplete, or the backend found the order incomplete.
    #[error("order is incomplete: {}", .0.join("; "))]
    Incomplete(Vec<String>),

    #[error("some items are no longer available: {}", .0.join("; "))]
    StockConflict(Vec<String>),

    #[error("prices have changed, please review your cart: {}", .0.join("; "))]
    PriceDrift(Vec<String>),

    #[error("your session has expired, please sign in again")]
    SessionExpired,

    #[error("the order could not be accepted: {0}")]
    InvalidPayload(String),

    #[error("the order was rejected: {0}")]
    Rejected(String),

    #[error("payment was cancelled")]
    GatewayCancelled,

    #[error("payment failed: {0}")]
    GatewayFailed(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("too many failed attempts, please try again later")]
    RetryLimitReached,

    #[error("no payment is awaiting a result")]
    NoPendingPayment,

    #[error("payment result for unknown gateway order {0}")]
    UnknownPayment(String),

    #[error("cart error: {0}")]
    Cart(String),
}

/// Where the shopper should be sent to fix an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    ReviewItems,
    EditAddress,
    Login,
    Retry,
    OrderStatus,
    /// The saved cart could not be written; reload it before doing anything else.
    ReloadCart,
    None,
}

impl CheckoutError {
    pub fn recovery(&self) -> Recovery {
        match self {
            CheckoutError::EmptyCart | CheckoutError::StockConflict(_) | CheckoutError::PriceDrift(_) => Recovery::ReviewItems,
            CheckoutError::Incomplete(_) => Recovery::EditAddress,
            CheckoutError::SessionExpired => Recovery::Login,
            CheckoutError::InvalidPayload(_) | CheckoutError::Rejected(_) | CheckoutError::Network(_) => Recovery::Retry,
            CheckoutError::GatewayCancelled | CheckoutError::GatewayFailed(_) => Recovery::OrderStatus,
            CheckoutError::Cart(_) => Recovery::ReloadCart,
            CheckoutError::RetryLimitReached | CheckoutError::NoPendingPayment | CheckoutError::UnknownPayment(_) => {
                Recovery::None
            }
        }
    }

    /// Counts against the submission retry budget.
    pub fn is_retryable(&self) -> bool { self.recovery() == Recovery::Retry }

    /// Picks the most actionable error out of a failed validation. Stock and
    /// price problems win over address problems so the shopper fixes items first.
    pub fn from_validation(validation: &OrderValidation) -> Self {
        let messages = |pred: fn(&ValidationIssue) -> bool| -> Vec<String> {
            validation.issues.iter().filter(|i| pred(i)).map(ToString::to_string).collect()
        };
        if !validation.cart_valid {
            CheckoutError::EmptyCart
        } else if !validation.stock_valid {
            CheckoutError::StockConflict(messages(ValidationIssue::is_stock))
        } else if !validation.price_valid {
            CheckoutError::PriceDrift(messages(ValidationIssue::is_price))
        } else {
            CheckoutError::Incomplete(validation.errors())
        }
    }

    /// Maps a failed order submission onto the shopper-facing cause.
    pub fn from_submission(error: ApiError) -> Self {
        match error {
            ApiError::BadRequest(m) => CheckoutError::InvalidPayload(m),
            ApiError::Unauthorized => CheckoutError::SessionExpired,
            ApiError::Conflict(m) => CheckoutError::StockConflict(vec![m]),
            ApiError::Unprocessable(m) => CheckoutError::Incomplete(vec![m]),
            other => other.into(),
        }
    }
}

impl From<ApiError> for CheckoutError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Unauthorized => CheckoutError::SessionExpired,
            ApiError::Network(m) => CheckoutError::Network(m),
            other => CheckoutError::Rejected(other.to_string()),
        }
    }
}

impl From<PaymentError> for CheckoutError {
    fn from(error: PaymentError) -> Self {
        match error {
            PaymentError::Api(e) => e.into(),
            PaymentError::Launch(m) => CheckoutError::GatewayFailed(m),
        }
    }
}

impl From<CartStoreError> for CheckoutError {
    fn from(error: CartStoreError) -> Self { CheckoutError::Cart(error.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_status_mapping() {
        assert!(matches!(CheckoutError::from_submission(ApiError::from_status(400, "bad".into())), CheckoutError::InvalidPayload(_)));
        assert_eq!(CheckoutError::from_submission(ApiError::from_status(401, String::new())), CheckoutError::SessionExpired);
        assert!(matches!(CheckoutError::from_submission(ApiError::from_status(409, "gone".into())), CheckoutError::StockConflict(_)));
        assert!(matches!(CheckoutError::from_submission(ApiError::from_status(422, "zip".into())), CheckoutError::Incomplete(_)));
        assert!(matches!(CheckoutError::from_submission(ApiError::from_status(503, "down".into())), CheckoutError::Rejected(_)));
    }

    #[test]
    fn test_recovery_routes() {
        assert_eq!(CheckoutError::StockConflict(vec![]).recovery(), Recovery::ReviewItems);
        assert_eq!(CheckoutError::PriceDrift(vec![]).recovery(), Recovery::ReviewItems);
        assert_eq!(CheckoutError::SessionExpired.recovery(), Recovery::Login);
        assert!(CheckoutError::Network("timeout".into()).is_retryable());
        assert!(!CheckoutError::GatewayCancelled.is_retryable());
        assert_eq!(CheckoutError::Cart("disk full".into()).recovery(), Recovery::ReloadCart);
    }

    #[test]
    fn test_stock_wins_over_address() {
        let validation = OrderValidation {
            cart_valid: true, address_valid: false, stock_valid: false, price_valid: true,
            issues: vec![
                ValidationIssue::MissingAddress,
                ValidationIssue::OutOfStock { product_id: "P1".into(), title: "Shirt".into(), requested: 2, available: Some(1) },
            ],
        };
        let CheckoutError::StockConflict(messages) = CheckoutError::from_validation(&validation) else { panic!("expected stock conflict") };
        assert_eq!(messages, vec!["Shirt: only 1 available, 2 requested".to_string()]);
    }
}
