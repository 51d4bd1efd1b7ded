//! Application services: the persisted cart, order validation and the checkout pipeline.

pub mod cart;
pub mod checkout;
pub mod validation;

pub use cart::{CartStore, CartStoreError};
pub use checkout::{CheckoutPipeline, CheckoutStage, CheckoutStatus, OrderOutcome, PaymentOutcome};
pub use validation::{OrderValidation, OrderValidator, ValidationIssue};
