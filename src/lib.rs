//! OpenSASE Checkout
//!
//! Storefront cart, buy-now and checkout core.
//!
//! ## Features
//! - Persisted cart with a buy-now session that never loses the real cart
//! - Pricing engine with delivery and platform fees
//! - Live stock, price and address validation before every submission
//! - Order placement with COD or online payment
//! - Gateway verification, reconciliation and cancellation handling
//! - Native-app bridge for asynchronous payment results

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod notify;
pub mod payment;
pub mod routes;
pub mod services;
pub mod storage;

pub use api::{ApiError, HttpStorefrontApi, StorefrontApi};
pub use config::CheckoutConfig;
pub use domain::aggregates::{Cart, CartState, LineItem, Order, Product};
pub use domain::pricing::{compute_totals, OrderSummary, Totals};
pub use domain::value_objects::{Money, Quantity};
pub use error::{CheckoutError, Recovery};
pub use services::{CartStore, CheckoutPipeline, OrderValidator};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

pub type Result<T> = std::result::Result<T, CheckoutError>;
