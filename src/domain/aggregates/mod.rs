//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::{Product, Variant, VariantOption};
pub use order::{Address, Order, OrderDraft, OrderError, OrderLine, OrderStatus, PaymentIntent, PaymentMethod, PaymentStatus};
pub use cart::{Cart, CartError, CartState, LineItem};
