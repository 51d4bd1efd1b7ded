//! Cart Aggregate
//!
//! `CartState` owns the active cart together with the optional buy-now
//! session and the backup it protects. Commands never mutate in place; each
//! returns the next state, which the caller persists before adopting it.
//! Keeping the session and its backup in one `Option` makes "session active
//! iff backup exists" hold by construction.

use serde::{Deserialize, Serialize};
use crate::domain::aggregates::product::{Product, Variant};
use crate::domain::events::{CartEvent, DomainEvent};
use crate::domain::pricing::{compute_totals, Totals};
use crate::domain::value_objects::{Money, Quantity};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub title: String,
    pub sku: String,
    pub unit_price: Money,
    pub quantity: Quantity,
    #[serde(default)]
    pub original_price: Option<Money>,
    #[serde(default)]
    pub delivery_charge: Money,
    pub product_snapshot: Product,
    #[serde(default)]
    pub variant_snapshot: Option<Variant>,
}

impl LineItem {
    pub fn from_product(product: &Product, variant: Option<&Variant>, quantity: Quantity) -> Self {
        Self {
            product_id: product.id.clone(),
            variant_id: variant.map(|v| v.id.clone()),
            title: match variant {
                Some(v) if !v.title.is_empty() => format!("{} - {}", product.title, v.title),
                _ => product.title.clone(),
            },
            sku: variant.and_then(|v| v.sku.clone()).unwrap_or_else(|| product.sku.clone()),
            unit_price: product.unit_price(variant),
            quantity,
            original_price: product.original_price_for(variant),
            delivery_charge: product.delivery_charge.unwrap_or_default().max_zero(),
            product_snapshot: product.clone(),
            variant_snapshot: variant.cloned(),
        }
    }

    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity.value()) }

    pub fn matches(&self, product_id: &str, variant_id: Option<&str>) -> bool {
        self.product_id == product_id && self.variant_id.as_deref() == variant_id
    }
}

/// Items plus their derived totals. Totals are recomputed on construction and
/// on deserialization, so a stored cart can never carry stale figures.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredCart")]
pub struct Cart {
    items: Vec<LineItem>,
    #[serde(flatten)]
    totals: Totals,
}

#[derive(Deserialize)]
struct StoredCart { #[serde(default)] items: Vec<LineItem> }

impl From<StoredCart> for Cart {
    fn from(stored: StoredCart) -> Self { Cart::from_items(stored.items) }
}

impl Cart {
    pub fn from_items(items: Vec<LineItem>) -> Self {
        let totals = compute_totals(&items);
        Self { items, totals }
    }

    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn totals(&self) -> &Totals { &self.totals }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    fn find(&self, product_id: &str, variant_id: Option<&str>) -> Option<usize> {
        self.items.iter().position(|i| i.matches(product_id, variant_id))
    }
}

#[derive(Clone, Debug, PartialEq)]
struct BuyNow {
    item: LineItem,
    backup: Cart,
}

#[derive(Clone, Debug, Default)]
pub struct CartState {
    cart: Cart,
    buy_now: Option<BuyNow>,
    events: Vec<DomainEvent>,
}

impl CartState {
    pub fn from_cart(cart: Cart) -> Self { Self { cart, buy_now: None, events: vec![] } }

    /// Rebuilds a buy-now session that was active when the store was last written.
    pub fn resume_buy_now(cart: Cart, item: LineItem, backup: Cart) -> Self {
        Self { cart, buy_now: Some(BuyNow { item, backup }), events: vec![] }
    }

    pub fn cart(&self) -> &Cart { &self.cart }
    pub fn is_buy_now(&self) -> bool { self.buy_now.is_some() }
    pub fn backup(&self) -> Option<&Cart> { self.buy_now.as_ref().map(|b| &b.backup) }
    pub fn buy_now_item(&self) -> Option<&LineItem> { self.buy_now.as_ref().map(|b| &b.item) }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }

    /// Adds to the shopper's real cart, leaving any buy-now session first.
    pub fn add_item(&self, item: LineItem) -> CartState {
        let mut next = if self.is_buy_now() { self.restore() } else { self.next() };
        let (product_id, variant_id) = (item.product_id.clone(), item.variant_id.clone());
        let mut items = next.cart.items.clone();
        let quantity = match next.cart.find(&item.product_id, item.variant_id.as_deref()) {
            Some(idx) => {
                items[idx].quantity = items[idx].quantity.add(item.quantity);
                items[idx].quantity
            }
            None => {
                let qty = item.quantity;
                items.push(item);
                qty
            }
        };
        next.cart = Cart::from_items(items);
        next.raise(CartEvent::ItemAdded { product_id, variant_id, quantity: quantity.value() });
        next
    }

    pub fn remove_item(&self, product_id: &str, variant_id: Option<&str>) -> Result<CartState, CartError> {
        let idx = self.cart.find(product_id, variant_id).ok_or(CartError::ItemNotFound)?;
        let mut next = self.next();
        let mut items = next.cart.items.clone();
        items.remove(idx);
        next.cart = Cart::from_items(items);
        next.raise(CartEvent::ItemRemoved { product_id: product_id.into(), variant_id: variant_id.map(str::to_owned) });
        Ok(next)
    }

    /// Sets a line's quantity, clamped to the allowed range. Zero or less removes the line.
    pub fn update_quantity(&self, product_id: &str, variant_id: Option<&str>, requested: i64) -> Result<CartState, CartError> {
        let Some(quantity) = Quantity::clamped(requested) else {
            return self.remove_item(product_id, variant_id);
        };
        let idx = self.cart.find(product_id, variant_id).ok_or(CartError::ItemNotFound)?;
        let mut next = self.next();
        let mut items = next.cart.items.clone();
        items[idx].quantity = quantity;
        next.cart = Cart::from_items(items);
        next.raise(CartEvent::QuantityUpdated {
            product_id: product_id.into(), variant_id: variant_id.map(str::to_owned), quantity: quantity.value(),
        });
        Ok(next)
    }

    /// Empties the active cart. A buy-now backup is left exactly as it was.
    pub fn clear(&self) -> CartState {
        let mut next = self.next();
        next.cart = Cart::default();
        next.raise(CartEvent::Cleared);
        next
    }

    /// Swaps the active cart for a single-item cart. An existing backup is
    /// kept, so starting buy-now twice never overwrites the real cart.
    pub fn start_buy_now(&self, item: LineItem) -> CartState {
        let mut next = self.next();
        let backup = match next.buy_now.take() {
            Some(existing) => existing.backup,
            None => next.cart.clone(),
        };
        next.raise(CartEvent::BuyNowStarted { product_id: item.product_id.clone(), quantity: item.quantity.value() });
        next.cart = Cart::from_items(vec![item.clone()]);
        next.buy_now = Some(BuyNow { item, backup });
        next
    }

    /// Puts the backup back and ends the session. Without a session this is a no-op.
    pub fn restore(&self) -> CartState {
        let mut next = self.next();
        if let Some(buy_now) = next.buy_now.take() {
            next.raise(CartEvent::Restored { items: buy_now.backup.item_count() });
            next.cart = buy_now.backup;
        }
        next
    }

    fn next(&self) -> CartState {
        CartState { cart: self.cart.clone(), buy_now: self.buy_now.clone(), events: self.events.clone() }
    }

    pub(crate) fn raise(&mut self, e: CartEvent) { self.events.push(DomainEvent::Cart(e)); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ItemNotFound, InvalidQuantity(i64) }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound => write!(f, "Item not found in cart"),
            Self::InvalidQuantity(q) => write!(f, "Quantity must be at least 1, got {}", q),
        }
    }
}
