//! Cart store: the cart aggregate bound to the persisted key-value store.
//!
//! Every public command first reconciles memory against the store (hydrate
//! when empty, resume a persisted buy-now session, fold back an orphaned
//! backup), then applies the aggregate command and writes the result before
//! adopting it. Writes are ordered so that a crash between any two of them
//! leaves either the previous state or an orphan that the next reconcile
//! heals:
//!
//! - with a session: backup, then cart, then flag
//! - without one: flag, then cart, then backup

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::aggregates::cart::{Cart, CartError, CartState, LineItem};
use crate::domain::aggregates::product::{Product, Variant};
use crate::domain::events::{CartEvent, DomainEvent};
use crate::domain::value_objects::Quantity;
use crate::storage::{KeyValueStore, StorageError};

pub const CART_KEY: &str = "cart-storage";
pub const BUY_NOW_MODE_KEY: &str = "buy-now-mode";
pub const BUY_NOW_BACKUP_KEY: &str = "buy-now-backup";

#[derive(Error, Debug)]
pub enum CartStoreError {
    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to encode cart state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Value stored under [`BUY_NOW_MODE_KEY`]. Older writers stored a bare boolean.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredFlag {
    Session { active: bool, #[serde(default)] item: Option<LineItem> },
    Bare(bool),
}

impl StoredFlag {
    fn is_active(&self) -> bool {
        match self { StoredFlag::Session { active, .. } | StoredFlag::Bare(active) => *active }
    }

    fn into_item(self) -> Option<LineItem> {
        match self { StoredFlag::Session { item, .. } => item, StoredFlag::Bare(_) => None }
    }
}

struct Snapshot {
    cart: Option<Cart>,
    flag: Option<StoredFlag>,
    backup: Option<Cart>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reconcile {
    Full,
    /// Hydrate and resume, but leave an orphaned backup where it is.
    HydrateOnly,
}

/// Which persisted keys a commit rewrites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slots {
    All,
    CartOnly,
}

pub struct CartStore {
    store: Box<dyn KeyValueStore>,
    state: CartState,
    hydrated: bool,
    events: Vec<DomainEvent>,
}

impl CartStore {
    /// Wraps a store without reading it; the first command hydrates.
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self { store: Box::new(store), state: CartState::default(), hydrated: false, events: vec![] }
    }

    /// Wraps a store and loads whatever it holds.
    pub fn open(store: impl KeyValueStore + 'static) -> Result<Self, CartStoreError> {
        let mut cart_store = Self::new(store);
        cart_store.load_cart()?;
        Ok(cart_store)
    }

    pub fn cart(&self) -> &Cart { self.state.cart() }
    pub fn state(&self) -> &CartState { &self.state }
    pub fn is_buy_now(&self) -> bool { self.state.is_buy_now() }
    pub fn backup(&self) -> Option<&Cart> { self.state.backup() }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }

    /// Rebuilds memory from the store, including a buy-now session that was
    /// active at the last write.
    pub fn load_cart(&mut self) -> Result<&Cart, CartStoreError> {
        self.events.extend(self.state.take_events());
        self.state = CartState::default();
        self.hydrated = false;
        self.reconcile_with(Reconcile::Full)?;
        debug!(items = self.cart().item_count(), buy_now = self.is_buy_now(), "cart loaded");
        Ok(self.cart())
    }

    pub fn reconcile(&mut self) -> Result<(), CartStoreError> { self.reconcile_with(Reconcile::Full) }

    pub fn add_to_cart(&mut self, product: &Product, variant: Option<&Variant>, quantity: i64) -> Result<&Cart, CartStoreError> {
        let quantity = Quantity::clamped(quantity).ok_or(CartError::InvalidQuantity(quantity))?;
        self.reconcile_with(Reconcile::Full)?;
        if self.is_buy_now() {
            info!(product_id = %product.id, "leaving buy-now to add to cart");
        }
        let next = self.state.add_item(LineItem::from_product(product, variant, quantity));
        self.commit(next)
    }

    pub fn remove_from_cart(&mut self, product_id: &str, variant_id: Option<&str>) -> Result<&Cart, CartStoreError> {
        self.reconcile_with(Reconcile::Full)?;
        let next = self.state.remove_item(product_id, variant_id)?;
        self.commit(next)
    }

    pub fn update_quantity(&mut self, product_id: &str, variant_id: Option<&str>, quantity: i64) -> Result<&Cart, CartStoreError> {
        self.reconcile_with(Reconcile::Full)?;
        let next = self.state.update_quantity(product_id, variant_id, quantity)?;
        self.commit(next)
    }

    /// Empties the active cart only. Only the cart key is written: the buy-now
    /// flag already holds the session item and the backup is never touched.
    pub fn clear_cart(&mut self) -> Result<&Cart, CartStoreError> {
        self.reconcile_with(Reconcile::HydrateOnly)?;
        let next = self.state.clear();
        self.commit_slots(next, Slots::CartOnly)
    }

    /// Backs up the real cart and replaces it with a single-item cart. The
    /// backup, cart and flag are all written or, on failure, all rolled back,
    /// and memory is left as it was.
    pub fn initiate_buy_now_flow(&mut self, product: &Product, variant: Option<&Variant>, quantity: i64) -> Result<&Cart, CartStoreError> {
        let quantity = Quantity::clamped(quantity).ok_or(CartError::InvalidQuantity(quantity))?;
        self.reconcile_with(Reconcile::Full)?;
        let next = self.state.start_buy_now(LineItem::from_product(product, variant, quantity));
        if let Err(e) = self.commit(next) {
            error!(product_id = %product.id, error = %e, "buy-now flow aborted");
            return Err(e);
        }
        info!(product_id = %product.id, quantity = quantity.value(), "buy-now flow started");
        Ok(self.cart())
    }

    /// Ends a buy-now session and puts the real cart back. Safe to call repeatedly.
    pub fn restore_cart(&mut self) -> Result<&Cart, CartStoreError> {
        self.reconcile_with(Reconcile::Full)?;
        let next = self.state.restore();
        self.commit(next)
    }

    /// The shopper explicitly wants the normal cart.
    pub fn initiate_cart_flow(&mut self) -> Result<&Cart, CartStoreError> {
        self.reconcile_with(Reconcile::Full)?;
        let next = if self.is_buy_now() { self.state.restore() } else { self.state.clone() };
        self.commit(next)
    }

    fn reconcile_with(&mut self, mode: Reconcile) -> Result<(), CartStoreError> {
        if self.state.is_buy_now() {
            self.hydrated = true;
            return Ok(());
        }

        let Snapshot { cart, flag, backup } = self.read_snapshot()?;
        let fresh = !self.hydrated || self.state.cart().is_empty();
        let flag_active = flag.as_ref().is_some_and(StoredFlag::is_active);

        let next = match backup {
            Some(backup) if flag_active && fresh => {
                let cart = cart.unwrap_or_default();
                match flag.and_then(StoredFlag::into_item).or_else(|| cart.items().first().cloned()) {
                    Some(item) => {
                        info!(product_id = %item.product_id, "resuming buy-now session from storage");
                        Some(CartState::resume_buy_now(cart, item, backup))
                    }
                    None => Some(Self::fold_orphan(backup)),
                }
            }
            Some(backup) if mode == Reconcile::Full => Some(Self::fold_orphan(backup)),
            None if flag_active => {
                warn!("buy-now flag found without a backup; clearing session");
                let base = if fresh { Cart::default() } else { self.state.cart().clone() };
                let mut state = CartState::from_cart(base);
                state.raise(CartEvent::DanglingSessionCleared);
                Some(state)
            }
            _ => {
                if fresh {
                    if let Some(stored) = cart.filter(|c| !c.is_empty()) {
                        debug!(items = stored.item_count(), "hydrated cart from storage");
                        self.state = CartState::from_cart(stored);
                    }
                }
                None
            }
        };

        if let Some(next) = next {
            self.commit(next)?;
        }
        self.hydrated = true;
        Ok(())
    }

    fn fold_orphan(backup: Cart) -> CartState {
        warn!(items = backup.item_count(), "restoring orphaned buy-now backup");
        let items = backup.item_count();
        let mut state = CartState::from_cart(backup);
        state.raise(CartEvent::OrphanedBackupRecovered { items });
        state
    }

    fn commit(&mut self, next: CartState) -> Result<&Cart, CartStoreError> {
        self.commit_slots(next, Slots::All)
    }

    fn commit_slots(&mut self, mut next: CartState, slots: Slots) -> Result<&Cart, CartStoreError> {
        self.persist(&next, slots)?;
        self.events.extend(next.take_events());
        self.state = next;
        Ok(self.state.cart())
    }

    fn persist(&mut self, next: &CartState, slots: Slots) -> Result<(), CartStoreError> {
        let cart = serde_json::to_string(next.cart())?;
        let writes = match (slots, next.buy_now_item(), next.backup()) {
            (Slots::CartOnly, _, _) => vec![(CART_KEY, Some(cart))],
            (Slots::All, Some(item), Some(backup)) => {
                let flag = StoredFlag::Session { active: true, item: Some(item.clone()) };
                vec![
                    (BUY_NOW_BACKUP_KEY, Some(serde_json::to_string(backup)?)),
                    (CART_KEY, Some(cart)),
                    (BUY_NOW_MODE_KEY, Some(serde_json::to_string(&flag)?)),
                ]
            }
            (Slots::All, _, _) => vec![(BUY_NOW_MODE_KEY, None), (CART_KEY, Some(cart)), (BUY_NOW_BACKUP_KEY, None)],
        };
        self.write_all(writes)
    }

    /// Applies the writes in order; if one fails, the ones already applied are
    /// put back to their previous values.
    fn write_all(&mut self, writes: Vec<(&'static str, Option<String>)>) -> Result<(), CartStoreError> {
        let mut previous = Vec::with_capacity(writes.len());
        for (key, _) in &writes {
            previous.push((*key, self.store.get(key)?));
        }

        for (applied, (key, value)) in writes.into_iter().enumerate() {
            let result = match &value {
                Some(v) => self.store.set(key, v),
                None => self.store.delete(key),
            };
            if let Err(e) = result {
                self.roll_back(&previous[..applied]);
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn roll_back(&mut self, previous: &[(&'static str, Option<String>)]) {
        for (key, value) in previous.iter().rev() {
            let result = match value {
                Some(v) => self.store.set(key, v),
                None => self.store.delete(key),
            };
            if let Err(e) = result {
                error!(key, error = %e, "failed to roll back cart write");
            }
        }
    }

    fn read_snapshot(&self) -> Result<Snapshot, CartStoreError> {
        Ok(Snapshot {
            cart: self.read_json(CART_KEY)?,
            flag: self.read_json(BUY_NOW_MODE_KEY)?,
            backup: self.read_json(BUY_NOW_BACKUP_KEY)?,
        })
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.store.get(key)? else { return Ok(None) };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "ignoring unreadable persisted value");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::test_support::{line, product};
    use crate::storage::MemoryStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Fails every write to one key.
    struct FailingStore { inner: MemoryStore, fail_key: &'static str }

    impl KeyValueStore for FailingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> { self.inner.get(key) }
        fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            if key == self.fail_key { return Err(StorageError::Unavailable("quota exceeded".into())); }
            self.inner.set(key, value)
        }
        fn delete(&mut self, key: &str) -> Result<(), StorageError> { self.inner.delete(key) }
    }

    /// Records the key of every write.
    struct RecordingStore { inner: MemoryStore, writes: Arc<StdMutex<Vec<String>>> }

    impl KeyValueStore for RecordingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> { self.inner.get(key) }
        fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            self.writes.lock().unwrap().push(key.to_string());
            self.inner.set(key, value)
        }
        fn delete(&mut self, key: &str) -> Result<(), StorageError> {
            self.writes.lock().unwrap().push(key.to_string());
            self.inner.delete(key)
        }
    }

    fn seeded() -> (MemoryStore, CartStore) {
        let backing = MemoryStore::new();
        let mut store = CartStore::open(backing.clone()).unwrap();
        store.add_to_cart(&product("P1", dec!(250), Decimal::ZERO), None, 2).unwrap();
        store.add_to_cart(&product("P2", dec!(99.5), Decimal::ZERO), None, 1).unwrap();
        (backing, store)
    }

    fn assert_coupled(backing: &MemoryStore, store: &CartStore) {
        assert_eq!(store.is_buy_now(), store.backup().is_some());
        let flag = backing.get(BUY_NOW_MODE_KEY).unwrap().is_some();
        let backup = backing.get(BUY_NOW_BACKUP_KEY).unwrap().is_some();
        assert_eq!(flag, backup);
        assert_eq!(flag, store.is_buy_now());
    }

    fn persisted_cart(backing: &MemoryStore) -> Cart {
        serde_json::from_str(&backing.get(CART_KEY).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_add_persists_and_survives_reload() {
        let (backing, store) = seeded();
        assert_eq!(store.cart().totals().subtotal.amount(), dec!(599.5));
        let reloaded = CartStore::open(backing.clone()).unwrap();
        assert_eq!(reloaded.cart(), store.cart());
    }

    #[test]
    fn test_add_rejects_non_positive_quantity() {
        let (_, mut store) = seeded();
        let err = store.add_to_cart(&product("P3", dec!(5), Decimal::ZERO), None, 0).unwrap_err();
        assert!(matches!(err, CartStoreError::Cart(CartError::InvalidQuantity(0))));
        assert_eq!(store.cart().item_count(), 2);
    }

    #[test]
    fn test_buy_now_round_trip_restores_identical_cart() {
        let (backing, mut store) = seeded();
        let before = store.cart().clone();

        store.initiate_buy_now_flow(&product("B1", dec!(1500), Decimal::ZERO), None, 1).unwrap();
        assert_coupled(&backing, &store);
        assert_eq!(store.cart().item_count(), 1);
        assert_eq!(persisted_cart(&backing).items()[0].product_id, "B1");

        store.restore_cart().unwrap();
        assert_coupled(&backing, &store);
        assert_eq!(store.cart(), &before);
        assert_eq!(persisted_cart(&backing), before);

        store.restore_cart().unwrap();
        assert_eq!(store.cart(), &before);
    }

    #[test]
    fn test_buy_now_then_cart_flow_restores_cart() {
        let (backing, mut store) = seeded();
        let before = store.cart().clone();
        store.initiate_buy_now_flow(&product("B1", dec!(1500), Decimal::ZERO), None, 1).unwrap();
        store.initiate_cart_flow().unwrap();
        assert_eq!(store.cart(), &before);
        assert!(!store.is_buy_now());
        assert!(backing.get(BUY_NOW_MODE_KEY).unwrap().is_none());
        assert_coupled(&backing, &store);
    }

    #[test]
    fn test_reload_resumes_buy_now_session() {
        let (backing, mut store) = seeded();
        let before = store.cart().clone();
        store.initiate_buy_now_flow(&product("B1", dec!(1500), Decimal::ZERO), None, 1).unwrap();

        let mut reloaded = CartStore::open(backing.clone()).unwrap();
        assert!(reloaded.is_buy_now());
        assert_eq!(reloaded.backup(), Some(&before));
        assert_eq!(reloaded.cart().items()[0].product_id, "B1");

        reloaded.restore_cart().unwrap();
        assert_eq!(reloaded.cart(), &before);
    }

    #[test]
    fn test_clear_during_buy_now_keeps_backup() {
        let (backing, mut store) = seeded();
        let before = store.cart().clone();
        store.initiate_buy_now_flow(&product("B1", dec!(1500), Decimal::ZERO), None, 1).unwrap();
        store.clear_cart().unwrap();
        assert!(store.cart().is_empty());
        assert_coupled(&backing, &store);

        let mut reloaded = CartStore::open(backing.clone()).unwrap();
        assert!(reloaded.is_buy_now());
        reloaded.restore_cart().unwrap();
        assert_eq!(reloaded.cart(), &before);
    }

    #[test]
    fn test_clear_during_buy_now_writes_only_the_cart() {
        let backing = MemoryStore::new();
        let writes = Arc::new(StdMutex::new(Vec::new()));
        let mut store = CartStore::open(RecordingStore { inner: backing.clone(), writes: writes.clone() }).unwrap();
        store.add_to_cart(&product("P1", dec!(250), Decimal::ZERO), None, 2).unwrap();
        let before = store.cart().clone();
        store.initiate_buy_now_flow(&product("B1", dec!(1500), Decimal::ZERO), None, 1).unwrap();
        let backup = backing.get(BUY_NOW_BACKUP_KEY).unwrap();
        writes.lock().unwrap().clear();

        store.clear_cart().unwrap();
        assert_eq!(*writes.lock().unwrap(), vec![CART_KEY.to_string()]);
        assert_eq!(backing.get(BUY_NOW_BACKUP_KEY).unwrap(), backup);

        let mut reloaded = CartStore::open(backing.clone()).unwrap();
        assert!(reloaded.is_buy_now());
        assert!(reloaded.cart().is_empty());
        reloaded.restore_cart().unwrap();
        assert_eq!(reloaded.cart(), &before);
    }

    #[test]
    fn test_orphaned_backup_is_folded_back_before_add() {
        let (backing, store) = seeded();
        let real_cart = store.cart().clone();
        let mut raw = backing.clone();
        raw.set(BUY_NOW_BACKUP_KEY, &serde_json::to_string(&real_cart).unwrap()).unwrap();
        raw.set(CART_KEY, &serde_json::to_string(&Cart::from_items(vec![line("B1", dec!(1500), 1, Decimal::ZERO)])).unwrap()).unwrap();

        let mut after_reload = CartStore::new(backing.clone());
        after_reload.add_to_cart(&product("P9", dec!(10), Decimal::ZERO), None, 1).unwrap();

        let ids: Vec<_> = after_reload.cart().items().iter().map(|i| i.product_id.clone()).collect();
        assert_eq!(ids, vec!["P1", "P2", "P9"]);
        assert!(backing.get(BUY_NOW_BACKUP_KEY).unwrap().is_none());
        assert_coupled(&backing, &after_reload);
        assert!(after_reload.take_events().iter().any(|e| matches!(e, DomainEvent::Cart(CartEvent::OrphanedBackupRecovered { items: 2 }))));
    }

    #[test]
    fn test_clear_does_not_consume_orphaned_backup() {
        let (backing, store) = seeded();
        let mut raw = backing.clone();
        raw.set(BUY_NOW_BACKUP_KEY, &serde_json::to_string(store.cart()).unwrap()).unwrap();

        let mut after_reload = CartStore::new(backing.clone());
        after_reload.clear_cart().unwrap();
        assert!(after_reload.cart().is_empty());
        assert!(backing.get(BUY_NOW_BACKUP_KEY).unwrap().is_some());

        after_reload.initiate_cart_flow().unwrap();
        assert_eq!(after_reload.cart(), store.cart());
    }

    #[test]
    fn test_add_hydrates_before_merging() {
        let (backing, _) = seeded();
        let mut fresh = CartStore::new(backing.clone());
        fresh.add_to_cart(&product("P1", dec!(250), Decimal::ZERO), None, 1).unwrap();
        assert_eq!(fresh.cart().item_count(), 2);
        assert_eq!(fresh.cart().items()[0].quantity.value(), 3);
    }

    #[test]
    fn test_add_during_buy_now_returns_to_real_cart() {
        let (backing, mut store) = seeded();
        store.initiate_buy_now_flow(&product("B1", dec!(1500), Decimal::ZERO), None, 1).unwrap();
        store.add_to_cart(&product("P3", dec!(40), Decimal::ZERO), None, 1).unwrap();
        assert!(!store.is_buy_now());
        let ids: Vec<_> = store.cart().items().iter().map(|i| i.product_id.clone()).collect();
        assert_eq!(ids, vec!["P1", "P2", "P3"]);
        assert_coupled(&backing, &store);
    }

    #[test]
    fn test_failed_buy_now_write_rolls_back() {
        let (backing, _) = seeded();
        let before = persisted_cart(&backing);
        let mut store = CartStore::open(FailingStore { inner: backing.clone(), fail_key: BUY_NOW_MODE_KEY }).unwrap();

        let err = store.initiate_buy_now_flow(&product("B1", dec!(1500), Decimal::ZERO), None, 1).unwrap_err();
        assert!(matches!(err, CartStoreError::Storage(_)));
        assert!(!store.is_buy_now());
        assert_eq!(store.cart(), &before);
        assert_eq!(persisted_cart(&backing), before);
        assert!(backing.get(BUY_NOW_BACKUP_KEY).unwrap().is_none());
        assert!(backing.get(BUY_NOW_MODE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_dangling_flag_without_backup_clears_session() {
        let mut backing = MemoryStore::new();
        backing.set(BUY_NOW_MODE_KEY, "true").unwrap();
        backing.set(CART_KEY, &serde_json::to_string(&Cart::from_items(vec![line("B1", dec!(1500), 1, Decimal::ZERO)])).unwrap()).unwrap();

        let store = CartStore::open(backing.clone()).unwrap();
        assert!(!store.is_buy_now());
        assert!(store.cart().is_empty());
        assert!(backing.get(BUY_NOW_MODE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_cart_is_treated_as_empty() {
        let mut backing = MemoryStore::new();
        backing.set(CART_KEY, "{not json").unwrap();
        let store = CartStore::open(backing).unwrap();
        assert!(store.cart().is_empty());
    }

    #[test]
    fn test_update_quantity_persists_clamped_value() {
        let (backing, mut store) = seeded();
        store.update_quantity("P1", None, 4000).unwrap();
        assert_eq!(persisted_cart(&backing).items()[0].quantity.value(), 1000);
        store.update_quantity("P1", None, 0).unwrap();
        assert_eq!(persisted_cart(&backing).item_count(), 1);
        store.remove_from_cart("P2", None).unwrap();
        assert!(persisted_cart(&backing).is_empty());
    }
}
