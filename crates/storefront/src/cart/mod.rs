//! Persisted cart store.
//!
//! # Architecture
//!
//! - Mutations apply locally and immediately, then persist to [`CartStorage`]
//! - Server reconciliation is a separate step: [`CartStore::fetch_cart`] pulls
//!   the authoritative cart, [`CartStore::sync_cart_with_server`] pushes ours
//! - State is published on a `watch` channel; see [`CartStore::subscribe`]
//!
//! # Hydration
//!
//! The store starts unhydrated. Until [`CartStore::hydrate`] (or a successful
//! fetch) completes, mutations are rejected with [`CartError::HydrationPending`]
//! and [`CartState::display`] reports [`CartDisplay::Loading`].
//!
//! # Races with `fetch_cart`
//!
//! Mutations made while a fetch is in flight are journaled and replayed on top
//! of the server cart when it lands, so a local edit is never dropped.

pub mod storage;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use serde::Serialize;
use stride_core::{CartItem, CartItemKey, Price};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, CartGateway};
use crate::identity::Customer;
use crate::signal;

pub use storage::{CartStorage, FileCartStorage, MemoryCartStorage, StorageError};

// =============================================================================
// Errors
// =============================================================================

/// Cart fetch/push against the server failed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No customer is signed in, so there is no server cart.
    #[error("no signed-in customer to sync the cart for")]
    NotAuthenticated,

    /// The signed-in customer changed while the fetch was in flight.
    #[error("customer changed during cart fetch")]
    IdentityChanged,

    /// The server call failed.
    #[error("cart sync failed: {0}")]
    Api(#[from] ApiError),
}

/// Errors returned by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// The stored cart has not been restored yet; wait and retry.
    #[error("cart is still loading")]
    HydrationPending,

    /// Quantities below 1 are rejected; use `remove_item` instead.
    #[error("quantity must be at least 1 (got {0})")]
    InvalidQuantity(u32),

    /// No line with this identity is in the cart.
    #[error("item {0} is not in the cart")]
    ItemNotFound(CartItemKey),

    /// Server reconciliation failed; local cart unchanged.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The change applied locally but could not be persisted.
    #[error("failed to persist cart: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// State
// =============================================================================

/// A server price that differs from the price snapshotted in the local cart.
///
/// Reported after a fetch; the server price has already replaced the local one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceChange {
    pub key: CartItemKey,
    pub name: String,
    pub previous: Price,
    pub current: Price,
}

/// What the UI should render for the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartDisplay {
    /// Not hydrated yet, or switching accounts. Never render "empty" here.
    Loading,
    /// Hydrated and genuinely empty.
    Empty,
    /// Hydrated with this many units.
    Items(u32),
}

/// Published cart state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartState {
    /// Lines in insertion order.
    pub items: Vec<CartItem>,
    /// Durable storage (or the server) has been read.
    pub hydrated: bool,
    /// An account switch is reconciling the cart.
    pub switching: bool,
    /// A fetch or push is in flight.
    pub syncing: bool,
    /// Message from the last failed sync, cleared by the next success.
    pub sync_error: Option<String>,
    /// Price changes found by the last fetch, until dismissed.
    pub price_changes: Vec<PriceChange>,
    /// Incremented on every change to `items`.
    pub revision: u64,
}

impl CartState {
    /// Sum of quantities.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |acc, item| acc.saturating_add(item.quantity))
    }

    /// Sum of `unit_price x quantity`.
    #[must_use]
    pub fn total_price(&self) -> Decimal {
        crate::pricing::subtotal(&self.items)
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// What the UI should render.
    #[must_use]
    pub fn display(&self) -> CartDisplay {
        if !self.hydrated || self.switching {
            CartDisplay::Loading
        } else if self.items.is_empty() {
            CartDisplay::Empty
        } else {
            CartDisplay::Items(self.total_items())
        }
    }
}

// =============================================================================
// Mutations
// =============================================================================

/// A local change to the cart, replayable on top of another item list.
#[derive(Debug, Clone)]
enum CartMutation {
    Add(CartItem),
    SetQuantity(CartItemKey, u32),
    Remove(CartItemKey),
    Clear,
}

impl CartMutation {
    /// Apply to `items`; returns whether anything changed.
    fn apply(&self, items: &mut Vec<CartItem>) -> bool {
        match self {
            Self::Add(new) => {
                if let Some(existing) = items.iter_mut().find(|i| i.key == new.key) {
                    existing.quantity = existing.quantity.saturating_add(new.quantity);
                } else {
                    items.push(new.clone());
                }
                true
            }
            Self::SetQuantity(key, quantity) => items
                .iter_mut()
                .find(|i| &i.key == key)
                .is_some_and(|item| {
                    let changed = item.quantity != *quantity;
                    item.quantity = *quantity;
                    changed
                }),
            Self::Remove(key) => {
                let before = items.len();
                items.retain(|i| &i.key != key);
                items.len() != before
            }
            Self::Clear => {
                let changed = !items.is_empty();
                items.clear();
                changed
            }
        }
    }
}

/// Collapse lines sharing an identity, summing quantities.
fn merge_duplicates(items: Vec<CartItem>) -> Vec<CartItem> {
    let mut merged: Vec<CartItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            continue;
        }
        CartMutation::Add(item).apply(&mut merged);
    }
    merged
}

fn price_changes(local: &[CartItem], server: &[CartItem]) -> Vec<PriceChange> {
    let local_prices: HashMap<&CartItemKey, &Price> =
        local.iter().map(|i| (&i.key, &i.unit_price)).collect();
    server
        .iter()
        .filter_map(|item| {
            let previous = local_prices.get(&item.key)?;
            (**previous != item.unit_price).then(|| PriceChange {
                key: item.key.clone(),
                name: item.name.clone(),
                previous: **previous,
                current: item.unit_price,
            })
        })
        .collect()
}

// =============================================================================
// CartStore
// =============================================================================

/// The cart store.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartStoreInner>,
}

struct CartStoreInner {
    state: watch::Sender<CartState>,
    storage: Arc<dyn CartStorage>,
    gateway: Arc<dyn CartGateway>,
    customer: Mutex<Option<Customer>>,
    /// `Some` while a fetch is in flight.
    journal: Mutex<Option<Vec<CartMutation>>>,
    /// One fetch at a time.
    fetch_lock: tokio::sync::Mutex<()>,
    /// Serializes writes so an older snapshot never lands after a newer one.
    persist_lock: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CartStore {
    /// Create an unhydrated store.
    #[must_use]
    pub fn new(storage: Arc<dyn CartStorage>, gateway: Arc<dyn CartGateway>) -> Self {
        let (state, _) = watch::channel(CartState::default());
        Self {
            inner: Arc::new(CartStoreInner {
                state,
                storage,
                gateway,
                customer: Mutex::new(None),
                journal: Mutex::new(None),
                fetch_lock: tokio::sync::Mutex::new(()),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Subscribe to the full cart state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to a slice of the cart state.
    ///
    /// The receiver wakes only when the projected value changes.
    pub fn subscribe_slice<T, F>(&self, f: F) -> watch::Receiver<T>
    where
        T: PartialEq + Send + Sync + 'static,
        F: Fn(&CartState) -> T + Send + 'static,
    {
        signal::project(self.subscribe(), f)
    }

    /// A copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CartState {
        self.inner.state.borrow().clone()
    }

    /// Current lines.
    #[must_use]
    pub fn items(&self) -> Vec<CartItem> {
        self.inner.state.borrow().items.clone()
    }

    /// Sum of quantities.
    #[must_use]
    pub fn get_total_items(&self) -> u32 {
        self.inner.state.borrow().total_items()
    }

    /// Sum of `unit_price x quantity`.
    #[must_use]
    pub fn get_total_price(&self) -> Decimal {
        self.inner.state.borrow().total_price()
    }

    /// Whether hydration has completed.
    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.inner.state.borrow().hydrated
    }

    /// Wait until hydration has completed.
    pub async fn wait_hydrated(&self) {
        let mut rx = self.subscribe();
        // Only fails if the sender is dropped, which cannot happen while `self` lives
        let _ = rx.wait_for(|s| s.hydrated).await;
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Set the signed-in customer (or `None` for a guest).
    pub fn set_customer(&self, customer: Option<Customer>) {
        *lock(&self.inner.customer) = customer;
    }

    /// The signed-in customer, if any.
    #[must_use]
    pub fn customer(&self) -> Option<Customer> {
        lock(&self.inner.customer).clone()
    }

    /// Enter or leave the account-switching state.
    pub fn set_switching(&self, switching: bool) {
        self.inner.state.send_if_modified(|s| {
            let changed = s.switching != switching;
            s.switching = switching;
            changed
        });
    }

    /// Clear the reported price changes once the customer has seen them.
    pub fn dismiss_price_changes(&self) {
        self.inner.state.send_if_modified(|s| {
            let changed = !s.price_changes.is_empty();
            s.price_changes.clear();
            changed
        });
    }

    // =========================================================================
    // Hydration and persistence
    // =========================================================================

    /// Restore the cart from durable storage.
    ///
    /// Never fails: unreadable storage hydrates an empty cart. Does nothing if
    /// the store is already hydrated (e.g. a server fetch landed first).
    #[instrument(skip(self))]
    pub async fn hydrate(&self) {
        if self.is_hydrated() {
            return;
        }

        let stored = match self.inner.storage.load().await {
            Ok(items) => items.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to read stored cart, starting empty");
                Vec::new()
            }
        };
        let stored = merge_duplicates(stored);

        self.inner.state.send_if_modified(|s| {
            if s.hydrated {
                return false;
            }
            debug!(item_count = stored.len(), "Cart hydrated");
            s.items = stored;
            s.hydrated = true;
            s.revision += 1;
            true
        });
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let _guard = self.inner.persist_lock.lock().await;
        let items = self.items();
        self.inner.storage.save(&items).await.inspect_err(|e| {
            warn!(error = %e, "Failed to persist cart");
        })
    }

    // =========================================================================
    // Local mutations
    // =========================================================================

    async fn mutate(&self, mutation: CartMutation) -> Result<(), CartError> {
        let mut applied = false;
        let mut hydrated = true;
        self.inner.state.send_if_modified(|s| {
            if !s.hydrated {
                hydrated = false;
                return false;
            }
            applied = mutation.apply(&mut s.items);
            if applied {
                s.revision += 1;
                // Journaled under the state lock so a landing fetch sees it
                if let Some(journal) = lock(&self.inner.journal).as_mut() {
                    journal.push(mutation.clone());
                }
            }
            applied
        });

        if !hydrated {
            return Err(CartError::HydrationPending);
        }
        if !applied {
            return Ok(());
        }

        self.persist().await?;
        Ok(())
    }

    /// Add an item, merging by identity.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InvalidQuantity`] for a zero quantity,
    /// [`CartError::HydrationPending`] before hydration, or
    /// [`CartError::Storage`] if the change could not be persisted.
    #[instrument(skip(self, item), fields(key = %item.key, quantity = item.quantity))]
    pub async fn add_item(&self, item: CartItem) -> Result<(), CartError> {
        if item.quantity < 1 {
            return Err(CartError::InvalidQuantity(item.quantity));
        }
        self.mutate(CartMutation::Add(item)).await
    }

    /// Set the quantity of a line.
    ///
    /// # Errors
    ///
    /// Rejects quantities below 1 with [`CartError::InvalidQuantity`] (the
    /// line is left as is; use [`CartStore::remove_item`] to delete it) and
    /// unknown lines with [`CartError::ItemNotFound`].
    #[instrument(skip(self), fields(key = %key))]
    pub async fn update_quantity(&self, key: &CartItemKey, quantity: u32) -> Result<(), CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        {
            let state = self.inner.state.borrow();
            if state.hydrated && !state.items.iter().any(|i| &i.key == key) {
                return Err(CartError::ItemNotFound(key.clone()));
            }
        }
        self.mutate(CartMutation::SetQuantity(key.clone(), quantity))
            .await
    }

    /// Remove a line. Removing an absent line is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::HydrationPending`] before hydration or
    /// [`CartError::Storage`] if the change could not be persisted.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn remove_item(&self, key: &CartItemKey) -> Result<(), CartError> {
        self.mutate(CartMutation::Remove(key.clone())).await
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::HydrationPending`] before hydration or
    /// [`CartError::Storage`] if the change could not be persisted.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<(), CartError> {
        self.mutate(CartMutation::Clear).await
    }

    // =========================================================================
    // Server reconciliation
    // =========================================================================

    fn set_sync_failure(&self, message: String) {
        self.inner.state.send_modify(|s| {
            s.syncing = false;
            s.sync_error = Some(message);
        });
    }

    /// Replace the local cart with the server cart of the signed-in customer.
    ///
    /// Server prices win; any line whose price differs from the local snapshot
    /// is reported in [`CartState::price_changes`]. Local mutations made while
    /// the fetch was in flight are replayed on top of the server cart.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Sync`] if no customer is signed in, the customer
    /// changed mid-flight, or the call failed. The local cart is untouched.
    #[instrument(skip(self))]
    pub async fn fetch_cart(&self) -> Result<(), CartError> {
        let _fetch = self.inner.fetch_lock.lock().await;
        let customer = self.customer().ok_or(SyncError::NotAuthenticated)?;

        *lock(&self.inner.journal) = Some(Vec::new());
        self.inner.state.send_modify(|s| s.syncing = true);

        let result = self.inner.gateway.fetch_cart(&customer).await;

        let server_items = match result {
            Ok(items) => merge_duplicates(items),
            Err(e) => {
                lock(&self.inner.journal).take();
                warn!(error = %e, "Cart fetch failed, keeping local cart");
                self.set_sync_failure("We couldn't load your saved cart. Please try again.".into());
                return Err(SyncError::Api(e).into());
            }
        };

        let still_current = self
            .customer()
            .is_some_and(|current| current.user_id == customer.user_id);
        if !still_current {
            lock(&self.inner.journal).take();
            self.inner.state.send_modify(|s| s.syncing = false);
            return Err(SyncError::IdentityChanged.into());
        }

        self.inner.state.send_modify(|s| {
            let journal = lock(&self.inner.journal).take().unwrap_or_default();
            let changes = price_changes(&s.items, &server_items);
            if !changes.is_empty() {
                info!(count = changes.len(), "Server prices differ from cart snapshot");
            }

            let mut items = server_items;
            for mutation in &journal {
                mutation.apply(&mut items);
            }
            debug!(
                item_count = items.len(),
                replayed = journal.len(),
                "Replaced local cart with server cart"
            );

            s.items = items;
            s.hydrated = true;
            s.syncing = false;
            s.sync_error = None;
            s.price_changes = changes;
            s.revision += 1;
        });

        self.persist().await?;
        Ok(())
    }

    /// Push the local cart to the server cart of the signed-in customer.
    ///
    /// Sends the full item list, so calling it twice without a local change in
    /// between leaves the server cart as the first call left it.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::HydrationPending`] before hydration and
    /// [`CartError::Sync`] if no customer is signed in or the call failed.
    #[instrument(skip(self))]
    pub async fn sync_cart_with_server(&self) -> Result<(), CartError> {
        if !self.is_hydrated() {
            return Err(CartError::HydrationPending);
        }
        let customer = self.customer().ok_or(SyncError::NotAuthenticated)?;
        let items = self.items();

        self.inner.state.send_modify(|s| s.syncing = true);
        match self.inner.gateway.replace_cart(&customer, &items).await {
            Ok(()) => {
                debug!(item_count = items.len(), "Pushed cart to server");
                self.inner.state.send_modify(|s| {
                    s.syncing = false;
                    s.sync_error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Cart sync failed");
                self.set_sync_failure("We couldn't save your cart. Please try again.".into());
                Err(SyncError::Api(e).into())
            }
        }
    }
}
