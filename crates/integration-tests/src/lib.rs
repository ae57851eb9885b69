//! End-to-end scenario tests for the Stride storefront engine.
//!
//! [`TestStorefront`] wires the real cart store, identity observer and
//! checkout flow to the in-memory collaborators from
//! `stride_storefront::testing`, so scenarios exercise the whole stack without
//! a network.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p stride-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use stride_core::{CartItem, CartItemKey, CurrencyCode, Price, VariantId};
use stride_storefront::cart::{CartStore, MemoryCartStorage};
use stride_storefront::checkout::CheckoutFlow;
use stride_storefront::config::RetryPolicy;
use stride_storefront::identity::{Identity, IdentityObserver};
use stride_storefront::payment::PaymentOrchestrator;
use stride_storefront::pricing::PricingRules;
use stride_storefront::testing::{
    FakeCartGateway, FakeOrderApi, FakePaymentGateway, FakeProfileApi,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The engine assembled over in-memory collaborators.
pub struct TestStorefront {
    pub cart: CartStore,
    pub checkout: CheckoutFlow,
    pub observer: IdentityObserver,
    pub identity: watch::Sender<Identity>,
    pub storage: Arc<MemoryCartStorage>,
    pub cart_gateway: Arc<FakeCartGateway>,
    pub payment_gateway: Arc<FakePaymentGateway>,
    pub orders: Arc<FakeOrderApi>,
    pub profile: Arc<FakeProfileApi>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestStorefront {
    /// Build and start the engine as a guest with an empty, hydrated cart.
    pub async fn start() -> Self {
        Self::start_with_storage(Arc::new(MemoryCartStorage::new())).await
    }

    /// Build and start the engine over existing storage.
    pub async fn start_with_storage(storage: Arc<MemoryCartStorage>) -> Self {
        let cart_gateway = Arc::new(FakeCartGateway::new());
        let payment_gateway = Arc::new(FakePaymentGateway::new());
        let orders = Arc::new(FakeOrderApi::new());
        let profile = Arc::new(FakeProfileApi::new());

        let cart = CartStore::new(storage.clone(), cart_gateway.clone());
        cart.hydrate().await;

        let payments = PaymentOrchestrator::new(
            payment_gateway.clone(),
            orders.clone(),
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
            },
        );
        let checkout = CheckoutFlow::new(
            cart.clone(),
            payments,
            profile.clone(),
            PricingRules::default(),
        );

        let (identity, identity_rx) = watch::channel(Identity::Guest);
        let observer = IdentityObserver::new(cart.clone());
        let tasks = vec![observer.start(identity_rx), checkout.watch_cart()];

        Self {
            cart,
            checkout,
            observer,
            identity,
            storage,
            cart_gateway,
            payment_gateway,
            orders,
            profile,
            tasks,
        }
    }

    /// Stop the background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.observer.shutdown();
        self.checkout.shutdown();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// A shoe line item priced in cents.
#[must_use]
pub fn shoe(variant: i32, size: &str, color: &str, quantity: u32, cents: i64) -> CartItem {
    CartItem {
        key: CartItemKey::new(VariantId::new(variant), size, color),
        name: format!("Stride Model {variant}"),
        unit_price: Price::from_cents(cents, CurrencyCode::USD),
        quantity,
        image: Some(format!("https://cdn.stride-footwear.com/products/{variant}.jpg")),
    }
}
