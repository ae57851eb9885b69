//! In-memory collaborators for tests.
//!
//! Each fake records its calls and can be told to fail or to hold a call
//! until released, so races can be staged deterministically. Enabled for this
//! crate's tests and, through the `test-support` feature, for dependents.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use stride_core::{
    CartItem, Email, OrderId, PaymentIntentId, PaymentStatus, ShippingAddress, UserId,
};
use tokio::sync::Notify;

use crate::api::{
    ApiError, CartGateway, OrderApi, OrderReceipt, OrderRequest, PaymentConfirmation,
    PaymentDetails, PaymentGateway, PaymentIntentRef, PaymentIntentRequest, ProfileApi,
};
use crate::identity::Customer;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable() -> ApiError {
    ApiError::Api {
        status: 503,
        message: "service unavailable".to_string(),
    }
}

/// A signed-in customer with id `n`.
///
/// # Panics
///
/// Never; the generated email is always valid.
#[must_use]
#[allow(clippy::expect_used)]
pub fn customer(n: i32) -> Customer {
    Customer {
        user_id: UserId::new(n),
        email: Email::parse(&format!("runner{n}@example.com")).expect("valid test email"),
        access_token: SecretString::from(format!("cat_{n}_9dK2mQ7xVb")),
    }
}

/// A complete US shipping address.
#[must_use]
pub fn shipping_address() -> ShippingAddress {
    ShippingAddress {
        name: "Jo Runner".to_string(),
        email: "jo@example.com".to_string(),
        phone: "555-0100".to_string(),
        street: "1 Track Ln".to_string(),
        city: "Portland".to_string(),
        state: "OR".to_string(),
        zip_code: "97201".to_string(),
        country: "US".to_string(),
    }
}

/// Hold the next call until the returned handle is notified.
#[derive(Default)]
struct Gate {
    hold: Mutex<Option<Arc<Notify>>>,
    started: Notify,
}

impl Gate {
    fn arm(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *lock(&self.hold) = Some(release.clone());
        release
    }

    async fn pass(&self) {
        let held = lock(&self.hold).take();
        if let Some(release) = held {
            self.started.notify_one();
            release.notified().await;
        }
    }

    async fn wait_started(&self) {
        self.started.notified().await;
    }
}

// =============================================================================
// Cart gateway
// =============================================================================

/// Server carts keyed by customer.
#[derive(Default)]
pub struct FakeCartGateway {
    carts: Mutex<HashMap<UserId, Vec<CartItem>>>,
    fail_fetch: AtomicBool,
    fail_replace: AtomicBool,
    fetch_calls: AtomicUsize,
    replace_calls: AtomicUsize,
    gate: Gate,
}

impl FakeCartGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server cart of `customer`.
    pub fn set_server_cart(&self, customer: &Customer, items: Vec<CartItem>) {
        lock(&self.carts).insert(customer.user_id, items);
    }

    /// The server cart of `customer` (empty if never set).
    #[must_use]
    pub fn server_cart(&self, customer: &Customer) -> Vec<CartItem> {
        lock(&self.carts)
            .get(&customer.user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next fetch with a 503.
    pub fn fail_next_fetch(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    /// Fail the next replace with a 503.
    pub fn fail_next_replace(&self) {
        self.fail_replace.store(true, Ordering::SeqCst);
    }

    /// Hold the next fetch until the returned handle is notified.
    #[must_use]
    pub fn hold_fetches(&self) -> Arc<Notify> {
        self.gate.arm()
    }

    /// Wait until a held fetch has started.
    pub async fn wait_for_fetch_started(&self) {
        self.gate.wait_started().await;
    }

    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CartGateway for FakeCartGateway {
    async fn fetch_cart(&self, customer: &Customer) -> Result<Vec<CartItem>, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        // Snapshot before holding, like a response already in transit
        let items = self.server_cart(customer);
        self.gate.pass().await;
        if self.fail_fetch.swap(false, Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(items)
    }

    async fn replace_cart(&self, customer: &Customer, items: &[CartItem]) -> Result<(), ApiError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_replace.swap(false, Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.set_server_cart(customer, items.to_vec());
        Ok(())
    }
}

// =============================================================================
// Payment gateway
// =============================================================================

/// Payment gateway that succeeds unless scripted otherwise.
pub struct FakePaymentGateway {
    next_intent: AtomicUsize,
    fail_create: AtomicBool,
    fail_confirm: AtomicBool,
    scripted: Mutex<Option<PaymentStatus>>,
    status: Mutex<PaymentStatus>,
    create_calls: AtomicUsize,
    confirm_calls: AtomicUsize,
    last_request: Mutex<Option<PaymentIntentRequest>>,
    last_details: Mutex<Option<PaymentDetails>>,
    create_gate: Gate,
    status_gate: Gate,
    gate: Gate,
}

impl Default for FakePaymentGateway {
    fn default() -> Self {
        Self {
            next_intent: AtomicUsize::new(1),
            fail_create: AtomicBool::new(false),
            fail_confirm: AtomicBool::new(false),
            scripted: Mutex::new(None),
            status: Mutex::new(PaymentStatus::Succeeded),
            create_calls: AtomicUsize::new(0),
            confirm_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            last_details: Mutex::new(None),
            create_gate: Gate::default(),
            status_gate: Gate::default(),
            gate: Gate::default(),
        }
    }
}

impl FakePaymentGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Status returned by the next confirmation only.
    pub fn script_confirm(&self, status: PaymentStatus) {
        *lock(&self.scripted) = Some(status);
    }

    /// Status returned by status lookups.
    pub fn set_status(&self, status: PaymentStatus) {
        *lock(&self.status) = status;
    }

    /// Fail the next intent creation with a 503.
    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Fail the next confirmation with a 503.
    pub fn fail_next_confirm(&self) {
        self.fail_confirm.store(true, Ordering::SeqCst);
    }

    /// Hold the next intent creation until the returned handle is notified.
    #[must_use]
    pub fn hold_creates(&self) -> Arc<Notify> {
        self.create_gate.arm()
    }

    /// Wait until a held intent creation has started.
    pub async fn wait_for_create_started(&self) {
        self.create_gate.wait_started().await;
    }

    /// Hold the next status lookup until the returned handle is notified.
    #[must_use]
    pub fn hold_status_checks(&self) -> Arc<Notify> {
        self.status_gate.arm()
    }

    /// Wait until a held status lookup has started.
    pub async fn wait_for_status_check_started(&self) {
        self.status_gate.wait_started().await;
    }

    /// Hold the next confirmation until the returned handle is notified.
    #[must_use]
    pub fn hold_confirms(&self) -> Arc<Notify> {
        self.gate.arm()
    }

    /// Wait until a held confirmation has started.
    pub async fn wait_for_confirm_started(&self) {
        self.gate.wait_started().await;
    }

    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    /// The last intent creation request.
    #[must_use]
    pub fn last_intent_request(&self) -> Option<PaymentIntentRequest> {
        lock(&self.last_request).clone()
    }

    /// The details sent with the last confirmation.
    #[must_use]
    pub fn last_confirm_details(&self) -> Option<PaymentDetails> {
        lock(&self.last_details).clone()
    }
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntentRef, ApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_request) = Some(request.clone());
        self.create_gate.pass().await;
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(unavailable());
        }
        let n = self.next_intent.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentIntentRef {
            payment_intent_id: PaymentIntentId::new(format!("pi_{n}")),
            client_secret: SecretString::from(format!("pi_{n}_secret_x7Qm")),
        })
    }

    async fn confirm_payment(
        &self,
        client_secret: &SecretString,
        details: &PaymentDetails,
    ) -> Result<PaymentConfirmation, ApiError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_details) = Some(details.clone());
        self.gate.pass().await;
        if self.fail_confirm.swap(false, Ordering::SeqCst) {
            return Err(unavailable());
        }

        let secret = client_secret.expose_secret();
        let intent = secret.split("_secret").next().unwrap_or(secret);
        let status = lock(&self.scripted)
            .take()
            .unwrap_or(PaymentStatus::Succeeded);
        Ok(PaymentConfirmation {
            payment_intent_id: PaymentIntentId::new(intent),
            status,
            decline_message: (status == PaymentStatus::RequiresPaymentMethod)
                .then(|| "Your card was declined.".to_string()),
        })
    }

    async fn retrieve_status(&self, _id: &PaymentIntentId) -> Result<PaymentStatus, ApiError> {
        self.status_gate.pass().await;
        Ok(*lock(&self.status))
    }
}

// =============================================================================
// Order API
// =============================================================================

/// Order API that is idempotent by payment intent, like the real one.
#[derive(Default)]
pub struct FakeOrderApi {
    orders: Mutex<HashMap<PaymentIntentId, OrderId>>,
    requests: Mutex<Vec<OrderRequest>>,
    failures_left: AtomicUsize,
    submit_calls: AtomicUsize,
}

impl FakeOrderApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` submissions with a 503.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    #[must_use]
    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Every request received, failed ones included.
    #[must_use]
    pub fn requests(&self) -> Vec<OrderRequest> {
        lock(&self.requests).clone()
    }

    /// Distinct orders created.
    #[must_use]
    pub fn order_count(&self) -> usize {
        lock(&self.orders).len()
    }
}

#[async_trait]
impl OrderApi for FakeOrderApi {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(unavailable());
        }

        let mut orders = lock(&self.orders);
        let next = orders.len() + 1;
        let order_id = orders
            .entry(request.payment_intent_id.clone())
            .or_insert_with(|| OrderId::new(format!("ord_{next}")))
            .clone();
        Ok(OrderReceipt { order_id })
    }
}

// =============================================================================
// Profile API
// =============================================================================

/// Records saved addresses.
#[derive(Default)]
pub struct FakeProfileApi {
    saved: Mutex<Vec<(UserId, ShippingAddress)>>,
    fail: AtomicBool,
    save_calls: AtomicUsize,
}

impl FakeProfileApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next save with a 503.
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Addresses saved successfully.
    #[must_use]
    pub fn saved(&self) -> Vec<(UserId, ShippingAddress)> {
        lock(&self.saved).clone()
    }
}

#[async_trait]
impl ProfileApi for FakeProfileApi {
    async fn save_shipping_address(
        &self,
        customer: &Customer,
        address: &ShippingAddress,
    ) -> Result<(), ApiError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(unavailable());
        }
        lock(&self.saved).push((customer.user_id, address.clone()));
        Ok(())
    }
}
