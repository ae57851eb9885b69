//! Checkout flow.
//!
//! # Architecture
//!
//! - [`CheckoutSession`] is the pure state machine (`shipping -> payment ->
//!   confirmation`, plus `payment -> shipping`)
//! - [`CheckoutFlow`] drives it: validation, cart sync, payment setup,
//!   confirmation and order submission
//! - State is published on a `watch` channel like the cart store
//!
//! # Session identity
//!
//! Every asynchronous step remembers the [`SessionId`] it started under and
//! applies its result only if that session is still current. A payment that
//! succeeds after the customer navigated away still produces its order, but
//! never touches the new session.

pub mod session;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stride_core::{
    CartItem, CheckoutStep, OrderId, PaymentIntentId, SessionId, ShippingAddress,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::{OrderRequest, PaymentDetails, ProfileApi};
use crate::cart::{CartState, CartStore};
use crate::error::{CheckoutError, add_breadcrumb};
use crate::identity::Customer;
use crate::payment::{PaymentOrchestrator, PaymentOutcome};
use crate::pricing::{PriceBreakdown, PricingRules};
use crate::signal;

pub use session::{CheckoutSession, PaymentSetup, PendingOrder};

// =============================================================================
// State
// =============================================================================

/// Where the UI should navigate after a checkout event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutView {
    /// The cart is empty; show the empty-cart page.
    EmptyCart,
    /// The payment outcome is pending; show the status page for it.
    PaymentStatus(PaymentIntentId),
    /// The order was created.
    OrderConfirmation(OrderId),
}

/// What the confirmation page shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmation {
    pub order_id: OrderId,
    pub payment_intent_id: PaymentIntentId,
    pub items: Vec<CartItem>,
    pub shipping_address: ShippingAddress,
    pub breakdown: PriceBreakdown,
    pub placed_at: DateTime<Utc>,
}

/// Published checkout state.
#[derive(Debug, Clone, Default)]
pub struct CheckoutState {
    /// The checkout in progress, if any.
    pub session: Option<CheckoutSession>,
    /// The most recent completed order.
    pub confirmation: Option<OrderConfirmation>,
    /// A captured payment without an order whose session has ended.
    pub unplaced_order: Option<PendingOrder>,
    /// Pending navigation, until taken.
    pub redirect: Option<CheckoutView>,
}

impl CheckoutState {
    /// The step to render, or `None` outside checkout.
    #[must_use]
    pub fn step(&self) -> Option<CheckoutStep> {
        match (&self.session, &self.confirmation) {
            (Some(session), _) => Some(session.step),
            (None, Some(_)) => Some(CheckoutStep::Confirmation),
            (None, None) => None,
        }
    }

    /// Id of the current session.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Whether a payment is in flight.
    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.submitting)
    }

    /// Whether a captured payment is still waiting for its order.
    #[must_use]
    pub fn has_unplaced_order(&self) -> bool {
        self.unplaced_order.is_some()
            || self
                .session
                .as_ref()
                .is_some_and(|s| s.pending_order.is_some())
    }
}

// =============================================================================
// CheckoutFlow
// =============================================================================

/// Drives checkout sessions.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CheckoutFlow {
    inner: Arc<CheckoutFlowInner>,
}

struct CheckoutFlowInner {
    state: watch::Sender<CheckoutState>,
    cart: CartStore,
    payments: PaymentOrchestrator,
    profile: Arc<dyn ProfileApi>,
    pricing: PricingRules,
    shutdown_tx: broadcast::Sender<()>,
}

impl CheckoutFlow {
    /// Create a flow with no session.
    #[must_use]
    pub fn new(
        cart: CartStore,
        payments: PaymentOrchestrator,
        profile: Arc<dyn ProfileApi>,
        pricing: PricingRules,
    ) -> Self {
        let (state, _) = watch::channel(CheckoutState::default());
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(CheckoutFlowInner {
                state,
                cart,
                payments,
                profile,
                pricing,
                shutdown_tx,
            }),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Subscribe to the full checkout state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CheckoutState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to a slice of the checkout state.
    pub fn subscribe_slice<T, F>(&self, f: F) -> watch::Receiver<T>
    where
        T: PartialEq + Send + Sync + 'static,
        F: Fn(&CheckoutState) -> T + Send + 'static,
    {
        signal::project(self.subscribe(), f)
    }

    /// A copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CheckoutState {
        self.inner.state.borrow().clone()
    }

    /// A copy of the current session.
    #[must_use]
    pub fn session(&self) -> Option<CheckoutSession> {
        self.inner.state.borrow().session.clone()
    }

    /// Order summary for the current cart, as the checkout page shows it.
    #[must_use]
    pub fn summary(&self) -> PriceBreakdown {
        self.inner.pricing.breakdown_for(&self.inner.cart.items())
    }

    /// Take the pending navigation, if any.
    pub fn take_redirect(&self) -> Option<CheckoutView> {
        let mut view = None;
        self.inner.state.send_if_modified(|s| {
            view = s.redirect.take();
            view.is_some()
        });
        view
    }

    // =========================================================================
    // Session helpers
    // =========================================================================

    /// Run `f` on the current session, publishing only if it succeeds.
    ///
    /// With `expected`, fails with [`CheckoutError::StaleSession`] unless that
    /// session is still current.
    fn update<R>(
        &self,
        expected: Option<SessionId>,
        f: impl FnOnce(&mut CheckoutSession) -> Result<R, CheckoutError>,
    ) -> Result<R, CheckoutError> {
        let mut result = Err(if expected.is_some() {
            CheckoutError::StaleSession
        } else {
            CheckoutError::NoSession
        });
        self.inner.state.send_if_modified(|state| {
            let Some(session) = state.session.as_mut() else {
                return false;
            };
            if expected.is_some_and(|id| id != session.id) {
                return false;
            }
            result = f(session);
            result.is_ok()
        });
        result
    }

    /// Discard the session `id` if still current and navigate to `view`.
    fn abandon(&self, id: SessionId, view: CheckoutView) {
        self.inner.state.send_if_modified(|state| {
            if state.session_id() != Some(id) {
                return false;
            }
            info!(session_id = %id, ?view, "Checkout session abandoned");
            state.session = None;
            state.redirect = Some(view);
            true
        });
    }

    /// Clear the in-flight flag after an attempt that did not finish the order.
    fn finish_attempt(&self, id: SessionId) -> Result<(), CheckoutError> {
        self.update(Some(id), |s| {
            s.submitting = false;
            Ok(())
        })
    }

    // =========================================================================
    // Shipping step
    // =========================================================================

    /// Start a new checkout session, replacing any current one.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::HydrationPending`] until the cart is restored,
    /// [`CheckoutError::Busy`] while a payment is in flight or a captured
    /// payment still has no order (see [`CheckoutFlow::retry_order`]), and
    /// [`CheckoutError::EmptyCart`] for an empty cart.
    #[instrument(skip(self))]
    pub fn begin(&self) -> Result<SessionId, CheckoutError> {
        if !self.inner.cart.is_hydrated() {
            return Err(CheckoutError::HydrationPending);
        }
        {
            let state = self.inner.state.borrow();
            if state.is_submitting() || state.has_unplaced_order() {
                return Err(CheckoutError::Busy);
            }
        }
        if self.inner.cart.snapshot().is_empty() {
            self.inner
                .state
                .send_modify(|s| s.redirect = Some(CheckoutView::EmptyCart));
            return Err(CheckoutError::EmptyCart);
        }

        let session = CheckoutSession::new();
        let id = session.id;
        self.inner.state.send_modify(|s| {
            s.session = Some(session);
            s.confirmation = None;
            s.redirect = None;
        });

        info!(session_id = %id, "Checkout started");
        add_breadcrumb("checkout", "Checkout started", None);
        Ok(id)
    }

    /// Copy a saved profile address into an untouched shipping form.
    ///
    /// Returns whether the address was applied; a form the customer already
    /// started filling is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NoSession`] without a session,
    /// [`CheckoutError::InvalidStep`] outside the shipping step, and
    /// [`CheckoutError::Busy`] while the payment is being set up.
    pub fn prefill_shipping(&self, address: &ShippingAddress) -> Result<bool, CheckoutError> {
        let mut applied = false;
        self.update(None, |s| {
            s.ensure_step(CheckoutStep::Shipping)?;
            s.ensure_idle()?;
            if s.shipping_address == ShippingAddress::default() {
                s.shipping_address = address.clone();
                applied = true;
            }
            Ok(())
        })?;
        Ok(applied)
    }

    /// Replace the shipping address.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NoSession`] without a session,
    /// [`CheckoutError::InvalidStep`] outside the shipping step, and
    /// [`CheckoutError::Busy`] while the payment is being set up.
    pub fn set_shipping_address(&self, address: ShippingAddress) -> Result<(), CheckoutError> {
        self.update(None, |s| {
            s.ensure_step(CheckoutStep::Shipping)?;
            s.ensure_idle()?;
            s.shipping_address = address;
            Ok(())
        })
    }

    /// Use the shipping address for billing, or not.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NoSession`] without a session,
    /// [`CheckoutError::InvalidStep`] outside the shipping step, and
    /// [`CheckoutError::Busy`] while the payment is being set up.
    pub fn set_billing_same_as_shipping(&self, same: bool) -> Result<(), CheckoutError> {
        self.update(None, |s| {
            s.ensure_step(CheckoutStep::Shipping)?;
            s.ensure_idle()?;
            s.billing_same_as_shipping = same;
            Ok(())
        })
    }

    /// Replace the separate billing address.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NoSession`] without a session,
    /// [`CheckoutError::InvalidStep`] outside the shipping step, and
    /// [`CheckoutError::Busy`] while the payment is being set up.
    pub fn set_billing_address(&self, address: ShippingAddress) -> Result<(), CheckoutError> {
        self.update(None, |s| {
            s.ensure_step(CheckoutStep::Shipping)?;
            s.ensure_idle()?;
            s.billing_address = address;
            Ok(())
        })
    }

    /// `shipping -> payment`.
    ///
    /// Validates the addresses, pushes the cart to the server for a signed-in
    /// customer, then sets up a payment for the cart as it stands after that
    /// sync. With `save_to_profile`, the shipping address is also saved to the
    /// customer's profile; that save is best-effort.
    ///
    /// # Errors
    ///
    /// On [`CheckoutError::Validation`], [`CheckoutError::Sync`] and
    /// [`CheckoutError::PaymentSetup`] the session stays on the shipping step
    /// with its details intact. [`CheckoutError::EmptyCart`] discards the
    /// session. [`CheckoutError::Busy`] while a previous call is still
    /// setting up the payment.
    #[instrument(skip(self))]
    pub async fn proceed_to_payment(&self, save_to_profile: bool) -> Result<(), CheckoutError> {
        self.ensure_no_unplaced_order()?;
        // Busy until the payment step is entered: the form is frozen to the
        // address the intent is created for
        let (id, shipping_address) = self.update(None, |s| {
            s.ensure_step(CheckoutStep::Shipping)?;
            s.ensure_idle()?;
            s.validate()?;
            s.submitting = true;
            Ok((s.id, s.shipping_address.trimmed()))
        })?;

        let customer = match self.setup_payment(id, &shipping_address).await {
            Ok(customer) => customer,
            Err(e) => {
                let _ = self.finish_attempt(id);
                return Err(e);
            }
        };

        if save_to_profile && let Some(customer) = customer {
            if let Err(e) = self
                .inner
                .profile
                .save_shipping_address(&customer, &shipping_address)
                .await
            {
                warn!(error = %e, "Failed to save shipping address to profile");
            } else {
                debug!(user_id = %customer.user_id, "Saved shipping address to profile");
            }
        }

        Ok(())
    }

    /// Sync the cart, create the intent and enter the payment step.
    ///
    /// Returns the signed-in customer, if any.
    async fn setup_payment(
        &self,
        id: SessionId,
        shipping_address: &ShippingAddress,
    ) -> Result<Option<Customer>, CheckoutError> {
        let cart = &self.inner.cart;
        if !cart.is_hydrated() {
            return Err(CheckoutError::HydrationPending);
        }
        if cart.snapshot().is_empty() {
            self.abandon(id, CheckoutView::EmptyCart);
            return Err(CheckoutError::EmptyCart);
        }

        let customer = cart.customer();
        if customer.is_some() {
            cart.sync_cart_with_server().await?;
        }

        // Snapshot after the sync so the charge matches the server cart
        let items = cart.items();
        if items.is_empty() {
            self.abandon(id, CheckoutView::EmptyCart);
            return Err(CheckoutError::EmptyCart);
        }
        let breakdown = self.inner.pricing.breakdown_for(&items);

        let intent = self
            .inner
            .payments
            .create_payment_intent(&items, shipping_address)
            .await?;
        let payment_intent_id = intent.payment_intent_id.clone();

        self.update(Some(id), |s| {
            s.submitting = false;
            s.enter_payment(PaymentSetup {
                intent,
                items,
                shipping_address: shipping_address.clone(),
                breakdown,
            })
        })?;

        info!(session_id = %id, payment_intent_id = %payment_intent_id, total = %breakdown.total, "Entered payment step");
        add_breadcrumb(
            "checkout",
            "Entered payment step",
            Some(&[("payment_intent_id", payment_intent_id.as_str())]),
        );
        Ok(customer)
    }

    // =========================================================================
    // Payment step
    // =========================================================================

    /// `payment -> shipping`, discarding the payment intent.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::Busy`] while a payment is in flight.
    #[instrument(skip(self))]
    pub fn back_to_shipping(&self) -> Result<(), CheckoutError> {
        self.update(None, CheckoutSession::return_to_shipping)?;
        add_breadcrumb("checkout", "Returned to shipping step", None);
        Ok(())
    }

    /// Navigate away from checkout, discarding the session.
    ///
    /// An in-flight confirmation is not cancelled; its result is discarded
    /// when it lands (a captured payment still produces its order). A
    /// pending order outlives the session as [`CheckoutState::unplaced_order`].
    pub fn cancel(&self) {
        self.inner.state.send_if_modified(|s| {
            let Some(mut session) = s.session.take() else {
                return false;
            };
            if let Some(pending) = session.pending_order.take() {
                warn!(
                    session_id = %session.id,
                    payment_intent_id = %pending.request.payment_intent_id,
                    "Checkout cancelled with an unplaced order"
                );
                s.unplaced_order = Some(pending);
            } else {
                info!(session_id = %session.id, "Checkout cancelled");
            }
            true
        });
    }

    /// `payment -> confirmation`.
    ///
    /// Confirms the payment and, once it succeeds, creates the order, clears
    /// the cart and ends the session.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::Busy`] if a payment is already in flight
    /// - [`CheckoutError::EmptyCart`] if the cart emptied mid-checkout (the
    ///   session is discarded)
    /// - [`CheckoutError::CartChanged`] if the cart no longer matches the
    ///   payment (the session returns to shipping)
    /// - [`CheckoutError::PaymentDeclined`]: the session stays on payment
    /// - [`CheckoutError::PaymentAmbiguous`]: navigate to the status view
    /// - [`CheckoutError::OrderSubmission`]: paid without an order; see
    ///   [`CheckoutFlow::retry_order`]
    #[instrument(skip(self, details))]
    pub async fn submit_payment(
        &self,
        mut details: PaymentDetails,
    ) -> Result<OrderConfirmation, CheckoutError> {
        self.ensure_no_unplaced_order()?;
        let (id, setup, billing) = self.update(None, |s| {
            s.ensure_step(CheckoutStep::Payment)?;
            s.ensure_idle()?;
            if s.pending_order.is_some() {
                // Paid already; only the order is missing
                return Err(CheckoutError::Busy);
            }
            let setup = s.payment.clone().ok_or(CheckoutError::InvalidStep {
                expected: CheckoutStep::Payment,
                actual: CheckoutStep::Shipping,
            })?;
            s.submitting = true;
            Ok((s.id, setup, s.billing_for_order()))
        })?;

        let items = self.inner.cart.items();
        if items.is_empty() {
            warn!(session_id = %id, "Cart emptied during checkout");
            self.abandon(id, CheckoutView::EmptyCart);
            return Err(CheckoutError::EmptyCart);
        }
        if items != setup.items {
            warn!(session_id = %id, "Cart changed since payment setup");
            self.update(Some(id), |s| {
                s.submitting = false;
                s.return_to_shipping()
            })?;
            return Err(CheckoutError::CartChanged);
        }

        details.billing_address.clone_from(&billing);
        let outcome = self
            .inner
            .payments
            .confirm_payment(&setup.intent, &details)
            .await;

        match outcome {
            PaymentOutcome::Succeeded(payment_intent_id) => {
                let request = OrderRequest {
                    items: setup.items.clone(),
                    shipping_address: setup.shipping_address.clone(),
                    billing_address: billing,
                    payment_intent_id,
                    total_amount: setup.breakdown.total,
                };
                let pending = PendingOrder {
                    request,
                    breakdown: setup.breakdown,
                };
                self.complete_order(Some(id), pending).await
            }
            PaymentOutcome::Declined { message } => {
                info!(session_id = %id, "Payment declined");
                let _ = self.finish_attempt(id);
                Err(CheckoutError::PaymentDeclined { message })
            }
            PaymentOutcome::Pending {
                payment_intent_id,
                status,
            } => {
                info!(session_id = %id, payment_intent_id = %payment_intent_id, "Payment outcome pending");
                if self.finish_attempt(id).is_ok() {
                    let view = CheckoutView::PaymentStatus(payment_intent_id.clone());
                    self.inner.state.send_modify(|s| s.redirect = Some(view));
                }
                Err(CheckoutError::PaymentAmbiguous {
                    payment_intent_id,
                    status,
                })
            }
        }
    }

    /// Resolve a pending payment from the status view.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::PaymentAmbiguous`] while the outcome is still
    /// unknown, [`CheckoutError::PaymentDeclined`] if it failed, and the
    /// errors of order submission if it succeeded.
    #[instrument(skip(self))]
    pub async fn resolve_payment_status(&self) -> Result<OrderConfirmation, CheckoutError> {
        let (id, setup, billing) = self.update(None, |s| {
            s.ensure_step(CheckoutStep::Payment)?;
            s.ensure_idle()?;
            let setup = s.payment.clone().ok_or(CheckoutError::NoSession)?;
            s.submitting = true;
            Ok((s.id, setup, s.billing_for_order()))
        })?;
        let payment_intent_id = setup.intent.payment_intent_id.clone();

        let status = match self.inner.payments.check_status(&payment_intent_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Payment status check failed");
                let _ = self.finish_attempt(id);
                return Err(CheckoutError::PaymentAmbiguous {
                    payment_intent_id,
                    status: None,
                });
            }
        };

        match PaymentOutcome::from_status(payment_intent_id, status, None) {
            PaymentOutcome::Succeeded(payment_intent_id) => {
                let request = OrderRequest {
                    items: setup.items.clone(),
                    shipping_address: setup.shipping_address.clone(),
                    billing_address: billing,
                    payment_intent_id,
                    total_amount: setup.breakdown.total,
                };
                let pending = PendingOrder {
                    request,
                    breakdown: setup.breakdown,
                };
                self.complete_order(Some(id), pending).await
            }
            PaymentOutcome::Declined { message } => {
                let _ = self.finish_attempt(id);
                Err(CheckoutError::PaymentDeclined { message })
            }
            PaymentOutcome::Pending {
                payment_intent_id,
                status,
            } => {
                let _ = self.finish_attempt(id);
                Err(CheckoutError::PaymentAmbiguous {
                    payment_intent_id,
                    status,
                })
            }
        }
    }

    /// Retry creating the order for a captured payment.
    ///
    /// Works for the current session's pending order and for one left behind
    /// by a cancelled session.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidStep`] when no order is pending and
    /// [`CheckoutError::OrderSubmission`] if it fails again.
    #[instrument(skip(self))]
    pub async fn retry_order(&self) -> Result<OrderConfirmation, CheckoutError> {
        let mut claimed = Err(CheckoutError::NoSession);
        self.inner.state.send_if_modified(|state| {
            claimed = claim_pending_order(state);
            claimed.is_ok()
        });
        let (id, pending) = claimed?;
        self.complete_order(id, pending).await
    }

    /// Create the order for a captured payment and finish its session.
    ///
    /// `id` is `None` for an order whose session already ended.
    async fn complete_order(
        &self,
        id: Option<SessionId>,
        pending: PendingOrder,
    ) -> Result<OrderConfirmation, CheckoutError> {
        let PendingOrder { request, breakdown } = pending;
        let receipt = match self.inner.payments.submit_order(&request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                // The payment stays retryable even if its session is gone
                self.inner.state.send_modify(|state| {
                    let pending = PendingOrder { request, breakdown };
                    match state.session.as_mut().filter(|s| Some(s.id) == id) {
                        Some(session) => {
                            session.submitting = false;
                            session.pending_order = Some(pending);
                        }
                        None => state.unplaced_order = Some(pending),
                    }
                });
                return Err(e);
            }
        };

        let confirmation = OrderConfirmation {
            order_id: receipt.order_id,
            payment_intent_id: request.payment_intent_id,
            items: request.items,
            shipping_address: request.shipping_address,
            breakdown,
            placed_at: Utc::now(),
        };

        let current = id.is_some() && self.inner.state.borrow().session_id() == id;
        if current {
            if let Err(e) = self.inner.cart.clear_cart().await {
                warn!(error = %e, "Failed to clear cart after order");
            }
            if self.inner.cart.customer().is_some()
                && let Err(e) = self.inner.cart.sync_cart_with_server().await
            {
                warn!(error = %e, "Failed to push emptied cart after order");
            }
        } else {
            // The customer moved on; their current cart is theirs to keep
            warn!(session_id = ?id, order_id = %confirmation.order_id, "Order completed for an abandoned session");
        }

        let view = CheckoutView::OrderConfirmation(confirmation.order_id.clone());
        self.inner.state.send_modify(|s| {
            let ended = id.is_some() && s.session_id() == id;
            if ended {
                s.session = None;
            }
            if ended || id.is_none() {
                s.redirect = Some(view);
            }
            s.confirmation = Some(confirmation.clone());
        });

        info!(
            session_id = ?id,
            order_id = %confirmation.order_id,
            payment_intent_id = %confirmation.payment_intent_id,
            "Checkout complete"
        );
        add_breadcrumb(
            "checkout",
            "Order placed",
            Some(&[("order_id", confirmation.order_id.as_str())]),
        );
        Ok(confirmation)
    }

    /// Fail while a captured payment from an ended session has no order.
    fn ensure_no_unplaced_order(&self) -> Result<(), CheckoutError> {
        if self.inner.state.borrow().unplaced_order.is_some() {
            Err(CheckoutError::Busy)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Cart guard
    // =========================================================================

    /// Watch the cart and end the session if it empties mid-checkout.
    ///
    /// A session with a payment in flight or a pending order is left alone;
    /// those finish on their own.
    pub fn watch_cart(&self) -> JoinHandle<()> {
        let flow = self.clone();
        let mut emptied = self
            .inner
            .cart
            .subscribe_slice(|s: &CartState| s.hydrated && !s.switching && s.is_empty());
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                if *emptied.borrow_and_update() {
                    flow.handle_cart_emptied();
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Checkout cart guard shutting down");
                        break;
                    }
                    changed = emptied.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn handle_cart_emptied(&self) {
        let idle = self
            .inner
            .state
            .borrow()
            .session
            .as_ref()
            .filter(|s| !s.submitting && s.pending_order.is_none())
            .map(|s| s.id);
        if let Some(id) = idle {
            warn!(session_id = %id, "Cart emptied during checkout");
            self.abandon(id, CheckoutView::EmptyCart);
        }
    }

    /// Stop the cart guard.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(());
    }
}

/// Take the order awaiting retry and mark its session busy.
fn claim_pending_order(
    state: &mut CheckoutState,
) -> Result<(Option<SessionId>, PendingOrder), CheckoutError> {
    if let Some(pending) = state.unplaced_order.take() {
        return Ok((None, pending));
    }
    let session = state.session.as_mut().ok_or(CheckoutError::NoSession)?;
    session.ensure_idle()?;
    let pending = session
        .pending_order
        .clone()
        .ok_or(CheckoutError::InvalidStep {
            expected: CheckoutStep::Confirmation,
            actual: session.step,
        })?;
    session.submitting = true;
    Ok((Some(session.id), pending))
}
