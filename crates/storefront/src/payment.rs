//! Payment orchestration.
//!
//! Wraps the payment gateway and the order API:
//!
//! 1. [`PaymentOrchestrator::create_payment_intent`] sets up a payment for a
//!    cart snapshot; the server prices it.
//! 2. [`PaymentOrchestrator::confirm_payment`] confirms it and classifies the
//!    result as succeeded, declined or pending.
//! 3. [`PaymentOrchestrator::submit_order`] creates the order for a succeeded
//!    payment, exactly once per payment intent, retrying transient failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use stride_core::{CartItem, PaymentIntentId, PaymentStatus, ShippingAddress};
use tracing::{debug, info, instrument, warn};

use crate::api::{
    ApiError, OrderApi, OrderReceipt, OrderRequest, PaymentDetails, PaymentGateway,
    PaymentIntentRef, PaymentIntentRequest,
};
use crate::config::RetryPolicy;
use crate::error::{CheckoutError, add_breadcrumb};

/// Shown when the gateway declines without a message of its own.
const DEFAULT_DECLINE_MESSAGE: &str =
    "Your payment was declined. Please try another payment method.";

/// Classified result of confirming a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Funds are captured; the order must now be created.
    Succeeded(PaymentIntentId),
    /// No funds moved; the customer may retry with other details.
    Declined { message: String },
    /// The outcome is not known yet (processing, extra authentication, or
    /// the confirmation call itself failed).
    Pending {
        payment_intent_id: PaymentIntentId,
        status: Option<PaymentStatus>,
    },
}

impl PaymentOutcome {
    /// Classify a gateway status.
    #[must_use]
    pub fn from_status(
        payment_intent_id: PaymentIntentId,
        status: PaymentStatus,
        decline_message: Option<String>,
    ) -> Self {
        match status {
            PaymentStatus::Succeeded => Self::Succeeded(payment_intent_id),
            PaymentStatus::RequiresPaymentMethod | PaymentStatus::Canceled => Self::Declined {
                message: decline_message
                    .unwrap_or_else(|| DEFAULT_DECLINE_MESSAGE.to_string()),
            },
            PaymentStatus::Processing | PaymentStatus::RequiresAction => Self::Pending {
                payment_intent_id,
                status: Some(status),
            },
        }
    }
}

/// Drives payment intents and order submission.
///
/// Cheap to clone; clones share the submitted-order ledger.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    inner: Arc<PaymentOrchestratorInner>,
}

struct PaymentOrchestratorInner {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderApi>,
    retry: RetryPolicy,
    /// Orders already created, by payment intent.
    receipts: Mutex<HashMap<PaymentIntentId, OrderReceipt>>,
    /// One submission at a time, so a retry never races a late success.
    submit_lock: tokio::sync::Mutex<()>,
}

impl PaymentOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderApi>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(PaymentOrchestratorInner {
                gateway,
                orders,
                retry,
                receipts: Mutex::new(HashMap::new()),
                submit_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Set up a payment for the given cart snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::EmptyCart`] for an empty snapshot and
    /// [`CheckoutError::PaymentSetup`] if the gateway call fails.
    #[instrument(skip(self, items, shipping_address), fields(item_count = items.len()))]
    pub async fn create_payment_intent(
        &self,
        items: &[CartItem],
        shipping_address: &ShippingAddress,
    ) -> Result<PaymentIntentRef, CheckoutError> {
        if items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let request = PaymentIntentRequest {
            items: items.to_vec(),
            shipping_address: shipping_address.clone(),
        };
        let intent = self
            .inner
            .gateway
            .create_payment_intent(&request)
            .await
            .map_err(|e| {
                warn!(error = %e, "Payment intent creation failed");
                CheckoutError::PaymentSetup(e)
            })?;

        debug!(payment_intent_id = %intent.payment_intent_id, "Payment intent created");
        Ok(intent)
    }

    /// Confirm a payment intent.
    ///
    /// Never fails: a failed confirmation call is reported as
    /// [`PaymentOutcome::Pending`] because the gateway may have charged the
    /// card before the connection dropped.
    #[instrument(skip(self, intent, details), fields(payment_intent_id = %intent.payment_intent_id))]
    pub async fn confirm_payment(
        &self,
        intent: &PaymentIntentRef,
        details: &PaymentDetails,
    ) -> PaymentOutcome {
        add_breadcrumb(
            "payment",
            "Confirming payment",
            Some(&[("payment_intent_id", intent.payment_intent_id.as_str())]),
        );

        match self
            .inner
            .gateway
            .confirm_payment(&intent.client_secret, details)
            .await
        {
            Ok(confirmation) => {
                info!(status = %confirmation.status, "Payment confirmation returned");
                PaymentOutcome::from_status(
                    intent.payment_intent_id.clone(),
                    confirmation.status,
                    confirmation.decline_message,
                )
            }
            Err(e) => {
                warn!(error = %e, "Payment confirmation failed, outcome unknown");
                PaymentOutcome::Pending {
                    payment_intent_id: intent.payment_intent_id.clone(),
                    status: None,
                }
            }
        }
    }

    /// Current status of a payment intent, for the status view.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the lookup fails.
    #[instrument(skip(self), fields(payment_intent_id = %id))]
    pub async fn check_status(&self, id: &PaymentIntentId) -> Result<PaymentStatus, ApiError> {
        self.inner.gateway.retrieve_status(id).await
    }

    /// Create the order for a succeeded payment.
    ///
    /// Submits at most once per payment intent: a repeated call returns the
    /// first receipt without touching the order API. Transient failures are
    /// retried per the configured [`RetryPolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::OrderSubmission`] once retries are exhausted
    /// or the failure is permanent. The error is captured to Sentry because
    /// the customer has paid without an order.
    #[instrument(skip(self, request), fields(payment_intent_id = %request.payment_intent_id))]
    pub async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt, CheckoutError> {
        let _guard = self.inner.submit_lock.lock().await;

        if let Some(receipt) = self.receipt(&request.payment_intent_id) {
            debug!(order_id = %receipt.order_id, "Order already submitted");
            return Ok(receipt);
        }

        let RetryPolicy {
            max_attempts,
            delay,
        } = self.inner.retry;
        let mut attempt = 1;

        loop {
            match self.inner.orders.submit_order(request).await {
                Ok(receipt) => {
                    info!(order_id = %receipt.order_id, attempt, "Order created");
                    self.inner
                        .receipts
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(request.payment_intent_id.clone(), receipt.clone());
                    return Ok(receipt);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let wait = match e {
                        ApiError::RateLimited(secs) => Duration::from_secs(secs).max(delay),
                        _ => delay,
                    };
                    warn!(error = %e, attempt, max_attempts, "Order submission failed, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    let err = CheckoutError::OrderSubmission {
                        payment_intent_id: request.payment_intent_id.clone(),
                        source: e,
                    };
                    err.capture();
                    return Err(err);
                }
            }
        }
    }

    /// The receipt of an order already created for this payment intent.
    #[must_use]
    pub fn receipt(&self, id: &PaymentIntentId) -> Option<OrderReceipt> {
        self.inner
            .receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}
