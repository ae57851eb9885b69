//! Checkout error taxonomy with Sentry integration.
//!
//! Every checkout operation returns `Result<T, CheckoutError>`. The UI turns
//! an error into a [`Notice`] with [`CheckoutError::notice`]; internal
//! details never reach the customer. Errors that mean money moved without an
//! order are captured to Sentry by [`CheckoutError::capture`].

use std::fmt;

use stride_core::{CheckoutStep, FieldErrors, PaymentIntentId, PaymentStatus};
use thiserror::Error;

use crate::api::ApiError;
use crate::cart::{CartError, SyncError};
use crate::checkout::CheckoutView;

/// Shipping or billing address is incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Which address failed.
    pub section: AddressSection,
    /// Message per offending field.
    pub fields: FieldErrors,
}

/// Which address a [`ValidationError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSection {
    Shipping,
    Billing,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let section = match self.section {
            AddressSection::Shipping => "shipping",
            AddressSection::Billing => "billing",
        };
        write!(f, "{section} address is incomplete: ")?;
        let fields: Vec<_> = self.fields.values().map(String::as_str).collect();
        f.write_str(&fields.join(", "))
    }
}

impl std::error::Error for ValidationError {}

/// Errors returned by checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The store is still restoring the cart; wait and retry.
    #[error("cart is still loading")]
    HydrationPending,

    /// No checkout is in progress.
    #[error("no checkout session")]
    NoSession,

    /// The cart is empty; checkout cannot continue.
    #[error("cart is empty")]
    EmptyCart,

    /// The cart changed after the payment was set up.
    #[error("cart changed since payment was set up")]
    CartChanged,

    /// The operation does not apply to the current step.
    #[error("checkout is on the {actual} step, expected {expected}")]
    InvalidStep {
        expected: CheckoutStep,
        actual: CheckoutStep,
    },

    /// A payment confirmation is already in flight.
    #[error("a payment is already being processed")]
    Busy,

    /// The session this result belonged to was abandoned.
    #[error("checkout session is no longer active")]
    StaleSession,

    /// Address validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Cart sync before payment failed.
    #[error("cart sync failed: {0}")]
    Sync(#[from] SyncError),

    /// A local cart operation failed.
    #[error("cart error: {0}")]
    Cart(#[source] CartError),

    /// Payment intent creation failed.
    #[error("payment setup failed: {0}")]
    PaymentSetup(#[source] ApiError),

    /// The gateway declined the payment.
    #[error("payment declined: {message}")]
    PaymentDeclined { message: String },

    /// The payment outcome is not known yet.
    #[error("payment {payment_intent_id} outcome is pending")]
    PaymentAmbiguous {
        payment_intent_id: PaymentIntentId,
        status: Option<PaymentStatus>,
    },

    /// Funds were captured but the order could not be created.
    #[error("payment {payment_intent_id} captured but order submission failed: {source}")]
    OrderSubmission {
        payment_intent_id: PaymentIntentId,
        #[source]
        source: ApiError,
    },
}

impl From<CartError> for CheckoutError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::HydrationPending => Self::HydrationPending,
            CartError::Sync(e) => Self::Sync(e),
            other => Self::Cart(other),
        }
    }
}

/// How prominent a notice is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    /// Money moved without an order. Rendered apart from ordinary errors.
    Critical,
}

/// A user-visible message derived from an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    /// Whether the customer may close it.
    pub dismissible: bool,
    /// Whether offering "try again" makes sense.
    pub retryable: bool,
    /// Where the UI should navigate, if anywhere.
    pub redirect: Option<CheckoutView>,
    /// Per-field messages for form errors.
    pub fields: FieldErrors,
}

impl Notice {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            dismissible: true,
            retryable: false,
            redirect: None,
            fields: FieldErrors::new(),
        }
    }

    const fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    fn redirect(mut self, view: CheckoutView) -> Self {
        self.redirect = Some(view);
        self
    }
}

impl CheckoutError {
    /// Whether the error leaves the checkout session usable in its step.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::HydrationPending
                | Self::Validation(_)
                | Self::Sync(_)
                | Self::Cart(_)
                | Self::PaymentSetup(_)
                | Self::PaymentDeclined { .. }
                | Self::Busy
                | Self::CartChanged
        )
    }

    /// The notice to show the customer.
    #[must_use]
    pub fn notice(&self) -> Notice {
        match self {
            Self::HydrationPending => {
                Notice::new(Severity::Info, "Your cart is still loading.").retryable()
            }
            Self::NoSession | Self::StaleSession | Self::InvalidStep { .. } => Notice::new(
                Severity::Warning,
                "Your checkout session has changed. Please review your order.",
            ),
            Self::EmptyCart => Notice::new(Severity::Info, "Your cart is empty.")
                .redirect(CheckoutView::EmptyCart),
            Self::CartChanged => Notice::new(
                Severity::Warning,
                "Your cart changed. Please review your order before paying.",
            ),
            Self::Busy => Notice::new(Severity::Info, "Your payment is being processed."),
            Self::Validation(e) => Notice {
                fields: e.fields.clone(),
                ..Notice::new(Severity::Error, "Please complete the highlighted fields.")
            },
            Self::Sync(_) | Self::Cart(_) => Notice::new(
                Severity::Error,
                "We couldn't save your cart. Please try again.",
            )
            .retryable(),
            Self::PaymentSetup(_) => Notice::new(
                Severity::Error,
                "We couldn't start your payment. Please try again.",
            )
            .retryable(),
            Self::PaymentDeclined { message } => {
                Notice::new(Severity::Error, message.clone()).retryable()
            }
            Self::PaymentAmbiguous {
                payment_intent_id, ..
            } => Notice::new(
                Severity::Info,
                "Your payment is being confirmed. We'll show its status shortly.",
            )
            .redirect(CheckoutView::PaymentStatus(payment_intent_id.clone())),
            Self::OrderSubmission {
                payment_intent_id, ..
            } => Notice {
                dismissible: false,
                ..Notice::new(
                    Severity::Critical,
                    format!(
                        "Your payment was taken but we couldn't create your order. \
                         Please contact support with payment reference {payment_intent_id}."
                    ),
                )
                .retryable()
            },
        }
    }

    /// Send the error to Sentry if it needs human follow-up.
    ///
    /// Returns whether it was captured.
    pub fn capture(&self) -> bool {
        let Self::OrderSubmission {
            payment_intent_id, ..
        } = self
        else {
            return false;
        };

        let event_id = sentry::with_scope(
            |scope| {
                scope.set_tag("payment_intent_id", payment_intent_id.as_str());
                scope.set_level(Some(sentry::Level::Fatal));
            },
            || sentry::capture_error(self),
        );
        tracing::error!(
            error = %self,
            payment_intent_id = %payment_intent_id,
            sentry_event_id = %event_id,
            "Payment captured without an order"
        );
        true
    }
}

/// Add a breadcrumb for checkout actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of customer
/// actions leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
