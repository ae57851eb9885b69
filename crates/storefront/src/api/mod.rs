//! Seams to the external collaborators: server cart, payment gateway, order
//! API and customer profile.
//!
//! # Architecture
//!
//! - Each collaborator is an `async_trait` so stores hold `Arc<dyn _>` and
//!   tests swap in the in-memory versions from [`crate::testing`]
//! - [`ApiClient`] implements every trait over HTTP with `reqwest`
//! - The backing API is the source of truth for authenticated carts and for
//!   payment state; nothing here caches its answers

mod client;
pub mod types;

pub use client::ApiClient;
pub use types::*;

use async_trait::async_trait;
use secrecy::SecretString;
use stride_core::{CartItem, PaymentIntentId, PaymentStatus, ShippingAddress};
use thiserror::Error;

use crate::identity::Customer;

/// Errors that can occur when talking to the backing API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed before a response arrived (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The request was rejected as invalid (HTTP 422).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Rate limited by the API.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Response body could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApiError {
    /// Whether retrying the same request could succeed.
    ///
    /// Transport failures, rate limiting and 5xx responses are transient;
    /// validation and other 4xx rejections are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Validation(_) | Self::Parse(_) => false,
        }
    }
}

/// Authoritative cart storage for authenticated customers.
#[async_trait]
pub trait CartGateway: Send + Sync {
    /// Fetch the customer's server cart.
    async fn fetch_cart(&self, customer: &Customer) -> Result<Vec<CartItem>, ApiError>;

    /// Replace the customer's server cart with `items`.
    ///
    /// Sends the full list, so repeating the call with the same items leaves
    /// the server cart unchanged.
    async fn replace_cart(&self, customer: &Customer, items: &[CartItem]) -> Result<(), ApiError>;
}

/// Payment gateway: payment intents and their confirmation.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent for the given cart and shipping address.
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntentRef, ApiError>;

    /// Confirm a payment intent with the customer's payment details.
    ///
    /// A declined card is a successful call with a non-success status.
    async fn confirm_payment(
        &self,
        client_secret: &SecretString,
        details: &PaymentDetails,
    ) -> Result<PaymentConfirmation, ApiError>;

    /// Current status of a payment intent.
    async fn retrieve_status(&self, id: &PaymentIntentId) -> Result<PaymentStatus, ApiError>;
}

/// Order persistence.
///
/// Implementations must treat `payment_intent_id` as an idempotency key:
/// submitting the same request twice yields one order.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Create the order for a captured payment.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt, ApiError>;
}

/// Customer profile writes.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    /// Save the address as the customer's default shipping address.
    async fn save_shipping_address(
        &self,
        customer: &Customer,
        address: &ShippingAddress,
    ) -> Result<(), ApiError>;
}
