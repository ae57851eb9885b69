//! Stride storefront engine.
//!
//! The state layer behind the storefront UI: a persisted cart that reconciles
//! with the server cart on sign-in, and a checkout flow that takes a customer
//! from shipping details through payment to a placed order.
//!
//! # Architecture
//!
//! - [`cart::CartStore`] owns the local cart and publishes it on a `watch`
//!   channel
//! - [`identity::IdentityObserver`] turns identity changes into cart
//!   reconciliation
//! - [`checkout::CheckoutFlow`] runs the checkout state machine on top of the
//!   cart and [`payment::PaymentOrchestrator`]
//! - [`api`] holds the seams to the backing API and its HTTP client
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stride_storefront::api::ApiClient;
//! use stride_storefront::cart::{CartStore, FileCartStorage};
//! use stride_storefront::checkout::CheckoutFlow;
//! use stride_storefront::config::StorefrontConfig;
//! use stride_storefront::payment::PaymentOrchestrator;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StorefrontConfig::from_env()?;
//! let _guard = stride_storefront::telemetry::init(&config)?;
//!
//! let api = Arc::new(ApiClient::new(&config.api)?);
//! let cart = CartStore::new(
//!     Arc::new(FileCartStorage::new(&config.cart_storage_path)),
//!     api.clone(),
//! );
//! cart.hydrate().await;
//!
//! let payments = PaymentOrchestrator::new(api.clone(), api.clone(), config.order_retry);
//! let checkout = CheckoutFlow::new(cart, payments, api, config.pricing);
//! checkout.begin()?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod error;
pub mod identity;
pub mod payment;
pub mod pricing;
pub mod signal;
pub mod telemetry;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use checkout::{CheckoutFlow, CheckoutState, CheckoutView, OrderConfirmation};
pub use error::{CheckoutError, Notice, Severity};
