//! Stride Core - Shared domain types.
//!
//! This crate provides the types shared by the Stride storefront components:
//! - `storefront` - Cart store, identity reconciliation, checkout and payment
//! - `integration-tests` - End-to-end checkout scenarios
//!
//! # Architecture
//!
//! The core crate contains only types and validation - no I/O, no storage,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, prices, emails, cart items, addresses and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
