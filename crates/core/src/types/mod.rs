//! Core types for Stride.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod address;
pub mod cart;
pub mod email;
pub mod id;
pub mod price;
pub mod status;

pub use address::{AddressField, FieldErrors, ShippingAddress};
pub use cart::{CartItem, CartItemKey};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use status::*;
