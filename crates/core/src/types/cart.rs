//! Cart line items.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::VariantId;
use super::price::Price;

/// Composite identity of a cart line.
///
/// Two lines with the same variant, size and color are the same line; adding
/// one of them again increases the quantity instead of appending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CartItemKey {
    /// Product variant.
    pub variant_id: VariantId,
    /// Selected size (e.g. "10.5").
    pub size: String,
    /// Selected color (e.g. "Black/White").
    pub color: String,
}

impl CartItemKey {
    /// Build a key from its parts.
    #[must_use]
    pub fn new(variant_id: VariantId, size: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            variant_id,
            size: size.into(),
            color: color.into(),
        }
    }
}

impl core::fmt::Display for CartItemKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}/{}", self.variant_id, self.size, self.color)
    }
}

/// A line item in the cart.
///
/// `unit_price` is a snapshot taken when the item was added; it is never
/// re-derived from the catalog. Only a server reconciliation replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Composite identity.
    #[serde(flatten)]
    pub key: CartItemKey,
    /// Display name.
    pub name: String,
    /// Unit price at the time of add.
    pub unit_price: Price,
    /// Quantity, always at least 1.
    pub quantity: u32,
    /// Image reference (URL or media key).
    pub image: Option<String>,
}

impl CartItem {
    /// Price of this line (`unit_price` x `quantity`).
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price.amount * Decimal::from(self.quantity)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::CurrencyCode;

    fn item(quantity: u32) -> CartItem {
        CartItem {
            key: CartItemKey::new(VariantId::new(7), "10", "Black"),
            name: "Trail Runner".to_string(),
            unit_price: Price::from_cents(8950, CurrencyCode::USD),
            quantity,
            image: None,
        }
    }

    #[test]
    fn test_line_total() {
        assert_eq!(item(3).line_total(), Decimal::new(26850, 2));
    }

    #[test]
    fn test_key_flattened_in_json() {
        let json = serde_json::to_value(item(1)).unwrap();
        assert_eq!(json["variant_id"], 7);
        assert_eq!(json["size"], "10");
        assert_eq!(json["color"], "Black");
        assert_eq!(json["unit_price"]["amount"], "89.50");
    }

    #[test]
    fn test_key_display() {
        assert_eq!(item(1).key.to_string(), "7/10/Black");
    }
}
