//! Shipping, tax and total calculation.
//!
//! Pure functions over a subtotal. The cart preview and the checkout summary
//! both go through [`PricingRules::breakdown`], so they can never disagree.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use stride_core::{CartItem, CurrencyCode, Price};

/// Store-wide pricing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingRules {
    /// Currency every amount is expressed in.
    pub currency: CurrencyCode,
    /// Subtotal at or above which shipping is free.
    pub free_shipping_threshold: Decimal,
    /// Shipping fee charged below the threshold.
    pub flat_shipping_fee: Decimal,
    /// Flat tax rate applied to the subtotal (0.08 = 8%).
    pub tax_rate: Decimal,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::USD,
            free_shipping_threshold: Decimal::new(100, 0),
            flat_shipping_fee: Decimal::new(999, 2),
            tax_rate: Decimal::new(8, 2),
        }
    }
}

/// Subtotal, shipping, tax and total for one cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub subtotal: Price,
    pub shipping: Price,
    pub tax: Price,
    pub total: Price,
}

impl PricingRules {
    /// Shipping for a subtotal: free at or above the threshold, flat below.
    ///
    /// An empty cart ships for free.
    #[must_use]
    pub fn shipping(&self, subtotal: Decimal) -> Decimal {
        if subtotal <= Decimal::ZERO || subtotal >= self.free_shipping_threshold {
            Decimal::ZERO
        } else {
            self.flat_shipping_fee
        }
    }

    /// Tax on a subtotal, rounded to cents (midpoint away from zero).
    #[must_use]
    pub fn tax(&self, subtotal: Decimal) -> Decimal {
        (subtotal * self.tax_rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// `subtotal + shipping + tax`.
    #[must_use]
    pub fn total(&self, subtotal: Decimal) -> Decimal {
        subtotal + self.shipping(subtotal) + self.tax(subtotal)
    }

    /// Full breakdown for a subtotal.
    #[must_use]
    pub fn breakdown(&self, subtotal: Decimal) -> PriceBreakdown {
        let price = |amount| Price::new(amount, self.currency);
        PriceBreakdown {
            subtotal: price(subtotal),
            shipping: price(self.shipping(subtotal)),
            tax: price(self.tax(subtotal)),
            total: price(self.total(subtotal)),
        }
    }

    /// Full breakdown for a set of cart lines.
    #[must_use]
    pub fn breakdown_for(&self, items: &[CartItem]) -> PriceBreakdown {
        self.breakdown(subtotal(items))
    }
}

/// Sum of `unit_price x quantity` over the lines.
#[must_use]
pub fn subtotal(items: &[CartItem]) -> Decimal {
    items.iter().map(CartItem::line_total).sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use stride_core::{CartItemKey, VariantId};

    fn dollars(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_total_above_free_shipping_threshold() {
        let rules = PricingRules::default();
        let subtotal = dollars("120");
        assert_eq!(rules.shipping(subtotal), Decimal::ZERO);
        assert_eq!(rules.tax(subtotal), dollars("9.60"));
        assert_eq!(rules.total(subtotal), dollars("129.60"));
    }

    #[test]
    fn test_total_below_free_shipping_threshold() {
        let rules = PricingRules::default();
        let subtotal = dollars("40");
        assert_eq!(rules.shipping(subtotal), dollars("9.99"));
        assert_eq!(rules.tax(subtotal), dollars("3.20"));
        assert_eq!(rules.total(subtotal), dollars("53.19"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let rules = PricingRules::default();
        assert_eq!(rules.shipping(dollars("100.00")), Decimal::ZERO);
        assert_eq!(rules.shipping(dollars("99.99")), dollars("9.99"));
    }

    #[test]
    fn test_empty_cart_ships_free() {
        let rules = PricingRules::default();
        assert_eq!(rules.total(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_tax_rounds_half_away_from_zero() {
        let rules = PricingRules::default();
        // 0.08 * 10.5625 = 0.845
        assert_eq!(rules.tax(dollars("10.5625")), dollars("0.85"));
    }

    #[test]
    fn test_breakdown_for_items() {
        let rules = PricingRules::default();
        let item = CartItem {
            key: CartItemKey::new(VariantId::new(1), "9", "Red"),
            name: "Court Classic".to_string(),
            unit_price: Price::from_cents(2000, CurrencyCode::USD),
            quantity: 2,
            image: None,
        };
        let breakdown = rules.breakdown_for(&[item]);
        assert_eq!(breakdown.subtotal.display(), "$40.00");
        assert_eq!(breakdown.shipping.display(), "$9.99");
        assert_eq!(breakdown.tax.display(), "$3.20");
        assert_eq!(breakdown.total.display(), "$53.19");
    }
}
