//! Status enums for checkout and payment.

use serde::{Deserialize, Serialize};

/// Step of the checkout flow.
///
/// Progression is `Shipping -> Payment -> Confirmation`; `Payment -> Shipping`
/// is the only backwards move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    #[default]
    Shipping,
    Payment,
    Confirmation,
}

impl std::fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shipping => write!(f, "shipping"),
            Self::Payment => write!(f, "payment"),
            Self::Confirmation => write!(f, "confirmation"),
        }
    }
}

/// Payment intent status as reported by the payment gateway.
///
/// Only `Succeeded` means funds were captured. `Processing` and
/// `RequiresAction` are ambiguous: the payment may still settle either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Processing,
    RequiresAction,
    RequiresPaymentMethod,
    Canceled,
}

impl PaymentStatus {
    /// Whether the gateway reports funds as captured.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Whether the outcome is not yet known.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Processing | Self::RequiresAction)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Processing => "processing",
            Self::RequiresAction => "requires_action",
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "processing" => Ok(Self::Processing),
            "requires_action" => Ok(Self::RequiresAction),
            "requires_payment_method" => Ok(Self::RequiresPaymentMethod),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("invalid payment status: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_step_defaults_to_shipping() {
        assert_eq!(CheckoutStep::default(), CheckoutStep::Shipping);
        assert_eq!(CheckoutStep::Payment.to_string(), "payment");
    }

    #[test]
    fn test_payment_status_classification() {
        assert!(PaymentStatus::Succeeded.is_success());
        assert!(PaymentStatus::Processing.is_pending());
        assert!(PaymentStatus::RequiresAction.is_pending());
        assert!(!PaymentStatus::RequiresPaymentMethod.is_pending());
        assert!(!PaymentStatus::Canceled.is_success());
    }

    #[test]
    fn test_payment_status_wire_format() {
        let status: PaymentStatus = serde_json::from_str("\"requires_action\"").unwrap();
        assert_eq!(status, PaymentStatus::RequiresAction);
        assert_eq!("canceled".parse::<PaymentStatus>().unwrap(), PaymentStatus::Canceled);
    }
}
