//! The checkout session state machine.
//!
//! Pure data and guarded transitions; no I/O. [`super::CheckoutFlow`] drives
//! it and performs the side effects each transition needs.

use stride_core::{CartItem, CheckoutStep, SessionId, ShippingAddress};

use crate::api::{OrderRequest, PaymentIntentRef};
use crate::error::{AddressSection, CheckoutError, ValidationError};
use crate::pricing::PriceBreakdown;

/// A payment set up for one cart snapshot.
///
/// Discarded on the way back to shipping; a new one is created if the
/// customer proceeds again since the total may have changed.
#[derive(Debug, Clone)]
pub struct PaymentSetup {
    pub intent: PaymentIntentRef,
    /// Cart lines the intent was created for.
    pub items: Vec<CartItem>,
    /// Address the intent was created for.
    pub shipping_address: ShippingAddress,
    pub breakdown: PriceBreakdown,
}

/// A captured payment whose order could not be created yet.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub request: OrderRequest,
    /// Breakdown the customer paid, carried to the confirmation.
    pub breakdown: PriceBreakdown,
}

/// One checkout attempt.
///
/// Lives in memory only; navigating away discards it.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: SessionId,
    pub step: CheckoutStep,
    pub shipping_address: ShippingAddress,
    pub billing_same_as_shipping: bool,
    /// Used only when `billing_same_as_shipping` is false.
    pub billing_address: ShippingAddress,
    /// Set on entering the payment step.
    pub payment: Option<PaymentSetup>,
    /// Payment setup, confirmation or order submission is in flight.
    pub submitting: bool,
    pub pending_order: Option<PendingOrder>,
}

impl Default for CheckoutSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckoutSession {
    /// A fresh session on the shipping step.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            step: CheckoutStep::Shipping,
            shipping_address: ShippingAddress::default(),
            billing_same_as_shipping: true,
            billing_address: ShippingAddress::default(),
            payment: None,
            submitting: false,
            pending_order: None,
        }
    }

    /// Fail unless the session is on `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidStep`] otherwise.
    pub fn ensure_step(&self, expected: CheckoutStep) -> Result<(), CheckoutError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(CheckoutError::InvalidStep {
                expected,
                actual: self.step,
            })
        }
    }

    /// Fail if a payment is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::Busy`] while submitting.
    pub const fn ensure_idle(&self) -> Result<(), CheckoutError> {
        if self.submitting {
            Err(CheckoutError::Busy)
        } else {
            Ok(())
        }
    }

    /// Check the addresses needed to leave the shipping step.
    ///
    /// # Errors
    ///
    /// Returns the first address section with missing fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.shipping_address
            .validate()
            .map_err(|fields| ValidationError {
                section: AddressSection::Shipping,
                fields,
            })?;

        if !self.billing_same_as_shipping {
            self.billing_address
                .validate()
                .map_err(|fields| ValidationError {
                    section: AddressSection::Billing,
                    fields,
                })?;
        }
        Ok(())
    }

    /// The billing address to send, or `None` when it equals shipping.
    #[must_use]
    pub fn billing_for_order(&self) -> Option<ShippingAddress> {
        (!self.billing_same_as_shipping).then(|| self.billing_address.trimmed())
    }

    /// `shipping -> payment`, storing the payment set up for it.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidStep`] unless on the shipping step.
    pub fn enter_payment(&mut self, setup: PaymentSetup) -> Result<(), CheckoutError> {
        self.ensure_step(CheckoutStep::Shipping)?;
        self.payment = Some(setup);
        self.step = CheckoutStep::Payment;
        Ok(())
    }

    /// `payment -> shipping`, discarding the payment setup.
    ///
    /// A no-op on the shipping step.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::Busy`] while a payment is in flight and
    /// [`CheckoutError::InvalidStep`] once an order is pending.
    pub fn return_to_shipping(&mut self) -> Result<(), CheckoutError> {
        self.ensure_idle()?;
        if self.pending_order.is_some() {
            // Funds are captured; only the order can move this session on
            return Err(CheckoutError::InvalidStep {
                expected: CheckoutStep::Shipping,
                actual: self.step,
            });
        }
        match self.step {
            CheckoutStep::Shipping => Ok(()),
            CheckoutStep::Payment => {
                self.payment = None;
                self.step = CheckoutStep::Shipping;
                Ok(())
            }
            CheckoutStep::Confirmation => Err(CheckoutError::InvalidStep {
                expected: CheckoutStep::Payment,
                actual: self.step,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;
    use stride_core::{AddressField, PaymentIntentId};

    use super::*;
    use crate::pricing::PricingRules;
    use crate::testing::shipping_address;

    fn setup() -> PaymentSetup {
        PaymentSetup {
            intent: PaymentIntentRef {
                payment_intent_id: PaymentIntentId::new("pi_1"),
                client_secret: SecretString::from("pi_1_secret"),
            },
            items: Vec::new(),
            shipping_address: shipping_address(),
            breakdown: PricingRules::default().breakdown_for(&[]),
        }
    }

    #[test]
    fn test_new_session_starts_on_shipping() {
        let session = CheckoutSession::new();
        assert_eq!(session.step, CheckoutStep::Shipping);
        assert!(session.billing_same_as_shipping);
        assert!(session.payment.is_none());
        assert_ne!(session.id, CheckoutSession::new().id);
    }

    #[test]
    fn test_blank_zip_fails_on_zip_field() {
        let mut session = CheckoutSession::new();
        session.shipping_address = ShippingAddress {
            zip_code: String::new(),
            ..shipping_address()
        };
        let err = session.validate().unwrap_err();
        assert_eq!(err.section, AddressSection::Shipping);
        assert_eq!(err.fields.len(), 1);
        assert!(err.fields.contains_key(&AddressField::ZipCode));
    }

    #[test]
    fn test_billing_checked_only_when_separate() {
        let mut session = CheckoutSession::new();
        session.shipping_address = shipping_address();
        assert!(session.validate().is_ok());
        assert_eq!(session.billing_for_order(), None);

        session.billing_same_as_shipping = false;
        let err = session.validate().unwrap_err();
        assert_eq!(err.section, AddressSection::Billing);

        session.billing_address = shipping_address();
        assert!(session.validate().is_ok());
        assert_eq!(session.billing_for_order(), Some(shipping_address()));
    }

    #[test]
    fn test_payment_round_trip_discards_intent() {
        let mut session = CheckoutSession::new();
        session.enter_payment(setup()).unwrap();
        assert_eq!(session.step, CheckoutStep::Payment);
        assert!(matches!(
            session.enter_payment(setup()),
            Err(CheckoutError::InvalidStep { .. })
        ));

        session.return_to_shipping().unwrap();
        assert_eq!(session.step, CheckoutStep::Shipping);
        assert!(session.payment.is_none());
    }

    #[test]
    fn test_back_rejected_while_submitting() {
        let mut session = CheckoutSession::new();
        session.enter_payment(setup()).unwrap();
        session.submitting = true;
        assert!(matches!(
            session.return_to_shipping(),
            Err(CheckoutError::Busy)
        ));
        assert_eq!(session.step, CheckoutStep::Payment);
    }
}
