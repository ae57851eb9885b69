//! Request and response types exchanged with the backing API.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use stride_core::{CartItem, OrderId, PaymentIntentId, PaymentStatus, Price, ShippingAddress};

// =============================================================================
// Cart
// =============================================================================

/// Body of `GET cart` and `PUT cart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartPayload {
    pub items: Vec<CartItem>,
}

/// Response of `PUT cart`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SyncAck {
    pub ok: bool,
}

// =============================================================================
// Payments
// =============================================================================

/// Body of `POST payment-intents`.
///
/// The server prices the items itself; the client never sends an amount.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentRequest {
    pub items: Vec<CartItem>,
    pub shipping_address: ShippingAddress,
}

/// One payment attempt: the gateway's intent id plus its client secret.
///
/// Implements `Debug` manually to redact the client secret.
#[derive(Clone)]
pub struct PaymentIntentRef {
    pub payment_intent_id: PaymentIntentId,
    pub client_secret: SecretString,
}

impl std::fmt::Debug for PaymentIntentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentIntentRef")
            .field("payment_intent_id", &self.payment_intent_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Wire form of [`PaymentIntentRef`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PaymentIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: PaymentIntentId,
}

impl From<PaymentIntentResponse> for PaymentIntentRef {
    fn from(response: PaymentIntentResponse) -> Self {
        Self {
            payment_intent_id: response.payment_intent_id,
            client_secret: SecretString::from(response.client_secret),
        }
    }
}

/// Payment method chosen by the customer.
///
/// `payment_method` is the token produced by the gateway's card element; raw
/// card data never reaches this layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub payment_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<ShippingAddress>,
}

/// Result of a confirmation call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub payment_intent_id: PaymentIntentId,
    pub status: PaymentStatus,
    /// Gateway message when the payment was declined.
    #[serde(default)]
    pub decline_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PaymentStatusResponse {
    pub status: PaymentStatus,
}

// =============================================================================
// Orders
// =============================================================================

/// Body of `POST orders`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub items: Vec<CartItem>,
    pub shipping_address: ShippingAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<ShippingAddress>,
    pub payment_intent_id: PaymentIntentId,
    pub total_amount: Price,
}

/// Response of `POST orders`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: OrderId,
}

/// Error body shared by API endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub message: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_intent_ref_debug_redacts_secret() {
        let intent = PaymentIntentRef::from(PaymentIntentResponse {
            client_secret: "pi_1_secret_abc".to_string(),
            payment_intent_id: PaymentIntentId::new("pi_1"),
        });
        let debug_output = format!("{intent:?}");
        assert!(debug_output.contains("pi_1"));
        assert!(!debug_output.contains("secret_abc"));
    }

    #[test]
    fn test_confirmation_without_decline_message() {
        let json = r#"{"paymentIntentId":"pi_9","status":"succeeded"}"#;
        let confirmation: PaymentConfirmation = serde_json::from_str(json).unwrap();
        assert_eq!(confirmation.status, PaymentStatus::Succeeded);
        assert!(confirmation.decline_message.is_none());
    }
}
