//! HTTP implementation of the collaborator traits.
//!
//! One `reqwest` client shared behind an `Arc`, authenticated with the client
//! API key. Customer-scoped calls add the customer's access token.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use stride_core::{CartItem, PaymentIntentId, PaymentStatus, ShippingAddress};
use tracing::{debug, instrument};
use url::Url;

use super::types::{
    CartPayload, ErrorBody, PaymentIntentResponse, PaymentStatusResponse, SyncAck,
};
use super::{
    ApiError, CartGateway, OrderApi, OrderReceipt, OrderRequest, PaymentConfirmation,
    PaymentDetails, PaymentGateway, PaymentIntentRef, PaymentIntentRequest, ProfileApi,
};
use crate::config::ApiConfig;
use crate::identity::Customer;

/// Header carrying the signed-in customer's access token.
const CUSTOMER_TOKEN_HEADER: &str = "X-Customer-Token";

/// Header carrying the order idempotency key.
const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Maximum characters of a response body kept in logs and errors.
const BODY_PREVIEW_CHARS: usize = 200;

/// Client for the backing storefront API.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();

        let mut auth_value =
            HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret()))
                .map_err(|e| ApiError::Parse(format!("Invalid API key format: {e}")))?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url: config.base_url.clone(),
            }),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self
            .inner
            .base_url
            .join(path)
            .map_err(|e| ApiError::Parse(format!("Invalid endpoint {path}: {e}")))?;
        Ok(self.inner.client.request(method, url))
    }

    fn customer_request(
        &self,
        method: Method,
        path: &str,
        customer: &Customer,
    ) -> Result<RequestBuilder, ApiError> {
        let mut token = HeaderValue::from_str(customer.access_token.expose_secret())
            .map_err(|e| ApiError::Parse(format!("Invalid customer token: {e}")))?;
        token.set_sensitive(true);
        Ok(self.request(method, path)?.header(CUSTOMER_TOKEN_HEADER, token))
    }

    /// Send a request and return the body of a successful response.
    async fn execute(&self, request: RequestBuilder) -> Result<String, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ApiError::RateLimited(retry_after));
        }

        // Read the body as text first for better error diagnostics
        let body = response.text().await?;

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ApiError::Validation(error_message(&body)));
        }

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %preview(&body),
                "Storefront API returned non-success status"
            );
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(body)
    }

    /// Send a request and decode a JSON response.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let body = self.execute(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %preview(&body),
                "Failed to parse storefront API response"
            );
            ApiError::Parse(e.to_string())
        })
    }
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

/// Prefer the structured `{"error": {"message": ..}}` body, else the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body).map_or_else(|_| preview(body), |b| b.error.message)
}

#[async_trait]
impl CartGateway for ApiClient {
    #[instrument(skip(self, customer), fields(user_id = %customer.user_id))]
    async fn fetch_cart(&self, customer: &Customer) -> Result<Vec<CartItem>, ApiError> {
        let request = self.customer_request(Method::GET, "cart", customer)?;
        let payload: CartPayload = self.send(request).await?;
        debug!(item_count = payload.items.len(), "Fetched server cart");
        Ok(payload.items)
    }

    #[instrument(skip(self, customer, items), fields(user_id = %customer.user_id, item_count = items.len()))]
    async fn replace_cart(&self, customer: &Customer, items: &[CartItem]) -> Result<(), ApiError> {
        let request = self
            .customer_request(Method::PUT, "cart", customer)?
            .json(&CartPayload {
                items: items.to_vec(),
            });
        let ack: SyncAck = self.send(request).await?;
        if ack.ok {
            Ok(())
        } else {
            Err(ApiError::Validation("cart sync was not acknowledged".to_string()))
        }
    }
}

#[async_trait]
impl PaymentGateway for ApiClient {
    #[instrument(skip(self, request), fields(item_count = request.items.len()))]
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntentRef, ApiError> {
        let builder = self.request(Method::POST, "payment-intents")?.json(request);
        let response: PaymentIntentResponse = self.send(builder).await?;
        Ok(response.into())
    }

    #[instrument(skip(self, client_secret, details))]
    async fn confirm_payment(
        &self,
        client_secret: &SecretString,
        details: &PaymentDetails,
    ) -> Result<PaymentConfirmation, ApiError> {
        let body = serde_json::json!({
            "clientSecret": client_secret.expose_secret(),
            "paymentMethod": details.payment_method,
            "billingAddress": details.billing_address,
        });
        let builder = self
            .request(Method::POST, "payment-intents/confirm")?
            .json(&body);
        self.send(builder).await
    }

    #[instrument(skip(self), fields(payment_intent_id = %id))]
    async fn retrieve_status(&self, id: &PaymentIntentId) -> Result<PaymentStatus, ApiError> {
        let path = format!("payment-intents/{id}");
        let response: PaymentStatusResponse = self.send(self.request(Method::GET, &path)?).await?;
        Ok(response.status)
    }
}

#[async_trait]
impl OrderApi for ApiClient {
    #[instrument(skip(self, request), fields(payment_intent_id = %request.payment_intent_id))]
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt, ApiError> {
        let builder = self
            .request(Method::POST, "orders")?
            .header(IDEMPOTENCY_KEY_HEADER, request.payment_intent_id.as_str())
            .json(request);
        self.send(builder).await
    }
}

#[async_trait]
impl ProfileApi for ApiClient {
    #[instrument(skip(self, customer, address), fields(user_id = %customer.user_id))]
    async fn save_shipping_address(
        &self,
        customer: &Customer,
        address: &ShippingAddress,
    ) -> Result<(), ApiError> {
        let builder = self
            .customer_request(Method::PUT, "account/shipping-address", customer)?
            .json(address);
        // 200 with a body and 204 without one are both fine here
        self.execute(builder).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;
    use stride_core::{CartItemKey, CurrencyCode, Email, Price, UserId, VariantId};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::parse_base_url;

    const API_KEY: &str = "sk_test_8fJ2qLz9XvB4mN7pR1tY";

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&ApiConfig {
            base_url: parse_base_url(&format!("{}/v1", server.uri())).unwrap(),
            api_key: SecretString::from(API_KEY),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn customer() -> Customer {
        Customer {
            user_id: UserId::new(11),
            email: Email::parse("jo@example.com").unwrap(),
            access_token: SecretString::from("cust_tok_1"),
        }
    }

    fn item() -> CartItem {
        CartItem {
            key: CartItemKey::new(VariantId::new(3), "10", "Black"),
            name: "Trail Runner".to_string(),
            unit_price: Price::new(Decimal::new(8950, 2), CurrencyCode::USD),
            quantity: 2,
            image: Some("/media/trail-runner.jpg".to_string()),
        }
    }

    #[tokio::test]
    async fn test_fetch_cart_sends_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/cart"))
            .and(header("authorization", format!("Bearer {API_KEY}").as_str()))
            .and(header(CUSTOMER_TOKEN_HEADER, "cust_tok_1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "items": [item()] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let items = client_for(&server).fetch_cart(&customer()).await.unwrap();
        assert_eq!(items, vec![item()]);
    }

    #[tokio::test]
    async fn test_replace_cart_puts_full_list() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/cart"))
            .and(body_partial_json(serde_json::json!({ "items": [item()] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .replace_cart(&customer(), &[item()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replace_cart_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/cart"))
            .respond_with(ResponseTemplate::new(422).set_body_json(
                serde_json::json!({ "error": { "message": "size 10 is sold out" } }),
            ))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .replace_cart(&customer(), &[item()])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref m) if m == "size 10 is sold out"));
    }

    #[tokio::test]
    async fn test_rate_limit_maps_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/cart"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_cart(&customer()).await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited(7)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/cart"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_cart(&customer()).await.unwrap_err();
        assert!(matches!(err, ApiError::Api { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_create_payment_intent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment-intents"))
            .and(body_partial_json(
                serde_json::json!({ "shippingAddress": { "zipCode": "97201" } }),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "clientSecret": "pi_1_secret_x",
                "paymentIntentId": "pi_1"
            })))
            .mount(&server)
            .await;

        let request = PaymentIntentRequest {
            items: vec![item()],
            shipping_address: ShippingAddress {
                zip_code: "97201".to_string(),
                ..ShippingAddress::default()
            },
        };
        let intent = client_for(&server)
            .create_payment_intent(&request)
            .await
            .unwrap();
        assert_eq!(intent.payment_intent_id.as_str(), "pi_1");
        assert_eq!(intent.client_secret.expose_secret(), "pi_1_secret_x");
    }

    #[tokio::test]
    async fn test_confirm_payment_declined() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment-intents/confirm"))
            .and(body_partial_json(
                serde_json::json!({ "clientSecret": "pi_1_secret_x", "paymentMethod": "pm_card" }),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "paymentIntentId": "pi_1",
                "status": "requires_payment_method",
                "declineMessage": "Your card was declined."
            })))
            .mount(&server)
            .await;

        let confirmation = client_for(&server)
            .confirm_payment(
                &SecretString::from("pi_1_secret_x"),
                &PaymentDetails {
                    payment_method: "pm_card".to_string(),
                    billing_address: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(confirmation.status, PaymentStatus::RequiresPaymentMethod);
        assert_eq!(
            confirmation.decline_message.as_deref(),
            Some("Your card was declined.")
        );
    }

    #[tokio::test]
    async fn test_submit_order_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .and(header(IDEMPOTENCY_KEY_HEADER, "pi_42"))
            .and(body_partial_json(serde_json::json!({
                "paymentIntentId": "pi_42",
                "totalAmount": { "amount": "129.60", "currency_code": "USD" }
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({ "orderId": "ord_7" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client_for(&server)
            .submit_order(&OrderRequest {
                items: vec![item()],
                shipping_address: ShippingAddress::default(),
                billing_address: None,
                payment_intent_id: PaymentIntentId::new("pi_42"),
                total_amount: Price::new(Decimal::new(12960, 2), CurrencyCode::USD),
            })
            .await
            .unwrap();
        assert_eq!(receipt.order_id.as_str(), "ord_7");
    }

    #[tokio::test]
    async fn test_retrieve_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment-intents/pi_5"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "processing" })),
            )
            .mount(&server)
            .await;

        let status = client_for(&server)
            .retrieve_status(&PaymentIntentId::new("pi_5"))
            .await
            .unwrap();
        assert_eq!(status, PaymentStatus::Processing);
    }

    #[tokio::test]
    async fn test_unparseable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/cart"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_cart(&customer()).await.unwrap_err();
        assert!(matches!(err, ApiError::Parse(_)));
    }
}
