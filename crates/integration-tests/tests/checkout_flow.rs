//! Checkout scenarios from cart to placed order.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use stride_core::{AddressField, CheckoutStep, PaymentStatus, ShippingAddress};
use stride_integration_tests::{TestStorefront, shoe};
use stride_storefront::api::PaymentDetails;
use stride_storefront::identity::Identity;
use stride_storefront::testing::{customer, shipping_address};
use stride_storefront::{CheckoutError, CheckoutView, Severity};

const TIMEOUT: Duration = Duration::from_secs(2);

fn card() -> PaymentDetails {
    PaymentDetails {
        payment_method: "pm_card_visa".to_string(),
        billing_address: None,
    }
}

async fn filled_cart() -> TestStorefront {
    let store = TestStorefront::start().await;
    store.cart.add_item(shoe(1, "9", "Black", 1, 8000)).await.unwrap();
    store.cart.add_item(shoe(2, "10", "White", 1, 4000)).await.unwrap();
    store
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_successful_payment_places_exactly_one_order() {
    let store = filled_cart().await;
    let checkout = &store.checkout;

    checkout.begin().unwrap();
    checkout.set_shipping_address(shipping_address()).unwrap();
    checkout.proceed_to_payment(false).await.unwrap();
    let confirmation = checkout.submit_payment(card()).await.unwrap();

    assert_eq!(store.orders.submit_calls(), 1);
    assert_eq!(store.orders.order_count(), 1);
    assert_eq!(
        store.orders.requests()[0].payment_intent_id,
        confirmation.payment_intent_id
    );

    assert!(store.cart.items().is_empty());
    assert!(checkout.session().is_none());
    assert_eq!(checkout.snapshot().step(), Some(CheckoutStep::Confirmation));
    assert_eq!(
        checkout.take_redirect(),
        Some(CheckoutView::OrderConfirmation(confirmation.order_id.clone()))
    );

    assert_eq!(confirmation.items.len(), 2);
    assert_eq!(confirmation.breakdown.subtotal.display(), "$120.00");
    assert_eq!(confirmation.breakdown.shipping.display(), "$0.00");
    assert_eq!(confirmation.breakdown.total.display(), "$129.60");
    store.shutdown().await;
}

#[tokio::test]
async fn test_signed_in_checkout_charges_synced_cart() {
    let store = filled_cart().await;
    store.cart.set_customer(Some(customer(4)));
    let checkout = &store.checkout;

    checkout.begin().unwrap();
    checkout.prefill_shipping(&shipping_address()).unwrap();
    checkout.proceed_to_payment(true).await.unwrap();

    let synced = store.cart_gateway.server_cart(&customer(4));
    assert_eq!(synced, store.cart.items());
    let intent_request = store.payment_gateway.last_intent_request().unwrap();
    assert_eq!(intent_request.items, synced);
    assert_eq!(store.profile.saved(), vec![(customer(4).user_id, shipping_address())]);

    checkout.submit_payment(card()).await.unwrap();
    // The emptied cart is pushed so the next sign-in does not restore it
    assert!(store.cart_gateway.server_cart(&customer(4)).is_empty());
    store.shutdown().await;
}

#[tokio::test]
async fn test_checkout_summary_matches_cart_preview() {
    let store = TestStorefront::start().await;
    store.cart.add_item(shoe(3, "8", "Pink", 1, 4000)).await.unwrap();

    let preview = store.checkout.summary();
    assert_eq!(preview.shipping.display(), "$9.99");
    assert_eq!(preview.tax.display(), "$3.20");
    assert_eq!(preview.total.display(), "$53.19");

    store.checkout.begin().unwrap();
    store.checkout.set_shipping_address(shipping_address()).unwrap();
    store.checkout.proceed_to_payment(false).await.unwrap();
    let session = store.checkout.session().unwrap();
    assert_eq!(session.payment.unwrap().breakdown, preview);
    store.shutdown().await;
}

// =============================================================================
// Guards
// =============================================================================

#[tokio::test]
async fn test_missing_zip_blocks_payment_step() {
    let store = filled_cart().await;
    store.checkout.begin().unwrap();
    store
        .checkout
        .set_shipping_address(ShippingAddress {
            zip_code: String::new(),
            ..shipping_address()
        })
        .unwrap();

    let err = store.checkout.proceed_to_payment(false).await.unwrap_err();
    let notice = err.notice();
    assert_eq!(notice.fields.len(), 1);
    assert!(notice.fields.contains_key(&AddressField::ZipCode));
    assert_eq!(
        store.checkout.snapshot().step(),
        Some(CheckoutStep::Shipping)
    );
    assert_eq!(store.payment_gateway.create_calls(), 0);
    store.shutdown().await;
}

#[tokio::test]
async fn test_cart_cleared_elsewhere_redirects_to_empty_cart() {
    let store = filled_cart().await;
    store.checkout.begin().unwrap();
    store.checkout.set_shipping_address(shipping_address()).unwrap();
    store.checkout.proceed_to_payment(false).await.unwrap();

    // Another tab empties the cart
    store.cart.clear_cart().await.unwrap();

    let mut state = store.checkout.subscribe();
    tokio::time::timeout(TIMEOUT, state.wait_for(|s| s.session.is_none()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.checkout.take_redirect(), Some(CheckoutView::EmptyCart));

    let err = store.checkout.submit_payment(card()).await.unwrap_err();
    assert!(matches!(err, CheckoutError::NoSession));
    assert_eq!(store.payment_gateway.confirm_calls(), 0);
    store.shutdown().await;
}

#[tokio::test]
async fn test_account_switch_mid_checkout_keeps_payment_honest() {
    let store = filled_cart().await;
    store.cart_gateway.set_server_cart(
        &customer(6),
        vec![shoe(9, "12", "Tan", 1, 15000)],
    );
    store.checkout.begin().unwrap();
    store.checkout.set_shipping_address(shipping_address()).unwrap();
    store.checkout.proceed_to_payment(false).await.unwrap();

    store
        .identity
        .send(Identity::Authenticated(customer(6)))
        .unwrap();
    let mut cart = store.cart.subscribe();
    tokio::time::timeout(TIMEOUT, cart.wait_for(|s| !s.switching && s.items.len() == 1))
        .await
        .unwrap()
        .unwrap();

    // The intent was for the guest cart; paying it now would charge the wrong amount
    let err = store.checkout.submit_payment(card()).await.unwrap_err();
    assert!(matches!(err, CheckoutError::CartChanged));
    assert_eq!(store.payment_gateway.confirm_calls(), 0);
    assert_eq!(
        store.checkout.snapshot().step(),
        Some(CheckoutStep::Shipping)
    );
    store.shutdown().await;
}

// =============================================================================
// Payment failures
// =============================================================================

#[tokio::test]
async fn test_declined_card_can_be_retried() {
    let store = filled_cart().await;
    store.checkout.begin().unwrap();
    store.checkout.set_shipping_address(shipping_address()).unwrap();
    store.checkout.proceed_to_payment(false).await.unwrap();

    store
        .payment_gateway
        .script_confirm(PaymentStatus::RequiresPaymentMethod);
    let err = store.checkout.submit_payment(card()).await.unwrap_err();
    let notice = err.notice();
    assert_eq!(notice.message, "Your card was declined.");
    assert!(notice.retryable);
    assert_eq!(
        store.checkout.snapshot().step(),
        Some(CheckoutStep::Payment)
    );

    store.checkout.submit_payment(card()).await.unwrap();
    assert_eq!(store.orders.order_count(), 1);
    store.shutdown().await;
}

#[tokio::test]
async fn test_pending_payment_is_not_reported_as_success() {
    let store = filled_cart().await;
    store.checkout.begin().unwrap();
    store.checkout.set_shipping_address(shipping_address()).unwrap();
    store.checkout.proceed_to_payment(false).await.unwrap();

    store.payment_gateway.script_confirm(PaymentStatus::RequiresAction);
    let err = store.checkout.submit_payment(card()).await.unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentAmbiguous { .. }));
    assert!(matches!(
        store.checkout.take_redirect(),
        Some(CheckoutView::PaymentStatus(_))
    ));
    assert_eq!(store.orders.submit_calls(), 0);
    assert_eq!(store.cart.get_total_items(), 2);
    store.shutdown().await;
}

#[tokio::test]
async fn test_transient_order_failures_are_retried_once_per_intent() {
    let store = filled_cart().await;
    store.checkout.begin().unwrap();
    store.checkout.set_shipping_address(shipping_address()).unwrap();
    store.checkout.proceed_to_payment(false).await.unwrap();

    store.orders.fail_next(2);
    store.checkout.submit_payment(card()).await.unwrap();

    assert_eq!(store.orders.submit_calls(), 3);
    assert_eq!(store.orders.order_count(), 1);
    store.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_order_retries_raise_critical_notice() {
    let store = filled_cart().await;
    store.checkout.begin().unwrap();
    store.checkout.set_shipping_address(shipping_address()).unwrap();
    store.checkout.proceed_to_payment(false).await.unwrap();

    store.orders.fail_next(3);
    let err = store.checkout.submit_payment(card()).await.unwrap_err();
    let notice = err.notice();
    assert_eq!(notice.severity, Severity::Critical);
    assert!(!notice.dismissible);
    assert!(notice.message.contains("payment was taken"));

    // Cart and session survive so the order can still be created
    assert_eq!(store.cart.get_total_items(), 2);
    store.checkout.retry_order().await.unwrap();
    assert_eq!(store.orders.order_count(), 1);
    assert_eq!(store.payment_gateway.confirm_calls(), 1);
    store.shutdown().await;
}
