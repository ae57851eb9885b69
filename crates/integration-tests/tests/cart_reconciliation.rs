//! Cart persistence and sign-in reconciliation scenarios.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use stride_integration_tests::{TestStorefront, shoe};
use stride_storefront::cart::{CartDisplay, MemoryCartStorage};
use stride_storefront::identity::Identity;
use stride_storefront::testing::customer;

const TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Sign-in
// =============================================================================

#[tokio::test]
async fn test_guest_sign_in_never_shows_empty_cart() {
    let store = TestStorefront::start().await;
    store.cart.add_item(shoe(1, "9", "Black", 1, 8000)).await.unwrap();
    store.cart.add_item(shoe(2, "10", "White", 1, 6500)).await.unwrap();
    store.cart_gateway.set_server_cart(
        &customer(42),
        vec![shoe(7, "9", "Red", 3, 11000)],
    );

    // Record every display state a UI subscribed to the cart would see
    let mut display = store.cart.subscribe_slice(|s| s.display());
    let recorder = tokio::spawn(async move {
        let mut seen = vec![*display.borrow_and_update()];
        while display.changed().await.is_ok() {
            let current = *display.borrow_and_update();
            seen.push(current);
            if current == CartDisplay::Items(3) {
                break;
            }
        }
        seen
    });

    let release = store.cart_gateway.hold_fetches();
    store
        .identity
        .send(Identity::Authenticated(customer(42)))
        .unwrap();

    tokio::time::timeout(TIMEOUT, store.cart_gateway.wait_for_fetch_started())
        .await
        .unwrap();
    let during = store.cart.snapshot();
    assert!(during.switching);
    assert_eq!(during.display(), CartDisplay::Loading);

    release.notify_one();
    let seen = tokio::time::timeout(TIMEOUT, recorder).await.unwrap().unwrap();

    assert!(!seen.contains(&CartDisplay::Empty), "saw {seen:?}");
    assert_eq!(seen.first(), Some(&CartDisplay::Items(2)));
    assert_eq!(seen.last(), Some(&CartDisplay::Items(3)));

    let after = store.cart.snapshot();
    assert!(!after.switching);
    assert_eq!(after.items, vec![shoe(7, "9", "Red", 3, 11000)]);
    store.shutdown().await;
}

#[tokio::test]
async fn test_failed_sign_in_fetch_keeps_guest_cart_identical() {
    let store = TestStorefront::start().await;
    store.cart.add_item(shoe(1, "9", "Black", 2, 8000)).await.unwrap();
    let items_before = store.cart.items();
    let record_before = store.storage.record();

    store.cart_gateway.fail_next_fetch();
    store
        .identity
        .send(Identity::Authenticated(customer(5)))
        .unwrap();

    let mut state = store.cart.subscribe();
    tokio::time::timeout(TIMEOUT, state.wait_for(|s| s.sync_error.is_some() && !s.switching))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(store.cart.items(), items_before);
    assert_eq!(store.storage.record(), record_before);
    store.shutdown().await;
}

#[tokio::test]
async fn test_edits_during_sign_in_survive_reconciliation() {
    let store = TestStorefront::start().await;
    store.cart_gateway.set_server_cart(
        &customer(8),
        vec![shoe(3, "11", "Grey", 1, 9000)],
    );
    let release = store.cart_gateway.hold_fetches();
    store
        .identity
        .send(Identity::Authenticated(customer(8)))
        .unwrap();
    tokio::time::timeout(TIMEOUT, store.cart_gateway.wait_for_fetch_started())
        .await
        .unwrap();

    store.cart.add_item(shoe(4, "8", "Blue", 2, 5000)).await.unwrap();
    release.notify_one();

    let mut state = store.cart.subscribe();
    tokio::time::timeout(TIMEOUT, state.wait_for(|s| !s.switching && s.items.len() == 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.cart.get_total_items(), 3);
    store.shutdown().await;
}

#[tokio::test]
async fn test_sign_out_keeps_cart_for_guest() {
    let store = TestStorefront::start().await;
    store.cart_gateway.set_server_cart(
        &customer(9),
        vec![shoe(5, "10", "Black", 1, 12000)],
    );
    store
        .identity
        .send(Identity::Authenticated(customer(9)))
        .unwrap();
    let mut state = store.cart.subscribe();
    tokio::time::timeout(TIMEOUT, state.wait_for(|s| s.items.len() == 1 && !s.switching))
        .await
        .unwrap()
        .unwrap();

    store.identity.send(Identity::Guest).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.cart.customer().is_none());
    assert_eq!(store.cart.get_total_items(), 1);
    store.shutdown().await;
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_cart_survives_restart() {
    let storage = Arc::new(MemoryCartStorage::new());
    let first = TestStorefront::start_with_storage(storage.clone()).await;
    first.cart.add_item(shoe(1, "9", "Black", 2, 8000)).await.unwrap();
    first.cart.add_item(shoe(1, "9", "Black", 1, 8000)).await.unwrap();
    first.shutdown().await;

    let second = TestStorefront::start_with_storage(storage).await;
    let items = second.cart.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 3);
    assert_eq!(second.cart.snapshot().display(), CartDisplay::Items(3));
    second.shutdown().await;
}

#[tokio::test]
async fn test_sync_twice_leaves_server_cart_unchanged() {
    let store = TestStorefront::start().await;
    store.cart.set_customer(Some(customer(2)));
    store.cart.add_item(shoe(1, "9", "Black", 2, 8000)).await.unwrap();

    store.cart.sync_cart_with_server().await.unwrap();
    let first = store.cart_gateway.server_cart(&customer(2));
    store.cart.sync_cart_with_server().await.unwrap();

    assert_eq!(store.cart_gateway.server_cart(&customer(2)), first);
    assert_eq!(first, store.cart.items());
    store.shutdown().await;
}
