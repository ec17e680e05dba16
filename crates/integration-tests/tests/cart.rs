//! Cart increments, totals and live sync between browsers.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use rust_decimal::Decimal;

use kundura_core::Quantity;
use kundura_integration_tests::{Shop, within};
use kundura_storefront::cart::CartController;
use kundura_storefront::sync::RefreshPolicy;

fn qty(n: u32) -> Quantity {
    Quantity::new(n).unwrap()
}

#[tokio::test]
async fn test_adding_same_size_twice_grows_one_line() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "1299.90").await;
    let customer = shop.customer("ayse@example.com").await;
    let cart = CartController::new(&customer.session);
    assert!(within(cart.collection().ready()).await.items.is_empty());

    cart.add_to_cart(shoe, "42", qty(1)).await.unwrap();
    let state = within(cart.collection().wait_for(|s| s.items.len() == 1)).await;
    assert_eq!(state.items[0].quantity.get(), 1);
    assert_eq!(cart.total().amount, Decimal::new(129_990, 2));

    cart.add_to_cart(shoe, "42", qty(2)).await.unwrap();
    within(
        cart.collection()
            .wait_for(|s| s.items.first().is_some_and(|l| l.quantity.get() == 3)),
    )
    .await;
    assert_eq!(cart.line_count(), 1);
    assert_eq!(cart.item_count(), 3);
    assert_eq!(cart.total().amount, Decimal::new(389_970, 2));
    assert_eq!(shop.backend.rows("cart_items").len(), 1);
    assert_eq!(customer.toasts.titles(), ["Added to cart", "Added to cart"]);
}

#[tokio::test]
async fn test_concurrent_adds_never_duplicate_a_line() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "100").await;
    let customer = shop.customer("ayse@example.com").await;
    let cart = CartController::new(&customer.session);

    let (a, b) = tokio::join!(
        cart.add_to_cart(shoe, "40", qty(1)),
        cart.add_to_cart(shoe, "40", qty(4)),
    );
    a.unwrap();
    b.unwrap();
    let rows = shop.backend.rows("cart_items");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["quantity"], 5);

    // Two more racing onto the existing line
    let (c, d) = tokio::join!(
        cart.add_to_cart(shoe, "40", qty(2)),
        cart.add_to_cart(shoe, "40", qty(3)),
    );
    c.unwrap();
    d.unwrap();
    let rows = shop.backend.rows("cart_items");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["quantity"], 10);

    let state = within(
        cart.collection()
            .wait_for(|s| s.items.first().is_some_and(|l| l.quantity.get() == 10)),
    )
    .await;
    assert_eq!(state.items.len(), 1);
    assert_eq!(cart.item_count(), 10);
}

#[tokio::test]
async fn test_total_tracks_quantity_changes_and_removals() {
    let shop = Shop::new();
    let boot = shop.product("Boot", "250.00").await;
    let sandal = shop.product("Sandal", "80.50").await;
    let customer = shop.customer("ayse@example.com").await;
    let cart = CartController::new(&customer.session);

    cart.add_to_cart(boot, "42", qty(1)).await.unwrap();
    cart.add_to_cart(sandal, "38", qty(2)).await.unwrap();
    let state = within(cart.collection().wait_for(|s| s.items.len() == 2)).await;
    assert_eq!(cart.total().amount, Decimal::new(41_100, 2));

    let boot_line = state
        .items
        .iter()
        .find(|l| l.product_id == boot)
        .unwrap()
        .id;
    let sandal_line = state
        .items
        .iter()
        .find(|l| l.product_id == sandal)
        .unwrap()
        .id;

    cart.update_quantity(boot_line, qty(3)).await.unwrap();
    within(cart.collection().wait_for(|s| {
        s.items
            .iter()
            .any(|l| l.id == boot_line && l.quantity.get() == 3)
    }))
    .await;
    assert_eq!(cart.total().amount, Decimal::new(91_100, 2));

    cart.remove_item(sandal_line).await.unwrap();
    within(cart.collection().wait_for(|s| s.items.len() == 1)).await;
    assert_eq!(cart.total().amount, Decimal::new(75_000, 2));
}

#[tokio::test]
async fn test_other_users_cart_changes_cause_no_refetch() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "100").await;
    let alice = shop.customer("alice@example.com").await;
    let bob = shop.customer("bob@example.com").await;

    let alice_cart = CartController::with_policy(&alice.session, RefreshPolicy::Incremental);
    let bob_cart = CartController::new(&bob.session);
    within(alice_cart.collection().ready()).await;

    bob_cart.add_to_cart(shoe, "44", qty(1)).await.unwrap();
    within(bob_cart.collection().wait_for(|s| s.items.len() == 1)).await;
    alice_cart.add_to_cart(shoe, "41", qty(1)).await.unwrap();

    let state = within(alice_cart.collection().wait_for(|s| s.items.len() == 1)).await;
    assert_eq!(state.items[0].size, "41");
    assert_eq!(state.fetches, 1);
}

#[tokio::test]
async fn test_dropping_the_cart_ends_its_subscription() {
    let shop = Shop::new();
    let customer = shop.customer("ayse@example.com").await;
    let before = shop.backend.subscriber_count();

    let cart = CartController::new(&customer.session);
    within(cart.collection().ready()).await;
    assert_eq!(shop.backend.subscriber_count(), before + 1);

    drop(cart);
    within(async {
        while shop.backend.subscriber_count() > before {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn test_cart_follows_sign_out() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "100").await;
    let customer = shop.customer("ayse@example.com").await;
    let cart = CartController::new(&customer.session);
    cart.add_to_cart(shoe, "42", qty(1)).await.unwrap();
    within(cart.collection().wait_for(|s| s.items.len() == 1)).await;

    customer.session.sign_out().await.unwrap();
    let state = within(cart.collection().wait_for(|s| s.owner.is_none())).await;
    assert!(state.items.is_empty());
    assert_eq!(cart.total().amount, Decimal::ZERO);
}
