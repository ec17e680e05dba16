//! Favorite uniqueness and the signed-out path.

#![allow(clippy::unwrap_used)]

use kundura_integration_tests::{Shop, within};
use kundura_storefront::AppError;
use kundura_storefront::backend::Filter;
use kundura_storefront::favorites::{FavoriteOutcome, FavoritesController};

#[tokio::test]
async fn test_anonymous_favorite_is_refused() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "1299.90").await;
    let visitor = shop.visitor().await;
    let favorites = FavoritesController::new(&visitor.session);

    let err = favorites.add_to_favorites(shoe).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthenticated));
    assert!(shop.backend.rows("favorites").is_empty());

    let toast = visitor.toasts.last().unwrap();
    assert_eq!(toast.title, "Sign in required");
    assert!(!toast.is_destructive());
}

#[tokio::test]
async fn test_repeated_adds_keep_one_entry() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "1299.90").await;
    let customer = shop.customer("ayse@example.com").await;
    let favorites = FavoritesController::new(&customer.session);

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(favorites.add_to_favorites(shoe).await.unwrap());
    }
    assert_eq!(
        outcomes,
        [
            FavoriteOutcome::Added,
            FavoriteOutcome::AlreadyFavorite,
            FavoriteOutcome::AlreadyFavorite,
            FavoriteOutcome::AlreadyFavorite,
        ]
    );
    assert_eq!(shop.backend.rows("favorites").len(), 1);
}

#[tokio::test]
async fn test_two_browsers_racing_keep_one_entry() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "1299.90").await;
    let phone = shop.customer("ayse@example.com").await;
    let laptop = shop.visitor().await;
    laptop.session.sign_in("ayse@example.com", "secret1").await.unwrap();

    let on_phone = FavoritesController::new(&phone.session);
    let on_laptop = FavoritesController::new(&laptop.session);
    let (a, b) = tokio::join!(on_phone.add_to_favorites(shoe), on_laptop.add_to_favorites(shoe));

    let mut outcomes = [a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| *o != FavoriteOutcome::Added);
    assert_eq!(
        outcomes,
        [FavoriteOutcome::Added, FavoriteOutcome::AlreadyFavorite]
    );
    let user = phone.user.as_ref().unwrap().id;
    let rows = shop
        .backend
        .rows("favorites")
        .into_iter()
        .filter(|row| Filter::eq("user_id", user).matches(row))
        .count();
    assert_eq!(rows, 1);

    // Both browsers see the entry
    within(on_phone.collection().wait_for(|s| s.items.len() == 1)).await;
    within(on_laptop.collection().wait_for(|s| s.items.len() == 1)).await;
}

#[tokio::test]
async fn test_toggle_round_trip() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "1299.90").await;
    let customer = shop.customer("ayse@example.com").await;
    let favorites = FavoritesController::new(&customer.session);
    within(favorites.collection().ready()).await;

    assert_eq!(favorites.toggle(shoe).await.unwrap(), FavoriteOutcome::Added);
    within(favorites.collection().wait_for(|s| s.items.len() == 1)).await;
    assert_eq!(favorites.toggle(shoe).await.unwrap(), FavoriteOutcome::Removed);
    within(favorites.collection().wait_for(|s| s.items.is_empty())).await;
    assert!(shop.backend.rows("favorites").is_empty());
}
