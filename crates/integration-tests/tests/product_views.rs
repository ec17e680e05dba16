//! View de-duplication per browser session.

#![allow(clippy::unwrap_used)]

use kundura_core::SessionId;
use kundura_integration_tests::{Shop, within};
use kundura_storefront::views::{MemorySessionStore, SessionIdStore, ViewCounter};

#[tokio::test]
async fn test_revisits_in_one_session_count_once() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "1299.90").await;
    let visitor = shop.visitor().await;
    let store = MemorySessionStore::default();
    let views = ViewCounter::load(visitor.session.clone(), &store).await;

    let first = within(views.track(shoe).settled()).await;
    assert_eq!(first.count, Some(1));
    assert!(first.recorded);

    for _ in 0..5 {
        let again = within(views.track(shoe).settled()).await;
        assert_eq!(again.count, Some(1));
        assert!(!again.recorded);
    }
    assert_eq!(shop.backend.rows("product_views").len(), 1);

    // A reload reads the same id back
    let reloaded = ViewCounter::load(visitor.session.clone(), &store).await;
    assert_eq!(reloaded.session_id(), views.session_id());
    assert!(!within(reloaded.track(shoe).settled()).await.recorded);
}

#[tokio::test]
async fn test_each_session_adds_one() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "1299.90").await;

    let mut last = None;
    for n in 1..=3_u64 {
        let visitor = shop.visitor().await;
        let views = ViewCounter::new(visitor.session.clone(), SessionId::generate());
        let seen = within(views.track(shoe).settled()).await;
        assert!(seen.recorded);
        assert_eq!(seen.count, Some(n));
        last = seen.count;
    }
    assert_eq!(last, Some(3));
}

#[tokio::test]
async fn test_racing_tabs_of_one_session_record_once() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "1299.90").await;
    let visitor = shop.visitor().await;
    let store = MemorySessionStore::default();
    let session_id = store.get_or_create().await;

    let a = ViewCounter::new(visitor.session.clone(), session_id.clone());
    let b = ViewCounter::new(visitor.session.clone(), session_id);
    let (tab_a, tab_b) = (a.track(shoe), b.track(shoe));
    let (seen_a, seen_b) = within(async { tokio::join!(tab_a.settled(), tab_b.settled()) }).await;

    assert_eq!(u8::from(seen_a.recorded) + u8::from(seen_b.recorded), 1);
    assert_eq!(shop.backend.rows("product_views").len(), 1);
}

#[tokio::test]
async fn test_counting_failure_stays_silent() {
    let shop = Shop::new();
    let shoe = shop.product("shoe-1", "1299.90").await;
    let visitor = shop.visitor().await;
    shop.backend.fail_table("product_views");

    let views = ViewCounter::new(visitor.session.clone(), SessionId::generate());
    let seen = within(views.track(shoe).settled()).await;
    assert_eq!(seen.count, None);
    assert!(visitor.toasts.entries().is_empty());
}
