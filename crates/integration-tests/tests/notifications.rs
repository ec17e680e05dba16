//! Unread counts and broadcasts reaching inboxes.

#![allow(clippy::unwrap_used)]

use kundura_admin::broadcast::{Broadcaster, NotificationDraft, Recipient};
use kundura_core::NotificationKind;
use kundura_integration_tests::{Shop, within};
use kundura_storefront::notifications::{NotificationCenter, NotificationInbox};

#[tokio::test]
async fn test_broadcast_reaches_the_bell_live() {
    let shop = Shop::new();
    let (_admin_browser, admin) = shop.admin("admin@example.com").await;
    let customer = shop.customer("ayse@example.com").await;
    let bell = NotificationCenter::new(&customer.session, 10);
    within(bell.collection().ready()).await;
    assert_eq!(bell.unread_count(), 0);

    let draft = NotificationDraft::new("Yeni sezon", "Spring shoes are in", NotificationKind::Informational);
    Broadcaster::new(&admin).send(Recipient::All, &draft).await.unwrap();

    let state = within(bell.collection().wait_for(|s| s.items.len() == 1)).await;
    assert_eq!(state.items.first().unwrap().title, "Yeni sezon");
    let mut unread = bell.watch_unread();
    within(unread.wait_for(|count| *count == 1)).await.unwrap();
}

#[tokio::test]
async fn test_mark_all_as_read_leaves_nothing_unread() {
    let shop = Shop::new();
    let (_admin_browser, admin) = shop.admin("admin@example.com").await;
    let customer = shop.customer("ayse@example.com").await;
    let user = customer.user.as_ref().unwrap().id;
    let broadcaster = Broadcaster::new(&admin);
    for title in ["one", "two", "three"] {
        let draft = NotificationDraft::new(title, "body", NotificationKind::Promotional);
        broadcaster.send(Recipient::User(user), &draft).await.unwrap();
    }

    let inbox = NotificationInbox::new(&customer.session);
    let state = within(inbox.collection().wait_for(|s| s.items.len() == 3)).await;
    let first_read = state.items.iter().find(|n| n.title == "two").unwrap().id;
    inbox.mark_as_read(first_read).await.unwrap();
    within(inbox.collection().wait_for(|s| s.items.iter().filter(|n| n.is_read).count() == 1)).await;

    let flipped = inbox.mark_all_as_read().await.unwrap();
    assert_eq!(flipped, 2);
    within(inbox.collection().wait_for(|s| s.items.iter().all(|n| n.is_read))).await;
    assert!(inbox.unread().is_empty());

    // Nothing is flipped back by a second pass
    assert_eq!(inbox.mark_all_as_read().await.unwrap(), 0);
    assert!(
        shop.backend
            .rows("notifications")
            .iter()
            .all(|row| row["is_read"] == true)
    );
}

#[tokio::test]
async fn test_inbox_only_shows_own_notifications() {
    let shop = Shop::new();
    let (_admin_browser, admin) = shop.admin("admin@example.com").await;
    let alice = shop.customer("alice@example.com").await;
    let bob = shop.customer("bob@example.com").await;

    let draft = NotificationDraft::new("Kargo", "Your order shipped", NotificationKind::Critical);
    Broadcaster::new(&admin)
        .send(Recipient::User(bob.user.as_ref().unwrap().id), &draft)
        .await
        .unwrap();

    let bobs = NotificationInbox::new(&bob.session);
    within(bobs.collection().wait_for(|s| s.items.len() == 1)).await;
    let alices = NotificationInbox::new(&alice.session);
    assert!(within(alices.collection().ready()).await.items.is_empty());
}
