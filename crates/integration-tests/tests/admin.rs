//! Back-office flows seen from the storefront side.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use kundura_admin::broadcast::{BroadcastReport, Broadcaster, NotificationDraft, Recipient};
use kundura_admin::forms::{BrandForm, ProductForm};
use kundura_admin::brands::BrandsAdmin;
use kundura_admin::products::ProductsAdmin;
use kundura_admin::users::UsersAdmin;
use kundura_admin::{AdminContext, AdminError};
use kundura_core::{AppRole, NotificationKind};
use kundura_integration_tests::Shop;
use kundura_storefront::AppError;
use kundura_storefront::backend::Filter;
use kundura_storefront::catalog::Catalog;

fn campaign() -> NotificationDraft {
    NotificationDraft::new("Kampanya", "50% off", NotificationKind::Promotional)
}

#[tokio::test]
async fn test_broadcast_to_everyone_then_retract() {
    let shop = Shop::new();
    let (_browser, admin) = shop.admin("admin@example.com").await;
    shop.customer("alice@example.com").await;
    shop.customer("bob@example.com").await;
    let broadcaster = Broadcaster::new(&admin);

    let report = broadcaster.send(Recipient::All, &campaign()).await.unwrap();
    assert_eq!(report, BroadcastReport { delivered: 3, failed: 0 });

    let rows = shop.backend.rows("notifications");
    assert_eq!(rows.len(), 3);
    let mut recipients: Vec<_> = rows.iter().map(|row| row["user_id"].to_string()).collect();
    recipients.sort();
    recipients.dedup();
    assert_eq!(recipients.len(), 3);
    for row in &rows {
        assert_eq!(row["title"], "Kampanya");
        assert_eq!(row["message"], "50% off");
        assert_eq!(row["type"], "kampanya");
        assert_eq!(row["is_read"], false);
    }

    let removed = broadcaster.retract(&campaign()).await.unwrap();
    assert_eq!(removed, 3);
    assert!(shop.backend.rows("notifications").is_empty());
}

#[tokio::test]
async fn test_role_changes_keep_one_row_per_user() {
    let shop = Shop::new();
    let (_browser, admin) = shop.admin("admin@example.com").await;
    let customer = shop.customer("ayse@example.com").await;
    let user = customer.user.as_ref().unwrap().id;
    let users = UsersAdmin::new(&admin);

    for role in [AppRole::Admin, AppRole::Banned, AppRole::User, AppRole::Banned] {
        users.set_role(user, role).await.unwrap();
        let rows = shop
            .backend
            .rows("user_roles")
            .into_iter()
            .filter(|row| Filter::eq("user_id", user).matches(row))
            .count();
        assert_eq!(rows, 1);
    }

    // The ban takes effect at the next sign-in
    customer.session.sign_out().await.unwrap();
    let err = customer
        .session
        .sign_in("ayse@example.com", "secret1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Banned));
    assert!(customer.session.current_user().is_none());
}

#[tokio::test]
async fn test_customers_cannot_reach_admin_controllers() {
    let shop = Shop::new();
    let customer = shop.customer("ayse@example.com").await;
    let err = AdminContext::require(&customer.session).await.unwrap_err();
    assert!(matches!(err, AdminError::Forbidden));
    assert_eq!(customer.toasts.titles(), ["Access denied"]);

    let visitor = shop.visitor().await;
    let err = AdminContext::require(&visitor.session).await.unwrap_err();
    assert!(matches!(err, AdminError::App(AppError::Unauthenticated)));
}

#[tokio::test]
async fn test_catalog_edits_show_in_the_storefront() {
    let shop = Shop::new();
    let (_browser, admin) = shop.admin("admin@example.com").await;
    let brand = BrandsAdmin::new(&admin)
        .create(&BrandForm {
            name: "Kundura".to_string(),
            logo_url: String::new(),
        })
        .await
        .unwrap();
    let products = ProductsAdmin::new(&admin);
    let loafer = products
        .create(&ProductForm {
            name: "Loafer".to_string(),
            description: "Suede".to_string(),
            price: "1299,90".to_string(),
            brand_id: brand.to_string(),
            is_featured: true,
        })
        .await
        .unwrap();
    products
        .add_product_image(loafer, "https://cdn.example.com/loafer.jpg", false)
        .await
        .unwrap();
    products.set_stock(loafer, "42", 5).await.unwrap();

    let visitor = shop.visitor().await;
    let catalog = Catalog::new(&visitor.session);
    let featured = catalog.featured_products().await.unwrap();
    assert_eq!(featured.len(), 1);
    assert_eq!(featured[0].brand_name(), Some("Kundura"));
    assert_eq!(featured[0].primary_image(), Some("https://cdn.example.com/loafer.jpg"));

    let detail = catalog.product(loafer).await.unwrap();
    assert_eq!(detail.product_sizes.len(), 1);
    assert_eq!(detail.product_sizes[0].stock, 5);

    products.delete(loafer).await.unwrap();
    assert!(catalog.featured_products().await.unwrap().is_empty());
}
