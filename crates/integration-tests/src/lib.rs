//! End-to-end tests for Kundura.
//!
//! Every scenario runs the real controllers against one shared
//! [`MemoryBackend`]. Each [`Visitor`] gets its own client on that store, so
//! two visitors behave like two browsers: separate sign-ins, same data, and
//! realtime events flowing between them.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p kundura-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `cart` - Cart increments, totals and live sync across users
//! - `favorites` - Favorite uniqueness and the signed-out path
//! - `notifications` - Unread counts and broadcasts reaching inboxes
//! - `product_views` - View de-duplication per browser session
//! - `admin` - Role changes and broadcast retraction

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use kundura_admin::AdminContext;
use kundura_core::{AppRole, ProductId};
use kundura_storefront::SessionContext;
use kundura_storefront::backend::{AuthUser, Conflict, DataApi, Filter, MemoryBackend};
use kundura_storefront::toast::ToastLog;

/// How long any single wait may take before the test fails.
pub const WAIT: Duration = Duration::from_secs(2);

/// Await `future`, failing the test if it takes longer than [`WAIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .unwrap_or_else(|_| panic!("timed out after {WAIT:?}"))
}

/// One browser: a session on its own client plus the toasts it was shown.
#[derive(Debug)]
pub struct Visitor {
    pub session: SessionContext,
    pub toasts: Arc<ToastLog>,
    pub user: Option<AuthUser>,
}

/// A shop with the storefront schema and nothing in it.
#[derive(Debug, Clone)]
pub struct Shop {
    pub backend: MemoryBackend,
}

impl Default for Shop {
    fn default() -> Self {
        Self::new()
    }
}

impl Shop {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backend: MemoryBackend::storefront(),
        }
    }

    /// Someone browsing without an account.
    pub async fn visitor(&self) -> Visitor {
        let toasts = Arc::new(ToastLog::new());
        let session = SessionContext::start(Arc::new(self.backend.connect()), toasts.clone())
            .await
            .unwrap();
        Visitor {
            session,
            toasts,
            user: None,
        }
    }

    /// A freshly registered customer, signed in, toasts cleared.
    pub async fn customer(&self, email: &str) -> Visitor {
        let mut visitor = self.visitor().await;
        let user = visitor
            .session
            .sign_up(email, "secret1", "Musteri", "Test")
            .await
            .unwrap();
        visitor.toasts.clear();
        visitor.user = Some(user);
        visitor
    }

    /// A registered customer promoted to admin.
    pub async fn admin(&self, email: &str) -> (Visitor, AdminContext) {
        let visitor = self.customer(email).await;
        let user = visitor.user.clone().unwrap();
        self.backend
            .update(
                "user_roles",
                json!({ "role": AppRole::Admin }),
                &[Filter::eq("user_id", user.id)],
            )
            .await
            .unwrap();
        let admin = AdminContext::require(&visitor.session).await.unwrap();
        visitor.toasts.clear();
        (visitor, admin)
    }

    /// A product priced in lira, e.g. `"1299.90"`.
    pub async fn product(&self, name: &str, price: &str) -> ProductId {
        let id = ProductId::random();
        self.backend
            .insert(
                "products",
                vec![json!({ "id": id, "name": name, "price": price })],
                Conflict::Error,
            )
            .await
            .unwrap();
        id
    }
}
