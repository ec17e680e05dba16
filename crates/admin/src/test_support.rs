//! Sessions on an in-memory backend for controller tests.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use serde_json::json;

use kundura_storefront::SessionContext;
use kundura_storefront::backend::{Conflict, DataApi, Filter, MemoryBackend};
use kundura_storefront::toast::ToastLog;

use crate::context::AdminContext;

pub async fn customer_session() -> (MemoryBackend, Arc<ToastLog>, SessionContext) {
    let backend = MemoryBackend::storefront();
    let toasts = Arc::new(ToastLog::new());
    let session = SessionContext::start(Arc::new(backend.clone()), toasts.clone())
        .await
        .unwrap();
    session
        .sign_up("customer@example.com", "secret1", "Ayse", "Yilmaz")
        .await
        .unwrap();
    toasts.clear();
    (backend, toasts, session)
}

pub async fn admin_session() -> (MemoryBackend, Arc<ToastLog>, AdminContext) {
    let backend = MemoryBackend::storefront();
    let toasts = Arc::new(ToastLog::new());
    let session = SessionContext::start(Arc::new(backend.clone()), toasts.clone())
        .await
        .unwrap();
    let user = session
        .sign_up("admin@example.com", "secret1", "Deniz", "Kaya")
        .await
        .unwrap();
    backend
        .update(
            "user_roles",
            json!({ "role": "admin" }),
            &[Filter::eq("user_id", user.id)],
        )
        .await
        .unwrap();
    let admin = AdminContext::require(&session).await.unwrap();
    toasts.clear();
    (backend, toasts, admin)
}

/// Register a customer account without touching anyone's session.
pub async fn add_customer(backend: &MemoryBackend, email: &str) -> kundura_core::UserId {
    let other = backend.connect();
    let toasts = Arc::new(ToastLog::new());
    let session = SessionContext::start(Arc::new(other), toasts).await.unwrap();
    session.sign_up(email, "secret1", "Musteri", "").await.unwrap().id
}

pub async fn add_product(backend: &MemoryBackend, name: &str) -> kundura_core::ProductId {
    let id = kundura_core::ProductId::random();
    backend
        .insert(
            "products",
            vec![json!({ "id": id, "name": name, "price": "499.90" })],
            Conflict::Error,
        )
        .await
        .unwrap();
    id
}
