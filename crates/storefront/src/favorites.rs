//! Favorites controller.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};

use kundura_core::{FavoriteId, ProductId};

use crate::backend::{
    AuthUser, Backend, BackendError, Conflict, Filter, Query, decode_first, decode_rows,
};
use crate::error::{Result, add_breadcrumb};
use crate::models::FavoriteEntry;
use crate::session::SessionContext;
use crate::sync::{CollectionSource, RefreshPolicy, SyncedCollection};
use crate::toast::Toast;

const TABLE: &str = "favorites";

#[derive(Debug, Default, Clone, Copy)]
pub struct FavoritesSource;

#[async_trait]
impl CollectionSource for FavoritesSource {
    type Item = FavoriteEntry;

    fn table(&self) -> &'static str {
        TABLE
    }

    fn item_id(&self, entry: &FavoriteEntry) -> String {
        entry.id.to_string()
    }

    async fn fetch_all(
        &self,
        backend: &dyn Backend,
        user: &AuthUser,
    ) -> std::result::Result<Vec<FavoriteEntry>, BackendError> {
        let query = Query::table(TABLE)
            .select(FavoriteEntry::SELECT)
            .eq("user_id", user.id)
            .order_desc("created_at");
        decode_rows(backend.select(&query).await?)
    }

    async fn fetch_one(
        &self,
        backend: &dyn Backend,
        user: &AuthUser,
        id: &str,
    ) -> std::result::Result<Option<FavoriteEntry>, BackendError> {
        let query = Query::table(TABLE)
            .select(FavoriteEntry::SELECT)
            .eq("id", id)
            .eq("user_id", user.id);
        decode_first(backend.select(&query).await?)
    }

    fn sort(&self, entries: &mut [FavoriteEntry]) {
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

/// What a favorites mutation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteOutcome {
    Added,
    /// The product was already a favorite; nothing was written.
    AlreadyFavorite,
    Removed,
}

/// The signed-in user's favorites.
#[derive(Debug)]
pub struct FavoritesController {
    session: SessionContext,
    entries: SyncedCollection<FavoritesSource>,
}

impl FavoritesController {
    #[must_use]
    pub fn new(session: &SessionContext) -> Self {
        Self::with_policy(session, RefreshPolicy::default())
    }

    #[must_use]
    pub fn with_policy(session: &SessionContext, policy: RefreshPolicy) -> Self {
        Self {
            session: session.clone(),
            entries: SyncedCollection::start(session, FavoritesSource, policy),
        }
    }

    #[must_use]
    pub const fn collection(&self) -> &SyncedCollection<FavoritesSource> {
        &self.entries
    }

    #[must_use]
    pub fn items(&self) -> Vec<FavoriteEntry> {
        self.entries.items()
    }

    /// Whether the product is in the last synced list.
    #[must_use]
    pub fn is_favorite(&self, product_id: ProductId) -> bool {
        self.entries.with_items(|entries| {
            entries.iter().any(|entry| entry.product_id == product_id)
        })
    }

    pub async fn refresh(&self) {
        self.entries.refresh().await;
    }

    /// Favorite a product. Favoriting it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Unauthenticated`] without writing when
    /// nobody is signed in, or [`crate::AppError::Backend`] when the insert
    /// fails.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_to_favorites(&self, product_id: ProductId) -> Result<FavoriteOutcome> {
        const ACTION: &str = "add to favorites";
        let user = self.session.require_user_for(ACTION)?;

        // One atomic insert-if-absent backed by the (user_id, product_id) key
        let inserted = self
            .session
            .backend()
            .insert(
                TABLE,
                vec![json!({ "user_id": user.id, "product_id": product_id })],
                Conflict::ignore(&["user_id", "product_id"]),
            )
            .await;

        match inserted {
            Ok(rows) if rows.is_empty() => {
                debug!("Product already a favorite");
                self.session.toast(Toast::notice("Already in favorites"));
                Ok(FavoriteOutcome::AlreadyFavorite)
            }
            Ok(_) => {
                add_breadcrumb("favorites", "Added to favorites", None);
                self.session.toast(Toast::success("Added to favorites"));
                Ok(FavoriteOutcome::Added)
            }
            Err(e) => self.session.fail(ACTION, e),
        }
    }

    /// Remove one favorite entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Backend`] if the delete fails.
    #[instrument(skip(self), fields(entry_id = %entry_id))]
    pub async fn remove_from_favorites(&self, entry_id: FavoriteId) -> Result<()> {
        const ACTION: &str = "remove from favorites";
        let user = self.session.require_user_for(ACTION)?;
        self.delete(ACTION, &[Filter::eq("id", entry_id), Filter::eq("user_id", user.id)])
            .await
    }

    /// Add the product if it is not a favorite, remove it if it is.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_to_favorites`].
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn toggle(&self, product_id: ProductId) -> Result<FavoriteOutcome> {
        const ACTION: &str = "update favorites";
        let user = self.session.require_user_for(ACTION)?;

        if self.is_favorite(product_id) {
            self.delete(
                ACTION,
                &[Filter::eq("user_id", user.id), Filter::eq("product_id", product_id)],
            )
            .await?;
            Ok(FavoriteOutcome::Removed)
        } else {
            self.add_to_favorites(product_id).await
        }
    }

    async fn delete(&self, action: &str, filters: &[Filter]) -> Result<()> {
        match self.session.backend().delete(TABLE, filters).await {
            Ok(_) => {
                add_breadcrumb("favorites", "Removed from favorites", None);
                self.session.toast(Toast::success("Removed from favorites"));
                Ok(())
            }
            Err(e) => self.session.fail(action, e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::AppError;
    use crate::backend::{DataApi, MemoryBackend};
    use crate::toast::ToastLog;
    use std::sync::Arc;

    async fn setup() -> (MemoryBackend, Arc<ToastLog>, SessionContext, ProductId) {
        let backend = MemoryBackend::storefront();
        let product = ProductId::random();
        backend
            .insert(
                "products",
                vec![json!({"id": product, "name": "Loafer", "price": 899})],
                Conflict::Error,
            )
            .await
            .unwrap();
        let toasts = Arc::new(ToastLog::new());
        let session = SessionContext::start(Arc::new(backend.clone()), toasts.clone())
            .await
            .unwrap();
        (backend, toasts, session, product)
    }

    #[tokio::test]
    async fn test_anonymous_add_writes_nothing() {
        let (backend, toasts, session, product) = setup().await;
        let favorites = FavoritesController::new(&session);

        let err = favorites.add_to_favorites(product).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated));
        assert!(backend.rows(TABLE).is_empty());
        assert_eq!(toasts.titles(), ["Sign in required"]);
    }

    #[tokio::test]
    async fn test_repeat_add_is_noop() {
        let (backend, toasts, session, product) = setup().await;
        session.sign_up("a@example.com", "secret1", "A", "B").await.unwrap();
        toasts.clear();
        let favorites = FavoritesController::new(&session);

        assert_eq!(favorites.add_to_favorites(product).await.unwrap(), FavoriteOutcome::Added);
        for _ in 0..3 {
            assert_eq!(
                favorites.add_to_favorites(product).await.unwrap(),
                FavoriteOutcome::AlreadyFavorite
            );
        }
        assert_eq!(backend.rows(TABLE).len(), 1);
        assert_eq!(toasts.titles()[1], "Already in favorites");

        favorites.collection().wait_for(|s| s.items.len() == 1).await;
        assert!(favorites.is_favorite(product));
        assert!(!favorites.is_favorite(ProductId::random()));
    }

    #[tokio::test]
    async fn test_toggle_and_remove() {
        let (backend, _toasts, session, product) = setup().await;
        session.sign_up("a@example.com", "secret1", "A", "B").await.unwrap();
        let favorites = FavoritesController::new(&session);
        favorites.collection().ready().await;

        assert_eq!(favorites.toggle(product).await.unwrap(), FavoriteOutcome::Added);
        favorites.collection().wait_for(|s| s.items.len() == 1).await;
        assert_eq!(favorites.toggle(product).await.unwrap(), FavoriteOutcome::Removed);
        favorites.collection().wait_for(|s| s.items.is_empty()).await;

        favorites.add_to_favorites(product).await.unwrap();
        let entry = favorites.collection().wait_for(|s| s.items.len() == 1).await.items;
        let entry = entry.first().unwrap();
        assert_eq!(entry.product.as_ref().unwrap().name, "Loafer");
        favorites.remove_from_favorites(entry.id).await.unwrap();
        assert!(backend.rows(TABLE).is_empty());
    }
}
