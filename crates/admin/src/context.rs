//! Admin guard and shared controller plumbing.
//!
//! Every back-office controller is built from an [`AdminContext`], and the
//! only way to get one is [`AdminContext::require`], which checks the
//! signed-in user's role on the platform.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use kundura_storefront::backend::{
    AuthUser, Backend, BackendError, Conflict, Filter, Query, Row, decode_rows,
};
use kundura_storefront::{AppError, SessionContext};
use kundura_storefront::error::add_breadcrumb;
use kundura_storefront::toast::Toast;

use crate::error::{AdminError, Result};

/// A session proven to belong to an admin.
#[derive(Debug, Clone)]
pub struct AdminContext {
    session: SessionContext,
    admin: AuthUser,
}

impl AdminContext {
    /// Check that the current user is an admin.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::App`] with `Unauthenticated` when signed out,
    /// [`AdminError::Forbidden`] for any other role, and the backend error
    /// if the role cannot be read.
    #[instrument(skip(session))]
    pub async fn require(session: &SessionContext) -> Result<Self> {
        const ACTION: &str = "open the admin panel";
        let admin = match session.require_user() {
            Ok(user) => user,
            Err(e) => return fail(session, ACTION, e),
        };
        match session.role().await {
            Ok(role) if role.is_admin() => {
                info!(user_id = %admin.id, "Admin session opened");
                add_breadcrumb("admin", "Admin session opened", None);
                Ok(Self {
                    session: session.clone(),
                    admin,
                })
            }
            Ok(_) => fail(session, ACTION, AdminError::Forbidden),
            Err(e) => fail(session, ACTION, e),
        }
    }

    #[must_use]
    pub const fn session(&self) -> &SessionContext {
        &self.session
    }

    /// The admin who opened this context.
    #[must_use]
    pub const fn admin(&self) -> &AuthUser {
        &self.admin
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.session.backend()
    }

    pub(crate) fn succeed(&self, title: &str) {
        add_breadcrumb("admin", title, None);
        self.session.toast(Toast::success(title));
    }

    /// Report a failed action: log it, toast it, and hand the error back.
    pub(crate) fn fail<T>(&self, action: &str, err: impl Into<AdminError>) -> Result<T> {
        fail(&self.session, action, err)
    }

    pub(crate) async fn fetch<T: DeserializeOwned>(&self, action: &str, query: &Query) -> Result<Vec<T>> {
        let rows = match self.backend().select(query).await {
            Ok(rows) => rows,
            Err(e) => return self.fail(action, e),
        };
        debug!(table = %query.table, rows = rows.len(), "Admin listing fetched");
        decode_rows(rows).or_else(|e| self.fail(action, e))
    }

    /// Insert one row and return it as written.
    pub(crate) async fn insert(
        &self,
        action: &str,
        table: &str,
        row: &impl Serialize,
        conflict: Conflict,
    ) -> Result<Option<Row>> {
        let row = match serde_json::to_value(row) {
            Ok(row) => row,
            Err(e) => return self.fail(action, BackendError::from(e)),
        };
        match self.backend().insert(table, vec![row], conflict).await {
            Ok(rows) => Ok(rows.into_iter().next()),
            Err(e) => self.fail(action, e),
        }
    }

    /// Patch the rows matching `filters`; matching nothing is `NotFound(what)`.
    pub(crate) async fn update(
        &self,
        action: &str,
        table: &str,
        patch: &impl Serialize,
        filters: &[Filter],
        what: &str,
    ) -> Result<Vec<Row>> {
        let patch = match serde_json::to_value(patch) {
            Ok(patch) => patch,
            Err(e) => return self.fail(action, BackendError::from(e)),
        };
        match self.backend().update(table, patch, filters).await {
            Ok(rows) if rows.is_empty() => self.fail(action, AppError::NotFound(what.to_string())),
            Ok(rows) => Ok(rows),
            Err(e) => self.fail(action, e),
        }
    }

    /// Delete the rows matching `filters` and return how many went.
    pub(crate) async fn delete(&self, action: &str, table: &str, filters: &[Filter]) -> Result<usize> {
        match self.backend().delete(table, filters).await {
            Ok(rows) => Ok(rows.len()),
            Err(e) => self.fail(action, e),
        }
    }
}

#[derive(Deserialize)]
struct Inserted<Id> {
    id: Id,
}

/// The `id` of a row returned by [`AdminContext::insert`].
pub(crate) fn inserted_id<Id: DeserializeOwned>(row: Option<Row>) -> Result<Id> {
    let row = row.ok_or_else(|| BackendError::Decode("insert returned no row".to_string()))?;
    let inserted: Inserted<Id> = serde_json::from_value(row).map_err(BackendError::from)?;
    Ok(inserted.id)
}

fn fail<T>(session: &SessionContext, action: &str, err: impl Into<AdminError>) -> Result<T> {
    let err = err.into();
    err.report(action);
    session.toast(err.toast(action));
    Err(err)
}

/// The last fetched rows of an admin table, observable by a UI.
#[derive(Debug)]
pub struct Listing<T> {
    items: watch::Sender<Vec<T>>,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        let (items, _) = watch::channel(Vec::new());
        Self { items }
    }
}

impl<T: Clone> Listing<T> {
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.items.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<T>> {
        self.items.subscribe()
    }

    pub(crate) fn replace(&self, items: Vec<T>) -> Vec<T> {
        self.items.send_replace(items.clone());
        items
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::{admin_session, customer_session};

    #[tokio::test]
    async fn test_admin_passes_guard() {
        let (_backend, _toasts, admin) = admin_session().await;
        assert!(admin.admin().email.is_some());
    }

    #[tokio::test]
    async fn test_customer_is_forbidden() {
        let (_backend, toasts, session) = customer_session().await;
        let err = AdminContext::require(&session).await.unwrap_err();
        assert!(matches!(err, AdminError::Forbidden));
        assert_eq!(toasts.titles(), ["Access denied"]);
    }

    #[tokio::test]
    async fn test_signed_out_needs_sign_in() {
        let (_backend, toasts, session) = customer_session().await;
        session.sign_out().await.unwrap();
        toasts.clear();

        let err = AdminContext::require(&session).await.unwrap_err();
        assert!(matches!(err, AdminError::App(AppError::Unauthenticated)));
        assert_eq!(toasts.titles(), ["Sign in required"]);
    }

    #[test]
    fn test_listing_replace() {
        let listing = Listing::default();
        assert!(listing.is_empty());
        let mut rx = listing.watch();
        listing.replace(vec![1, 2, 3]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), [1, 2, 3]);
        assert_eq!(listing.len(), 3);
    }
}
