//! User-side notifications.
//!
//! [`NotificationCenter`] holds the few most recent notifications for the
//! header bell together with an exact unread count; [`NotificationInbox`]
//! holds all of them for the notifications page.

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use kundura_core::NotificationId;

use crate::backend::{AuthUser, Backend, BackendError, Filter, Query, decode_first, decode_rows};
use crate::error::Result;
use crate::models::Notification;
use crate::session::SessionContext;
use crate::sync::{CollectionSource, CollectionState, RefreshPolicy, SyncedCollection, TaskGuard};
use crate::toast::Toast;

const TABLE: &str = "notifications";

/// How many notifications the header shows.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Reads the user's notifications, newest first, optionally capped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationSource {
    limit: Option<usize>,
}

impl NotificationSource {
    #[must_use]
    pub const fn recent(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }

    #[must_use]
    pub const fn all() -> Self {
        Self { limit: None }
    }
}

#[async_trait]
impl CollectionSource for NotificationSource {
    type Item = Notification;

    fn table(&self) -> &'static str {
        TABLE
    }

    fn item_id(&self, notification: &Notification) -> String {
        notification.id.to_string()
    }

    async fn fetch_all(
        &self,
        backend: &dyn Backend,
        user: &AuthUser,
    ) -> std::result::Result<Vec<Notification>, BackendError> {
        let mut query = Query::table(TABLE)
            .eq("user_id", user.id)
            .order_desc("created_at");
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        decode_rows(backend.select(&query).await?)
    }

    async fn fetch_one(
        &self,
        backend: &dyn Backend,
        user: &AuthUser,
        id: &str,
    ) -> std::result::Result<Option<Notification>, BackendError> {
        let query = Query::table(TABLE).eq("id", id).eq("user_id", user.id);
        decode_first(backend.select(&query).await?)
    }

    fn sort(&self, notifications: &mut [Notification]) {
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Recent notifications plus the user's exact unread count.
#[derive(Debug)]
pub struct NotificationCenter {
    session: SessionContext,
    recent: SyncedCollection<NotificationSource>,
    unread: watch::Receiver<u64>,
    _counter: TaskGuard,
}

impl NotificationCenter {
    #[must_use]
    pub fn new(session: &SessionContext, limit: usize) -> Self {
        Self::with_policy(session, limit, RefreshPolicy::default())
    }

    #[must_use]
    pub fn with_policy(session: &SessionContext, limit: usize, policy: RefreshPolicy) -> Self {
        let recent = SyncedCollection::start(session, NotificationSource::recent(limit), policy);
        let (unread_tx, unread) = watch::channel(0);
        let counter = TaskGuard::spawn(count_unread(session.clone(), recent.watch(), unread_tx));
        Self {
            session: session.clone(),
            recent,
            unread,
            _counter: counter,
        }
    }

    #[must_use]
    pub const fn collection(&self) -> &SyncedCollection<NotificationSource> {
        &self.recent
    }

    #[must_use]
    pub fn items(&self) -> Vec<Notification> {
        self.recent.items()
    }

    /// Unread notifications across the whole inbox, not just the recent ones.
    #[must_use]
    pub fn unread_count(&self) -> u64 {
        *self.unread.borrow()
    }

    #[must_use]
    pub fn watch_unread(&self) -> watch::Receiver<u64> {
        self.unread.clone()
    }

    pub async fn refresh(&self) {
        self.recent.refresh().await;
    }

    /// Mark one notification read. Read notifications are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Backend`] if the update fails.
    pub async fn mark_as_read(&self, id: NotificationId) -> Result<()> {
        mark_as_read(&self.session, id).await
    }

    /// Mark every unread notification read; returns how many were flipped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Backend`] if the update fails.
    pub async fn mark_all_as_read(&self) -> Result<usize> {
        mark_all_as_read(&self.session).await
    }
}

/// Every notification of the signed-in user.
#[derive(Debug)]
pub struct NotificationInbox {
    session: SessionContext,
    all: SyncedCollection<NotificationSource>,
}

impl NotificationInbox {
    #[must_use]
    pub fn new(session: &SessionContext) -> Self {
        Self {
            session: session.clone(),
            all: SyncedCollection::start(session, NotificationSource::all(), RefreshPolicy::default()),
        }
    }

    #[must_use]
    pub const fn collection(&self) -> &SyncedCollection<NotificationSource> {
        &self.all
    }

    #[must_use]
    pub fn items(&self) -> Vec<Notification> {
        self.all.items()
    }

    #[must_use]
    pub fn unread(&self) -> Vec<Notification> {
        self.all.with_items(|items| items.iter().filter(|n| !n.is_read).cloned().collect())
    }

    /// # Errors
    ///
    /// Returns [`crate::AppError::Backend`] if the update fails.
    pub async fn mark_as_read(&self, id: NotificationId) -> Result<()> {
        mark_as_read(&self.session, id).await
    }

    /// # Errors
    ///
    /// Returns [`crate::AppError::Backend`] if the update fails.
    pub async fn mark_all_as_read(&self) -> Result<usize> {
        mark_all_as_read(&self.session).await
    }
}

#[instrument(skip(session), fields(notification_id = %id))]
async fn mark_as_read(session: &SessionContext, id: NotificationId) -> Result<()> {
    const ACTION: &str = "mark as read";
    let user = session.require_user_for(ACTION)?;

    // Filtering on is_read keeps the flag one-way
    let updated = session
        .backend()
        .update(
            TABLE,
            json!({ "is_read": true }),
            &[
                Filter::eq("id", id),
                Filter::eq("user_id", user.id),
                Filter::eq("is_read", false),
            ],
        )
        .await;
    match updated {
        Ok(rows) => {
            debug!(flipped = rows.len(), "Notification marked read");
            Ok(())
        }
        Err(e) => session.fail(ACTION, e),
    }
}

#[instrument(skip(session))]
async fn mark_all_as_read(session: &SessionContext) -> Result<usize> {
    const ACTION: &str = "mark all as read";
    let user = session.require_user_for(ACTION)?;

    let updated = session
        .backend()
        .update(
            TABLE,
            json!({ "is_read": true }),
            &[Filter::eq("user_id", user.id), Filter::eq("is_read", false)],
        )
        .await;
    match updated {
        Ok(rows) => {
            session.toast(Toast::success("All notifications marked as read"));
            Ok(rows.len())
        }
        Err(e) => session.fail(ACTION, e),
    }
}

/// Re-count unread rows after every change to the recent list.
async fn count_unread(
    session: SessionContext,
    mut recent: watch::Receiver<CollectionState<Notification>>,
    unread: watch::Sender<u64>,
) {
    loop {
        let owner = recent.borrow_and_update().owner;
        let count = match owner {
            None => Some(0),
            Some(user_id) => {
                let filters = [Filter::eq("user_id", user_id), Filter::eq("is_read", false)];
                match session.backend().count(TABLE, &filters).await {
                    Ok(count) => Some(count),
                    Err(e) => {
                        warn!(error = %e, "Unread count failed, keeping previous value");
                        None
                    }
                }
            }
        };
        if let Some(count) = count {
            unread.send_if_modified(|current| {
                let changed = *current != count;
                *current = count;
                changed
            });
        }
        if recent.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::backend::{Conflict, DataApi, MemoryBackend};
    use crate::toast::ToastLog;
    use std::sync::Arc;

    async fn setup() -> (MemoryBackend, Arc<ToastLog>, SessionContext, AuthUser) {
        let backend = MemoryBackend::storefront();
        let toasts = Arc::new(ToastLog::new());
        let session = SessionContext::start(Arc::new(backend.clone()), toasts.clone())
            .await
            .unwrap();
        let user = session.sign_up("a@example.com", "secret1", "A", "B").await.unwrap();
        toasts.clear();
        (backend, toasts, session, user)
    }

    async fn notify(backend: &MemoryBackend, user: &AuthUser, title: &str, read: bool) {
        backend
            .insert(
                TABLE,
                vec![json!({
                    "user_id": user.id,
                    "title": title,
                    "message": "body",
                    "type": "bilgi",
                    "is_read": read,
                })],
                Conflict::Error,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recent_is_limited_but_count_is_not() {
        let (backend, _toasts, session, user) = setup().await;
        for i in 0..4 {
            notify(&backend, &user, &format!("n{i}"), false).await;
        }
        notify(&backend, &user, "old-read", true).await;

        let center = NotificationCenter::new(&session, 2);
        let state = center.collection().ready().await;
        assert_eq!(state.items.len(), 2);
        assert_eq!(state.items[0].title, "old-read");

        let mut unread = center.watch_unread();
        unread.wait_for(|count| *count == 4).await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_all_as_read_flips_only_unread() {
        let (backend, toasts, session, user) = setup().await;
        notify(&backend, &user, "a", false).await;
        notify(&backend, &user, "b", true).await;
        notify(&backend, &user, "c", false).await;

        let center = NotificationCenter::new(&session, DEFAULT_RECENT_LIMIT);
        center.collection().ready().await;
        let flipped = center.mark_all_as_read().await.unwrap();
        assert_eq!(flipped, 2);
        assert_eq!(toasts.titles(), ["All notifications marked as read"]);

        let mut unread = center.watch_unread();
        unread.wait_for(|count| *count == 0).await.unwrap();
        center
            .collection()
            .wait_for(|s| s.items.iter().all(|n| n.is_read))
            .await;
    }

    #[tokio::test]
    async fn test_mark_as_read_is_one_way() {
        let (backend, _toasts, session, user) = setup().await;
        notify(&backend, &user, "a", false).await;
        let inbox = NotificationInbox::new(&session);
        let id = inbox.collection().ready().await.items[0].id;

        inbox.mark_as_read(id).await.unwrap();
        inbox.mark_as_read(id).await.unwrap();
        inbox.collection().wait_for(|s| s.items[0].is_read).await;
        assert!(inbox.unread().is_empty());
    }

    #[tokio::test]
    async fn test_other_users_notifications_are_invisible() {
        let (backend, _toasts, session, _user) = setup().await;
        let stranger = AuthUser {
            id: kundura_core::UserId::random(),
            email: None,
        };
        notify(&backend, &stranger, "not for you", false).await;

        let center = NotificationCenter::new(&session, DEFAULT_RECENT_LIMIT);
        assert!(center.collection().ready().await.items.is_empty());
        assert_eq!(center.unread_count(), 0);
    }
}
