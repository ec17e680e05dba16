//! Sending and retracting notifications.
//!
//! A broadcast is one `notifications` row per recipient; there is no
//! broadcast entity. Rows are written in chunks, each its own request, so a
//! failure part-way leaves the earlier chunks delivered. The report says how
//! far it got. Retracting deletes every row sharing the broadcast's title,
//! message and category.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use kundura_core::{NotificationKind, UserId};
use kundura_storefront::backend::{BackendError, Conflict, DataApi, Filter, Query, Row};
use kundura_storefront::toast::Toast;

use crate::context::AdminContext;
use crate::error::{AdminError, Result};

const TABLE: &str = "notifications";

/// Rows per insert request when notifying everyone.
pub const BROADCAST_CHUNK: usize = 500;

/// Who receives a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every registered user.
    All,
    User(UserId),
}

/// What the notification says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

impl NotificationDraft {
    #[must_use]
    pub fn new(title: impl Into<String>, message: impl Into<String>, kind: NotificationKind) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
        }
    }

    /// Trimmed copy; title and message are required.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] naming the missing field.
    pub fn validate(&self) -> Result<Self> {
        let title = self.title.trim();
        let message = self.message.trim();
        if title.is_empty() {
            return Err(AdminError::Validation("Title is required".to_string()));
        }
        if message.is_empty() {
            return Err(AdminError::Validation("Message is required".to_string()));
        }
        Ok(Self::new(title, message, self.kind))
    }

    fn row_for(&self, user_id: UserId) -> Row {
        json!({
            "user_id": user_id,
            "title": self.title,
            "message": self.message,
            "type": self.kind,
            "is_read": false,
        })
    }

    fn filters(&self) -> [Filter; 3] {
        [
            Filter::eq("title", &self.title),
            Filter::eq("message", &self.message),
            Filter::eq("type", self.kind.as_wire()),
        ]
    }
}

/// How far a send got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastReport {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// A past broadcast, grouped by title, message and category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBroadcast {
    pub draft: NotificationDraft,
    pub recipients: usize,
    pub read: usize,
    pub last_sent_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct SentRow {
    title: String,
    message: String,
    #[serde(rename = "type")]
    kind: NotificationKind,
    #[serde(default)]
    is_read: bool,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ProfileId {
    id: UserId,
}

/// Sends, lists and retracts notifications.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    ctx: AdminContext,
}

impl Broadcaster {
    #[must_use]
    pub fn new(ctx: &AdminContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Send `draft` to one user or to everyone.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] for a blank title or message or
    /// when there is nobody to notify, and the backend error when nothing
    /// could be delivered. A partial delivery is `Ok` with a report
    /// counting the failures.
    #[instrument(skip(self, draft), fields(title = %draft.title, kind = %draft.kind))]
    pub async fn send(&self, recipient: Recipient, draft: &NotificationDraft) -> Result<BroadcastReport> {
        const ACTION: &str = "send notification";
        let draft = draft.validate().or_else(|e| self.ctx.fail(ACTION, e))?;

        let recipients = match recipient {
            Recipient::User(user_id) => vec![user_id],
            Recipient::All => self.all_users(ACTION).await?,
        };
        if recipients.is_empty() {
            return self
                .ctx
                .fail(ACTION, AdminError::Validation("There are no users to notify".to_string()));
        }

        let rows = recipients.iter().map(|id| draft.row_for(*id)).collect();
        let (report, last_error) = deliver(self.ctx.backend(), rows, BROADCAST_CHUNK).await;
        info!(
            delivered = report.delivered,
            failed = report.failed,
            "Notification sent"
        );

        match last_error {
            Some(e) if report.delivered == 0 => self.ctx.fail(ACTION, e),
            Some(e) => {
                AdminError::from(e).report(ACTION);
                self.ctx.session().toast(
                    Toast::destructive("Notification partly sent").with_description(format!(
                        "Delivered to {} of {} users",
                        report.delivered,
                        report.delivered + report.failed
                    )),
                );
                Ok(report)
            }
            None => {
                self.ctx.session().toast(
                    Toast::success("Notification sent")
                        .with_description(format!("Delivered to {} users", report.delivered)),
                );
                Ok(report)
            }
        }
    }

    /// Delete every notification with the same title, message and category
    /// as `draft`; returns how many went.
    ///
    /// The draft is trimmed the same way [`Self::send`] trims it. Unrelated
    /// notifications that happen to share all three are removed too.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] for a blank title or message, or
    /// the backend error if the delete fails.
    #[instrument(skip(self, draft), fields(title = %draft.title, kind = %draft.kind))]
    pub async fn retract(&self, draft: &NotificationDraft) -> Result<usize> {
        const ACTION: &str = "retract notification";
        let draft = draft.validate().or_else(|e| self.ctx.fail(ACTION, e))?;

        let removed = self.ctx.delete(ACTION, TABLE, &draft.filters()).await?;
        if removed == 0 {
            info!("No notification matched the retraction");
            self.ctx.session().toast(
                Toast::notice("Nothing to retract")
                    .with_description("No sent notification has this title, message and category"),
            );
            return Ok(0);
        }
        info!(removed, "Notification retracted");
        self.ctx.session().toast(
            Toast::success("Notification retracted")
                .with_description(format!("Removed from {removed} inboxes")),
        );
        Ok(removed)
    }

    /// Past broadcasts, most recent first.
    ///
    /// # Errors
    ///
    /// Returns the backend error if notifications cannot be read.
    pub async fn sent_broadcasts(&self) -> Result<Vec<SentBroadcast>> {
        let query = Query::table(TABLE)
            .select("title, message, type, is_read, created_at")
            .order_desc("created_at");
        let rows: Vec<SentRow> = self.ctx.fetch("load notifications", &query).await?;
        Ok(group_sent(rows))
    }

    async fn all_users(&self, action: &str) -> Result<Vec<UserId>> {
        let query = Query::table("profiles").select("id");
        let profiles: Vec<ProfileId> = self.ctx.fetch(action, &query).await?;
        Ok(profiles.into_iter().map(|p| p.id).collect())
    }
}

/// Insert `rows` in chunks; a failed chunk is counted and skipped.
async fn deliver<D>(data: &D, rows: Vec<Row>, chunk_size: usize) -> (BroadcastReport, Option<BackendError>)
where
    D: DataApi + ?Sized,
{
    let mut report = BroadcastReport::default();
    let mut last_error = None;
    for chunk in rows.chunks(chunk_size.max(1)) {
        match data.insert(TABLE, chunk.to_vec(), Conflict::Error).await {
            Ok(written) => report.delivered += written.len(),
            Err(e) => {
                warn!(rows = chunk.len(), error = %e, "Notification chunk failed");
                report.failed += chunk.len();
                last_error = Some(e);
            }
        }
    }
    (report, last_error)
}

/// Group newest-first rows by title, message and category, keeping the
/// order in which each group first appears.
fn group_sent(rows: Vec<SentRow>) -> Vec<SentBroadcast> {
    let mut order: Vec<SentBroadcast> = Vec::new();
    let mut index: HashMap<(String, String, NotificationKind), usize> = HashMap::new();
    for row in rows {
        let key = (row.title.clone(), row.message.clone(), row.kind);
        if let Some(group) = index.get(&key).and_then(|&i| order.get_mut(i)) {
            group.recipients += 1;
            group.read += usize::from(row.is_read);
            continue;
        }
        index.insert(key, order.len());
        order.push(SentBroadcast {
            draft: NotificationDraft::new(row.title, row.message, row.kind),
            recipients: 1,
            read: usize::from(row.is_read),
            last_sent_at: row.created_at,
        });
    }
    order
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::test_support::{add_customer, admin_session};
    use async_trait::async_trait;
    use kundura_storefront::backend::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn campaign() -> NotificationDraft {
        NotificationDraft::new("Kampanya", "50% off", NotificationKind::Promotional)
    }

    #[tokio::test]
    async fn test_broadcast_to_all_then_retract() {
        let (backend, toasts, admin) = admin_session().await;
        add_customer(&backend, "a@example.com").await;
        add_customer(&backend, "b@example.com").await;
        let broadcaster = Broadcaster::new(&admin);

        let report = broadcaster.send(Recipient::All, &campaign()).await.unwrap();
        assert_eq!(report, BroadcastReport { delivered: 3, failed: 0 });
        let rows = backend.rows(TABLE);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row["is_read"] == false));
        assert!(rows.iter().all(|row| row["type"] == "kampanya"));

        let sent = broadcaster.sent_broadcasts().await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, 3);
        assert_eq!(sent[0].read, 0);

        assert_eq!(broadcaster.retract(&campaign()).await.unwrap(), 3);
        assert!(backend.rows(TABLE).is_empty());
        assert_eq!(
            toasts.titles(),
            ["Notification sent", "Notification retracted"]
        );
    }

    #[tokio::test]
    async fn test_retract_only_matches_whole_triple() {
        let (backend, _toasts, admin) = admin_session().await;
        let user = add_customer(&backend, "a@example.com").await;
        let broadcaster = Broadcaster::new(&admin);
        broadcaster.send(Recipient::User(user), &campaign()).await.unwrap();
        let mut critical = campaign();
        critical.kind = NotificationKind::Critical;
        broadcaster.send(Recipient::User(user), &critical).await.unwrap();

        assert_eq!(broadcaster.retract(&campaign()).await.unwrap(), 1);
        let left = backend.rows(TABLE);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["type"], "önemli");
    }

    #[tokio::test]
    async fn test_retract_trims_like_send() {
        let (backend, toasts, admin) = admin_session().await;
        let user = add_customer(&backend, "a@example.com").await;
        let broadcaster = Broadcaster::new(&admin);
        let padded = NotificationDraft::new(" Kampanya ", "50% off\n", NotificationKind::Promotional);
        broadcaster.send(Recipient::User(user), &padded).await.unwrap();
        assert_eq!(backend.rows(TABLE)[0]["title"], "Kampanya");

        assert_eq!(broadcaster.retract(&padded).await.unwrap(), 1);
        assert!(backend.rows(TABLE).is_empty());

        toasts.clear();
        assert_eq!(broadcaster.retract(&campaign()).await.unwrap(), 0);
        let toast = toasts.last().unwrap();
        assert_eq!(toast.title, "Nothing to retract");
        assert!(!toast.is_destructive());

        let blank = NotificationDraft::new("Kampanya", " ", NotificationKind::Promotional);
        assert!(matches!(
            broadcaster.retract(&blank).await,
            Err(AdminError::Validation(_))
        ));
        assert_eq!(toasts.last().unwrap().title, "Could not retract notification");
    }

    #[tokio::test]
    async fn test_blank_draft_rejected() {
        let (backend, toasts, admin) = admin_session().await;
        let broadcaster = Broadcaster::new(&admin);
        let draft = NotificationDraft::new("  ", "body", NotificationKind::Informational);
        assert!(broadcaster.send(Recipient::All, &draft).await.is_err());
        assert!(backend.rows(TABLE).is_empty());
        assert_eq!(toasts.titles(), ["Could not send notification"]);
    }

    #[test]
    fn test_group_sent_counts_reads() {
        let at = |s: &str| s.parse::<DateTime<Utc>>().unwrap();
        let row = |title: &str, read: bool, ts: &str| SentRow {
            title: title.to_string(),
            message: "m".to_string(),
            kind: NotificationKind::Informational,
            is_read: read,
            created_at: at(ts),
        };
        let groups = group_sent(vec![
            row("b", false, "2024-05-02T00:00:00Z"),
            row("a", true, "2024-05-01T00:00:00Z"),
            row("b", true, "2024-05-01T12:00:00Z"),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].draft.title, "b");
        assert_eq!((groups[0].recipients, groups[0].read), (2, 1));
        assert_eq!(groups[0].last_sent_at, at("2024-05-02T00:00:00Z"));
        assert_eq!((groups[1].recipients, groups[1].read), (1, 1));
    }

    /// Delegates to a memory store but fails the n-th insert.
    struct FailingInsert {
        inner: MemoryBackend,
        fail_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DataApi for FailingInsert {
        async fn select(&self, query: &Query) -> std::result::Result<Vec<Row>, BackendError> {
            self.inner.select(query).await
        }

        async fn count(&self, table: &str, filters: &[Filter]) -> std::result::Result<u64, BackendError> {
            self.inner.count(table, filters).await
        }

        async fn insert(
            &self,
            table: &str,
            rows: Vec<Row>,
            conflict: Conflict,
        ) -> std::result::Result<Vec<Row>, BackendError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(BackendError::Unavailable("connection reset".to_string()));
            }
            self.inner.insert(table, rows, conflict).await
        }

        async fn update(
            &self,
            table: &str,
            patch: Row,
            filters: &[Filter],
        ) -> std::result::Result<Vec<Row>, BackendError> {
            self.inner.update(table, patch, filters).await
        }

        async fn delete(&self, table: &str, filters: &[Filter]) -> std::result::Result<Vec<Row>, BackendError> {
            self.inner.delete(table, filters).await
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_delivered_ones() {
        let backend = MemoryBackend::storefront();
        let flaky = FailingInsert {
            inner: backend.clone(),
            fail_on: 1,
            calls: AtomicUsize::new(0),
        };
        let draft = campaign();
        let rows: Vec<Row> = (0..1_200).map(|_| draft.row_for(UserId::random())).collect();

        let (report, error) = deliver(&flaky, rows, BROADCAST_CHUNK).await;
        assert_eq!(report, BroadcastReport { delivered: 700, failed: 500 });
        assert!(!report.is_complete());
        assert!(error.is_some());
        assert_eq!(backend.rows(TABLE).len(), 700);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }
}
