use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kundura_core::{NotificationId, NotificationKind, UserId};

/// A message addressed to one user. The read flag only ever goes from
/// `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
