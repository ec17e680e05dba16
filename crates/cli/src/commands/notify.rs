//! Notification broadcasts.

use tracing::{info, warn};

use kundura_admin::broadcast::{Broadcaster, NotificationDraft, Recipient};
use kundura_core::{NotificationKind, UserId};

use super::{Account, CommandError};

/// Send to `user`, or to everyone when `None`.
///
/// # Errors
///
/// Returns `CommandError` for a blank title or message, a non-admin caller,
/// or when nothing could be delivered.
pub async fn send(
    account: &Account,
    title: &str,
    message: &str,
    kind: NotificationKind,
    user: Option<UserId>,
) -> Result<(), CommandError> {
    let admin = account.admin().await?;
    let recipient = user.map_or(Recipient::All, Recipient::User);
    let draft = NotificationDraft::new(title, message, kind);

    let report = Broadcaster::new(&admin).send(recipient, &draft).await?;
    if report.is_complete() {
        info!(delivered = report.delivered, "Notification delivered");
    } else {
        warn!(
            delivered = report.delivered,
            failed = report.failed,
            "Notification partly delivered"
        );
    }
    Ok(())
}

/// Delete every copy of a notification.
///
/// # Errors
///
/// Returns `CommandError` for a non-admin caller or a failed delete.
pub async fn retract(
    account: &Account,
    title: &str,
    message: &str,
    kind: NotificationKind,
) -> Result<(), CommandError> {
    let admin = account.admin().await?;
    let draft = NotificationDraft::new(title, message, kind);
    let removed = Broadcaster::new(&admin).retract(&draft).await?;
    info!(removed, "Notification retracted");
    Ok(())
}

/// Summarise what has been sent.
///
/// # Errors
///
/// Returns `CommandError` for a non-admin caller or a failed read.
pub async fn list(account: &Account) -> Result<(), CommandError> {
    let admin = account.admin().await?;
    let sent = Broadcaster::new(&admin).sent_broadcasts().await?;
    info!(broadcasts = sent.len(), "Sent notifications");
    for broadcast in sent {
        info!(
            "  [{}] {} - {} ({}/{} read, last {})",
            broadcast.draft.kind.label(),
            broadcast.draft.title,
            broadcast.draft.message,
            broadcast.read,
            broadcast.recipients,
            broadcast.last_sent_at.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}
