//! Transient user-facing acknowledgements.
//!
//! Controllers never return UI; they report the outcome of every user action
//! as a [`Toast`] through whatever [`Toaster`] the session was started with.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToastVariant {
    #[default]
    Default,
    Destructive,
}

/// A dismissible notification shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub description: Option<String>,
    pub variant: ToastVariant,
}

impl Toast {
    pub fn success(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            variant: ToastVariant::Default,
        }
    }

    /// A neutral notice, e.g. asking the user to sign in.
    pub fn notice(title: impl Into<String>) -> Self {
        Self::success(title)
    }

    pub fn destructive(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            variant: ToastVariant::Destructive,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub const fn is_destructive(&self) -> bool {
        matches!(self.variant, ToastVariant::Destructive)
    }
}

/// Delivers toasts to wherever the user will see them.
pub trait Toaster: Send + Sync {
    fn show(&self, toast: Toast);
}

/// Writes toasts to the log. The default for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingToaster;

impl Toaster for TracingToaster {
    fn show(&self, toast: Toast) {
        let description = toast.description.as_deref().unwrap_or_default();
        if toast.is_destructive() {
            warn!(title = %toast.title, description, "toast");
        } else {
            info!(title = %toast.title, description, "toast");
        }
    }
}

/// Records every toast in order.
#[derive(Debug, Default)]
pub struct ToastLog {
    entries: Mutex<Vec<Toast>>,
}

impl ToastLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<Toast> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn titles(&self) -> Vec<String> {
        self.entries().into_iter().map(|toast| toast.title).collect()
    }

    #[must_use]
    pub fn last(&self) -> Option<Toast> {
        self.entries().pop()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl Toaster for ToastLog {
    fn show(&self, toast: Toast) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(toast);
        }
    }
}

/// Forwards toasts to a UI event loop.
#[derive(Debug, Clone)]
pub struct ChannelToaster {
    sender: mpsc::UnboundedSender<Toast>,
}

impl ChannelToaster {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Toast>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Toaster for ChannelToaster {
    fn show(&self, toast: Toast) {
        // A closed UI has nobody left to tell
        let _ = self.sender.send(toast);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_toast_log_records_in_order() {
        let log = ToastLog::new();
        log.show(Toast::success("Added to cart"));
        log.show(Toast::destructive("Sign in required").with_description("Please sign in"));

        assert_eq!(log.titles(), ["Added to cart", "Sign in required"]);
        let last = log.last().unwrap();
        assert!(last.is_destructive());
        assert_eq!(last.description.as_deref(), Some("Please sign in"));

        log.clear();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_channel_toaster_forwards() {
        let (toaster, mut receiver) = ChannelToaster::new();
        toaster.show(Toast::success("Saved"));
        assert_eq!(receiver.try_recv().unwrap().title, "Saved");

        drop(receiver);
        toaster.show(Toast::success("Nobody listening"));
    }
}
