//! Unified error handling for the back office.

use thiserror::Error;

use kundura_storefront::AppError;
use kundura_storefront::backend::BackendError;
use kundura_storefront::toast::Toast;

/// Error type for every admin controller operation.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Storefront-level failure (no session, backend error, ...).
    #[error(transparent)]
    App(#[from] AppError),

    /// Signed in, but not as an admin.
    #[error("Forbidden: admin role required")]
    Forbidden,

    /// Form input rejected before any remote call.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<BackendError> for AdminError {
    fn from(err: BackendError) -> Self {
        Self::App(AppError::Backend(err))
    }
}

impl AdminError {
    /// Text safe to show the operator.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::App(err) => err.user_message(),
            Self::Forbidden => "This area is for administrators only.".to_string(),
            Self::Validation(msg) => msg.clone(),
        }
    }

    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        match self {
            Self::App(err) => err.is_server_fault(),
            Self::Forbidden | Self::Validation(_) => false,
        }
    }

    /// Log the error, capturing platform faults to Sentry.
    pub fn report(&self, action: &str) {
        if self.is_server_fault() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                action,
                error = %self,
                sentry_event_id = %event_id,
                "Admin action failed"
            );
        } else {
            tracing::warn!(action, error = %self, "Admin action rejected");
        }
    }

    /// The toast shown when `action` fails with this error.
    #[must_use]
    pub fn toast(&self, action: &str) -> Toast {
        match self {
            Self::App(err) => err.toast(action),
            Self::Forbidden => {
                Toast::destructive("Access denied").with_description(self.user_message())
            }
            Self::Validation(_) => Toast::destructive(format!("Could not {action}"))
                .with_description(self.user_message()),
        }
    }
}

/// Result type alias for `AdminError`.
pub type Result<T> = std::result::Result<T, AdminError>;
