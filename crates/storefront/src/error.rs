//! Controller-boundary error handling with Sentry integration.
//!
//! Every controller operation returns `Result<T, AppError>`. Remote failures
//! are caught here, logged, captured to Sentry when they are platform faults,
//! and turned into a toast whose text never exposes internals.

use thiserror::Error;

use kundura_core::{EmailError, PasswordError, QuantityError};

use crate::backend::BackendError;
use crate::toast::Toast;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// A session is required and there is none.
    #[error("Sign in required")]
    Unauthenticated,

    /// The signed-in account has the `banned` role.
    #[error("Account suspended")]
    Banned,

    /// Backend operation failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Input rejected before any remote call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<QuantityError> for AppError {
    fn from(err: QuantityError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl AppError {
    /// Text safe to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthenticated => "Please sign in to continue.".to_string(),
            Self::Banned => "Your account has been suspended.".to_string(),
            Self::Backend(err) => match err {
                BackendError::InvalidCredentials => "Invalid email or password.".to_string(),
                BackendError::Conflict(_) => "This already exists.".to_string(),
                BackendError::Unauthorized => "You are not allowed to do that.".to_string(),
                BackendError::RateLimited(_) => {
                    "Too many requests, please try again shortly.".to_string()
                }
                BackendError::NotFound(_) => "Not found.".to_string(),
                _ => "Something went wrong, please try again.".to_string(),
            },
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(what) => format!("{what} not found."),
        }
    }

    /// Whether the failure is ours (or the platform's) rather than the user's.
    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        match self {
            Self::Backend(err) => err.is_server_fault(),
            Self::Unauthenticated | Self::Banned | Self::Validation(_) | Self::NotFound(_) => false,
        }
    }

    /// Log the error (and capture platform faults) for `action`.
    pub fn report(&self, action: &str) {
        if self.is_server_fault() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                action,
                error = %self,
                sentry_event_id = %event_id,
                "Action failed"
            );
        } else {
            tracing::warn!(action, error = %self, "Action rejected");
        }
    }

    /// The toast shown when `action` fails with this error.
    #[must_use]
    pub fn toast(&self, action: &str) -> Toast {
        let toast = match self {
            // Blocks the action only; not an error on the user's part
            Self::Unauthenticated => Toast::notice("Sign in required"),
            Self::Banned => Toast::destructive("Account suspended"),
            _ => Toast::destructive(format!("Could not {action}")),
        };
        toast.with_description(self.user_message())
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on sign-out to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added to cart", Some(&[("product_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
