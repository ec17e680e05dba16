//! Explicit session context.
//!
//! Who is signed in and which theme is active are held here, in one cheaply
//! cloned value handed to every controller, instead of in process globals.
//! The context follows the backend's auth events for its whole lifetime and
//! stops listening when the last clone is dropped.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument, warn};

use kundura_core::{AppRole, Email, Password, Theme};

use crate::backend::{AuthEvent, AuthUser, Backend, ProfileFields, Query, decode_first};
use crate::error::{AppError, Result, add_breadcrumb, clear_sentry_user, set_sentry_user};
use crate::sync::TaskGuard;
use crate::toast::{Toast, Toaster};

/// Shared, explicit state of one signed-in (or signed-out) client.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    backend: Arc<dyn Backend>,
    toaster: Arc<dyn Toaster>,
    user: Arc<watch::Sender<Option<AuthUser>>>,
    theme: watch::Sender<Theme>,
    _listener: TaskGuard,
}

#[derive(Deserialize)]
struct RoleRow {
    role: AppRole,
}

impl SessionContext {
    /// Query the current user once, then follow auth events.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the current user cannot be read.
    pub async fn start(backend: Arc<dyn Backend>, toaster: Arc<dyn Toaster>) -> Result<Self> {
        // Subscribe before reading so no change falls between the two
        let events = backend.auth_events();
        let current = backend.current_user().await?;
        if let Some(user) = &current {
            set_sentry_user(&user.id, user.email.as_deref());
        }

        let (user, _) = watch::channel(current);
        let user = Arc::new(user);
        let listener = TaskGuard::spawn(follow_auth_events(
            Arc::clone(&backend),
            Arc::clone(&user),
            events,
        ));
        let (theme, _) = watch::channel(Theme::default());

        Ok(Self {
            inner: Arc::new(SessionInner {
                backend,
                toaster,
                user,
                theme,
                _listener: listener,
            }),
        })
    }

    #[must_use]
    pub fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    #[must_use]
    pub fn backend_handle(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.inner.backend)
    }

    pub fn toast(&self, toast: Toast) {
        self.inner.toaster.show(toast);
    }

    /// Report a failed action: log it, toast it, and hand the error back.
    pub(crate) fn fail<T>(&self, action: &str, err: impl Into<AppError>) -> Result<T> {
        let err = err.into();
        err.report(action);
        self.toast(err.toast(action));
        Err(err)
    }

    #[must_use]
    pub fn current_user(&self) -> Option<AuthUser> {
        self.inner.user.borrow().clone()
    }

    /// The signed-in user, or [`AppError::Unauthenticated`].
    ///
    /// # Errors
    ///
    /// Fails when nobody is signed in.
    pub fn require_user(&self) -> Result<AuthUser> {
        self.current_user().ok_or(AppError::Unauthenticated)
    }

    /// Like [`Self::require_user`], but also tells the user why the action
    /// did nothing.
    pub(crate) fn require_user_for(&self, action: &str) -> Result<AuthUser> {
        match self.current_user() {
            Some(user) => Ok(user),
            None => self.fail(action, AppError::Unauthenticated),
        }
    }

    #[must_use]
    pub fn watch_user(&self) -> watch::Receiver<Option<AuthUser>> {
        self.inner.user.subscribe()
    }

    /// Create an account and sign in.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for a malformed email or a password
    /// shorter than six characters, and [`AppError::Backend`] when the
    /// platform rejects the sign-up.
    #[instrument(skip(self, password))]
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<AuthUser> {
        const ACTION: &str = "create account";
        let email = match Email::parse(email) {
            Ok(email) => email,
            Err(e) => return self.fail(ACTION, e),
        };
        let password = match Password::new(password) {
            Ok(password) => password,
            Err(e) => return self.fail(ACTION, e),
        };
        let profile = ProfileFields {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
        };

        match self.backend().sign_up(&email, &password, &profile).await {
            Ok(user) => {
                self.publish_user(Some(user.clone()));
                info!(user_id = %user.id, "Account created");
                self.toast(Toast::success("Account created").with_description("Welcome to Kundura!"));
                Ok(user)
            }
            Err(e) => self.fail(ACTION, e),
        }
    }

    /// Sign in with email and password. Banned accounts are signed straight
    /// back out.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Banned`] for suspended accounts and
    /// [`AppError::Backend`] for rejected credentials.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        const ACTION: &str = "sign in";
        let email = match Email::parse(email) {
            Ok(email) => email,
            Err(e) => return self.fail(ACTION, e),
        };
        // Length rules apply at sign-up only; any non-empty password may be tried
        let password = match Password::new(password) {
            Ok(password) => password,
            Err(_) => {
                return self.fail(
                    ACTION,
                    AppError::Backend(crate::backend::BackendError::InvalidCredentials),
                );
            }
        };

        let user = match self.backend().sign_in_with_password(&email, &password).await {
            Ok(user) => user,
            Err(e) => return self.fail(ACTION, e),
        };

        match self.role_of(&user).await {
            Ok(AppRole::Banned) => {
                if let Err(e) = self.backend().sign_out().await {
                    warn!(error = %e, "Sign-out of banned account failed");
                }
                self.publish_user(None);
                return self.fail(ACTION, AppError::Banned);
            }
            Ok(_) => {}
            // Role lookup failure does not block signing in
            Err(e) => warn!(user_id = %user.id, error = %e, "Role lookup failed"),
        }

        self.publish_user(Some(user.clone()));
        add_breadcrumb("auth", "Signed in", None);
        self.toast(Toast::success("Signed in").with_description("Welcome back!"));
        Ok(user)
    }

    /// Tear the session down.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the platform logout fails; the local
    /// session is cleared either way.
    pub async fn sign_out(&self) -> Result<()> {
        let outcome = self.backend().sign_out().await;
        self.publish_user(None);
        match outcome {
            Ok(()) => {
                self.toast(Toast::success("Signed out"));
                Ok(())
            }
            Err(e) => self.fail("sign out", e),
        }
    }

    /// Role of the signed-in user; `user` when no role row exists.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unauthenticated`] when signed out.
    pub async fn role(&self) -> Result<AppRole> {
        let user = self.require_user()?;
        self.role_of(&user).await
    }

    pub async fn is_admin(&self) -> bool {
        self.role().await.is_ok_and(AppRole::is_admin)
    }

    async fn role_of(&self, user: &AuthUser) -> Result<AppRole> {
        let rows = self
            .backend()
            .select(
                &Query::table("user_roles")
                    .select("role")
                    .eq("user_id", user.id)
                    .limit(1),
            )
            .await?;
        Ok(decode_first::<RoleRow>(rows)?.map_or(AppRole::User, |row| row.role))
    }

    #[must_use]
    pub fn theme(&self) -> Theme {
        *self.inner.theme.borrow()
    }

    pub fn set_theme(&self, theme: Theme) {
        self.inner.theme.send_replace(theme);
    }

    /// Flip between light and dark; returns the new theme.
    pub fn toggle_theme(&self) -> Theme {
        let mut next = Theme::default();
        self.inner.theme.send_modify(|theme| {
            *theme = theme.toggled();
            next = *theme;
        });
        next
    }

    #[must_use]
    pub fn watch_theme(&self) -> watch::Receiver<Theme> {
        self.inner.theme.subscribe()
    }

    fn publish_user(&self, user: Option<AuthUser>) {
        publish(&self.inner.user, user);
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user", &self.current_user().map(|u| u.id))
            .field("theme", &self.theme())
            .finish_non_exhaustive()
    }
}

/// Store `next` and notify watchers only if the signed-in identity changed.
fn publish(sender: &watch::Sender<Option<AuthUser>>, next: Option<AuthUser>) -> bool {
    let changed = sender.send_if_modified(|current| {
        if current.as_ref().map(|u| u.id) == next.as_ref().map(|u| u.id) {
            return false;
        }
        current.clone_from(&next);
        true
    });
    if changed {
        match &next {
            Some(user) => set_sentry_user(&user.id, user.email.as_deref()),
            None => clear_sentry_user(),
        }
    }
    changed
}

async fn follow_auth_events(
    backend: Arc<dyn Backend>,
    user: Arc<watch::Sender<Option<AuthUser>>>,
    mut events: broadcast::Receiver<AuthEvent>,
) {
    loop {
        match events.recv().await {
            Ok(AuthEvent::SignedIn(signed_in)) => {
                publish(&user, Some(signed_in));
            }
            Ok(AuthEvent::SignedOut) => {
                publish(&user, None);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Auth events lagged, re-reading current user");
                match backend.current_user().await {
                    Ok(current) => {
                        publish(&user, current);
                    }
                    Err(e) => warn!(error = %e, "Failed to re-read current user"),
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
