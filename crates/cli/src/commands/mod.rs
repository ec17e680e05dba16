//! CLI command implementations.

pub mod cart;
pub mod migrate;
pub mod notify;
pub mod role;
pub mod seed;

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use kundura_admin::{AdminContext, AdminError};
use kundura_storefront::backend::{BackendError, DataApi, Filter, MemoryBackend};
use kundura_storefront::config::{BackendConfig, ConfigError};
use kundura_storefront::toast::TracingToaster;
use kundura_storefront::{AppError, SessionContext};

const MEMORY_OPERATOR: &str = "operator@kundura.local";

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    Admin(#[from] AdminError),

    /// Direct writes against the in-memory store.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The catalog file is malformed or inconsistent.
    #[error("Invalid catalog: {0}")]
    Catalog(String),
}

/// Where commands connect and who they act as.
#[derive(Debug, Clone)]
pub struct Account {
    memory: bool,
    email: Option<String>,
}

impl Account {
    /// `email` falls back to `KUNDURA_EMAIL`.
    #[must_use]
    pub fn new(memory: bool, email: Option<String>) -> Self {
        Self {
            memory,
            email: email.or_else(|| std::env::var("KUNDURA_EMAIL").ok()),
        }
    }

    /// A signed-in session.
    ///
    /// With `--memory` this is a fresh in-memory store holding one admin
    /// account; nothing written survives the process.
    ///
    /// # Errors
    ///
    /// Returns `CommandError` if configuration is missing or sign-in fails.
    pub async fn session(&self) -> Result<SessionContext, CommandError> {
        if self.memory {
            return self.memory_session().await;
        }

        let config = BackendConfig::from_env()?;
        info!(url = %config.url, "Connecting to backend");
        let session = kundura_storefront::connect(&config, Arc::new(TracingToaster)).await?;
        if session.current_user().is_none() {
            let email = self
                .email
                .clone()
                .ok_or(CommandError::MissingEnvVar("KUNDURA_EMAIL"))?;
            let password = std::env::var("KUNDURA_PASSWORD")
                .map(SecretString::from)
                .map_err(|_| CommandError::MissingEnvVar("KUNDURA_PASSWORD"))?;
            session.sign_in(&email, password.expose_secret()).await?;
        }
        Ok(session)
    }

    /// A session that has passed the admin check.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Admin` when the account is not an admin.
    pub async fn admin(&self) -> Result<AdminContext, CommandError> {
        let session = self.session().await?;
        Ok(AdminContext::require(&session).await?)
    }

    async fn memory_session(&self) -> Result<SessionContext, CommandError> {
        warn!("Using an in-memory store; changes are discarded on exit");
        let backend = MemoryBackend::storefront();
        let session = SessionContext::start(Arc::new(backend.clone()), Arc::new(TracingToaster)).await?;
        let email = self.email.as_deref().unwrap_or(MEMORY_OPERATOR);
        let user = session.sign_up(email, "operator", "Kundura", "Operator").await?;
        backend
            .update(
                "user_roles",
                json!({ "role": "admin" }),
                &[Filter::eq("user_id", user.id)],
            )
            .await?;
        Ok(session)
    }
}
