//! Site-wide settings.
//!
//! Settings are key/value rows in `site_settings`. Reads go through a
//! short-lived cache since every page header asks for the logo.

use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use kundura_storefront::SessionContext;
use kundura_storefront::backend::{BackendError, Conflict, Query, decode_first};

use crate::context::AdminContext;
use crate::error::{AdminError, Result};

const TABLE: &str = "site_settings";
const SITE_LOGO: &str = "site_logo";
const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize, Deserialize)]
struct SettingRow {
    key: String,
    value: Option<String>,
}

/// Reads settings for any visitor.
#[derive(Clone)]
pub struct SiteSettings {
    session: SessionContext,
    cache: Cache<String, Option<String>>,
}

impl std::fmt::Debug for SiteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteSettings")
            .field("cached", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl SiteSettings {
    #[must_use]
    pub fn new(session: &SessionContext) -> Self {
        Self {
            session: session.clone(),
            cache: Cache::builder()
                .max_capacity(64)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// URL of the site logo, if one is set.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the setting cannot be read.
    pub async fn site_logo(&self) -> std::result::Result<Option<String>, BackendError> {
        self.get(SITE_LOGO).await
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, BackendError> {
        if let Some(value) = self.cache.get(key).await {
            debug!("Setting cache hit");
            return Ok(value);
        }

        let query = Query::table(TABLE).eq("key", key).limit(1);
        let row: Option<SettingRow> = decode_first(self.session.backend().select(&query).await?)?;
        let value = row.and_then(|row| row.value).filter(|v| !v.is_empty());
        self.cache.insert(key.to_string(), value.clone()).await;
        Ok(value)
    }

    async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }
}

/// Changes settings. Admin only.
#[derive(Debug, Clone)]
pub struct SettingsAdmin {
    ctx: AdminContext,
    settings: SiteSettings,
}

impl SettingsAdmin {
    /// Edit through `settings` so its cache sees the change at once.
    #[must_use]
    pub fn new(ctx: &AdminContext, settings: &SiteSettings) -> Self {
        Self {
            ctx: ctx.clone(),
            settings: settings.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns the backend error if the setting cannot be read.
    pub async fn site_logo(&self) -> Result<Option<String>> {
        match self.settings.site_logo().await {
            Ok(logo) => Ok(logo),
            Err(e) => self.ctx.fail("load settings", e),
        }
    }

    /// Set the logo URL (usually fresh from an upload).
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] for a blank URL, or the backend
    /// error.
    pub async fn set_site_logo(&self, url: &str) -> Result<()> {
        const ACTION: &str = "save logo";
        let url = url.trim();
        if url.is_empty() {
            return self
                .ctx
                .fail(ACTION, AdminError::Validation("Logo URL is required".to_string()));
        }
        self.set(ACTION, SITE_LOGO, url).await?;
        self.ctx.succeed("Logo updated");
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn set(&self, action: &str, key: &str, value: &str) -> Result<()> {
        let row = SettingRow {
            key: key.to_string(),
            value: Some(value.to_string()),
        };
        let written = self
            .ctx
            .insert(action, TABLE, &row, Conflict::merge(&["key"]))
            .await;
        // Drop the cached value even on failure; the next read decides
        self.settings.invalidate(key).await;
        written.map(|_| ())
    }
}
