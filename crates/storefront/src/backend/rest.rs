//! Client for the hosted backend platform.
//!
//! Talks to three HTTP services under one project URL and one realtime
//! websocket:
//!
//! - `/auth/v1` - password sign-up/sign-in, token refresh, logout
//! - `/rest/v1` - table reads and writes (query-string filters)
//! - `/storage/v1` - object upload with public URLs
//! - `/realtime/v1/websocket` - row change feed (see `realtime.rs`)
//!
//! Every request carries the project's public API key; requests made while
//! signed in also carry the user's access token, refreshed shortly before
//! it expires.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, instrument, warn};
use url::Url;

use kundura_core::{Email, Password};

use super::realtime::RealtimeClient;
use super::{
    AuthApi, AuthEvent, AuthUser, BackendError, ChannelSpec, Conflict, DataApi, Filter,
    ProfileFields, Query, RealtimeApi, Row, StorageApi, Subscription,
};
use crate::config::BackendConfig;

/// Refresh the access token when it expires within this window.
const REFRESH_MARGIN: TimeDelta = TimeDelta::seconds(60);

struct AuthSession {
    access_token: SecretString,
    refresh_token: SecretString,
    expires_at: DateTime<Utc>,
    user: AuthUser,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: AuthUser,
}

impl From<TokenResponse> for AuthSession {
    fn from(token: TokenResponse) -> Self {
        Self {
            access_token: SecretString::from(token.access_token),
            refresh_token: SecretString::from(token.refresh_token),
            expires_at: Utc::now() + TimeDelta::seconds(token.expires_in),
            user: token.user,
        }
    }
}

/// Hosted backend client.
///
/// Cheap to clone; clones share the HTTP pool, the session and the realtime
/// socket.
#[derive(Clone)]
pub struct RestBackend {
    inner: Arc<RestBackendInner>,
}

struct RestBackendInner {
    client: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
    realtime: RealtimeClient,
}

impl RestBackend {
    /// Create a new backend client.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(config.anon_key.expose_secret())
                .map_err(|e| BackendError::Decode(format!("Invalid API key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        let mut realtime_url = config.realtime_url();
        realtime_url
            .query_pairs_mut()
            .append_pair("apikey", config.anon_key.expose_secret());

        let (events, _) = broadcast::channel(16);

        Ok(Self {
            inner: Arc::new(RestBackendInner {
                client,
                base_url: config.url.clone(),
                anon_key: config.anon_key.clone(),
                session: RwLock::new(None),
                events,
                realtime: RealtimeClient::new(realtime_url, config.heartbeat_interval),
            }),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|e| BackendError::Decode(format!("Invalid endpoint {path}: {e}")))
    }

    fn table_url(&self, table: &str, params: &[(String, String)]) -> Result<Url, BackendError> {
        let mut url = self.endpoint(&format!("/rest/v1/{table}"))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Bearer token for the next request: the user's access token, refreshed
    /// if close to expiry, or the public key when signed out.
    async fn bearer(&self) -> Result<String, BackendError> {
        {
            let session = self.inner.session.read().await;
            match session.as_ref() {
                None => return Ok(self.inner.anon_key.expose_secret().to_string()),
                Some(session) if session.expires_at - Utc::now() > REFRESH_MARGIN => {
                    return Ok(session.access_token.expose_secret().to_string());
                }
                Some(_) => {}
            }
        }
        self.refresh_session().await
    }

    #[instrument(skip(self))]
    async fn refresh_session(&self) -> Result<String, BackendError> {
        let mut session = self.inner.session.write().await;
        let Some(current) = session.as_ref() else {
            return Ok(self.inner.anon_key.expose_secret().to_string());
        };
        // Another request may have refreshed while we waited for the lock
        if current.expires_at - Utc::now() > REFRESH_MARGIN {
            return Ok(current.access_token.expose_secret().to_string());
        }

        let mut url = self.endpoint("/auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "refresh_token");
        let response = self
            .inner
            .client
            .post(url)
            .json(&json!({ "refresh_token": current.refresh_token.expose_secret() }))
            .send()
            .await?;

        match self.handle_response::<TokenResponse>(response).await {
            Ok(token) => {
                debug!(user_id = %token.user.id, "Access token refreshed");
                let fresh = AuthSession::from(token);
                let access = fresh.access_token.expose_secret().to_string();
                *session = Some(fresh);
                Ok(access)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, signing out");
                *session = None;
                let _ = self.inner.events.send(AuthEvent::SignedOut);
                Err(BackendError::Unauthorized)
            }
        }
    }

    async fn store_session(&self, token: TokenResponse) -> AuthUser {
        let session = AuthSession::from(token);
        let user = session.user.clone();
        *self.inner.session.write().await = Some(session);
        let _ = self.inner.events.send(AuthEvent::SignedIn(user.clone()));
        user
    }

    async fn access_token(&self) -> Option<String> {
        if self.inner.session.read().await.is_none() {
            return None;
        }
        self.bearer().await.ok()
    }

    /// Handle API response and parse JSON.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| BackendError::Decode(format!("Failed to parse response: {e}")));
        }

        Err(self.parse_error(response).await)
    }

    /// Parse an error response from any of the platform services.
    async fn parse_error(&self, response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return BackendError::RateLimited(retry_after);
        }

        if status == 401 || status == 403 {
            return BackendError::Unauthorized;
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = error_message(&body);

        match status {
            404 => BackendError::NotFound(message),
            // 23505 is the unique_violation SQLSTATE
            409 => BackendError::Conflict(message),
            _ if body.contains("\"23505\"") => BackendError::Conflict(message),
            _ => BackendError::Api { status, message },
        }
    }

    async fn send_rows(&self, request: reqwest::RequestBuilder) -> Result<Vec<Row>, BackendError> {
        let response = request
            .bearer_auth(self.bearer().await?)
            .header("Prefer", "return=representation")
            .send()
            .await?;
        self.handle_response(response).await
    }
}

/// Pull the human-readable message out of an error body. The services use
/// `message`, `msg` and `error_description` respectively.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(String::from))
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit_once('/').and_then(|(_, total)| total.parse().ok())
}

fn prefer_for(conflict: &Conflict) -> &'static str {
    match conflict {
        Conflict::Error => "return=representation",
        Conflict::Ignore { .. } => "return=representation,resolution=ignore-duplicates",
        Conflict::Merge { .. } => "return=representation,resolution=merge-duplicates",
    }
}

#[async_trait]
impl AuthApi for RestBackend {
    #[instrument(skip(self, email, password, profile), fields(email = %email))]
    async fn sign_up(
        &self,
        email: &Email,
        password: &Password,
        profile: &ProfileFields,
    ) -> Result<AuthUser, BackendError> {
        let response = self
            .inner
            .client
            .post(self.endpoint("/auth/v1/signup")?)
            .json(&json!({
                "email": email.as_str(),
                "password": password.expose(),
                "data": profile,
            }))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 400 || status == 422 {
            let message = error_message(&response.text().await.unwrap_or_default());
            return Err(if message.to_lowercase().contains("already registered") {
                BackendError::Conflict(message)
            } else {
                BackendError::Api { status, message }
            });
        }

        let body: Value = self.handle_response(response).await?;
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            Ok(self.store_session(token).await)
        } else {
            // Email confirmation pending: a user but no session yet
            let user = body.get("user").cloned().unwrap_or(body);
            Ok(serde_json::from_value(user)?)
        }
    }

    #[instrument(skip(self, email, password), fields(email = %email))]
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &Password,
    ) -> Result<AuthUser, BackendError> {
        let mut url = self.endpoint("/auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let response = self
            .inner
            .client
            .post(url)
            .json(&json!({ "email": email.as_str(), "password": password.expose() }))
            .send()
            .await?;

        if response.status().as_u16() == 400 {
            return Err(BackendError::InvalidCredentials);
        }

        let token: TokenResponse = self.handle_response(response).await?;
        Ok(self.store_session(token).await)
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), BackendError> {
        let Some(session) = self.inner.session.write().await.take() else {
            return Ok(());
        };
        let _ = self.inner.events.send(AuthEvent::SignedOut);

        let response = self
            .inner
            .client
            .post(self.endpoint("/auth/v1/logout")?)
            .bearer_auth(session.access_token.expose_secret())
            .send()
            .await?;
        if response.status().is_success() || response.status().as_u16() == 401 {
            return Ok(());
        }
        Err(self.parse_error(response).await)
    }

    async fn current_user(&self) -> Result<Option<AuthUser>, BackendError> {
        if self.inner.session.read().await.is_none() {
            return Ok(None);
        }
        let token = match self.bearer().await {
            Ok(token) => token,
            Err(BackendError::Unauthorized) => return Ok(None),
            Err(e) => return Err(e),
        };

        let response = self
            .inner
            .client
            .get(self.endpoint("/auth/v1/user")?)
            .bearer_auth(token)
            .send()
            .await?;
        match self.handle_response::<AuthUser>(response).await {
            Ok(user) => Ok(Some(user)),
            Err(BackendError::Unauthorized) => {
                *self.inner.session.write().await = None;
                let _ = self.inner.events.send(AuthEvent::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }
}

#[async_trait]
impl DataApi for RestBackend {
    #[instrument(skip(self, query), fields(table = %query.table))]
    async fn select(&self, query: &Query) -> Result<Vec<Row>, BackendError> {
        let url = self.table_url(&query.table, &query.to_params())?;
        let response = self
            .inner
            .client
            .get(url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        self.handle_response(response).await
    }

    #[instrument(skip(self, filters))]
    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, BackendError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filters.iter().map(Filter::to_param));
        let response = self
            .inner
            .client
            .head(self.table_url(table, &params)?)
            .bearer_auth(self.bearer().await?)
            .header("Prefer", "count=exact")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.parse_error(response).await);
        }

        response
            .headers()
            .get("Content-Range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| BackendError::Decode("missing Content-Range total".to_string()))
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn insert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict: Conflict,
    ) -> Result<Vec<Row>, BackendError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<(String, String)> = conflict
            .columns()
            .map(|columns| vec![("on_conflict".to_string(), columns.join(","))])
            .unwrap_or_default();

        let response = self
            .inner
            .client
            .post(self.table_url(table, &params)?)
            .bearer_auth(self.bearer().await?)
            .header("Prefer", prefer_for(&conflict))
            .json(&rows)
            .send()
            .await?;
        self.handle_response(response).await
    }

    #[instrument(skip(self, patch, filters))]
    async fn update(
        &self,
        table: &str,
        patch: Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, BackendError> {
        let params: Vec<(String, String)> = filters.iter().map(Filter::to_param).collect();
        let request = self
            .inner
            .client
            .patch(self.table_url(table, &params)?)
            .json(&patch);
        self.send_rows(request).await
    }

    #[instrument(skip(self, filters))]
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError> {
        let params: Vec<(String, String)> = filters.iter().map(Filter::to_param).collect();
        let request = self.inner.client.delete(self.table_url(table, &params)?);
        self.send_rows(request).await
    }
}

#[async_trait]
impl StorageApi for RestBackend {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let response = self
            .inner
            .client
            .post(self.endpoint(&format!("/storage/v1/object/{bucket}/{key}"))?)
            .bearer_auth(self.bearer().await?)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.parse_error(response).await);
        }

        Ok(self
            .endpoint(&format!("/storage/v1/object/public/{bucket}/{key}"))?
            .to_string())
    }
}

#[async_trait]
impl RealtimeApi for RestBackend {
    #[instrument(skip(self, spec), fields(table = %spec.table))]
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscription, BackendError> {
        let token = self.access_token().await;
        self.inner.realtime.subscribe(spec, token)
    }
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
    }

    #[test]
    fn test_error_message_variants() {
        assert_eq!(
            error_message(r#"{"code":"23505","message":"duplicate key value"}"#),
            "duplicate key value"
        );
        assert_eq!(error_message(r#"{"msg":"User already registered"}"#), "User already registered");
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message("plain text"), "plain text");
    }

    #[test]
    fn test_prefer_headers() {
        assert_eq!(prefer_for(&Conflict::Error), "return=representation");
        assert!(prefer_for(&Conflict::ignore(&["user_id"])).ends_with("ignore-duplicates"));
        assert!(prefer_for(&Conflict::merge(&["user_id"])).ends_with("merge-duplicates"));
    }

    fn backend() -> RestBackend {
        let config = BackendConfig::new(
            Url::parse("https://abcd.supabase.co").unwrap(),
            SecretString::from("eyJhbGciOiJIUzI1NiJ9.k3Jd9xQ2vLmP7rT0uW4zC6"),
        );
        RestBackend::new(&config).unwrap()
    }

    #[test]
    fn test_table_url_encodes_filters() {
        let query = Query::table("cart_items")
            .select("*, products(name)")
            .eq("user_id", "u1")
            .order_desc("created_at");
        let url = backend().table_url("cart_items", &query.to_params()).unwrap();
        assert_eq!(url.path(), "/rest/v1/cart_items");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, query.to_params());
    }

    #[tokio::test]
    async fn test_signed_out_bearer_is_public_key() {
        let backend = backend();
        assert_eq!(
            backend.bearer().await.unwrap(),
            "eyJhbGciOiJIUzI1NiJ9.k3Jd9xQ2vLmP7rT0uW4zC6"
        );
        assert!(backend.current_user().await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires SUPABASE_URL and SUPABASE_ANON_KEY for a live project"]
    async fn test_live_anonymous_catalog_read() {
        let config = BackendConfig::from_env().unwrap();
        let backend = RestBackend::new(&config).unwrap();
        let rows = backend
            .select(&Query::table("brands").order_asc("name").limit(1))
            .await
            .unwrap();
        assert!(rows.len() <= 1);
    }
}
