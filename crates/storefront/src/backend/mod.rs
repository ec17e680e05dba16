//! Hosted backend capabilities.
//!
//! Everything the storefront persists lives on the hosted platform. This
//! module describes the four capabilities consumed from it (auth, relational
//! data, object storage, realtime change feed) as traits, and ships two
//! implementations:
//!
//! - [`RestBackend`] - the platform itself over HTTPS and a websocket
//! - [`MemoryBackend`] - an in-process store for tests and offline demos
//!
//! Controllers only ever see `Arc<dyn Backend>`.

mod memory;
mod query;
mod realtime;
mod rest;

pub use memory::{MemoryBackend, TableDef};
pub use query::{Filter, Order, Query, Select, SelectItem};
pub use rest::RestBackend;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use kundura_core::{Email, Password, UserId};

/// A row as returned by the data API: a JSON object.
pub type Row = serde_json::Value;

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// A unique constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No session, or the session may not do this.
    #[error("Unauthorized")]
    Unauthorized,

    /// Email/password pair was rejected.
    #[error("Invalid login credentials")]
    InvalidCredentials,

    /// Rate limited by the platform.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Failed to decode a response or row.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Realtime socket failure.
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Backend could not be reached or is shutting down.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl BackendError {
    /// Whether this is a fault on the platform side rather than a rejected
    /// request. Only these are worth an error report.
    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        match self {
            Self::Http(_) | Self::Decode(_) | Self::Realtime(_) | Self::Unavailable(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Conflict(_)
            | Self::NotFound(_)
            | Self::Unauthorized
            | Self::InvalidCredentials
            | Self::RateLimited(_) => false,
        }
    }
}

// =============================================================================
// Auth
// =============================================================================

/// The signed-in user as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// Profile fields stored as user metadata at sign-up; the platform copies
/// them into `profiles`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileFields {
    pub first_name: String,
    pub last_name: String,
}

/// Session change delivered to `auth_events` subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthUser),
    SignedOut,
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_up(
        &self,
        email: &Email,
        password: &Password,
        profile: &ProfileFields,
    ) -> Result<AuthUser, BackendError>;

    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &Password,
    ) -> Result<AuthUser, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    async fn current_user(&self) -> Result<Option<AuthUser>, BackendError>;

    /// Subscribe to session changes. Events are only delivered for changes
    /// made after the call.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}

// =============================================================================
// Relational data
// =============================================================================

/// What to do when an insert hits a unique key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Conflict {
    /// Fail with [`BackendError::Conflict`].
    #[default]
    Error,
    /// Skip rows that already exist on `columns`; they are not returned.
    Ignore { columns: Vec<String> },
    /// Update rows that already exist on `columns` with the new values.
    Merge { columns: Vec<String> },
}

impl Conflict {
    #[must_use]
    pub fn ignore(columns: &[&str]) -> Self {
        Self::Ignore {
            columns: columns.iter().map(ToString::to_string).collect(),
        }
    }

    #[must_use]
    pub fn merge(columns: &[&str]) -> Self {
        Self::Merge {
            columns: columns.iter().map(ToString::to_string).collect(),
        }
    }

    /// The conflict target, if any.
    #[must_use]
    pub fn columns(&self) -> Option<&[String]> {
        match self {
            Self::Error => None,
            Self::Ignore { columns } | Self::Merge { columns } => Some(columns),
        }
    }
}

#[async_trait]
pub trait DataApi: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, BackendError>;

    /// Exact number of rows matching `filters`.
    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, BackendError>;

    /// Insert rows and return the ones actually written.
    async fn insert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict: Conflict,
    ) -> Result<Vec<Row>, BackendError>;

    /// Apply `patch` to every row matching `filters`; returns updated rows.
    async fn update(
        &self,
        table: &str,
        patch: Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, BackendError>;

    /// Delete every row matching `filters`; returns deleted rows.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError>;
}

// =============================================================================
// Object storage
// =============================================================================

#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Upload an object and return its public URL.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError>;
}

// =============================================================================
// Realtime
// =============================================================================

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The feed was interrupted; consumers should refetch what they hold.
    Resync,
}

impl ChangeKind {
    fn from_wire(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One row-level change on a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record: Option<Row>,
    pub old_record: Option<Row>,
}

impl ChangeEvent {
    #[must_use]
    pub fn resync(table: &str) -> Self {
        Self {
            table: table.to_string(),
            kind: ChangeKind::Resync,
            record: None,
            old_record: None,
        }
    }

    /// The `id` of the changed row, taken from the new record or, for
    /// deletes, the old one.
    #[must_use]
    pub fn row_id(&self) -> Option<String> {
        self.column("id")
    }

    /// A column of the changed row rendered as filter text.
    #[must_use]
    pub fn column(&self, column: &str) -> Option<String> {
        [self.record.as_ref(), self.old_record.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|row| row.get(column))
            .filter(|value| !value.is_null())
            .map(query::value_text)
    }
}

/// Which change kinds a binding listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    #[default]
    All,
    Insert,
    Update,
    Delete,
}

impl EventFilter {
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::All => "*",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    #[must_use]
    pub const fn accepts(self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (_, ChangeKind::Resync)
                | (Self::All, _)
                | (Self::Insert, ChangeKind::Insert)
                | (Self::Update, ChangeKind::Update)
                | (Self::Delete, ChangeKind::Delete)
        )
    }
}

/// One `postgres_changes` binding: an event mask and an optional
/// `column=eq.value` row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub events: EventFilter,
    pub filter: Option<(String, String)>,
}

impl Binding {
    /// Filter in the platform's `column=eq.value` syntax.
    #[must_use]
    pub fn filter_wire(&self) -> Option<String> {
        self.filter
            .as_ref()
            .map(|(column, value)| format!("{column}=eq.{value}"))
    }

    fn matches(&self, event: &ChangeEvent) -> bool {
        if !self.events.accepts(event.kind) {
            return false;
        }
        match &self.filter {
            None => true,
            Some((column, value)) => event.column(column).as_deref() == Some(value.as_str()),
        }
    }
}

/// What a realtime subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub table: String,
    pub bindings: Vec<Binding>,
}

impl ChannelSpec {
    /// Every change on `table`.
    #[must_use]
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            bindings: Vec::new(),
        }
    }

    /// Add a binding. A spec with no bindings receives every change.
    #[must_use]
    pub fn on(mut self, events: EventFilter, filter: Option<(&str, String)>) -> Self {
        self.bindings.push(Binding {
            events,
            filter: filter.map(|(column, value)| (column.to_string(), value)),
        });
        self
    }

    /// The bindings to send to the server, defaulting to "everything".
    #[must_use]
    pub fn effective_bindings(&self) -> Vec<Binding> {
        if self.bindings.is_empty() {
            vec![Binding {
                events: EventFilter::All,
                filter: None,
            }]
        } else {
            self.bindings.clone()
        }
    }

    /// Whether `event` should be delivered on this channel.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && self
                .effective_bindings()
                .iter()
                .any(|binding| binding.matches(event))
    }
}

/// A live change-feed subscription.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) leaves the channel.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            events,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Wait for the next change. `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(leave) = self.on_drop.take() {
            leave();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RealtimeApi: Send + Sync {
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscription, BackendError>;
}

/// Everything the storefront needs from the hosted platform.
pub trait Backend: AuthApi + DataApi + StorageApi + RealtimeApi {}

impl<T> Backend for T where T: AuthApi + DataApi + StorageApi + RealtimeApi {}

// =============================================================================
// Row helpers
// =============================================================================

/// Decode rows into a typed model.
///
/// # Errors
///
/// Returns [`BackendError::Decode`] if any row does not match `T`.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(BackendError::from))
        .collect()
}

/// Decode the first row, if any.
///
/// # Errors
///
/// Returns [`BackendError::Decode`] if the row does not match `T`.
pub fn decode_first<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Option<T>, BackendError> {
    rows.into_iter()
        .next()
        .map(serde_json::from_value)
        .transpose()
        .map_err(BackendError::from)
}
