//! In-process backend.
//!
//! Behaves like the hosted platform for everything the storefront relies on:
//! unique keys are enforced for plain, ignore and merge inserts, embedded
//! selects follow declared relations, every write is pushed to matching
//! realtime subscribers, and sign-up creates the `profiles` and `user_roles`
//! rows the platform's trigger would.
//!
//! One store can serve many clients. [`MemoryBackend::connect`] returns a new
//! client (its own session, as a second browser would have) on the same data.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use kundura_core::{Email, Password, UserId};

use super::query::value_text;
use super::{
    AuthApi, AuthEvent, AuthUser, BackendError, ChangeEvent, ChangeKind, ChannelSpec, Conflict,
    DataApi, Filter, ProfileFields, Query, RealtimeApi, Row, Select, StorageApi, Subscription,
};

type Object = Map<String, Value>;

#[derive(Debug, Clone)]
enum Relation {
    BelongsTo {
        name: String,
        foreign_key: String,
    },
    HasMany {
        name: String,
        foreign_key: String,
    },
}

impl Relation {
    fn name(&self) -> &str {
        match self {
            Self::BelongsTo { name, .. } | Self::HasMany { name, .. } => name,
        }
    }
}

/// Declaration of one table: unique keys, column defaults and the relations
/// embedded selects may follow. Every table has an `id` key and a
/// `created_at` timestamp.
#[derive(Debug, Clone)]
pub struct TableDef {
    name: String,
    unique: Vec<Vec<String>>,
    defaults: Vec<(String, Value)>,
    relations: Vec<Relation>,
}

impl TableDef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            unique: vec![vec!["id".to_string()]],
            defaults: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Declare a unique key.
    #[must_use]
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique
            .push(columns.iter().map(ToString::to_string).collect());
        self
    }

    /// Column default applied when an insert omits the column.
    #[must_use]
    pub fn default(mut self, column: &str, value: Value) -> Self {
        self.defaults.push((column.to_string(), value));
        self
    }

    /// `foreign_key` on this table points at `id` of table `target`.
    #[must_use]
    pub fn belongs_to(mut self, target: &str, foreign_key: &str) -> Self {
        self.relations.push(Relation::BelongsTo {
            name: target.to_string(),
            foreign_key: foreign_key.to_string(),
        });
        self
    }

    /// Rows of table `target` whose `foreign_key` is this table's `id`.
    #[must_use]
    pub fn has_many(mut self, target: &str, foreign_key: &str) -> Self {
        self.relations.push(Relation::HasMany {
            name: target.to_string(),
            foreign_key: foreign_key.to_string(),
        });
        self
    }

    fn has_unique(&self, columns: &[String]) -> bool {
        self.unique.iter().any(|key| {
            key.len() == columns.len() && key.iter().all(|column| columns.contains(column))
        })
    }

    fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.name() == name)
    }
}

struct Table {
    def: TableDef,
    rows: Vec<Object>,
}

struct MemoryUser {
    id: UserId,
    email: Email,
    password: SecretString,
}

struct Subscriber {
    spec: ChannelSpec,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Store {
    tables: HashMap<String, Table>,
    users: Vec<MemoryUser>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscriber: u64,
    objects: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    clock: Option<DateTime<Utc>>,
}

/// In-memory implementation of every backend capability.
#[derive(Clone)]
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
    session: Arc<Mutex<Option<AuthUser>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// An empty store with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(Arc::new(Mutex::new(Store::default())))
    }

    fn with_store(store: Arc<Mutex<Store>>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            session: Arc::new(Mutex::new(None)),
            events,
        }
    }

    /// A store declared with the full storefront schema.
    #[must_use]
    pub fn storefront() -> Self {
        Self::new()
            .with_table(TableDef::new("profiles"))
            .with_table(
                TableDef::new("user_roles")
                    .unique(&["user_id"])
                    .default("role", json!("user")),
            )
            .with_table(TableDef::new("brands"))
            .with_table(
                TableDef::new("products")
                    .default("is_featured", json!(false))
                    .default("description", Value::Null)
                    .default("brand_id", Value::Null)
                    .belongs_to("brands", "brand_id")
                    .has_many("product_images", "product_id")
                    .has_many("product_sizes", "product_id"),
            )
            .with_table(
                TableDef::new("product_images")
                    .default("is_primary", json!(false))
                    .default("display_order", json!(0))
                    .belongs_to("products", "product_id"),
            )
            .with_table(
                TableDef::new("product_sizes")
                    .unique(&["product_id", "size"])
                    .default("stock", json!(0)),
            )
            .with_table(
                TableDef::new("cart_items")
                    .unique(&["user_id", "product_id", "size"])
                    .default("quantity", json!(1))
                    .belongs_to("products", "product_id"),
            )
            .with_table(
                TableDef::new("favorites")
                    .unique(&["user_id", "product_id"])
                    .belongs_to("products", "product_id"),
            )
            .with_table(TableDef::new("notifications").default("is_read", json!(false)))
            .with_table(
                TableDef::new("product_views")
                    .unique(&["product_id", "session_id"])
                    .default("user_id", Value::Null),
            )
            .with_table(
                TableDef::new("reviews")
                    .default("is_approved", json!(false))
                    .default("comment", Value::Null)
                    .belongs_to("products", "product_id")
                    .belongs_to("profiles", "user_id"),
            )
            .with_table(
                TableDef::new("slider_items")
                    .default("is_active", json!(true))
                    .default("display_order", json!(0)),
            )
            .with_table(TableDef::new("site_settings").unique(&["key"]))
    }

    /// Declare a table.
    #[must_use]
    pub fn with_table(self, def: TableDef) -> Self {
        if let Ok(mut store) = self.store.lock() {
            store.tables.insert(
                def.name.clone(),
                Table {
                    def,
                    rows: Vec::new(),
                },
            );
        }
        self
    }

    /// A new client on the same data, signed out.
    #[must_use]
    pub fn connect(&self) -> Self {
        Self::with_store(Arc::clone(&self.store))
    }

    /// Make every data operation on `table` fail until [`Self::heal_table`].
    pub fn fail_table(&self, table: &str) {
        if let Ok(mut store) = self.store.lock() {
            store.failing.insert(table.to_string());
        }
    }

    pub fn heal_table(&self, table: &str) {
        if let Ok(mut store) = self.store.lock() {
            store.failing.remove(table);
        }
    }

    /// Number of live realtime subscriptions across all clients.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.store
            .lock()
            .map(|store| store.subscribers.len())
            .unwrap_or_default()
    }

    /// Every row of `table`, unprojected.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.store
            .lock()
            .ok()
            .and_then(|store| {
                store
                    .tables
                    .get(table)
                    .map(|t| t.rows.iter().cloned().map(Value::Object).collect())
            })
            .unwrap_or_default()
    }

    /// Bytes of a stored object.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.store
            .lock()
            .ok()
            .and_then(|store| store.objects.get(&format!("{bucket}/{key}")).cloned())
    }

    fn store(&self) -> Result<MutexGuard<'_, Store>, BackendError> {
        self.store
            .lock()
            .map_err(|_| BackendError::Unavailable("memory store poisoned".to_string()))
    }

    fn set_session(&self, user: Option<AuthUser>) -> Result<(), BackendError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| BackendError::Unavailable("memory session poisoned".to_string()))?;
        let changed = session.as_ref().map(|u| u.id) != user.as_ref().map(|u| u.id);
        session.clone_from(&user);
        drop(session);

        if changed {
            let event = user.map_or(AuthEvent::SignedOut, AuthEvent::SignedIn);
            let _ = self.events.send(event);
        }
        Ok(())
    }
}

impl Store {
    fn next_timestamp(&mut self) -> String {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn table(&self, name: &str) -> Result<&Table, BackendError> {
        if self.failing.contains(name) {
            return Err(BackendError::Api {
                status: 503,
                message: format!("injected failure on {name}"),
            });
        }
        self.tables
            .get(name)
            .ok_or_else(|| BackendError::NotFound(format!("relation \"{name}\" does not exist")))
    }

    fn publish(&mut self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        self.subscribers.retain(|_, subscriber| {
            events
                .iter()
                .filter(|event| subscriber.spec.matches(event))
                .all(|event| subscriber.events.send(event.clone()).is_ok())
        });
    }

    fn project(&self, def: &TableDef, row: &Object, select: &Select) -> Result<Value, BackendError> {
        let mut out = if select.is_all() {
            row.clone()
        } else {
            select
                .columns()
                .map(|column| {
                    (
                        column.to_string(),
                        row.get(column).cloned().unwrap_or(Value::Null),
                    )
                })
                .collect()
        };

        for (name, nested) in select.embeds() {
            let relation = def.relation(name).ok_or_else(|| BackendError::Api {
                status: 400,
                message: format!(
                    "Could not find a relationship between '{}' and '{name}'",
                    def.name
                ),
            })?;
            let target = self.table(name)?;
            let value = match relation {
                Relation::BelongsTo { foreign_key, .. } => {
                    let key = row.get(foreign_key).filter(|v| !v.is_null());
                    match key.and_then(|key| {
                        target
                            .rows
                            .iter()
                            .find(|candidate| candidate.get("id") == Some(key))
                    }) {
                        Some(parent) => self.project(&target.def, parent, nested)?,
                        None => Value::Null,
                    }
                }
                Relation::HasMany { foreign_key, .. } => {
                    let id = row.get("id");
                    let children = target
                        .rows
                        .iter()
                        .filter(|child| id.is_some() && child.get(foreign_key) == id)
                        .map(|child| self.project(&target.def, child, nested))
                        .collect::<Result<Vec<_>, _>>()?;
                    Value::Array(children)
                }
            };
            out.insert(name.to_string(), value);
        }

        Ok(Value::Object(out))
    }
}

fn matches_all(row: &Object, filters: &[Filter]) -> bool {
    let row = Value::Object(row.clone());
    filters.iter().all(|filter| filter.matches(&row))
}

/// Order like Postgres: numbers numerically, text lexically, nulls last.
fn compare(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
    }
}

/// The unique key (if any) on which `row` collides with a row in `rows`,
/// with that row's index. NULLs never collide.
fn find_clash(
    def: &TableDef,
    rows: &[Object],
    row: &Object,
    skip: Option<usize>,
) -> Option<(usize, Vec<String>)> {
    def.unique.iter().find_map(|key| {
        let values: Option<Vec<&Value>> = key
            .iter()
            .map(|column| row.get(column).filter(|v| !v.is_null()))
            .collect();
        let values = values?;
        rows.iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .find(|(_, other)| {
                key.iter()
                    .zip(&values)
                    .all(|(column, value)| other.get(column) == Some(*value))
            })
            .map(|(i, _)| (i, key.clone()))
    })
}

fn same_columns(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|column| b.contains(column))
}

fn duplicate_key(table: &str, key: &[String]) -> BackendError {
    BackendError::Conflict(format!(
        "duplicate key value violates unique constraint \"{table}_{}_key\"",
        key.join("_")
    ))
}

fn change(table: &str, kind: ChangeKind, record: Option<&Object>, old: Option<&Object>) -> ChangeEvent {
    ChangeEvent {
        table: table.to_string(),
        kind,
        record: record.cloned().map(Value::Object),
        old_record: old.cloned().map(Value::Object),
    }
}

impl MemoryBackend {
    fn insert_locked(
        store: &mut Store,
        table: &str,
        rows: Vec<Row>,
        conflict: &Conflict,
    ) -> Result<Vec<Row>, BackendError> {
        let def = store.table(table)?.def.clone();
        if let Some(columns) = conflict.columns()
            && !def.has_unique(columns)
        {
            return Err(BackendError::Api {
                status: 400,
                message: "there is no unique or exclusion constraint matching the ON CONFLICT specification".to_string(),
            });
        }

        let mut staged = store.table(table)?.rows.clone();
        let mut written = Vec::new();
        let mut events = Vec::new();

        for row in rows {
            let Value::Object(provided) = row else {
                return Err(BackendError::Api {
                    status: 400,
                    message: "row must be a JSON object".to_string(),
                });
            };

            let mut full = provided.clone();
            full.entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            if !full.contains_key("created_at") {
                let now = store.next_timestamp();
                full.insert("created_at".to_string(), Value::String(now));
            }
            for (column, value) in &def.defaults {
                full.entry(column.as_str()).or_insert_with(|| value.clone());
            }

            match (find_clash(&def, &staged, &full, None), conflict) {
                (None, _) => {
                    events.push(change(table, ChangeKind::Insert, Some(&full), None));
                    written.push(Value::Object(full.clone()));
                    staged.push(full);
                }
                (Some((_, key)), Conflict::Ignore { columns }) if same_columns(&key, columns) => {
                    debug!(table, "Insert skipped, row exists");
                }
                (Some((index, key)), Conflict::Merge { columns }) if same_columns(&key, columns) => {
                    let Some(existing) = staged.get_mut(index) else {
                        continue;
                    };
                    let old = existing.clone();
                    for (column, value) in provided {
                        if column != "id" && column != "created_at" {
                            existing.insert(column, value);
                        }
                    }
                    let merged = existing.clone();
                    if let Some((_, key)) = find_clash(&def, &staged, &merged, Some(index)) {
                        return Err(duplicate_key(table, &key));
                    }
                    events.push(change(table, ChangeKind::Update, Some(&merged), Some(&old)));
                    written.push(Value::Object(merged));
                }
                (Some((_, key)), _) => return Err(duplicate_key(table, &key)),
            }
        }

        if let Some(target) = store.tables.get_mut(table) {
            target.rows = staged;
        }
        store.publish(events);
        Ok(written)
    }
}

#[async_trait]
impl DataApi for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, BackendError> {
        let store = self.store()?;
        let table = store.table(&query.table)?;

        let mut rows: Vec<&Object> = table
            .rows
            .iter()
            .filter(|row| matches_all(row, &query.filters))
            .collect();

        rows.sort_by(|a, b| {
            query
                .order
                .iter()
                .map(|order| {
                    let ordering = compare(a.get(&order.column), b.get(&order.column));
                    if order.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        rows.into_iter()
            .map(|row| store.project(&table.def, row, &query.select))
            .collect()
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, BackendError> {
        let store = self.store()?;
        let count = store
            .table(table)?
            .rows
            .iter()
            .filter(|row| matches_all(row, filters))
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn insert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict: Conflict,
    ) -> Result<Vec<Row>, BackendError> {
        let mut store = self.store()?;
        Self::insert_locked(&mut store, table, rows, &conflict)
    }

    async fn update(
        &self,
        table: &str,
        patch: Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, BackendError> {
        let Value::Object(patch) = patch else {
            return Err(BackendError::Api {
                status: 400,
                message: "patch must be a JSON object".to_string(),
            });
        };

        let mut store = self.store()?;
        let current = store.table(table)?;
        let def = current.def.clone();
        let mut staged = current.rows.clone();
        let mut written = Vec::new();
        let mut events = Vec::new();

        for index in 0..staged.len() {
            let Some(row) = staged.get_mut(index) else {
                continue;
            };
            if !matches_all(row, filters) {
                continue;
            }
            let old = row.clone();
            for (column, value) in &patch {
                if column != "id" {
                    row.insert(column.clone(), value.clone());
                }
            }
            let updated = row.clone();
            if let Some((_, key)) = find_clash(&def, &staged, &updated, Some(index)) {
                return Err(duplicate_key(table, &key));
            }
            events.push(change(table, ChangeKind::Update, Some(&updated), Some(&old)));
            written.push(Value::Object(updated));
        }

        if let Some(target) = store.tables.get_mut(table) {
            target.rows = staged;
        }
        store.publish(events);
        Ok(written)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError> {
        let mut store = self.store()?;
        store.table(table)?;
        let Some(target) = store.tables.get_mut(table) else {
            return Ok(Vec::new());
        };

        let (removed, kept): (Vec<Object>, Vec<Object>) = std::mem::take(&mut target.rows)
            .into_iter()
            .partition(|row| matches_all(row, filters));
        target.rows = kept;

        let events = removed
            .iter()
            .map(|row| change(table, ChangeKind::Delete, None, Some(row)))
            .collect();
        store.publish(events);
        Ok(removed.into_iter().map(Value::Object).collect())
    }
}

#[async_trait]
impl AuthApi for MemoryBackend {
    async fn sign_up(
        &self,
        email: &Email,
        password: &Password,
        profile: &ProfileFields,
    ) -> Result<AuthUser, BackendError> {
        let user = {
            let mut store = self.store()?;
            if store.users.iter().any(|u| u.email == *email) {
                return Err(BackendError::Conflict("User already registered".to_string()));
            }
            let id = UserId::random();
            store.users.push(MemoryUser {
                id,
                email: email.clone(),
                password: SecretString::from(password.expose().to_string()),
            });

            // Mirrors the platform's new-user trigger
            if store.tables.contains_key("profiles") {
                let row = json!({
                    "id": id,
                    "first_name": profile.first_name,
                    "last_name": profile.last_name,
                    "phone": null,
                    "address": null,
                    "payment_method": null,
                });
                Self::insert_locked(&mut store, "profiles", vec![row], &Conflict::Error)?;
            }
            if store.tables.contains_key("user_roles") {
                let row = json!({ "user_id": id, "role": "user" });
                Self::insert_locked(&mut store, "user_roles", vec![row], &Conflict::Error)?;
            }

            AuthUser {
                id,
                email: Some(email.to_string()),
            }
        };

        self.set_session(Some(user.clone()))?;
        Ok(user)
    }

    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &Password,
    ) -> Result<AuthUser, BackendError> {
        let user = {
            let store = self.store()?;
            store
                .users
                .iter()
                .find(|u| u.email == *email && u.password.expose_secret() == password.expose())
                .map(|u| AuthUser {
                    id: u.id,
                    email: Some(u.email.to_string()),
                })
                .ok_or(BackendError::InvalidCredentials)?
        };
        self.set_session(Some(user.clone()))?;
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.set_session(None)
    }

    async fn current_user(&self) -> Result<Option<AuthUser>, BackendError> {
        self.session
            .lock()
            .map(|session| session.clone())
            .map_err(|_| BackendError::Unavailable("memory session poisoned".to_string()))
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl StorageApi for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, BackendError> {
        let mut store = self.store()?;
        let path = format!("{bucket}/{key}");
        if store.objects.contains_key(&path) {
            return Err(BackendError::Conflict("The resource already exists".to_string()));
        }
        store.objects.insert(path, bytes);
        Ok(format!("memory://{bucket}/{key}"))
    }
}

#[async_trait]
impl RealtimeApi for MemoryBackend {
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscription, BackendError> {
        let (events, rx) = mpsc::unbounded_channel();
        let id = {
            let mut store = self.store()?;
            store.table(&spec.table)?;
            store.next_subscriber += 1;
            let id = store.next_subscriber;
            store.subscribers.insert(id, Subscriber { spec, events });
            id
        };

        let store: Weak<Mutex<Store>> = Arc::downgrade(&self.store);
        Ok(Subscription::new(rx, move || {
            if let Some(store) = store.upgrade()
                && let Ok(mut store) = store.lock()
            {
                store.subscribers.remove(&id);
            }
        }))
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::backend::EventFilter;

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    fn password() -> Password {
        Password::new("secret-pass").unwrap()
    }

    #[tokio::test]
    async fn test_ignore_conflict_skips_existing_row() {
        let backend = MemoryBackend::storefront();
        let row = json!({"user_id": "u1", "product_id": "p1"});
        let first = backend
            .insert("favorites", vec![row.clone()], Conflict::ignore(&["user_id", "product_id"]))
            .await
            .unwrap();
        let second = backend
            .insert("favorites", vec![row], Conflict::ignore(&["user_id", "product_id"]))
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(backend.rows("favorites").len(), 1);
    }

    #[tokio::test]
    async fn test_plain_insert_rejects_duplicate() {
        let backend = MemoryBackend::storefront();
        let row = json!({"product_id": "p1", "session_id": "s1"});
        backend
            .insert("product_views", vec![row.clone()], Conflict::Error)
            .await
            .unwrap();
        let err = backend
            .insert("product_views", vec![row], Conflict::Error)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_merge_updates_in_place() {
        let backend = MemoryBackend::storefront();
        backend
            .insert("user_roles", vec![json!({"user_id": "u1"})], Conflict::Error)
            .await
            .unwrap();
        let merged = backend
            .insert(
                "user_roles",
                vec![json!({"user_id": "u1", "role": "admin"})],
                Conflict::merge(&["user_id"]),
            )
            .await
            .unwrap();

        assert_eq!(merged[0]["role"], "admin");
        let rows = backend.rows("user_roles");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["role"], "admin");
    }

    #[tokio::test]
    async fn test_conflict_target_must_be_a_unique_key() {
        let backend = MemoryBackend::storefront();
        let err = backend
            .insert("notifications", vec![json!({"title": "x"})], Conflict::merge(&["title"]))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_embedded_select_and_order() {
        let backend = MemoryBackend::storefront();
        let product = backend
            .insert(
                "products",
                vec![json!({"name": "Runner", "price": "1299.90"})],
                Conflict::Error,
            )
            .await
            .unwrap();
        let product_id = product[0]["id"].as_str().unwrap().to_string();
        backend
            .insert(
                "product_images",
                vec![
                    json!({"product_id": product_id, "image_url": "a.jpg"}),
                    json!({"product_id": product_id, "image_url": "b.jpg", "is_primary": true}),
                ],
                Conflict::Error,
            )
            .await
            .unwrap();
        for size in ["42", "40"] {
            backend
                .insert(
                    "cart_items",
                    vec![json!({"user_id": "u1", "product_id": product_id, "size": size})],
                    Conflict::Error,
                )
                .await
                .unwrap();
        }

        let rows = backend
            .select(
                &Query::table("cart_items")
                    .select("*, products(name, price, product_images(image_url, is_primary))")
                    .eq("user_id", "u1")
                    .order_desc("created_at"),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["size"], "40");
        assert_eq!(rows[0]["quantity"], 1);
        assert_eq!(rows[0]["products"]["name"], "Runner");
        assert_eq!(rows[0]["products"]["product_images"].as_array().unwrap().len(), 2);
        assert!(rows[0]["products"].get("description").is_none());
    }

    #[tokio::test]
    async fn test_unknown_relation_is_an_error() {
        let backend = MemoryBackend::storefront();
        backend
            .insert("brands", vec![json!({"name": "Kundura"})], Conflict::Error)
            .await
            .unwrap();
        let err = backend
            .select(&Query::table("brands").select("*, cart_items(*)"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_update_delete_count() {
        let backend = MemoryBackend::storefront();
        let rows = (0..3)
            .map(|i| json!({"user_id": "u1", "title": format!("n{i}"), "message": "m", "type": "bilgi"}))
            .collect();
        backend.insert("notifications", rows, Conflict::Error).await.unwrap();

        let unread = [Filter::eq("user_id", "u1"), Filter::eq("is_read", false)];
        assert_eq!(backend.count("notifications", &unread).await.unwrap(), 3);

        let updated = backend
            .update("notifications", json!({"is_read": true}), &[Filter::eq("title", "n0")])
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(backend.count("notifications", &unread).await.unwrap(), 2);

        let deleted = backend
            .delete("notifications", &[Filter::eq("message", "m")])
            .await
            .unwrap();
        assert_eq!(deleted.len(), 3);
        assert_eq!(backend.count("notifications", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MemoryBackend::storefront();
        backend.fail_table("cart_items");
        assert!(backend.select(&Query::table("cart_items")).await.is_err());
        backend.heal_table("cart_items");
        assert!(backend.select(&Query::table("cart_items")).await.is_ok());
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile_and_role() {
        let backend = MemoryBackend::storefront();
        let mut events = backend.auth_events();
        let user = backend
            .sign_up(
                &email("ayse@example.com"),
                &password(),
                &ProfileFields {
                    first_name: "Ayşe".to_string(),
                    last_name: "Yılmaz".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedIn(user.clone()));
        assert_eq!(backend.rows("profiles")[0]["first_name"], "Ayşe");
        assert_eq!(backend.rows("user_roles")[0]["role"], "user");
        assert_eq!(backend.current_user().await.unwrap(), Some(user));

        let again = backend
            .sign_up(&email("ayse@example.com"), &password(), &ProfileFields::default())
            .await;
        assert!(matches!(again, Err(BackendError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_clients_have_separate_sessions() {
        let backend = MemoryBackend::storefront();
        backend
            .sign_up(&email("a@example.com"), &password(), &ProfileFields::default())
            .await
            .unwrap();

        let other = backend.connect();
        assert!(other.current_user().await.unwrap().is_none());
        assert!(matches!(
            other
                .sign_in_with_password(&email("a@example.com"), &Password::new("wrong-pass").unwrap())
                .await,
            Err(BackendError::InvalidCredentials)
        ));
        other
            .sign_in_with_password(&email("a@example.com"), &password())
            .await
            .unwrap();
        other.sign_out().await.unwrap();
        assert!(other.current_user().await.unwrap().is_none());
        assert!(backend.current_user().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_realtime_filters_and_unsubscribe() {
        let backend = MemoryBackend::storefront();
        let mut mine = backend
            .subscribe(ChannelSpec::table("cart_items").on(EventFilter::All, Some(("user_id", "u1".to_string()))))
            .await
            .unwrap();
        let mut deletes = backend
            .subscribe(ChannelSpec::table("cart_items").on(EventFilter::Delete, None))
            .await
            .unwrap();
        assert_eq!(backend.subscriber_count(), 2);

        for user in ["u2", "u1"] {
            backend
                .insert(
                    "cart_items",
                    vec![json!({"user_id": user, "product_id": "p", "size": "40"})],
                    Conflict::Error,
                )
                .await
                .unwrap();
        }
        backend
            .delete("cart_items", &[Filter::eq("user_id", "u2")])
            .await
            .unwrap();

        let event = mine.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.column("user_id").as_deref(), Some("u1"));
        assert!(mine.events.try_recv().is_err());

        let event = deletes.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert_eq!(event.column("user_id").as_deref(), Some("u2"));

        drop(mine);
        deletes.unsubscribe();
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_storage_upload() {
        let backend = MemoryBackend::storefront();
        let url = backend
            .upload("product-images", "a.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(url, "memory://product-images/a.png");
        assert_eq!(backend.object("product-images", "a.png"), Some(vec![1, 2, 3]));
        assert!(
            backend
                .upload("product-images", "a.png", vec![], "image/png")
                .await
                .is_err()
        );
    }
}
