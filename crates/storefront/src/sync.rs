//! Remote-collection sync engine.
//!
//! A [`SyncedCollection`] keeps a local copy of one user's rows of a remote
//! table: it fetches on start, subscribes to the table's change feed, and
//! keeps the copy current until it is dropped. Cart, favorites and
//! notifications are all collections; they differ only in their
//! [`CollectionSource`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use kundura_core::UserId;

use crate::backend::{
    AuthUser, Backend, BackendError, ChangeEvent, ChangeKind, ChannelSpec, EventFilter,
    Subscription,
};
use crate::error::AppError;
use crate::session::SessionContext;

/// Aborts the wrapped task when dropped.
pub(crate) struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub(crate) fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(task))
    }
}

impl std::fmt::Debug for TaskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TaskGuard").field(&self.0.id()).finish()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Where a collection's rows come from.
#[async_trait]
pub trait CollectionSource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    /// Table whose change feed drives the collection.
    fn table(&self) -> &'static str;

    /// The row `id` an item was read from.
    fn item_id(&self, item: &Self::Item) -> String;

    /// Every item `user` should see, already limited.
    async fn fetch_all(
        &self,
        backend: &dyn Backend,
        user: &AuthUser,
    ) -> Result<Vec<Self::Item>, BackendError>;

    /// One item by row id, with the same joins as [`Self::fetch_all`].
    async fn fetch_one(
        &self,
        backend: &dyn Backend,
        user: &AuthUser,
        id: &str,
    ) -> Result<Option<Self::Item>, BackendError>;

    /// Display order. Newest first unless overridden.
    fn sort(&self, _items: &mut [Self::Item]) {}

    /// Maximum number of items held.
    fn limit(&self) -> Option<usize> {
        None
    }

    /// Column naming the owning user.
    fn owner_column(&self) -> &'static str {
        "user_id"
    }
}

/// Snapshot of a collection.
#[derive(Debug, Clone)]
pub struct CollectionState<T> {
    pub items: Vec<T>,
    /// A full fetch is in flight.
    pub loading: bool,
    /// Message from the last failed fetch, cleared by the next success.
    pub error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    /// User the items belong to; `None` when signed out.
    pub owner: Option<UserId>,
    /// Number of full fetches attempted.
    pub fetches: u64,
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
            synced_at: None,
            owner: None,
            fetches: 0,
        }
    }
}

impl<T> CollectionState<T> {
    /// Nothing left to wait for: synced, failed, or nobody signed in.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !self.loading && (self.synced_at.is_some() || self.error.is_some() || self.owner.is_none())
    }
}

/// How change events are turned into local updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Listen to the whole table and refetch everything on any change.
    FullRefetch,
    /// Listen to the user's own rows and patch the local copy row by row.
    #[default]
    Incremental,
}

enum Command {
    Refresh(oneshot::Sender<()>),
}

/// A live, user-scoped copy of a remote table.
pub struct SyncedCollection<S: CollectionSource> {
    state: watch::Receiver<CollectionState<S::Item>>,
    commands: mpsc::UnboundedSender<Command>,
    _task: TaskGuard,
}

impl<S: CollectionSource> SyncedCollection<S> {
    /// Start syncing for whoever is signed in to `session`, following
    /// sign-in and sign-out for as long as the collection lives.
    #[must_use]
    pub fn start(session: &SessionContext, source: S, policy: RefreshPolicy) -> Self {
        let users = session.watch_user();
        let owner = users.borrow().as_ref().map(|user| user.id);
        let (state_tx, state) = watch::channel(CollectionState {
            owner,
            loading: owner.is_some(),
            ..CollectionState::default()
        });
        let (commands, command_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            backend: session.backend_handle(),
            source,
            policy,
            state: state_tx,
        };
        let task = TaskGuard::spawn(worker.run(users, command_rx));

        Self {
            state,
            commands,
            _task: task,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CollectionState<S::Item> {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn items(&self) -> Vec<S::Item> {
        self.state.borrow().items.clone()
    }

    /// Read the current items without cloning them.
    pub fn with_items<R>(&self, f: impl FnOnce(&[S::Item]) -> R) -> R {
        f(&self.state.borrow().items)
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CollectionState<S::Item>> {
        self.state.clone()
    }

    /// Wait for the next state change.
    pub async fn changed(&self) -> CollectionState<S::Item> {
        let mut state = self.state.clone();
        state.borrow_and_update();
        let _ = state.changed().await;
        let current = state.borrow().clone();
        current
    }

    /// Refetch everything now; resolves once the fetch has finished.
    pub async fn refresh(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Refresh(done)).is_ok() {
            let _ = finished.await;
        }
    }

    /// Wait until `predicate` holds and return that state.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&CollectionState<S::Item>) -> bool,
    ) -> CollectionState<S::Item> {
        let mut state = self.state.clone();
        if let Ok(current) = state.wait_for(|s| predicate(s)).await {
            return current.clone();
        }
        // The worker is gone; nothing will change any more
        let current = state.borrow().clone();
        current
    }

    /// Wait for the first fetch (or the sign-out clear) to settle.
    pub async fn ready(&self) -> CollectionState<S::Item> {
        self.wait_for(CollectionState::is_settled).await
    }
}

impl<S: CollectionSource> std::fmt::Debug for SyncedCollection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("SyncedCollection")
            .field("items", &state.items.len())
            .field("loading", &state.loading)
            .field("owner", &state.owner)
            .finish_non_exhaustive()
    }
}

enum Exit {
    UserChanged,
    Shutdown,
}

enum Step {
    UserChanged,
    Command(Command),
    Event(Option<ChangeEvent>),
    Shutdown,
}

struct Worker<S: CollectionSource> {
    backend: Arc<dyn Backend>,
    source: S,
    policy: RefreshPolicy,
    state: watch::Sender<CollectionState<S::Item>>,
}

impl<S: CollectionSource> Worker<S> {
    async fn run(
        self,
        mut users: watch::Receiver<Option<AuthUser>>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            let user = users.borrow_and_update().clone();
            let exit = match user {
                Some(user) => self.sync_user(&user, &mut users, &mut commands).await,
                None => self.signed_out(&mut users, &mut commands).await,
            };
            if matches!(exit, Exit::Shutdown) {
                return;
            }
        }
    }

    async fn signed_out(
        &self,
        users: &mut watch::Receiver<Option<AuthUser>>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Exit {
        self.state.send_modify(|state| {
            state.items.clear();
            state.loading = false;
            state.error = None;
            state.synced_at = None;
            state.owner = None;
        });

        loop {
            tokio::select! {
                changed = users.changed() => {
                    return if changed.is_ok() { Exit::UserChanged } else { Exit::Shutdown };
                }
                command = commands.recv() => match command {
                    Some(Command::Refresh(done)) => {
                        let _ = done.send(());
                    }
                    None => return Exit::Shutdown,
                },
            }
        }
    }

    async fn sync_user(
        &self,
        user: &AuthUser,
        users: &mut watch::Receiver<Option<AuthUser>>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Exit {
        self.state.send_modify(|state| {
            if state.owner != Some(user.id) {
                state.items.clear();
                state.synced_at = None;
            }
            state.owner = Some(user.id);
            state.error = None;
        });

        // Subscribe before fetching so no change falls between the two
        let mut subscription = match self.backend.subscribe(self.channel(user)).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(table = self.source.table(), error = %e, "Change feed unavailable");
                None
            }
        };
        self.fetch_all(user).await;

        loop {
            let step = tokio::select! {
                changed = users.changed() => {
                    if changed.is_ok() { Step::UserChanged } else { Step::Shutdown }
                }
                command = commands.recv() => {
                    command.map_or(Step::Shutdown, Step::Command)
                }
                event = next_event(subscription.as_mut()) => Step::Event(event),
            };

            match step {
                Step::UserChanged => {
                    let next = users.borrow().as_ref().map(|u| u.id);
                    if next != Some(user.id) {
                        return Exit::UserChanged;
                    }
                }
                Step::Command(Command::Refresh(done)) => {
                    self.fetch_all(user).await;
                    let _ = done.send(());
                }
                Step::Event(Some(event)) => self.apply(user, event).await,
                Step::Event(None) => {
                    warn!(table = self.source.table(), "Change feed closed");
                    subscription = None;
                }
                Step::Shutdown => return Exit::Shutdown,
            }
        }
    }

    fn channel(&self, user: &AuthUser) -> ChannelSpec {
        let table = self.source.table();
        match self.policy {
            RefreshPolicy::FullRefetch => ChannelSpec::table(table),
            // Deletes cannot be filtered by column on the platform, so they
            // arrive unfiltered and foreign ones are dropped in `apply`
            RefreshPolicy::Incremental => ChannelSpec::table(table)
                .on(
                    EventFilter::All,
                    Some((self.source.owner_column(), user.id.to_string())),
                )
                .on(EventFilter::Delete, None),
        }
    }

    #[instrument(skip(self, user), fields(table = self.source.table(), user_id = %user.id))]
    async fn fetch_all(&self, user: &AuthUser) {
        self.state.send_modify(|state| state.loading = true);
        debug!("Fetching collection");

        match self.source.fetch_all(self.backend.as_ref(), user).await {
            Ok(mut items) => {
                self.source.sort(&mut items);
                if let Some(limit) = self.source.limit() {
                    items.truncate(limit);
                }
                self.state.send_modify(|state| {
                    state.items = items;
                    state.loading = false;
                    state.error = None;
                    state.synced_at = Some(Utc::now());
                    state.fetches += 1;
                });
            }
            Err(e) => {
                warn!(error = %e, "Collection fetch failed, keeping previous items");
                let message = AppError::from(e).user_message();
                self.state.send_modify(|state| {
                    state.loading = false;
                    state.error = Some(message);
                    state.fetches += 1;
                });
            }
        }
    }

    async fn apply(&self, user: &AuthUser, event: ChangeEvent) {
        if self.policy == RefreshPolicy::FullRefetch {
            self.fetch_all(user).await;
            return;
        }

        let Some(id) = event.row_id().filter(|_| event.kind != ChangeKind::Resync) else {
            self.fetch_all(user).await;
            return;
        };
        let owner = event.column(self.source.owner_column());
        if owner.is_some_and(|owner| owner != user.id.to_string()) {
            return;
        }

        match event.kind {
            ChangeKind::Delete => self.remove(user, &id).await,
            ChangeKind::Insert | ChangeKind::Update => self.reload(user, &id).await,
            ChangeKind::Resync => self.fetch_all(user).await,
        }
    }

    async fn remove(&self, user: &AuthUser, id: &str) {
        let (held, full) = {
            let state = self.state.borrow();
            let held = state.items.iter().any(|item| self.source.item_id(item) == id);
            let full = self.source.limit().is_some_and(|limit| state.items.len() >= limit);
            (held, full)
        };
        if !held {
            return;
        }
        if full {
            // A row beyond the window may now belong in it
            self.fetch_all(user).await;
            return;
        }
        debug!(table = self.source.table(), id, "Removing row locally");
        self.state.send_modify(|state| {
            state.items.retain(|item| self.source.item_id(item) != id);
        });
    }

    async fn reload(&self, user: &AuthUser, id: &str) {
        match self.source.fetch_one(self.backend.as_ref(), user, id).await {
            Ok(Some(item)) => {
                debug!(table = self.source.table(), id, "Upserting row locally");
                self.state.send_modify(|state| {
                    match state
                        .items
                        .iter_mut()
                        .find(|held| self.source.item_id(held) == id)
                    {
                        Some(held) => *held = item,
                        None => state.items.push(item),
                    }
                    self.source.sort(&mut state.items);
                    if let Some(limit) = self.source.limit() {
                        state.items.truncate(limit);
                    }
                });
            }
            Ok(None) => self.state.send_modify(|state| {
                state.items.retain(|item| self.source.item_id(item) != id);
            }),
            Err(e) => {
                warn!(table = self.source.table(), id, error = %e, "Row fetch failed");
                let message = AppError::from(e).user_message();
                self.state.send_modify(|state| state.error = Some(message));
            }
        }
    }
}

async fn next_event(subscription: Option<&mut Subscription>) -> Option<ChangeEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
