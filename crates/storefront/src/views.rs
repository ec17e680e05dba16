//! Product view counting.
//!
//! Each browser profile carries a durable [`SessionId`]; a product's view
//! count is the number of distinct sessions that opened it. The store's
//! unique key on `(product_id, session_id)` makes repeat visits free.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use kundura_core::{ProductId, SessionId};

use crate::backend::{Conflict, Filter};
use crate::config::BackendConfig;
use crate::session::SessionContext;
use crate::sync::TaskGuard;

const TABLE: &str = "product_views";
const SESSION_FILE: &str = "session.json";

/// Durable home of the profile's [`SessionId`].
#[async_trait]
pub trait SessionIdStore: Send + Sync {
    /// The stored id, if any.
    async fn load(&self) -> Option<SessionId>;

    /// Persist `id`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    async fn save(&self, id: &SessionId) -> std::io::Result<()>;

    /// The stored id, generating and saving a new one on first use.
    async fn get_or_create(&self) -> SessionId {
        if let Some(id) = self.load().await {
            return id;
        }
        let id = SessionId::generate();
        if let Err(e) = self.save(&id).await {
            // Still usable for this run; the next run gets a new id
            warn!(error = %e, "Failed to persist session id");
        }
        id
    }
}

#[derive(Serialize, Deserialize)]
struct StoredSession {
    session_id: SessionId,
}

/// Keeps the id as JSON in the state directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(SESSION_FILE),
        }
    }

    #[must_use]
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(&config.state_dir)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionIdStore for FileSessionStore {
    async fn load(&self) -> Option<SessionId> {
        let bytes = tokio::fs::read(&self.path).await.ok()?;
        match serde_json::from_slice::<StoredSession>(&bytes) {
            Ok(stored) => Some(stored.session_id),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable session file");
                None
            }
        }
    }

    async fn save(&self, id: &SessionId) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(&StoredSession {
            session_id: id.clone(),
        })?;
        tokio::fs::write(&self.path, body).await
    }
}

/// Keeps the id for the life of the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    id: Mutex<Option<SessionId>>,
}

#[async_trait]
impl SessionIdStore for MemorySessionStore {
    async fn load(&self) -> Option<SessionId> {
        self.id.lock().ok().and_then(|id| id.clone())
    }

    async fn save(&self, id: &SessionId) -> std::io::Result<()> {
        if let Ok(mut slot) = self.id.lock() {
            *slot = Some(id.clone());
        }
        Ok(())
    }
}

/// What a product page shows about its views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewCount {
    /// `None` until the first count arrives, or if counting failed.
    pub count: Option<u64>,
    /// This visit added a view.
    pub recorded: bool,
    /// Counting and recording have both finished.
    pub settled: bool,
}

/// Counts and records product views for one browser session.
#[derive(Debug, Clone)]
pub struct ViewCounter {
    session: SessionContext,
    session_id: SessionId,
}

impl ViewCounter {
    #[must_use]
    pub const fn new(session: SessionContext, session_id: SessionId) -> Self {
        Self {
            session,
            session_id,
        }
    }

    /// Build a counter with the id kept in `store`.
    pub async fn load(session: SessionContext, store: &dyn SessionIdStore) -> Self {
        Self::new(session, store.get_or_create().await)
    }

    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Show the product's view count and record this session's view.
    ///
    /// The count is fetched first; if the view row is new it is bumped by
    /// one locally instead of being fetched again. Failures are logged and
    /// never shown. Dropping the handle stops the work.
    #[must_use]
    pub fn track(&self, product_id: ProductId) -> ProductViewHandle {
        let (tx, rx) = watch::channel(ViewCount::default());
        let task = TaskGuard::spawn(record_view(
            self.session.clone(),
            self.session_id.clone(),
            product_id,
            tx,
        ));
        ProductViewHandle {
            product_id,
            state: rx,
            _task: task,
        }
    }
}

/// Live view count of one product page.
#[derive(Debug)]
pub struct ProductViewHandle {
    product_id: ProductId,
    state: watch::Receiver<ViewCount>,
    _task: TaskGuard,
}

impl ProductViewHandle {
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        self.product_id
    }

    #[must_use]
    pub fn count(&self) -> Option<u64> {
        self.state.borrow().count
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ViewCount> {
        self.state.clone()
    }

    /// Wait until counting and recording are done.
    pub async fn settled(&self) -> ViewCount {
        let mut state = self.state.clone();
        if let Ok(current) = state.wait_for(|s| s.settled).await {
            return *current;
        }
        let current = *state.borrow();
        current
    }
}

#[instrument(skip(session, session_id, state), fields(product_id = %product_id))]
async fn record_view(
    session: SessionContext,
    session_id: SessionId,
    product_id: ProductId,
    state: watch::Sender<ViewCount>,
) {
    let backend = session.backend();
    match backend
        .count(TABLE, &[Filter::eq("product_id", product_id)])
        .await
    {
        Ok(count) => state.send_modify(|s| s.count = Some(count)),
        Err(e) => warn!(error = %e, "View count failed"),
    }

    let row = json!({
        "product_id": product_id,
        "user_id": session.current_user().map(|user| user.id),
        "session_id": session_id,
    });
    match backend
        .insert(TABLE, vec![row], Conflict::ignore(&["product_id", "session_id"]))
        .await
    {
        Ok(rows) if rows.is_empty() => debug!("View already recorded for this session"),
        Ok(_) => {
            debug!("View recorded");
            state.send_modify(|s| {
                s.recorded = true;
                s.count = s.count.map(|count| count + 1);
            });
        }
        Err(e) => warn!(error = %e, "Recording view failed"),
    }

    state.send_modify(|s| s.settled = true);
}
