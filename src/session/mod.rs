//! Session store: conversation records bound to server-side threads.
//!
//! [`SessionStore`] keeps every session in memory and mirrors mutations to
//! an optional [`SessionBackend`]. Backend failures are logged and
//! swallowed; the in-memory state always reflects every accepted mutation.

mod file;
mod http;

pub use file::FileSessionBackend;
pub use http::HttpSessionBackend;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::DEFAULT_SESSION_TTL_MS;
use crate::error::{EventideError, Result};
use crate::types::{AgentRef, Message, Role, Session, SessionSummary, DEFAULT_TITLE};

const TITLE_MAX_CHARS: usize = 50;

/// Durable storage behind a [`SessionStore`].
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Load every stored session.
    async fn load_all(&self) -> Result<Vec<Session>>;

    /// Store a new session, returning the authoritative record (a remote
    /// backend may assign its own id).
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Persist metadata changes (thread, expiry).
    async fn update(&self, session: &Session) -> Result<()>;

    /// Persist one appended message. `session` already contains it.
    async fn append_message(&self, session: &Session, message: &Message) -> Result<()>;

    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// Whether `session` is usable now under `ttl_ms`.
///
/// `now < expires_at`, or `now < created_at + ttl_ms` when no explicit
/// expiry is set.
pub fn is_valid(session: &Session, ttl_ms: u64) -> bool {
    session.is_valid_at(ttl_ms, Utc::now())
}

/// The session id, but only while the session is valid.
pub fn get_valid_session_id(session: &Session, ttl_ms: u64) -> Option<&str> {
    is_valid(session, ttl_ms).then_some(session.session_id.as_str())
}

/// Title derived from a prompt: its first 50 characters, with `...` when cut.
pub fn title_from_prompt(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let mut title: String = prompt.chars().take(TITLE_MAX_CHARS).collect();
    if prompt.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

/// Shared, cloneable session store.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    backend: Option<Arc<dyn SessionBackend>>,
    ttl_ms: u64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.read().len())
            .field("persistent", &self.backend.is_some())
            .field("ttl_ms", &self.ttl_ms)
            .finish()
    }
}

impl SessionStore {
    /// In-memory store with the default TTL.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            backend: None,
            ttl_ms: DEFAULT_SESSION_TTL_MS,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn SessionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reload sessions from the backend. Returns how many were restored.
    ///
    /// Sessions already in memory keep their in-memory state.
    pub async fn restore(&self) -> usize {
        let Some(backend) = &self.backend else {
            return 0;
        };
        let loaded = match backend.load_all().await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Failed to restore sessions");
                return 0;
            }
        };
        let mut sessions = self.write();
        let mut restored = 0;
        for session in loaded {
            if !sessions.contains_key(&session.session_id) {
                sessions.insert(session.session_id.clone(), session);
                restored += 1;
            }
        }
        debug!(restored, "Restored sessions");
        restored
    }

    /// Create a session with no thread. An empty title becomes "New Chat".
    pub async fn create(&self, agent: AgentRef, title: impl Into<String>) -> Session {
        let title = title.into();
        let title = if title.trim().is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            title
        };
        let mut session = Session::new(agent, title);

        if let Some(backend) = &self.backend {
            match backend.create(&session).await {
                Ok(stored) => session = stored,
                Err(e) => {
                    warn!(session_id = %session.session_id, error = %e, "Failed to persist new session")
                }
            }
        }

        debug!(session_id = %session.session_id, agent = %session.agent, "Created session");
        self.write()
            .insert(session.session_id.clone(), session.clone());
        session
    }

    /// All sessions, most recently created first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.read().values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    /// Like [`list`](Self::list) without message histories.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.list().iter().map(Session::summary).collect()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.read().contains_key(session_id)
    }

    pub fn message_count(&self, session_id: &str) -> Option<usize> {
        self.read().get(session_id).map(Session::message_count)
    }

    /// Whether the session exists and is still valid under the store's TTL.
    pub fn is_valid(&self, session_id: &str) -> bool {
        self.valid_session_id(session_id).is_some()
    }

    /// The session id only while the session is still valid.
    pub fn valid_session_id(&self, session_id: &str) -> Option<String> {
        let sessions = self.read();
        let session = sessions.get(session_id)?;
        get_valid_session_id(session, self.ttl_ms).map(str::to_string)
    }

    /// Append a message. Append-only: the exposed message count always
    /// equals the number of successful appends.
    ///
    /// A message carrying a `thread_id` is adopted by a thread-less session,
    /// and the first user message names a session still titled "New Chat".
    pub async fn append_message(&self, session_id: &str, message: Message) -> Result<()> {
        let snapshot = {
            let mut sessions = self.write();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| EventideError::SessionNotFound(session_id.to_string()))?;
            if session.thread_id.is_none() {
                if let Some(thread_id) = &message.thread_id {
                    session.thread_id = Some(thread_id.clone());
                }
            }
            if session.messages.is_empty()
                && message.role == Role::User
                && session.title == DEFAULT_TITLE
            {
                session.title = title_from_prompt(&message.content);
            }
            session.messages.push(message.clone());
            session.clone()
        };

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.append_message(&snapshot, &message).await {
                warn!(session_id, error = %e, "Failed to persist message");
            }
        }
        Ok(())
    }

    /// Bind the session to `thread_id`. Returns whether anything changed.
    ///
    /// No-op when the thread is already attached; a different thread
    /// overwrites the old one.
    pub async fn attach_thread(&self, session_id: &str, thread_id: &str) -> Result<bool> {
        let snapshot = {
            let mut sessions = self.write();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| EventideError::SessionNotFound(session_id.to_string()))?;
            if session.thread_id.as_deref() == Some(thread_id) {
                return Ok(false);
            }
            if let Some(previous) = &session.thread_id {
                debug!(session_id, previous = %previous, thread_id, "Replacing session thread");
            }
            session.thread_id = Some(thread_id.to_string());
            session.clone()
        };
        self.persist_update(&snapshot).await;
        Ok(true)
    }

    /// Record a successful invoke and slide the expiry to `now + ttl`.
    pub async fn touch(&self, session_id: &str, ttl: Duration) -> Result<()> {
        self.touch_at(session_id, ttl, Utc::now()).await
    }

    pub(crate) async fn touch_at(
        &self,
        session_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let snapshot = {
            let mut sessions = self.write();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| EventideError::SessionNotFound(session_id.to_string()))?;
            session.last_invoke_at = Some(now);
            session.expires_at = chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl));
            session.clone()
        };
        self.persist_update(&snapshot).await;
        Ok(())
    }

    /// Remove a session. Returns whether it existed.
    pub async fn delete(&self, session_id: &str) -> bool {
        let existed = self.write().remove(session_id).is_some();
        if existed {
            if let Some(backend) = &self.backend {
                if let Err(e) = backend.delete(session_id).await {
                    warn!(session_id, error = %e, "Failed to delete persisted session");
                }
            }
            debug!(session_id, "Deleted session");
        }
        existed
    }

    async fn persist_update(&self, session: &Session) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.update(session).await {
                warn!(session_id = %session.session_id, error = %e, "Failed to persist session update");
            }
        }
    }
}
