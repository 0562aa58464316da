//! Session records binding a title and history to a server-side thread.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;

/// Default namespace agents live in.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default title for sessions created without one.
pub const DEFAULT_TITLE: &str = "New Chat";

pub(crate) fn default_namespace_owned() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Identifies the agent a session talks to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AgentRef {
    #[serde(rename = "agent_name")]
    pub name: String,
    #[serde(default = "default_namespace_owned")]
    pub namespace: String,
}

impl AgentRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Agent in the default namespace.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_NAMESPACE)
    }
}

impl std::fmt::Display for AgentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Client-side conversation record.
///
/// `thread_id` stays empty until the first successful invoke returns one.
/// The session exclusively owns its message list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(flatten)]
    pub agent: AgentRef,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "super::timestamp::option", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, with = "super::timestamp::option", skip_serializing_if = "Option::is_none")]
    pub last_invoke_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl Session {
    /// New session with a random short id and no thread.
    pub fn new(agent: AgentRef, title: impl Into<String>) -> Self {
        let mut session_id = uuid::Uuid::new_v4().simple().to_string();
        session_id.truncate(8);
        Self {
            session_id,
            thread_id: None,
            agent,
            title: title.into(),
            created_at: Utc::now(),
            expires_at: None,
            last_invoke_at: None,
            messages: Vec::new(),
        }
    }

    /// Whether the session is still usable at `now`.
    ///
    /// Uses `expires_at` when set, otherwise `created_at + ttl_ms`.
    pub fn is_valid_at(&self, ttl_ms: u64, now: DateTime<Utc>) -> bool {
        let deadline = match self.expires_at {
            Some(at) => Some(at),
            None => i64::try_from(ttl_ms)
                .ok()
                .and_then(Duration::try_milliseconds)
                .and_then(|ttl| self.created_at.checked_add_signed(ttl)),
        };
        // An unrepresentable deadline is effectively never reached.
        deadline.map_or(true, |deadline| now < deadline)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Metadata without the message history.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            thread_id: self.thread_id.clone(),
            agent: self.agent.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_invoke_at: self.last_invoke_at,
            message_count: self.messages.len(),
        }
    }
}

/// Session metadata as returned by list calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(flatten)]
    pub agent: AgentRef,
    pub title: String,
    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "super::timestamp::option", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, with = "super::timestamp::option", skip_serializing_if = "Option::is_none")]
    pub last_invoke_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: usize,
}
