//! Conversation messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::event::Event;

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A finalized conversation message.
///
/// Assistant messages carry the full event trace that produced them; user
/// messages carry none. Messages are immutable once appended to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
    #[serde(with = "super::timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            thread_id: None,
            events: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant message with its captured trace.
    pub fn assistant(
        content: impl Into<String>,
        thread_id: impl Into<String>,
        events: Vec<Event>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            thread_id: Some(thread_id.into()),
            events,
            timestamp: Utc::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}
