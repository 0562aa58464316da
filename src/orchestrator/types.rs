//! Public types for the turn orchestrator.

use std::time::Duration;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::oneshot;

use crate::config::{EventideConfig, DEFAULT_SESSION_TTL_MS};
use crate::reducer::TurnProjection;
use crate::stream::StreamScope;
use crate::types::{AgentRef, Message};

/// Orchestrator settings.
#[derive(Debug, Clone, Builder)]
pub struct OrchestratorSettings {
    /// Agent for sessions created by `send`.
    pub agent: Option<AgentRef>,
    /// Expiry window applied after each successful invoke.
    #[builder(default = Duration::from_millis(DEFAULT_SESSION_TTL_MS))]
    pub session_ttl: Duration,
    /// Fail a turn locally when no end-of-stream arrives within this window.
    pub turn_timeout: Option<Duration>,
    #[builder(default)]
    pub stream_scope: StreamScope,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl OrchestratorSettings {
    /// Settings taken from the client configuration.
    pub fn from_config(config: &EventideConfig, agent: Option<AgentRef>) -> Self {
        Self {
            agent,
            session_ttl: config.session_ttl,
            turn_timeout: config.turn_timeout,
            stream_scope: config.stream_scope,
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnStatus {
    /// `turn.completed` arrived before the end of the stream.
    Completed,
    /// `turn.failed` arrived, or the stream or invoke failed locally.
    Failed,
    /// The stream ended cleanly without a terminal event.
    Incomplete,
    /// Superseded by a session switch, deletion, or explicit cancel.
    Canceled,
}

/// Outcome of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub status: TurnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// The committed assistant message, when the stream reached its end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl TurnResult {
    pub(crate) fn finished(
        status: TurnStatus,
        session_id: String,
        message: Message,
        error: Option<String>,
    ) -> Self {
        Self {
            status,
            session_id: Some(session_id),
            message: Some(message),
            error,
            finished_at: Utc::now(),
        }
    }

    pub(crate) fn failed(session_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            status: TurnStatus::Failed,
            session_id,
            message: None,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }

    pub(crate) fn canceled(session_id: Option<String>) -> Self {
        Self {
            status: TurnStatus::Canceled,
            session_id,
            message: None,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TurnStatus::Completed
    }
}

/// Handle to a turn started by `send`.
#[derive(Debug)]
pub struct TurnHandle {
    session_id: String,
    result_rx: oneshot::Receiver<TurnResult>,
}

impl TurnHandle {
    pub(crate) fn new(session_id: String, result_rx: oneshot::Receiver<TurnResult>) -> Self {
        Self {
            session_id,
            result_rx,
        }
    }

    /// Session the turn belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the turn to finish.
    pub async fn wait(self) -> TurnResult {
        let session_id = self.session_id;
        self.result_rx
            .await
            .unwrap_or_else(|_| TurnResult::canceled(Some(session_id)))
    }
}

/// Observable orchestrator state for renderers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnSnapshot {
    pub active_session_id: Option<String>,
    pub agent: Option<AgentRef>,
    pub generation: u64,
    pub is_streaming: bool,
    /// Live projection of the turn in flight.
    pub projection: Option<TurnProjection>,
    pub last_error: Option<String>,
}
