//! Convenience re-exports for common use.

pub use crate::agent::{AgentClient, HttpAgentClient};
pub use crate::config::EventideConfig;
pub use crate::error::{EventideError, Result};
pub use crate::orchestrator::{
    OrchestratorSettings, TurnHandle, TurnOrchestrator, TurnResult, TurnSnapshot, TurnStatus,
};
pub use crate::reducer::{TurnEventReducer, TurnProjection, TurnState};
pub use crate::session::{FileSessionBackend, HttpSessionBackend, SessionBackend, SessionStore};
pub use crate::stream::{
    EventStreamClient, HttpEventStreamClient, StreamHandle, StreamKey, StreamObserver, StreamScope,
};
pub use crate::types::{AgentRef, Event, EventPayload, Message, Role, Session};
