//! Folds a turn's event stream into live state.
//!
//! [`TurnEventReducer`] is a left fold over [`Event`]s: accumulated message
//! text, a tool-call pairing table, and a terminal outcome. It performs no
//! I/O, so replaying the same events through a fresh reducer always yields
//! the same [`TurnProjection`].

use serde::Serialize;
use serde_json::Value;
use strum::{Display, EnumString};

use crate::types::{Event, EventPayload};

/// Lifecycle of one turn as seen by the reducer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TurnState {
    #[default]
    Idle,
    Streaming,
    Completed,
    Failed,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Completed,
}

/// A tool invocation observed in the current turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Option<Value>,
    pub status: ToolCallStatus,
}

impl ToolCallRecord {
    pub fn is_pending(&self) -> bool {
        self.status == ToolCallStatus::Pending
    }
}

/// Text accumulated for one `message_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageBuffer {
    pub message_id: String,
    pub text: String,
    pub sealed: bool,
}

/// Snapshot of everything folded so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnProjection {
    pub state: TurnState,
    pub partial_text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub is_terminal: bool,
    pub final_content: Option<String>,
}

impl TurnProjection {
    pub fn open_tool_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.tool_calls.iter().filter(|call| call.is_pending())
    }
}

/// Reducer for a single turn. Create a fresh one per turn.
#[derive(Debug, Clone, Default)]
pub struct TurnEventReducer {
    state: TurnState,
    buffers: Vec<MessageBuffer>,
    saw_delta: bool,
    tool_calls: Vec<ToolCallRecord>,
    unpaired: Vec<ToolCallRecord>,
    trace: Vec<Event>,
    final_content: Option<String>,
}

impl TurnEventReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event. Returns `false` if the turn is already terminal and
    /// the event was ignored.
    pub fn apply(&mut self, event: Event) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        match &event.payload {
            EventPayload::TurnStarted { .. } => {
                self.state = TurnState::Streaming;
            }
            EventPayload::MessageDelta { message_id, delta } => {
                self.saw_delta = true;
                self.buffer_mut(message_id).text.push_str(delta);
            }
            EventPayload::MessageCompleted { message_id } => {
                self.buffer_mut(message_id).sealed = true;
            }
            EventPayload::ToolCallStarted { tool, arguments } => {
                self.tool_calls.push(ToolCallRecord {
                    tool_name: tool.clone(),
                    arguments: arguments.clone(),
                    result: None,
                    status: ToolCallStatus::Pending,
                });
            }
            EventPayload::ToolCallCompleted { tool, result } => {
                // Nearest unmatched record wins, whatever its tool name.
                match self.tool_calls.iter_mut().rev().find(|call| call.is_pending()) {
                    Some(call) => {
                        call.result = Some(result.clone());
                        call.status = ToolCallStatus::Completed;
                    }
                    None => self.unpaired.push(ToolCallRecord {
                        tool_name: tool.clone(),
                        arguments: Value::Null,
                        result: Some(result.clone()),
                        status: ToolCallStatus::Completed,
                    }),
                }
            }
            EventPayload::TurnCompleted { output } => {
                self.finish(TurnState::Completed, output.as_ref());
            }
            EventPayload::TurnFailed { error } => {
                self.finish(TurnState::Failed, error.as_ref());
            }
            EventPayload::StateDelta(_) | EventPayload::Other { .. } => {}
        }

        self.trace.push(event);
        true
    }

    fn buffer_mut(&mut self, message_id: &str) -> &mut MessageBuffer {
        let idx = match self.buffers.iter().position(|b| b.message_id == message_id) {
            Some(idx) => idx,
            None => {
                self.buffers.push(MessageBuffer {
                    message_id: message_id.to_string(),
                    text: String::new(),
                    sealed: false,
                });
                self.buffers.len() - 1
            }
        };
        &mut self.buffers[idx]
    }

    fn finish(&mut self, state: TurnState, fallback: Option<&Value>) {
        let content = if self.saw_delta {
            self.partial_text()
        } else {
            fallback.map(value_to_text).unwrap_or_default()
        };
        self.final_content = Some(content);
        self.state = state;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// All message buffers joined in first-appearance order.
    pub fn partial_text(&self) -> String {
        self.buffers.iter().map(|b| b.text.as_str()).collect()
    }

    pub fn messages(&self) -> &[MessageBuffer] {
        &self.buffers
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    /// Completions that arrived with no pending record to resolve.
    pub fn unpaired_completions(&self) -> &[ToolCallRecord] {
        &self.unpaired
    }

    /// Every folded event, in arrival order.
    pub fn trace(&self) -> &[Event] {
        &self.trace
    }

    pub fn into_trace(self) -> Vec<Event> {
        self.trace
    }

    pub fn final_content(&self) -> Option<&str> {
        self.final_content.as_deref()
    }

    pub fn projection(&self) -> TurnProjection {
        TurnProjection {
            state: self.state,
            partial_text: self.partial_text(),
            tool_calls: self.tool_calls.clone(),
            is_terminal: self.is_terminal(),
            final_content: self.final_content.clone(),
        }
    }
}

/// Fold a finite event sequence through a fresh reducer.
pub fn fold<I>(events: I) -> TurnEventReducer
where
    I: IntoIterator<Item = Event>,
{
    let mut reducer = TurnEventReducer::new();
    for event in events {
        reducer.apply(event);
    }
    reducer
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
