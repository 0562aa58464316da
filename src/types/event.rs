//! Turn trace events: the wire envelope and its typed payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{EventideError, Result};

/// Event protocol version this crate speaks.
pub const PROTOCOL_VERSION: &str = "agent-events/1.0";

/// Severity attached to every event.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Event types the reducer interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum EventType {
    #[strum(serialize = "turn.started")]
    TurnStarted,
    #[strum(serialize = "message.delta")]
    MessageDelta,
    #[strum(serialize = "message.completed")]
    MessageCompleted,
    #[strum(serialize = "tool.call.started")]
    ToolCallStarted,
    #[strum(serialize = "tool.call.completed")]
    ToolCallCompleted,
    #[strum(serialize = "turn.completed")]
    TurnCompleted,
    #[strum(serialize = "turn.failed")]
    TurnFailed,
    #[strum(serialize = "state.delta")]
    StateDelta,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Typed event payload, keyed by the envelope's `type`.
///
/// Types outside the known vocabulary land in [`EventPayload::Other`] so they
/// are still carried in the trace.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    TurnStarted {
        input: Option<Value>,
    },
    MessageDelta {
        message_id: String,
        delta: String,
    },
    MessageCompleted {
        message_id: String,
    },
    ToolCallStarted {
        tool: String,
        arguments: Value,
    },
    ToolCallCompleted {
        tool: String,
        result: Value,
    },
    TurnCompleted {
        output: Option<Value>,
    },
    TurnFailed {
        error: Option<Value>,
    },
    StateDelta(Value),
    Other {
        event_type: String,
        payload: Value,
    },
}

#[derive(Serialize, Deserialize)]
struct TurnStartedBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input: Option<Value>,
}

#[derive(Serialize, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    delta: String,
}

#[derive(Serialize, Deserialize)]
struct MessageCompletedBody {
    #[serde(default)]
    message_id: String,
}

#[derive(Serialize, Deserialize)]
struct ToolCallStartedBody {
    #[serde(default)]
    tool: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Serialize, Deserialize)]
struct ToolCallCompletedBody {
    #[serde(default)]
    tool: String,
    #[serde(default)]
    result: Value,
}

#[derive(Serialize, Deserialize)]
struct TurnCompletedBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
}

#[derive(Serialize, Deserialize)]
struct TurnFailedBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl EventPayload {
    /// Build a payload from its wire `type` and raw `payload` object.
    pub fn from_wire(event_type: &str, payload: Value) -> Result<Self> {
        let payload = match payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let Ok(kind) = event_type.parse::<EventType>() else {
            return Ok(Self::Other {
                event_type: event_type.to_string(),
                payload,
            });
        };
        let parsed = match kind {
            EventType::TurnStarted => {
                let body: TurnStartedBody = serde_json::from_value(payload)?;
                Self::TurnStarted { input: body.input }
            }
            EventType::MessageDelta => {
                let body: MessageDeltaBody = serde_json::from_value(payload)?;
                Self::MessageDelta {
                    message_id: body.message_id,
                    delta: body.delta,
                }
            }
            EventType::MessageCompleted => {
                let body: MessageCompletedBody = serde_json::from_value(payload)?;
                Self::MessageCompleted {
                    message_id: body.message_id,
                }
            }
            EventType::ToolCallStarted => {
                let body: ToolCallStartedBody = serde_json::from_value(payload)?;
                Self::ToolCallStarted {
                    tool: body.tool,
                    arguments: body.arguments,
                }
            }
            EventType::ToolCallCompleted => {
                let body: ToolCallCompletedBody = serde_json::from_value(payload)?;
                Self::ToolCallCompleted {
                    tool: body.tool,
                    result: body.result,
                }
            }
            EventType::TurnCompleted => {
                let body: TurnCompletedBody = serde_json::from_value(payload)?;
                Self::TurnCompleted {
                    output: body.output,
                }
            }
            EventType::TurnFailed => {
                let body: TurnFailedBody = serde_json::from_value(payload)?;
                Self::TurnFailed { error: body.error }
            }
            EventType::StateDelta => Self::StateDelta(payload),
        };
        Ok(parsed)
    }

    /// Split back into the wire `type` string and `payload` object.
    pub fn to_wire(&self) -> (String, Value) {
        let body = match self {
            Self::TurnStarted { input } => serde_json::to_value(TurnStartedBody {
                input: input.clone(),
            }),
            Self::MessageDelta { message_id, delta } => serde_json::to_value(MessageDeltaBody {
                message_id: message_id.clone(),
                delta: delta.clone(),
            }),
            Self::MessageCompleted { message_id } => {
                serde_json::to_value(MessageCompletedBody {
                    message_id: message_id.clone(),
                })
            }
            Self::ToolCallStarted { tool, arguments } => {
                serde_json::to_value(ToolCallStartedBody {
                    tool: tool.clone(),
                    arguments: arguments.clone(),
                })
            }
            Self::ToolCallCompleted { tool, result } => {
                serde_json::to_value(ToolCallCompletedBody {
                    tool: tool.clone(),
                    result: result.clone(),
                })
            }
            Self::TurnCompleted { output } => serde_json::to_value(TurnCompletedBody {
                output: output.clone(),
            }),
            Self::TurnFailed { error } => serde_json::to_value(TurnFailedBody {
                error: error.clone(),
            }),
            Self::StateDelta(value) => Ok(value.clone()),
            Self::Other { payload, .. } => Ok(payload.clone()),
        };
        // Plain structs of owned JSON values always serialize.
        let body = body.unwrap_or(Value::Null);
        (self.type_name().to_string(), body)
    }

    /// Known event type, or `None` for [`EventPayload::Other`].
    pub fn kind(&self) -> Option<EventType> {
        Some(match self {
            Self::TurnStarted { .. } => EventType::TurnStarted,
            Self::MessageDelta { .. } => EventType::MessageDelta,
            Self::MessageCompleted { .. } => EventType::MessageCompleted,
            Self::ToolCallStarted { .. } => EventType::ToolCallStarted,
            Self::ToolCallCompleted { .. } => EventType::ToolCallCompleted,
            Self::TurnCompleted { .. } => EventType::TurnCompleted,
            Self::TurnFailed { .. } => EventType::TurnFailed,
            Self::StateDelta(_) => EventType::StateDelta,
            Self::Other { .. } => return None,
        })
    }

    /// The wire `type` string.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Other { event_type, .. } => event_type,
            known => known.kind().map(EventType::as_str).unwrap_or_default(),
        }
    }

    /// Whether this payload ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnCompleted { .. } | Self::TurnFailed { .. })
    }
}

/// One typed, timestamped record in a turn's trace.
///
/// Arrival order is authoritative; `seq` is informational and may be absent
/// or sparse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct Event {
    pub spec_version: Option<String>,
    pub event_id: Option<String>,
    pub thread_id: String,
    pub turn_id: String,
    pub seq: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub level: Level,
    pub payload: EventPayload,
    pub content_type: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(thread_id: impl Into<String>, turn_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            spec_version: Some(PROTOCOL_VERSION.to_string()),
            event_id: None,
            thread_id: thread_id.into(),
            turn_id: turn_id.into(),
            seq: None,
            timestamp: Some(Utc::now()),
            level: Level::Info,
            payload,
            content_type: None,
            tags: None,
        }
    }

    pub fn with_seq(mut self, seq: i64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Decode and validate one JSON frame.
    pub fn decode(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Encode as a JSON frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The wire `type` string.
    pub fn event_type(&self) -> &str {
        self.payload.type_name()
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spec_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    turn_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<i64>,
    #[serde(
        default,
        alias = "timestamp",
        deserialize_with = "super::timestamp::lenient::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    ts: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    level: Level,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<BTreeMap<String, String>>,
}

impl TryFrom<WireEvent> for Event {
    type Error = EventideError;

    fn try_from(wire: WireEvent) -> Result<Self> {
        if let Some(version) = wire.spec_version.as_deref() {
            if version != PROTOCOL_VERSION {
                return Err(EventideError::InvalidArgument(format!(
                    "unsupported spec_version: {version}"
                )));
            }
        }
        if wire.thread_id.trim().is_empty() {
            return Err(EventideError::InvalidArgument("thread_id is required".into()));
        }
        if wire.event_type.trim().is_empty() {
            return Err(EventideError::InvalidArgument("type is required".into()));
        }
        if wire.seq.is_some_and(|seq| seq < 0) {
            return Err(EventideError::InvalidArgument("seq must be >= 0".into()));
        }
        let payload = EventPayload::from_wire(&wire.event_type, wire.payload)?;
        Ok(Self {
            spec_version: wire.spec_version,
            event_id: wire.event_id,
            thread_id: wire.thread_id,
            turn_id: wire.turn_id,
            seq: wire.seq,
            timestamp: wire.ts,
            level: wire.level,
            payload,
            content_type: wire.content_type,
            tags: wire.tags,
        })
    }
}

impl From<Event> for WireEvent {
    fn from(event: Event) -> Self {
        let (event_type, payload) = event.payload.to_wire();
        Self {
            spec_version: event.spec_version,
            event_id: event.event_id,
            thread_id: event.thread_id,
            turn_id: event.turn_id,
            seq: event.seq,
            ts: event.timestamp,
            event_type,
            level: event.level,
            payload,
            content_type: event.content_type,
            tags: event.tags,
        }
    }
}
