//! Shared test helpers: scripted agent, scripted streams, in-memory backend.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use eventide::agent::AgentClient;
use eventide::error::{EventideError, Result};
use eventide::orchestrator::{OrchestratorSettings, TurnOrchestrator};
use eventide::session::{SessionBackend, SessionStore};
use eventide::stream::{EventStreamClient, StreamDispatcher, StreamHandle, StreamKey, StreamObserver};
use eventide::types::*;

pub const THREAD: &str = "thread_1";

/// An agent client that replays queued responses and records requests.
///
/// With nothing queued it answers with [`THREAD`] and a fresh turn id.
#[derive(Default)]
pub struct ScriptedAgent {
    responses: Mutex<VecDeque<Result<InvokeResponse>>>,
    requests: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_thread(&self, thread_id: &str, turn_id: Option<&str>) {
        self.responses.lock().unwrap().push_back(Ok(response(thread_id, turn_id)));
    }

    pub fn queue_error(&self, error: EventideError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn response(thread_id: &str, turn_id: Option<&str>) -> InvokeResponse {
    InvokeResponse {
        thread_id: thread_id.to_string(),
        turn_id: turn_id.map(str::to_string),
        output: None,
        agent: None,
        timestamp: None,
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        let turn = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            format!("turn_{}", requests.len())
        };
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(response(THREAD, Some(&turn))))
    }

    async fn list_agents(&self) -> Result<Vec<AgentInfo>> {
        Ok(vec![AgentInfo {
            name: "echo".into(),
            namespace: DEFAULT_NAMESPACE.into(),
            status: "Running".into(),
            created_at: None,
        }])
    }
}

/// A stream client that hands every opened stream to the test.
pub struct ScriptedStreams {
    opened_tx: mpsc::UnboundedSender<(StreamKey, StreamDispatcher)>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(StreamKey, StreamDispatcher)>>,
}

impl ScriptedStreams {
    pub fn new() -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            opened_tx,
            opened_rx: tokio::sync::Mutex::new(opened_rx),
        }
    }

    /// The next stream opened by the code under test.
    pub async fn next_stream(&self) -> (StreamKey, StreamDispatcher) {
        let mut rx = self.opened_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no stream opened within 5s")
            .expect("stream client dropped")
    }

    /// Whether any stream is waiting to be taken.
    pub async fn has_pending(&self) -> bool {
        !self.opened_rx.lock().await.is_empty()
    }
}

impl EventStreamClient for ScriptedStreams {
    fn open(&self, key: StreamKey, observer: Box<dyn StreamObserver>) -> StreamHandle {
        let (handle, dispatcher) = StreamHandle::new(key.clone(), observer);
        let _ = self.opened_tx.send((key, dispatcher));
        handle
    }
}

/// Session backend kept in memory.
#[derive(Default)]
pub struct MemoryBackend {
    sessions: Mutex<HashMap<String, Session>>,
    assistant_delay: Option<Duration>,
}

impl MemoryBackend {
    pub fn seeded(sessions: impl IntoIterator<Item = Session>) -> Self {
        let backend = Self::default();
        {
            let mut stored = backend.sessions.lock().unwrap();
            for session in sessions {
                stored.insert(session.session_id.clone(), session);
            }
        }
        backend
    }

    /// Persisting an assistant message takes `delay`.
    pub fn with_assistant_delay(delay: Duration) -> Self {
        Self {
            assistant_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn load_all(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.lock().unwrap().values().cloned().collect())
    }

    async fn create(&self, session: &Session) -> Result<Session> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        Ok(session.clone())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn append_message(&self, session: &Session, message: &Message) -> Result<()> {
        if let Some(delay) = self.assistant_delay.filter(|_| message.role == Role::Assistant) {
            tokio::time::sleep(delay).await;
        }
        self.update(session).await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }
}

/// Orchestrator wired to scripted collaborators.
pub struct Harness {
    pub orchestrator: TurnOrchestrator,
    pub agent: Arc<ScriptedAgent>,
    pub streams: Arc<ScriptedStreams>,
    pub backend: Arc<MemoryBackend>,
}

impl Harness {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self::with_backend(settings, MemoryBackend::default(), Duration::from_secs(3600))
    }

    pub fn with_backend(settings: OrchestratorSettings, backend: MemoryBackend, ttl: Duration) -> Self {
        let agent = Arc::new(ScriptedAgent::new());
        let streams = Arc::new(ScriptedStreams::new());
        let backend = Arc::new(backend);
        let store = SessionStore::new()
            .with_ttl(ttl)
            .with_backend(backend.clone());
        let orchestrator = TurnOrchestrator::new(agent.clone(), streams.clone(), store, settings);
        Self {
            orchestrator,
            agent,
            streams,
            backend,
        }
    }

    pub fn store(&self) -> &SessionStore {
        self.orchestrator.store()
    }
}

pub fn echo_settings() -> OrchestratorSettings {
    OrchestratorSettings::builder()
        .agent(AgentRef::named("echo"))
        .build()
}

fn event(payload: EventPayload) -> Event {
    Event::new(THREAD, "turn_1", payload)
}

pub fn started() -> Event {
    event(EventPayload::TurnStarted {
        input: Some(json!({"prompt": "hi"})),
    })
}

pub fn delta(message_id: &str, text: &str) -> Event {
    event(EventPayload::MessageDelta {
        message_id: message_id.into(),
        delta: text.into(),
    })
}

pub fn message_completed(message_id: &str) -> Event {
    event(EventPayload::MessageCompleted {
        message_id: message_id.into(),
    })
}

pub fn tool_started(tool: &str, arguments: Value) -> Event {
    event(EventPayload::ToolCallStarted {
        tool: tool.into(),
        arguments,
    })
}

pub fn tool_completed(tool: &str, result: Value) -> Event {
    event(EventPayload::ToolCallCompleted {
        tool: tool.into(),
        result,
    })
}

pub fn completed(output: Option<Value>) -> Event {
    event(EventPayload::TurnCompleted { output })
}

pub fn failed(error: &str) -> Event {
    event(EventPayload::TurnFailed {
        error: Some(Value::String(error.into())),
    })
}
