//! Turn orchestration.
//!
//! [`TurnOrchestrator`] ties the pieces together for one conversation view:
//! it makes sure a session exists, appends the user message, invokes the
//! agent, attaches the returned thread, streams the turn through a fresh
//! [`TurnEventReducer`], and commits the assistant message when the stream
//! ends.
//!
//! Stream callbacks are forwarded into a channel and folded by a single
//! driver task, one signal at a time in arrival order. Every turn carries a
//! generation number; switching or deleting the active session bumps it, so
//! late signals from a superseded stream are dropped.

mod types;

pub use types::{OrchestratorSettings, TurnHandle, TurnResult, TurnSnapshot, TurnStatus};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::AgentClient;
use crate::error::{EventideError, Result};
use crate::reducer::{TurnEventReducer, TurnState};
use crate::session::{title_from_prompt, SessionStore};
use crate::stream::{EventStreamClient, StreamHandle, StreamObserver};
use crate::types::{AgentRef, Event, InvokeRequest, Message, Session};

enum TurnSignal {
    Event(Event),
    Done,
    Error(EventideError),
    TimedOut,
}

type SignalTx = mpsc::UnboundedSender<(u64, TurnSignal)>;

/// Forwards stream callbacks to the driver, tagged with their generation.
struct SignalForwarder {
    generation: u64,
    tx: SignalTx,
}

impl StreamObserver for SignalForwarder {
    fn on_event(&mut self, event: Event) {
        let _ = self.tx.send((self.generation, TurnSignal::Event(event)));
    }

    fn on_done(&mut self) {
        let _ = self.tx.send((self.generation, TurnSignal::Done));
    }

    fn on_error(&mut self, error: EventideError) {
        let _ = self.tx.send((self.generation, TurnSignal::Error(error)));
    }
}

/// The one turn allowed in flight.
struct ActiveTurn {
    generation: u64,
    session_id: Option<String>,
    thread_id: Option<String>,
    reducer: TurnEventReducer,
    stream: Option<StreamHandle>,
    timeout: Option<JoinHandle<()>>,
    result_tx: Option<oneshot::Sender<TurnResult>>,
    committing: bool,
}

impl ActiveTurn {
    fn new(generation: u64, result_tx: oneshot::Sender<TurnResult>) -> Self {
        Self {
            generation,
            session_id: None,
            thread_id: None,
            reducer: TurnEventReducer::new(),
            stream: None,
            timeout: None,
            result_tx: Some(result_tx),
            committing: false,
        }
    }

    /// Stop the stream and the timeout. No callback fires afterwards.
    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        if let Some(timeout) = self.timeout.take() {
            timeout.abort();
        }
    }

    fn finish(mut self, result: TurnResult) {
        self.close();
        if let Some(tx) = self.result_tx.take() {
            let _ = tx.send(result);
        }
    }
}

#[derive(Default)]
struct OrchestratorState {
    active_session: Option<String>,
    agent: Option<AgentRef>,
    generation: u64,
    turn: Option<ActiveTurn>,
    last_error: Option<String>,
}

impl OrchestratorState {
    fn current_turn(&mut self, generation: u64) -> Option<&mut ActiveTurn> {
        self.turn
            .as_mut()
            .filter(|turn| turn.generation == generation)
    }

    /// Cancel whatever is in flight and invalidate its signals.
    fn cancel_turn(&mut self) -> bool {
        self.generation += 1;
        match self.turn.take() {
            Some(turn) => {
                let session_id = turn.session_id.clone();
                debug!(
                    generation = turn.generation,
                    session_id = session_id.as_deref().unwrap_or("-"),
                    "Canceling in-flight turn"
                );
                turn.finish(TurnResult::canceled(session_id));
                true
            }
            None => false,
        }
    }
}

/// What a finished stream hands to [`Inner::commit`].
struct Commit {
    session_id: String,
    thread_id: String,
    reducer: TurnEventReducer,
    result_tx: Option<oneshot::Sender<TurnResult>>,
}

struct Inner {
    agent_client: Arc<dyn AgentClient>,
    stream_client: Arc<dyn EventStreamClient>,
    store: SessionStore,
    settings: OrchestratorSettings,
    state: Mutex<OrchestratorState>,
    signals: SignalTx,
    snapshot_tx: watch::Sender<TurnSnapshot>,
}

/// Coordinates turns for one conversation view.
///
/// All methods take `&self`; state lives behind a mutex that is never held
/// across an await. Must be created inside a Tokio runtime.
///
/// # Example
///
/// ```ignore
/// let orchestrator = TurnOrchestrator::new(agents, streams, store, settings);
/// let result = orchestrator.send("hi").await?.wait().await;
/// println!("{}", result.message.map(|m| m.content).unwrap_or_default());
/// ```
pub struct TurnOrchestrator {
    inner: Arc<Inner>,
    driver: JoinHandle<()>,
}

impl TurnOrchestrator {
    pub fn new(
        agent_client: Arc<dyn AgentClient>,
        stream_client: Arc<dyn EventStreamClient>,
        store: SessionStore,
        settings: OrchestratorSettings,
    ) -> Self {
        let (signals, mut signal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(TurnSnapshot::default());
        let state = OrchestratorState {
            agent: settings.agent.clone(),
            ..OrchestratorState::default()
        };
        let inner = Arc::new(Inner {
            agent_client,
            stream_client,
            store,
            settings,
            state: Mutex::new(state),
            signals,
            snapshot_tx,
        });

        let driver_inner = inner.clone();
        let driver = tokio::spawn(async move {
            while let Some((generation, signal)) = signal_rx.recv().await {
                driver_inner.handle_signal(generation, signal).await;
            }
        });

        inner.publish(&inner.lock());
        Self { inner, driver }
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Agent used for newly created sessions.
    pub fn agent(&self) -> Option<AgentRef> {
        self.inner.lock().agent.clone()
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.inner.lock().active_session.clone()
    }

    pub fn active_session(&self) -> Option<Session> {
        let id = self.active_session_id()?;
        self.inner.store.get(&id)
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().turn.is_some()
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        self.inner.snapshot(&self.inner.lock())
    }

    /// Subscribe to snapshot changes.
    pub fn watch_snapshot(&self) -> watch::Receiver<TurnSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Choose the agent for new sessions. Deselects an active session bound
    /// to a different agent.
    pub fn select_agent(&self, agent: AgentRef) {
        let mut state = self.inner.lock();
        let bound_elsewhere = state
            .active_session
            .as_deref()
            .and_then(|id| self.inner.store.get(id))
            .is_some_and(|session| session.agent != agent);
        if bound_elsewhere {
            state.cancel_turn();
            state.active_session = None;
        }
        info!(agent = %agent, "Selected agent");
        state.agent = Some(agent);
        self.inner.publish(&state);
    }

    /// Make `session_id` the active session, canceling any turn in flight.
    pub fn select_session(&self, session_id: &str) -> Result<()> {
        if !self.inner.store.contains(session_id) {
            return Err(EventideError::SessionNotFound(session_id.to_string()));
        }
        let mut state = self.inner.lock();
        if state.active_session.as_deref() == Some(session_id) {
            return Ok(());
        }
        state.cancel_turn();
        state.active_session = Some(session_id.to_string());
        debug!(session_id, generation = state.generation, "Selected session");
        self.inner.publish(&state);
        Ok(())
    }

    /// Deselect the active session; the next `send` starts a new one.
    pub fn clear_active_session(&self) {
        let mut state = self.inner.lock();
        state.cancel_turn();
        state.active_session = None;
        self.inner.publish(&state);
    }

    /// Create a session for the selected agent and make it active.
    pub async fn create_session(&self, title: impl Into<String>) -> Result<Session> {
        let agent = self.require_agent()?;
        let session = self.inner.store.create(agent, title).await;
        let mut state = self.inner.lock();
        state.cancel_turn();
        state.active_session = Some(session.session_id.clone());
        self.inner.publish(&state);
        Ok(session)
    }

    /// Delete a session, canceling its turn first if it is active.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        {
            let mut state = self.inner.lock();
            if state.active_session.as_deref() == Some(session_id) {
                state.cancel_turn();
                state.active_session = None;
                self.inner.publish(&state);
            }
        }
        self.inner.store.delete(session_id).await
    }

    /// Cancel the turn in flight, if any.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.lock();
        let canceled = state.cancel_turn();
        self.inner.publish(&state);
        canceled
    }

    /// Start a turn on the active session (creating one if needed).
    ///
    /// # Errors
    ///
    /// [`EventideError::TurnInFlight`] when a turn is already running, or
    /// the invoke error when the agent call fails. A session created for
    /// this call stays created even when the invoke fails.
    pub async fn send(&self, prompt: impl Into<String>) -> Result<TurnHandle> {
        let prompt = prompt.into();
        let (result_tx, result_rx) = oneshot::channel();

        let (generation, active, agent) = {
            let mut state = self.inner.lock();
            if let Some(turn) = &state.turn {
                let session = turn
                    .session_id
                    .clone()
                    .or_else(|| state.active_session.clone())
                    .unwrap_or_default();
                return Err(EventideError::TurnInFlight(session));
            }
            state.generation += 1;
            let generation = state.generation;
            state.turn = Some(ActiveTurn::new(generation, result_tx));
            state.last_error = None;
            self.inner.publish(&state);
            (generation, state.active_session.clone(), state.agent.clone())
        };

        match self
            .inner
            .start_turn(generation, active, agent, prompt)
            .await
        {
            Ok(session_id) => Ok(TurnHandle::new(session_id, result_rx)),
            Err(e) => {
                let mut state = self.inner.lock();
                if state.current_turn(generation).is_some() {
                    if let Some(turn) = state.turn.take() {
                        let session_id = turn.session_id.clone();
                        turn.finish(TurnResult::failed(session_id, e.to_string()));
                    }
                    state.last_error = Some(e.to_string());
                    self.inner.publish(&state);
                }
                Err(e)
            }
        }
    }

    fn require_agent(&self) -> Result<AgentRef> {
        self.agent()
            .ok_or_else(|| EventideError::InvalidState("no agent selected".into()))
    }
}

impl Drop for TurnOrchestrator {
    fn drop(&mut self) {
        self.inner.lock().cancel_turn();
        self.driver.abort();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, state: &OrchestratorState) -> TurnSnapshot {
        TurnSnapshot {
            active_session_id: state.active_session.clone(),
            agent: state.agent.clone(),
            generation: state.generation,
            is_streaming: state.turn.is_some(),
            projection: state.turn.as_ref().map(|turn| turn.reducer.projection()),
            last_error: state.last_error.clone(),
        }
    }

    fn publish(&self, state: &OrchestratorState) {
        self.snapshot_tx.send_replace(self.snapshot(state));
    }

    /// Whether `generation` still owns the in-flight slot.
    fn is_current(&self, generation: u64) -> bool {
        self.lock().current_turn(generation).is_some()
    }

    /// Everything between marking the turn in flight and opening its stream.
    async fn start_turn(
        &self,
        generation: u64,
        active: Option<String>,
        agent: Option<AgentRef>,
        prompt: String,
    ) -> Result<String> {
        let session = match active.as_deref().and_then(|id| self.store.get(id)) {
            Some(session) => session,
            None => {
                let agent = agent
                    .ok_or_else(|| EventideError::InvalidState("no agent selected".into()))?;
                let session = self.store.create(agent, title_from_prompt(&prompt)).await;
                let mut state = self.lock();
                if state.current_turn(generation).is_some() {
                    state.active_session = Some(session.session_id.clone());
                }
                session
            }
        };
        let session_id = session.session_id.clone();

        {
            let mut state = self.lock();
            match state.current_turn(generation) {
                Some(turn) => turn.session_id = Some(session_id.clone()),
                None => return Ok(session_id),
            }
            self.publish(&state);
        }

        self.store
            .append_message(&session_id, Message::user(prompt.clone()))
            .await?;

        if !self.is_current(generation) {
            return Ok(session_id);
        }

        // An expired session must not leak its id or thread to the server.
        let valid_id = self.store.valid_session_id(&session_id);
        let thread_id = valid_id
            .as_ref()
            .and_then(|_| self.store.get(&session_id))
            .and_then(|session| session.thread_id);
        if valid_id.is_none() {
            debug!(session_id = %session_id, "Session expired; requesting a fresh thread");
        }

        let request = InvokeRequest::builder()
            .agent(session.agent.clone())
            .prompt(prompt)
            .maybe_session_id(valid_id)
            .maybe_thread_id(thread_id)
            .build();
        let response = self.agent_client.invoke(request).await?;

        if let Err(e) = self
            .store
            .attach_thread(&session_id, &response.thread_id)
            .await
        {
            warn!(session_id = %session_id, error = %e, "Failed to attach thread");
        }
        if let Err(e) = self.store.touch(&session_id, self.settings.session_ttl).await {
            warn!(session_id = %session_id, error = %e, "Failed to refresh session expiry");
        }

        let mut state = self.lock();
        let Some(turn) = state.current_turn(generation) else {
            return Ok(session_id);
        };
        let key = self
            .settings
            .stream_scope
            .key(&response.thread_id, response.turn_id.as_deref());
        debug!(
            generation,
            session_id = %session_id,
            thread_id = %response.thread_id,
            stream = %key,
            "Opening turn stream"
        );
        turn.thread_id = Some(response.thread_id.clone());
        turn.stream = Some(self.stream_client.open(
            key,
            Box::new(SignalForwarder {
                generation,
                tx: self.signals.clone(),
            }),
        ));
        if let Some(limit) = self.settings.turn_timeout {
            let tx = self.signals.clone();
            turn.timeout = Some(tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                let _ = tx.send((generation, TurnSignal::TimedOut));
            }));
        }
        self.publish(&state);
        Ok(session_id)
    }

    async fn handle_signal(&self, generation: u64, signal: TurnSignal) {
        let finished = {
            let mut state = self.lock();
            let current = state.generation;
            let Some(turn) = state
                .current_turn(generation)
                .filter(|turn| !turn.committing)
            else {
                debug!(generation, current, "Ignoring stale stream signal");
                return;
            };

            match signal {
                TurnSignal::Event(event) => {
                    turn.reducer.apply(event);
                    self.publish(&state);
                    None
                }
                TurnSignal::Done => {
                    turn.close();
                    turn.committing = true;
                    // The commit owns the result from here on; a cancel that
                    // lands mid-commit must not report the turn as canceled.
                    Some(Commit {
                        session_id: turn.session_id.clone().unwrap_or_default(),
                        thread_id: turn.thread_id.clone().unwrap_or_default(),
                        reducer: turn.reducer.clone(),
                        result_tx: turn.result_tx.take(),
                    })
                }
                TurnSignal::Error(error) => {
                    warn!(generation, error = %error, "Turn stream failed");
                    self.fail(&mut state, error);
                    None
                }
                TurnSignal::TimedOut => {
                    let millis = self
                        .settings
                        .turn_timeout
                        .map_or(0, |limit| limit.as_millis() as u64);
                    warn!(generation, timeout_ms = millis, "Turn timed out");
                    self.fail(&mut state, EventideError::Timeout(millis));
                    None
                }
            }
        };

        if let Some(commit) = finished {
            self.commit(generation, commit).await;
        }
    }

    fn fail(&self, state: &mut OrchestratorState, error: EventideError) {
        if let Some(turn) = state.turn.take() {
            let session_id = turn.session_id.clone();
            turn.finish(TurnResult::failed(session_id, error.to_string()));
        }
        state.last_error = Some(error.to_string());
        self.publish(state);
    }

    /// Turn the folded stream into the assistant message and clear the turn.
    async fn commit(&self, generation: u64, commit: Commit) {
        let Commit {
            session_id,
            thread_id,
            reducer,
            result_tx,
        } = commit;
        let status = match reducer.state() {
            TurnState::Completed => TurnStatus::Completed,
            TurnState::Failed => TurnStatus::Failed,
            TurnState::Idle | TurnState::Streaming => TurnStatus::Incomplete,
        };
        let content = reducer
            .final_content()
            .map(str::to_string)
            .unwrap_or_else(|| reducer.partial_text());
        let message = Message::assistant(content, thread_id, reducer.into_trace());

        if let Err(e) = self
            .store
            .append_message(&session_id, message.clone())
            .await
        {
            warn!(session_id = %session_id, error = %e, "Failed to commit assistant message");
        }
        debug!(generation, session_id = %session_id, status = %status, "Turn committed");

        let error = (status == TurnStatus::Failed).then(|| message.content.clone());
        {
            let mut state = self.lock();
            if state.current_turn(generation).is_some() {
                if let Some(mut turn) = state.turn.take() {
                    turn.close();
                }
                if let Some(error) = &error {
                    state.last_error = Some(error.clone());
                }
                self.publish(&state);
            }
        }
        if let Some(tx) = result_tx {
            let _ = tx.send(TurnResult::finished(status, session_id, message, error));
        }
    }
}
