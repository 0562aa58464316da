//! Live event streams for a thread (or a single turn).
//!
//! An [`EventStreamClient`] opens a stream for a [`StreamKey`] and pushes
//! decoded events into a [`StreamObserver`] until the termination sentinel
//! (`on_done`) or a transport failure (`on_error`). Exactly one of the two
//! terminal callbacks fires, at most once, and nothing fires after it.
//! The returned [`StreamHandle`] closes the stream; once `close` returns no
//! callback will run again. Streams never reconnect on their own.

pub mod http;
pub mod sse;

pub use http::HttpEventStreamClient;
pub use sse::{Frame, SseDecoder, DONE_SENTINEL};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::error::EventideError;
use crate::types::Event;

/// Identifies the stream to open.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub thread_id: String,
    pub turn_id: Option<String>,
}

impl StreamKey {
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            turn_id: None,
        }
    }

    pub fn turn(thread_id: impl Into<String>, turn_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            turn_id: Some(turn_id.into()),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.turn_id {
            Some(turn) => write!(f, "{}/{}", self.thread_id, turn),
            None => f.write_str(&self.thread_id),
        }
    }
}

/// How event streams are scoped on the server.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StreamScope {
    /// One stream per thread: `/api/threads/{thread}/events/stream`.
    #[default]
    Thread,
    /// One stream per turn: `/api/threads/{thread}/turns/{turn}/events/stream`.
    Turn,
}

impl StreamScope {
    /// Key for a turn under this scope.
    pub fn key(self, thread_id: &str, turn_id: Option<&str>) -> StreamKey {
        match (self, turn_id) {
            (Self::Turn, Some(turn)) => StreamKey::turn(thread_id, turn),
            _ => StreamKey::thread(thread_id),
        }
    }
}

/// Receives the callbacks of one open stream.
///
/// Callbacks run on the stream's reader task, one at a time, in arrival
/// order. Do not call [`StreamHandle::close`] from inside a callback: the
/// terminal callbacks already close the stream.
pub trait StreamObserver: Send + 'static {
    fn on_event(&mut self, event: Event);
    fn on_done(&mut self);
    fn on_error(&mut self, error: EventideError);
}

/// Observer assembled from three closures.
pub struct CallbackObserver<E, D, X> {
    on_event: E,
    on_done: D,
    on_error: X,
}

impl<E, D, X> CallbackObserver<E, D, X>
where
    E: FnMut(Event) + Send + 'static,
    D: FnMut() + Send + 'static,
    X: FnMut(EventideError) + Send + 'static,
{
    pub fn new(on_event: E, on_done: D, on_error: X) -> Self {
        Self {
            on_event,
            on_done,
            on_error,
        }
    }
}

impl<E, D, X> StreamObserver for CallbackObserver<E, D, X>
where
    E: FnMut(Event) + Send + 'static,
    D: FnMut() + Send + 'static,
    X: FnMut(EventideError) + Send + 'static,
{
    fn on_event(&mut self, event: Event) {
        (self.on_event)(event)
    }

    fn on_done(&mut self) {
        (self.on_done)()
    }

    fn on_error(&mut self, error: EventideError) {
        (self.on_error)(error)
    }
}

type ObserverSlot = Arc<Mutex<Option<Box<dyn StreamObserver>>>>;

fn lock(slot: &ObserverSlot) -> MutexGuard<'_, Option<Box<dyn StreamObserver>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Caller-side handle of an open stream. Dropping it closes the stream.
pub struct StreamHandle {
    key: StreamKey,
    slot: ObserverSlot,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Create a handle plus the dispatcher a client implementation feeds.
    pub fn new(key: StreamKey, observer: Box<dyn StreamObserver>) -> (Self, StreamDispatcher) {
        let slot: ObserverSlot = Arc::new(Mutex::new(Some(observer)));
        let cancel = CancellationToken::new();
        (
            Self {
                key,
                slot: slot.clone(),
                cancel: cancel.clone(),
            },
            StreamDispatcher { slot, cancel },
        )
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Close the stream. Idempotent; no callback runs after this returns.
    pub fn close(&self) {
        self.cancel.cancel();
        // Waits for an in-progress callback, then drops the observer.
        lock(&self.slot).take();
    }

    /// True once closed by the caller or finished by a terminal callback.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || lock(&self.slot).is_none()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Client-side half of a [`StreamHandle`]: delivers callbacks unless closed.
#[derive(Clone)]
pub struct StreamDispatcher {
    slot: ObserverSlot,
    cancel: CancellationToken,
}

impl StreamDispatcher {
    /// Deliver an event. Returns `false` if the stream is already closed.
    pub fn event(&self, event: Event) -> bool {
        match lock(&self.slot).as_mut() {
            Some(observer) => {
                observer.on_event(event);
                true
            }
            None => false,
        }
    }

    /// Deliver the end-of-stream signal and close.
    pub fn done(&self) -> bool {
        let mut slot = lock(&self.slot);
        let Some(mut observer) = slot.take() else {
            return false;
        };
        self.cancel.cancel();
        observer.on_done();
        true
    }

    /// Deliver a transport error and close.
    pub fn error(&self, error: EventideError) -> bool {
        let mut slot = lock(&self.slot);
        let Some(mut observer) = slot.take() else {
            return false;
        };
        self.cancel.cancel();
        observer.on_error(error);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the stream is closed from either side.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

/// Opens live event streams.
pub trait EventStreamClient: Send + Sync {
    /// Open the stream for `key`, delivering callbacks to `observer`.
    fn open(&self, key: StreamKey, observer: Box<dyn StreamObserver>) -> StreamHandle;
}
