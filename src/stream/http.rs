//! SSE event stream client over reqwest.

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, warn};

use super::sse::{classify, Frame, SseDecoder};
use super::{EventStreamClient, StreamDispatcher, StreamHandle, StreamKey, StreamObserver, StreamScope};
use crate::config::EventideConfig;
use crate::error::{EventideError, Result};
use crate::http::{ensure_success, normalize_base};

/// Opens `text/event-stream` connections against the playground backend.
#[derive(Debug, Clone)]
pub struct HttpEventStreamClient {
    client: reqwest::Client,
    base_url: String,
    scope: StreamScope,
}

impl HttpEventStreamClient {
    pub fn new(config: &EventideConfig) -> Result<Self> {
        // No overall timeout: a stream stays open for the whole turn.
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_base(config.stream_base_url()),
            scope: config.stream_scope,
        })
    }

    pub fn scope(&self) -> StreamScope {
        self.scope
    }

    /// Stream URL for `key`. A turn id is only used under [`StreamScope::Turn`].
    pub fn url_for(&self, key: &StreamKey) -> String {
        match (self.scope, key.turn_id.as_deref()) {
            (StreamScope::Turn, Some(turn)) => format!(
                "{}/api/threads/{}/turns/{}/events/stream",
                self.base_url, key.thread_id, turn
            ),
            _ => format!("{}/api/threads/{}/events/stream", self.base_url, key.thread_id),
        }
    }

    /// Pull-style view of a stream.
    ///
    /// Yields events in arrival order and a final [`Frame::Done`] on the
    /// sentinel. Malformed frames are skipped. A body that ends without the
    /// sentinel yields a [`EventideError::Stream`] error.
    pub fn frames(&self, key: &StreamKey) -> BoxStream<'static, Result<Frame>> {
        let url = self.url_for(key);
        let request = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let stream = async_stream::stream! {
            debug!(url = %url, "opening event stream");
            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(EventideError::Network(e));
                    return;
                }
            };
            let resp = match ensure_success(resp).await {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let byte_stream = resp.bytes_stream();
            futures::pin_mut!(byte_stream);
            let mut decoder = SseDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(EventideError::Network(e));
                        return;
                    }
                };
                for data in decoder.push(&chunk) {
                    match classify(&data) {
                        Some(Frame::Done) => {
                            yield Ok(Frame::Done);
                            return;
                        }
                        Some(frame) => yield Ok(frame),
                        None => {}
                    }
                }
            }

            if let Some(data) = decoder.finish() {
                match classify(&data) {
                    Some(Frame::Done) => {
                        yield Ok(Frame::Done);
                        return;
                    }
                    Some(frame) => yield Ok(frame),
                    None => {}
                }
            }

            yield Err(EventideError::Stream(
                "event stream ended before the termination sentinel".into(),
            ));
        };

        Box::pin(stream)
    }
}

impl EventStreamClient for HttpEventStreamClient {
    fn open(&self, key: StreamKey, observer: Box<dyn StreamObserver>) -> StreamHandle {
        let frames = self.frames(&key);
        let (handle, dispatcher) = StreamHandle::new(key.clone(), observer);
        tokio::spawn(async move {
            tokio::select! {
                _ = dispatcher.closed() => {
                    debug!(stream = %key, "event stream closed");
                }
                _ = pump(frames, &dispatcher) => {}
            }
        });
        handle
    }
}

async fn pump(mut frames: BoxStream<'static, Result<Frame>>, dispatcher: &StreamDispatcher) {
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Frame::Event(event)) => {
                if !dispatcher.event(*event) {
                    return;
                }
            }
            Ok(Frame::Done) => {
                dispatcher.done();
                return;
            }
            Err(e) => {
                warn!(error = %e, "event stream failed");
                dispatcher.error(e);
                return;
            }
        }
    }
}
