//! SSE streaming against a mock backend.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use eventide::agent::HttpAgentClient;
use eventide::config::EventideConfig;
use eventide::error::EventideError;
use eventide::orchestrator::{OrchestratorSettings, TurnOrchestrator, TurnStatus};
use eventide::session::SessionStore;
use eventide::stream::{
    CallbackObserver, EventStreamClient, Frame, HttpEventStreamClient, StreamKey, StreamObserver,
    StreamScope,
};
use eventide::types::{AgentRef, Event, EventPayload};

fn frame(value: serde_json::Value) -> String {
    format!("data: {value}\n\n")
}

fn envelope(kind: &str, payload: serde_json::Value) -> serde_json::Value {
    json!({
        "spec_version": "agent-events/1.0",
        "thread_id": "thread_1",
        "turn_id": "turn_1",
        "seq": 0,
        "ts": "",
        "level": "info",
        "type": kind,
        "payload": payload,
    })
}

fn turn_body() -> String {
    [
        ": keep-alive\n\n".to_string(),
        frame(envelope("turn.started", json!({"input": {"prompt": "hi"}}))),
        frame(envelope("message.delta", json!({"message_id": "m1", "delta": "hel"}))),
        "data: {not json\n\n".to_string(),
        frame(envelope("message.delta", json!({"message_id": "m1", "delta": "lo"}))),
        frame(envelope("turn.completed", json!({"output": "hello"}))),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat()
}

async fn mount_stream(server: &MockServer, route: &str, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(status).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

fn stream_client(server: &MockServer, scope: StreamScope) -> HttpEventStreamClient {
    let config = EventideConfig::builder()
        .base_url(server.uri())
        .stream_scope(scope)
        .build();
    HttpEventStreamClient::new(&config).unwrap()
}

#[derive(Debug)]
enum Seen {
    Event(String),
    Done,
    Error(String),
}

fn recording_observer(tx: mpsc::UnboundedSender<Seen>) -> Box<dyn StreamObserver> {
    let done_tx = tx.clone();
    let error_tx = tx.clone();
    Box::new(CallbackObserver::new(
        move |event: Event| {
            let _ = tx.send(Seen::Event(event.event_type().to_string()));
        },
        move || {
            let _ = done_tx.send(Seen::Done);
        },
        move |error: EventideError| {
            let _ = error_tx.send(Seen::Error(error.to_string()));
        },
    ))
}

async fn collect_until_terminal(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Vec<Seen> {
    let mut seen = Vec::new();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("stream did not finish within 5s");
        match next {
            Some(item @ (Seen::Done | Seen::Error(_))) => {
                seen.push(item);
                return seen;
            }
            Some(item) => seen.push(item),
            None => return seen,
        }
    }
}

#[tokio::test]
async fn frames_skip_comments_and_malformed_data() {
    let server = MockServer::start().await;
    mount_stream(&server, "/api/threads/thread_1/events/stream", 200, turn_body()).await;

    let client = stream_client(&server, StreamScope::Thread);
    let frames: Vec<_> = client.frames(&StreamKey::thread("thread_1")).collect().await;

    assert_eq!(frames.len(), 5);
    let kinds: Vec<String> = frames[..4]
        .iter()
        .map(|f| match f {
            Ok(Frame::Event(event)) => event.event_type().to_string(),
            other => panic!("expected an event, got {other:?}"),
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["turn.started", "message.delta", "message.delta", "turn.completed"]
    );
    assert!(matches!(frames[4], Ok(Frame::Done)));

    match &frames[1] {
        Ok(Frame::Event(event)) => {
            assert_eq!(
                event.payload,
                EventPayload::MessageDelta {
                    message_id: "m1".into(),
                    delta: "hel".into()
                }
            );
            assert!(event.timestamp.is_none());
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn body_without_sentinel_is_an_error() {
    let server = MockServer::start().await;
    let body = frame(envelope(
        "message.delta",
        json!({"message_id": "m1", "delta": "cut"}),
    ));
    mount_stream(&server, "/api/threads/thread_1/events/stream", 200, body).await;

    let client = stream_client(&server, StreamScope::Thread);
    let frames: Vec<_> = client.frames(&StreamKey::thread("thread_1")).collect().await;

    assert_eq!(frames.len(), 2);
    assert!(matches!(frames[0], Ok(Frame::Event(_))));
    assert!(matches!(frames[1], Err(EventideError::Stream(_))));
}

#[tokio::test]
async fn observer_sees_events_then_done() {
    let server = MockServer::start().await;
    mount_stream(&server, "/api/threads/thread_1/events/stream", 200, turn_body()).await;

    let client = stream_client(&server, StreamScope::Thread);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = client.open(StreamKey::thread("thread_1"), recording_observer(tx));

    let seen = collect_until_terminal(&mut rx).await;
    assert_eq!(seen.len(), 5);
    assert!(matches!(seen[0], Seen::Event(ref kind) if kind == "turn.started"));
    assert!(matches!(seen[4], Seen::Done));
    assert!(handle.is_closed());
}

#[tokio::test]
async fn server_error_reaches_on_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/threads/missing/events/stream"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "thread store down"})))
        .mount(&server)
        .await;

    let client = stream_client(&server, StreamScope::Thread);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = client.open(StreamKey::thread("missing"), recording_observer(tx));

    let seen = collect_until_terminal(&mut rx).await;
    assert_eq!(seen.len(), 1);
    match &seen[0] {
        Seen::Error(message) => assert!(message.contains("thread store down")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn turn_scope_requests_the_turn_route() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "/api/threads/thread_1/turns/turn_1/events/stream",
        200,
        "data: [DONE]\n\n".to_string(),
    )
    .await;

    let client = stream_client(&server, StreamScope::Turn);
    let frames: Vec<_> = client
        .frames(&StreamKey::turn("thread_1", "turn_1"))
        .collect()
        .await;
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], Ok(Frame::Done)));
}

#[tokio::test]
async fn closed_handle_stops_callbacks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/threads/thread_1/events/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(turn_body(), "text/event-stream")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let client = stream_client(&server, StreamScope::Thread);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = client.open(StreamKey::thread("thread_1"), recording_observer(tx));
    handle.close();
    handle.close();
    assert!(handle.is_closed());

    // The observer (and its sender) is dropped on close, so the channel ends empty.
    let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("channel should close");
    assert!(next.is_none());
}

#[tokio::test]
async fn orchestrated_turn_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/invoke"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "thread_id": "thread_1",
            "turn_id": "turn_1",
            "output": null
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_stream(&server, "/api/threads/thread_1/events/stream", 200, turn_body()).await;

    let config = EventideConfig::builder().base_url(server.uri()).build();
    let orchestrator = TurnOrchestrator::new(
        Arc::new(HttpAgentClient::new(&config).unwrap()),
        Arc::new(HttpEventStreamClient::new(&config).unwrap()),
        SessionStore::new(),
        OrchestratorSettings::from_config(&config, Some(AgentRef::named("echo"))),
    );

    let handle = orchestrator.send("hi").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("turn did not finish");

    assert_eq!(result.status, TurnStatus::Completed);
    let message = result.message.unwrap();
    assert_eq!(message.content, "hello");
    assert_eq!(message.events.len(), 4);

    let session = orchestrator.active_session().unwrap();
    assert_eq!(session.thread_id.as_deref(), Some("thread_1"));
    assert_eq!(session.messages.len(), 2);
}
