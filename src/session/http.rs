use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::SessionBackend;
use crate::config::EventideConfig;
use crate::error::{EventideError, Result};
use crate::http::{ensure_success, normalize_base, request_client};
use crate::types::{Message, Session, SessionSummary};

/// Session CRUD against the playground backend's `/api/sessions` routes.
///
/// The server assigns session ids and tracks threads from appended
/// messages and invokes, so [`SessionBackend::update`] has nothing to send.
#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    agent_name: &'a str,
    namespace: &'a str,
    title: &'a str,
}

#[derive(Deserialize)]
struct SessionListResponse {
    #[serde(default)]
    sessions: Vec<SessionSummary>,
}

impl HttpSessionBackend {
    pub fn new(config: &EventideConfig) -> Result<Self> {
        Ok(Self {
            client: request_client(config)?,
            base_url: normalize_base(&config.base_url),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Session summaries as listed by the server (most recent first).
    pub async fn list_summaries(&self) -> Result<Vec<SessionSummary>> {
        let resp = self.client.get(self.url("/api/sessions")).send().await?;
        let body: SessionListResponse = ensure_success(resp).await?.json().await?;
        Ok(body.sessions)
    }

    /// Fetch one session with its full history.
    pub async fn fetch(&self, session_id: &str) -> Result<Session> {
        let resp = self
            .client
            .get(self.url(&format!("/api/sessions/{session_id}")))
            .send()
            .await?;
        let resp = not_found_as_session(session_id, ensure_success(resp).await)?;
        Ok(resp.json().await?)
    }
}

fn not_found_as_session(
    session_id: &str,
    result: Result<reqwest::Response>,
) -> Result<reqwest::Response> {
    match result {
        Err(EventideError::Api { status: 404, .. }) => {
            Err(EventideError::SessionNotFound(session_id.to_string()))
        }
        other => other,
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn load_all(&self) -> Result<Vec<Session>> {
        let summaries = self.list_summaries().await?;
        let mut sessions = Vec::with_capacity(summaries.len());
        for summary in summaries {
            match self.fetch(&summary.session_id).await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!(session_id = %summary.session_id, error = %e, "Skipping unloadable session")
                }
            }
        }
        Ok(sessions)
    }

    async fn create(&self, session: &Session) -> Result<Session> {
        let request = CreateSessionRequest {
            agent_name: &session.agent.name,
            namespace: &session.agent.namespace,
            title: &session.title,
        };
        let resp = self
            .client
            .post(self.url("/api/sessions"))
            .json(&request)
            .send()
            .await?;
        let created: Session = ensure_success(resp).await?.json().await?;
        debug!(session_id = %created.session_id, "Server created session");
        Ok(created)
    }

    async fn update(&self, session: &Session) -> Result<()> {
        debug!(session_id = %session.session_id, "No remote update route; skipping");
        Ok(())
    }

    async fn append_message(&self, session: &Session, message: &Message) -> Result<()> {
        let resp = self
            .client
            .post(self.url(&format!("/api/sessions/{}/messages", session.session_id)))
            .json(message)
            .send()
            .await?;
        not_found_as_session(&session.session_id, ensure_success(resp).await)?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/sessions/{session_id}")))
            .send()
            .await?;
        not_found_as_session(session_id, ensure_success(resp).await)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentRef;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn backend(server: &MockServer) -> HttpSessionBackend {
        let config = EventideConfig::builder().base_url(server.uri()).build();
        HttpSessionBackend::new(&config).unwrap()
    }

    fn session_json(id: &str) -> serde_json::Value {
        json!({
            "session_id": id,
            "thread_id": null,
            "agent_name": "echo",
            "namespace": "default",
            "title": "Hi",
            "created_at": 1_700_000_000.0,
            "session_timeout_ms": 600000,
            "messages": []
        })
    }

    #[tokio::test]
    async fn create_uses_server_assigned_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sessions"))
            .and(body_partial_json(json!({"agent_name": "echo", "title": "Hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json("srv12345")))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let local = Session::new(AgentRef::named("echo"), "Hi");
        let created = backend.create(&local).await.unwrap();
        assert_eq!(created.session_id, "srv12345");
    }

    #[tokio::test]
    async fn load_all_fetches_each_listed_session() {
        let server = MockServer::start().await;
        let mut summary = session_json("a1");
        summary["message_count"] = json!(0);
        Mock::given(method("GET"))
            .and(path("/api/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sessions": [summary]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json("a1")))
            .mount(&server)
            .await;

        let sessions = backend(&server).await.load_all().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].agent, AgentRef::named("echo"));
    }

    #[tokio::test]
    async fn load_all_skips_sessions_that_fail_to_load() {
        let server = MockServer::start().await;
        let mut first = session_json("a1");
        first["message_count"] = json!(0);
        let mut second = session_json("b2");
        second["message_count"] = json!(0);
        Mock::given(method("GET"))
            .and(path("/api/sessions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"sessions": [first, second]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/a1"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"detail": "Session not found"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/b2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json("b2")))
            .mount(&server)
            .await;

        let backend = std::sync::Arc::new(backend(&server).await);
        let sessions = backend.load_all().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "b2");

        let store = crate::session::SessionStore::new().with_backend(backend);
        assert_eq!(store.restore().await, 1);
        assert!(store.contains("b2"));
        assert!(!store.contains("a1"));
    }

    #[tokio::test]
    async fn append_posts_message_and_maps_404() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sessions/a1/messages"))
            .and(body_partial_json(json!({"role": "user", "content": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/sessions/gone/messages"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"detail": "Session not found"})),
            )
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let mut session = Session::new(AgentRef::named("echo"), "Hi");
        session.session_id = "a1".into();
        backend
            .append_message(&session, &Message::user("hi"))
            .await
            .unwrap();

        session.session_id = "gone".into();
        let err = backend
            .append_message(&session, &Message::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, EventideError::SessionNotFound(id) if id == "gone"));
    }

    #[tokio::test]
    async fn delete_hits_session_route() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/sessions/a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        backend(&server).await.delete("a1").await.unwrap();
    }
}
