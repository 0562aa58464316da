//! Agent invocation.
//!
//! [`AgentClient`] starts turns on a remote agent and lists the available
//! agents. [`HttpAgentClient`] speaks the playground backend's JSON API.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::EventideConfig;
use crate::error::Result;
use crate::http::{ensure_success, normalize_base, request_client};
use crate::types::{AgentInfo, InvokeRequest, InvokeResponse};

/// Starts agent turns.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Start a turn. The response's `thread_id` is authoritative.
    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse>;

    /// Agents available for invocation.
    async fn list_agents(&self) -> Result<Vec<AgentInfo>>;
}

#[derive(Deserialize)]
struct AgentListResponse {
    #[serde(default)]
    agents: Vec<AgentInfo>,
}

/// `POST /api/invoke` and `GET /api/agents` over reqwest.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentClient {
    pub fn new(config: &EventideConfig) -> Result<Self> {
        Ok(Self {
            client: request_client(config)?,
            base_url: normalize_base(&config.base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        debug!(
            agent = %request.agent,
            session_id = request.session_id.as_deref().unwrap_or("-"),
            thread_id = request.thread_id.as_deref().unwrap_or("-"),
            "Invoking agent"
        );
        let resp = self
            .client
            .post(format!("{}/api/invoke", self.base_url))
            .json(&request)
            .send()
            .await?;
        let response: InvokeResponse = ensure_success(resp).await?.json().await?;
        debug!(
            thread_id = %response.thread_id,
            turn_id = response.turn_id.as_deref().unwrap_or("-"),
            "Agent accepted turn"
        );
        Ok(response)
    }

    async fn list_agents(&self) -> Result<Vec<AgentInfo>> {
        let resp = self
            .client
            .get(format!("{}/api/agents", self.base_url))
            .send()
            .await?;
        let body: AgentListResponse = ensure_success(resp).await?.json().await?;
        Ok(body.agents)
    }
}
