//! Agent invocation request/response types.

use bon::Builder;
use serde::{Deserialize, Serialize};

use super::session::AgentRef;

/// Request to start a turn on an agent.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct InvokeRequest {
    #[serde(flatten)]
    pub agent: AgentRef,
    #[builder(into)]
    pub prompt: String,
    /// Only sent while the session is still valid.
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Thread to continue; absent on the first turn of a session.
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

/// Invoke response. `thread_id` is authoritative for the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvokeResponse {
    pub thread_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// An agent available for invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentInfo {
    pub name: String,
    #[serde(default = "super::session::default_namespace_owned")]
    pub namespace: String,
    #[serde(default = "unknown_status")]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn unknown_status() -> String {
    "Unknown".to_string()
}

impl AgentInfo {
    pub fn agent_ref(&self) -> AgentRef {
        AgentRef::new(self.name.clone(), self.namespace.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_turn_request_omits_thread() {
        let request = InvokeRequest::builder()
            .agent(AgentRef::named("echo"))
            .prompt("hi")
            .build();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({"agent_name": "echo", "namespace": "default", "prompt": "hi"})
        );
    }

    #[test]
    fn follow_up_request_carries_session_and_thread() {
        let request = InvokeRequest::builder()
            .agent(AgentRef::new("echo", "team-a"))
            .prompt("again")
            .session_id("abcd1234")
            .thread_id("thread_1")
            .build();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["session_id"], "abcd1234");
        assert_eq!(json["thread_id"], "thread_1");
        assert!(json.get("turn_id").is_none());
    }

    #[test]
    fn response_tolerates_missing_optionals() {
        let response: InvokeResponse = serde_json::from_str(r#"{"thread_id":"thread_1"}"#).unwrap();
        assert_eq!(response.thread_id, "thread_1");
        assert!(response.turn_id.is_none());
        assert!(response.output.is_none());
    }

    #[test]
    fn agent_info_defaults() {
        let info: AgentInfo = serde_json::from_str(r#"{"name":"echo"}"#).unwrap();
        assert_eq!(info.namespace, "default");
        assert_eq!(info.status, "Unknown");
        assert_eq!(info.agent_ref(), AgentRef::named("echo"));
    }
}
