//! Outbound seams for AGENT and TOOL nodes.
//!
//! The engine only knows these traits; the server binary wires them to the
//! HTTP runner services and tests use [`MockInvoker`].

use crate::node::NodeConfig;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::Mutex;

/// Failure reported by an agent or tool backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The backend ran the request and reported failure. The message is
    /// recorded verbatim on the node execution.
    Failed { message: String },
    /// The backend could not be reached at all.
    Unavailable { message: String },
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Bare message so it lands verbatim in the node's error field.
            Self::Failed { message } => write!(f, "{message}"),
            Self::Unavailable { message } => write!(f, "backend unavailable: {message}"),
        }
    }
}

impl std::error::Error for InvokeError {}

/// Runs an AGENT node against an agent backend.
///
/// The node's full config rides along so backends can honor per-node
/// settings (model overrides, extra keys) without the engine knowing them.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// # Errors
    ///
    /// Returns `InvokeError` when the agent fails or cannot be reached.
    async fn invoke(
        &self,
        agent_id: &str,
        input: &JsonValue,
        config: &NodeConfig,
    ) -> Result<JsonValue, InvokeError>;
}

/// Runs a TOOL node against a tool backend.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// # Errors
    ///
    /// Returns `InvokeError` when the tool fails or cannot be reached.
    async fn invoke(
        &self,
        tool_id: &str,
        input: &JsonValue,
        config: &NodeConfig,
    ) -> Result<JsonValue, InvokeError>;
}

/// Test double implementing both invoker traits.
///
/// Scripted responses are consumed in order; once the script is exhausted
/// every further call gets the fallback response. Each call is recorded with
/// the id and input it was given.
pub struct MockInvoker {
    script: Mutex<VecDeque<Result<JsonValue, InvokeError>>>,
    fallback: Result<JsonValue, InvokeError>,
    calls: Mutex<Vec<(String, JsonValue)>>,
}

impl MockInvoker {
    /// Always succeeds with the given output.
    #[must_use]
    pub fn succeeding(output: JsonValue) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(output),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always fails with the given message.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(InvokeError::Failed {
                message: message.into(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Plays back the given responses in order, then succeeds with null.
    #[must_use]
    pub fn scripted(responses: Vec<Result<JsonValue, InvokeError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            fallback: Ok(JsonValue::Null),
            calls: Mutex::new(Vec::new()),
        }
    }

    async fn respond(&self, id: &str, input: &JsonValue) -> Result<JsonValue, InvokeError> {
        self.calls
            .lock()
            .await
            .push((id.to_string(), input.clone()));
        match self.script.lock().await.pop_front() {
            Some(response) => response,
            None => self.fallback.clone(),
        }
    }

    /// Every `(id, input)` pair this mock has served, in call order.
    pub async fn calls(&self) -> Vec<(String, JsonValue)> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl AgentInvoker for MockInvoker {
    async fn invoke(
        &self,
        agent_id: &str,
        input: &JsonValue,
        _config: &NodeConfig,
    ) -> Result<JsonValue, InvokeError> {
        self.respond(agent_id, input).await
    }
}

#[async_trait]
impl ToolInvoker for MockInvoker {
    async fn invoke(
        &self,
        tool_id: &str,
        input: &JsonValue,
        _config: &NodeConfig,
    ) -> Result<JsonValue, InvokeError> {
        self.respond(tool_id, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn succeeding_mock_records_calls() {
        let mock = MockInvoker::succeeding(json!({"ok": true}));
        let config = NodeConfig::new();

        let out = AgentInvoker::invoke(&mock, "triage", &json!({"q": 1}), &config)
            .await
            .unwrap();
        assert_eq!(out, json!({"ok": true}));
        assert_eq!(mock.calls().await, vec![("triage".to_string(), json!({"q": 1}))]);
    }

    #[tokio::test]
    async fn scripted_mock_plays_responses_in_order() {
        let mock = MockInvoker::scripted(vec![
            Err(InvokeError::Failed {
                message: "transient".into(),
            }),
            Ok(json!("second try")),
        ]);
        let config = NodeConfig::new();

        assert!(
            ToolInvoker::invoke(&mock, "t", &json!(null), &config)
                .await
                .is_err()
        );
        assert_eq!(
            ToolInvoker::invoke(&mock, "t", &json!(null), &config)
                .await
                .unwrap(),
            json!("second try")
        );
        // Script exhausted, fallback applies.
        assert_eq!(
            ToolInvoker::invoke(&mock, "t", &json!(null), &config)
                .await
                .unwrap(),
            json!(null)
        );
        assert_eq!(mock.call_count().await, 3);
    }

    #[test]
    fn failed_error_displays_the_bare_message() {
        let err = InvokeError::Failed {
            message: "model refused".into(),
        };
        assert_eq!(err.to_string(), "model refused");

        let err = InvokeError::Unavailable {
            message: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "backend unavailable: connection refused");
    }
}
