//! HTTP-backed agent and tool invokers.
//!
//! AGENT and TOOL nodes delegate to external runner services over plain JSON
//! HTTP: `POST {base}/agents/{id}/run` (tools alike) carrying the node's
//! input and config, answered with the `{success, output, error}` envelope.

use crate::config::RunnerConfig;
use amber_loom_workflow::invoker::{AgentInvoker, InvokeError, ToolInvoker};
use amber_loom_workflow::node::NodeConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Request body sent to a runner service.
#[derive(Debug, Serialize)]
struct RunnerRequest<'a> {
    input: &'a JsonValue,
    config: &'a NodeConfig,
}

/// Response envelope returned by runner services.
#[derive(Debug, Deserialize)]
struct RunnerResponse {
    success: bool,
    #[serde(default)]
    output: Option<JsonValue>,
    #[serde(default)]
    error: Option<String>,
}

impl RunnerResponse {
    fn into_result(self) -> Result<JsonValue, InvokeError> {
        if self.success {
            Ok(self.output.unwrap_or(JsonValue::Null))
        } else {
            Err(InvokeError::Failed {
                message: self
                    .error
                    .unwrap_or_else(|| "runner reported failure without a message".to_string()),
            })
        }
    }
}

/// Shared plumbing for one runner backend.
struct RunnerClient {
    client: reqwest::Client,
    base_url: String,
}

impl RunnerClient {
    fn new(config: &RunnerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn run(
        &self,
        path: &str,
        input: &JsonValue,
        config: &NodeConfig,
    ) -> Result<JsonValue, InvokeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&RunnerRequest { input, config })
            .send()
            .await
            .map_err(|e| InvokeError::Unavailable {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(InvokeError::Failed {
                message: format!("runner returned HTTP {}", response.status()),
            });
        }

        let envelope: RunnerResponse =
            response.json().await.map_err(|e| InvokeError::Failed {
                message: format!("runner response could not be decoded: {e}"),
            })?;
        envelope.into_result()
    }
}

/// [`AgentInvoker`] that POSTs to an agent runner service.
pub struct HttpAgentInvoker {
    client: RunnerClient,
}

impl HttpAgentInvoker {
    /// Builds a client for the configured agent backend.
    ///
    /// # Errors
    ///
    /// Returns the underlying `reqwest` error when the client cannot be
    /// constructed.
    pub fn new(config: &RunnerConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: RunnerClient::new(config)?,
        })
    }
}

#[async_trait]
impl AgentInvoker for HttpAgentInvoker {
    async fn invoke(
        &self,
        agent_id: &str,
        input: &JsonValue,
        config: &NodeConfig,
    ) -> Result<JsonValue, InvokeError> {
        self.client
            .run(&format!("/agents/{agent_id}/run"), input, config)
            .await
    }
}

/// [`ToolInvoker`] that POSTs to a tool runner service.
pub struct HttpToolInvoker {
    client: RunnerClient,
}

impl HttpToolInvoker {
    /// Builds a client for the configured tool backend.
    ///
    /// # Errors
    ///
    /// Returns the underlying `reqwest` error when the client cannot be
    /// constructed.
    pub fn new(config: &RunnerConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: RunnerClient::new(config)?,
        })
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(
        &self,
        tool_id: &str,
        input: &JsonValue,
        config: &NodeConfig,
    ) -> Result<JsonValue, InvokeError> {
        self.client
            .run(&format!("/tools/{tool_id}/run"), input, config)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_yields_the_output() {
        let envelope: RunnerResponse =
            serde_json::from_value(json!({"success": true, "output": {"answer": 42}})).unwrap();
        assert_eq!(envelope.into_result().unwrap(), json!({"answer": 42}));
    }

    #[test]
    fn success_without_output_yields_null() {
        let envelope: RunnerResponse = serde_json::from_value(json!({"success": true})).unwrap();
        assert_eq!(envelope.into_result().unwrap(), JsonValue::Null);
    }

    #[test]
    fn failure_envelope_carries_the_message_verbatim() {
        let envelope: RunnerResponse =
            serde_json::from_value(json!({"success": false, "error": "model refused"})).unwrap();
        let err = envelope.into_result().unwrap_err();
        assert_eq!(err.to_string(), "model refused");
    }

    #[test]
    fn failure_without_message_gets_a_placeholder() {
        let envelope: RunnerResponse = serde_json::from_value(json!({"success": false})).unwrap();
        let err = envelope.into_result().unwrap_err();
        assert_eq!(err.to_string(), "runner reported failure without a message");
    }

    #[test]
    fn request_body_carries_input_and_config() {
        let input = json!({"q": "refund"});
        let config = NodeConfig::new().with_agent("triage");
        let body = serde_json::to_value(RunnerRequest {
            input: &input,
            config: &config,
        })
        .unwrap();
        assert_eq!(body["input"], json!({"q": "refund"}));
        assert_eq!(body["config"]["agentId"], json!("triage"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = RunnerClient::new(&RunnerConfig {
            base_url: "http://localhost:8090/".to_string(),
            timeout_seconds: 5,
        })
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:8090");
    }
}
