//! JetStream-backed progress publishing.
//!
//! Every execution gets its own subject family under
//! `workflow.execution.<execution_id>`, so a live view subscribes to
//! `workflow.execution.<id>.>` and receives both execution-level and
//! node-level events; [`NatsProgressPublisher::replay`] reads the retained
//! history back for consumers that join late. Delivery is at-least-once at
//! best; the engine treats publishing as advisory.

use crate::execution::{ExecutionStatus, NodeStatus, WorkflowExecution};
use crate::publisher::{NodeUpdate, ProgressPublisher, PublishError};
use amber_loom_core::ExecutionId;
use async_nats::jetstream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Subject prefix for execution progress events.
const PROGRESS_SUBJECT_PREFIX: &str = "workflow.execution";

/// Default stream name holding progress events.
const PROGRESS_STREAM_NAME: &str = "WORKFLOW_PROGRESS";

/// Connection settings for the progress stream.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Stream name override (defaults to `WORKFLOW_PROGRESS`).
    #[serde(default)]
    pub stream_name: Option<String>,
}

impl NatsConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(PROGRESS_STREAM_NAME)
    }
}

/// Wire format of one progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Execution {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Node {
        execution_id: ExecutionId,
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_name: Option<String>,
        status: NodeStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<JsonValue>,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    fn execution(execution: &WorkflowExecution) -> Self {
        Self::Execution {
            execution_id: execution.id,
            status: execution.status,
            error: execution.error.clone(),
            timestamp: Utc::now(),
        }
    }

    fn node(execution_id: ExecutionId, update: &NodeUpdate) -> Self {
        Self::Node {
            execution_id,
            node_id: update.node_id.clone(),
            node_name: update.node_name.clone(),
            status: update.status,
            data: update.data.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Failure setting up or reading the progress stream.
#[derive(Debug)]
pub enum ProgressStreamError {
    /// Could not connect to NATS or create the stream.
    Connection { message: String },
    /// Replay could not read events back.
    Replay { message: String },
}

impl fmt::Display for ProgressStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { message } => write!(f, "progress stream unavailable: {message}"),
            Self::Replay { message } => write!(f, "progress replay failed: {message}"),
        }
    }
}

impl std::error::Error for ProgressStreamError {}

/// [`ProgressPublisher`] that writes events to a JetStream stream.
pub struct NatsProgressPublisher {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsProgressPublisher {
    /// Connects and makes sure the progress stream exists.
    ///
    /// # Errors
    ///
    /// Returns `ProgressStreamError::Connection` when the server is
    /// unreachable or the stream cannot be created.
    pub async fn connect(config: NatsConfig) -> Result<Self, ProgressStreamError> {
        let client = async_nats::connect(&config.url).await.map_err(|e| {
            ProgressStreamError::Connection {
                message: e.to_string(),
            }
        })?;
        let jetstream = jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: config.stream().to_string(),
            subjects: vec![format!("{PROGRESS_SUBJECT_PREFIX}.>")],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };
        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| ProgressStreamError::Connection {
                message: format!("failed to create progress stream: {e}"),
            })?;

        Ok(Self { jetstream, config })
    }

    fn execution_subject(execution_id: ExecutionId) -> String {
        format!("{PROGRESS_SUBJECT_PREFIX}.{execution_id}.status")
    }

    fn node_subject(execution_id: ExecutionId, node_id: &str) -> String {
        format!(
            "{PROGRESS_SUBJECT_PREFIX}.{execution_id}.node.{}",
            subject_token(node_id)
        )
    }

    async fn publish(&self, subject: String, event: &ProgressEvent) -> Result<(), PublishError> {
        let bytes = serde_json::to_vec(event).map_err(|e| PublishError {
            message: format!("failed to serialize progress event: {e}"),
        })?;

        self.jetstream
            .publish(subject, bytes.into())
            .await
            .map_err(|e| PublishError {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| PublishError {
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Reads back every retained progress event for one execution, oldest
    /// first. Used to catch up consumers that subscribe mid-run.
    ///
    /// # Errors
    ///
    /// Returns `ProgressStreamError::Replay` when the stream cannot be read
    /// or an event fails to decode.
    pub async fn replay(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ProgressEvent>, ProgressStreamError> {
        let stream = self
            .jetstream
            .get_stream(self.config.stream())
            .await
            .map_err(|e| ProgressStreamError::Replay {
                message: format!("failed to open stream: {e}"),
            })?;

        let consumer_config = jetstream::consumer::pull::Config {
            filter_subject: format!("{PROGRESS_SUBJECT_PREFIX}.{execution_id}.>"),
            deliver_policy: jetstream::consumer::DeliverPolicy::All,
            ..Default::default()
        };
        let consumer = stream.create_consumer(consumer_config).await.map_err(|e| {
            ProgressStreamError::Replay {
                message: format!("failed to create replay consumer: {e}"),
            }
        })?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| ProgressStreamError::Replay {
                message: e.to_string(),
            })?;

        use futures::StreamExt;
        let mut events = Vec::new();
        while let Ok(Some(message)) =
            tokio::time::timeout(std::time::Duration::from_millis(100), messages.next()).await
        {
            let message = message.map_err(|e| ProgressStreamError::Replay {
                message: e.to_string(),
            })?;

            let event: ProgressEvent =
                serde_json::from_slice(&message.payload).map_err(|e| {
                    ProgressStreamError::Replay {
                        message: format!("failed to decode progress event: {e}"),
                    }
                })?;
            events.push(event);

            message.ack().await.map_err(|e| ProgressStreamError::Replay {
                message: format!("failed to ack replayed message: {e}"),
            })?;
        }

        Ok(events)
    }
}

#[async_trait]
impl ProgressPublisher for NatsProgressPublisher {
    async fn execution_changed(&self, execution: &WorkflowExecution) -> Result<(), PublishError> {
        let event = ProgressEvent::execution(execution);
        self.publish(Self::execution_subject(execution.id), &event)
            .await
    }

    async fn node_changed(
        &self,
        execution: &WorkflowExecution,
        update: &NodeUpdate,
    ) -> Result<(), PublishError> {
        let event = ProgressEvent::node(execution.id, update);
        self.publish(Self::node_subject(execution.id, &update.node_id), &event)
            .await
    }
}

/// Node ids are user-authored and may contain characters that are illegal
/// in a NATS subject token; anything outside `[A-Za-z0-9_-]` becomes `-`.
fn subject_token(node_id: &str) -> String {
    node_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
