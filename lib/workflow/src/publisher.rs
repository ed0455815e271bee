//! Progress notification seam.
//!
//! The engine announces every execution and node status change through
//! [`ProgressPublisher`]. Publishing is best effort: the engine logs a
//! failed publish and keeps running, so implementations should not retry
//! forever. The server binary wires this to JetStream.

use crate::execution::{NodeStatus, WorkflowExecution};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt;
use tokio::sync::Mutex;

/// A single node status change, with whatever payload makes the change
/// useful to a live UI (input on start, output on completion, the prompt
/// while waiting, the error on failure).
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub node_id: String,
    /// Display name of the node, when the graph assigns one.
    pub node_name: Option<String>,
    pub status: NodeStatus,
    pub data: Option<JsonValue>,
}

impl NodeUpdate {
    #[must_use]
    pub fn new(node_id: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            node_name: None,
            status,
            data: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

/// Failure delivering a progress event.
#[derive(Debug)]
pub struct PublishError {
    pub message: String,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "progress publish failed: {}", self.message)
    }
}

impl std::error::Error for PublishError {}

/// Receives execution and node status changes as they happen.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    /// # Errors
    ///
    /// Returns `PublishError` when the event could not be delivered.
    async fn execution_changed(&self, execution: &WorkflowExecution) -> Result<(), PublishError>;

    /// # Errors
    ///
    /// Returns `PublishError` when the event could not be delivered.
    async fn node_changed(
        &self,
        execution: &WorkflowExecution,
        update: &NodeUpdate,
    ) -> Result<(), PublishError>;
}

/// Publisher that drops everything. For embedded use and tests that do not
/// care about progress events.
#[derive(Default)]
pub struct NullPublisher;

#[async_trait]
impl ProgressPublisher for NullPublisher {
    async fn execution_changed(&self, _execution: &WorkflowExecution) -> Result<(), PublishError> {
        Ok(())
    }

    async fn node_changed(
        &self,
        _execution: &WorkflowExecution,
        _update: &NodeUpdate,
    ) -> Result<(), PublishError> {
        Ok(())
    }
}

/// What a [`RecordingPublisher`] saw, in publish order.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedUpdate {
    Execution {
        status: crate::execution::ExecutionStatus,
    },
    Node {
        node_id: String,
        status: NodeStatus,
        data: Option<JsonValue>,
    },
}

/// Test double that records every event it is handed.
#[derive(Default)]
pub struct RecordingPublisher {
    updates: Mutex<Vec<RecordedUpdate>>,
}

impl RecordingPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().await.clone()
    }

    /// Node ids of node events, in the order they were published.
    pub async fn node_sequence(&self) -> Vec<(String, NodeStatus)> {
        self.updates
            .lock()
            .await
            .iter()
            .filter_map(|u| match u {
                RecordedUpdate::Node {
                    node_id, status, ..
                } => Some((node_id.clone(), *status)),
                RecordedUpdate::Execution { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl ProgressPublisher for RecordingPublisher {
    async fn execution_changed(&self, execution: &WorkflowExecution) -> Result<(), PublishError> {
        self.updates.lock().await.push(RecordedUpdate::Execution {
            status: execution.status,
        });
        Ok(())
    }

    async fn node_changed(
        &self,
        _execution: &WorkflowExecution,
        update: &NodeUpdate,
    ) -> Result<(), PublishError> {
        self.updates.lock().await.push(RecordedUpdate::Node {
            node_id: update.node_id.clone(),
            status: update.status,
            data: update.data.clone(),
        });
        Ok(())
    }
}
