//! Persistence seams the engine runs against.
//!
//! The engine never talks to a database directly. It reads definitions
//! through [`WorkflowSource`] and checkpoints run state through
//! [`ExecutionStore`]; the server binary provides Postgres-backed
//! implementations and the in-memory pair here backs tests and embedded use.

use crate::definition::Workflow;
use crate::execution::WorkflowExecution;
use amber_loom_core::{ExecutionId, WorkflowId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;

/// Failure talking to the backing store.
#[derive(Debug)]
pub enum StoreError {
    /// The backend rejected or could not perform the operation.
    Backend { message: String },
    /// Stored document could not be decoded (or encoded for storage).
    Serialization { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { message } => write!(f, "store backend error: {message}"),
            Self::Serialization { message } => {
                write!(f, "stored document could not be decoded: {message}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Read-only access to workflow definitions.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `StoreError` when the backend cannot be reached or the stored
    /// definition fails to decode. A missing workflow is `Ok(None)`.
    async fn fetch(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, StoreError>;
}

/// Durable home for execution state.
///
/// `replace` persists the whole aggregate; the engine calls it at every
/// status transition so a crash loses at most the step in flight.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persists a brand-new execution.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` when the id already exists or the
    /// backend cannot be reached.
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    /// Overwrites the stored state for an existing execution.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the backend cannot be reached.
    async fn replace(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns `StoreError` when the backend cannot be reached or the stored
    /// state fails to decode. A missing execution is `Ok(None)`.
    async fn fetch(&self, execution_id: ExecutionId)
    -> Result<Option<WorkflowExecution>, StoreError>;
}

/// Map-backed [`WorkflowSource`].
#[derive(Default)]
pub struct InMemoryWorkflowSource {
    workflows: Mutex<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, workflow: Workflow) {
        self.workflows.lock().await.insert(workflow.id, workflow);
    }
}

#[async_trait]
impl WorkflowSource for InMemoryWorkflowSource {
    async fn fetch(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.lock().await.get(&workflow_id).cloned())
    }
}

/// Map-backed [`ExecutionStore`].
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: Mutex<HashMap<ExecutionId, WorkflowExecution>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of executions ever created.
    pub async fn count(&self) -> usize {
        self.executions.lock().await.len()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let mut executions = self.executions.lock().await;
        if executions.contains_key(&execution.id) {
            return Err(StoreError::Backend {
                message: format!("execution '{}' already exists", execution.id),
            });
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn replace(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        self.executions
            .lock()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn fetch(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        Ok(self.executions.lock().await.get(&execution_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowDefinition;
    use crate::execution::ExecutionStatus;
    use amber_loom_core::UserId;
    use serde_json::json;

    #[tokio::test]
    async fn workflow_source_roundtrip() {
        let source = InMemoryWorkflowSource::new();
        let workflow = Workflow::new(
            "demo",
            UserId::new(),
            WorkflowDefinition::default(),
        );
        let id = workflow.id;

        source.insert(workflow).await;

        let fetched = source.fetch(id).await.unwrap().expect("stored workflow");
        assert_eq!(fetched.name, "demo");
        assert!(source.fetch(WorkflowId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_store_create_then_replace() {
        let store = InMemoryExecutionStore::new();
        let mut execution =
            WorkflowExecution::new(WorkflowId::new(), UserId::new(), json!({"a": 1}));
        let id = execution.id;

        store.create(&execution).await.unwrap();
        assert_eq!(store.count().await, 1);

        execution.start();
        store.replace(&execution).await.unwrap();

        let fetched = store.fetch(id).await.unwrap().expect("stored execution");
        assert_eq!(fetched.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryExecutionStore::new();
        let execution = WorkflowExecution::new(WorkflowId::new(), UserId::new(), json!({}));

        store.create(&execution).await.unwrap();
        let err = store.create(&execution).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }));
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn missing_execution_is_none() {
        let store = InMemoryExecutionStore::new();
        assert!(store.fetch(ExecutionId::new()).await.unwrap().is_none());
    }
}
