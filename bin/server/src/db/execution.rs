//! Execution checkpoint storage.
//!
//! One row per run. The engine checkpoints by replacing the whole aggregate,
//! so `replace` is an upsert over every mutable column and the per-node
//! records travel inside the `node_executions` JSONB document.

use amber_loom_core::{ExecutionId, UserId, WorkflowId};
use amber_loom_workflow::execution::{ExecutionStatus, NodeExecution, WorkflowExecution};
use amber_loom_workflow::store::{ExecutionStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

use super::to_store_error;

fn status_as_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> Option<ExecutionStatus> {
    match s {
        "pending" => Some(ExecutionStatus::Pending),
        "running" => Some(ExecutionStatus::Running),
        "completed" => Some(ExecutionStatus::Completed),
        "failed" => Some(ExecutionStatus::Failed),
        "cancelled" => Some(ExecutionStatus::Cancelled),
        _ => None,
    }
}

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    user_id: String,
    status: String,
    input: serde_json::Value,
    output: Option<serde_json::Value>,
    error: Option<String>,
    current_node_id: Option<String>,
    node_executions: serde_json::Value,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
}

impl ExecutionRow {
    fn try_into_execution(self) -> Result<WorkflowExecution, sqlx::Error> {
        let id = ExecutionId::from_str(&self.id).map_err(|e| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid execution id '{}': {}", self.id, e),
            )))
        })?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id).map_err(|e| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid workflow id '{}': {}", self.workflow_id, e),
            )))
        })?;
        let user_id = UserId::from_str(&self.user_id).map_err(|e| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid user id '{}': {}", self.user_id, e),
            )))
        })?;
        let status = status_from_str(&self.status).ok_or_else(|| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown execution status '{}'", self.status),
            )))
        })?;
        let node_executions: Vec<NodeExecution> = serde_json::from_value(self.node_executions)
            .map_err(|e| {
                sqlx::Error::Decode(Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid node executions: {e}"),
                )))
            })?;

        Ok(WorkflowExecution {
            id,
            workflow_id,
            user_id,
            status,
            input: self.input,
            output: self.output,
            error: self.error,
            current_node_id: self.current_node_id,
            node_executions,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
        })
    }
}

fn node_executions_json(execution: &WorkflowExecution) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(&execution.node_executions).map_err(|e| StoreError::Serialization {
        message: format!("node executions could not be encoded: {e}"),
    })
}

/// [`ExecutionStore`] backed by the workflow_executions table.
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    /// Creates a store writing to the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let node_executions = node_executions_json(execution)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, user_id, status, input, output, error, current_node_id,
                 node_executions, created_at, started_at, completed_at, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.user_id.to_string())
        .bind(status_as_str(execution.status))
        .bind(&execution.input)
        .bind(&execution.output)
        .bind(&execution.error)
        .bind(&execution.current_node_id)
        .bind(&node_executions)
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(to_store_error)?;

        Ok(())
    }

    async fn replace(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let node_executions = node_executions_json(execution)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, user_id, status, input, output, error, current_node_id,
                 node_executions, created_at, started_at, completed_at, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id)
            DO UPDATE SET status = $4, output = $6, error = $7, current_node_id = $8,
                node_executions = $9, started_at = $11, completed_at = $12, duration_ms = $13
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.user_id.to_string())
        .bind(status_as_str(execution.status))
        .bind(&execution.input)
        .bind(&execution.output)
        .bind(&execution.error)
        .bind(&execution.current_node_id)
        .bind(&node_executions)
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(to_store_error)?;

        Ok(())
    }

    async fn fetch(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, user_id, status, input, output, error, current_node_id,
                   node_executions, created_at, started_at, completed_at, duration_ms
            FROM workflow_executions
            WHERE id = $1
            "#,
        )
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(to_store_error)?;

        match row {
            Some(r) => Ok(Some(r.try_into_execution().map_err(to_store_error)?)),
            None => Ok(None),
        }
    }
}
