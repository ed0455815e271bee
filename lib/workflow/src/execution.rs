//! Execution state for workflow runs.
//!
//! [`WorkflowExecution`] is the aggregate the engine mutates and checkpoints:
//! run-level status plus the ordered [`NodeExecution`] records, one per node
//! id reached. All transitions here are in-memory only; durability is the
//! caller's job (the engine checkpoints after every transition).
//!
//! Run-level transitions requested on a terminal aggregate are no-ops:
//! COMPLETED, FAILED and CANCELLED are final.

use amber_loom_core::{ExecutionId, NodeExecutionId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Run-level status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created and checkpointed, background task not yet started.
    Pending,
    /// The background task is walking the graph.
    Running,
    /// Every reached branch finished without failure.
    Completed,
    /// A node failure exhausted its retry budget.
    Failed,
    /// Cancelled by request.
    Cancelled,
}

impl ExecutionStatus {
    /// True for states with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of one node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Record created, dispatch not yet started.
    Pending,
    /// Dispatch in flight.
    Running,
    /// Dispatch produced an output.
    Completed,
    /// Dispatch failed and the retry budget is spent.
    Failed,
    /// Never dispatched; the branch was not taken.
    Skipped,
    /// Suspended, waiting for a human response.
    WaitingInput,
}

impl NodeStatus {
    /// True once the node can no longer change state.
    ///
    /// WAITING_INPUT is not terminal: a resume moves it back to RUNNING.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Execution record for a single node.
///
/// At most one record exists per node id per run; a retry re-enters the same
/// record (fresh timestamps and output, preserved retry count).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: NodeExecutionId,
    pub node_id: String,
    pub status: NodeStatus,
    pub input: Option<JsonValue>,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Total retries so far; monotonic, never reset by re-entry.
    pub retry_count: u32,
}

impl NodeExecution {
    /// Creates a PENDING record for `node_id`.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            id: NodeExecutionId::new(),
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            input: None,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            retry_count: 0,
        }
    }

    /// Marks the record RUNNING with a fresh attempt: stores the input,
    /// stamps `started_at`, and discards any prior output/error/completion.
    pub fn start(&mut self, input: JsonValue) {
        self.status = NodeStatus::Running;
        self.input = Some(input);
        self.output = None;
        self.error = None;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.duration_ms = None;
    }

    /// Marks the record COMPLETED and computes the duration from `started_at`.
    pub fn complete(&mut self, output: JsonValue) {
        let now = Utc::now();
        self.status = NodeStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds());
    }

    /// Marks the record FAILED with the given error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.status = NodeStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds());
    }

    /// Marks the record WAITING_INPUT.
    pub fn wait(&mut self) {
        self.status = NodeStatus::WaitingInput;
    }

    /// Marks the record SKIPPED.
    pub fn skip(&mut self) {
        self.status = NodeStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }
}

/// One run of a workflow: the aggregate the engine owns and checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub user_id: UserId,
    pub status: ExecutionStatus,
    pub input: JsonValue,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    /// Node most recently entered by the traversal.
    pub current_node_id: Option<String>,
    /// Node records in the order the traversal first reached them.
    pub node_executions: Vec<NodeExecution>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl WorkflowExecution {
    /// Creates a PENDING execution for one run request.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, user_id: UserId, input: JsonValue) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            user_id,
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error: None,
            current_node_id: None,
            node_executions: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// PENDING → RUNNING. No-op from any other state.
    pub fn start(&mut self) {
        if self.status != ExecutionStatus::Pending {
            return;
        }
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// → COMPLETED with the final output. No-op on a terminal aggregate.
    pub fn complete(&mut self, output: JsonValue) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Completed;
        self.output = Some(output);
        self.finish();
    }

    /// → FAILED with the failing node's error verbatim. No-op on a terminal
    /// aggregate.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.finish();
    }

    /// → CANCELLED. No-op on a terminal aggregate.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Cancelled;
        self.finish();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds());
    }

    /// Records `node_id` RUNNING with the given input, creating the record on
    /// first entry and re-entering it in place afterwards (retry, resume).
    /// Also moves the run's current position to this node.
    pub fn start_node(&mut self, node_id: &str, input: JsonValue) {
        self.current_node_id = Some(node_id.to_string());
        match self.node_mut(node_id) {
            Some(record) => record.start(input),
            None => {
                let mut record = NodeExecution::new(node_id);
                record.start(input);
                self.node_executions.push(record);
            }
        }
    }

    /// Records `node_id` COMPLETED with its output. No-op if the node was
    /// never started.
    pub fn complete_node(&mut self, node_id: &str, output: JsonValue) {
        if let Some(record) = self.node_mut(node_id) {
            record.complete(output);
        }
    }

    /// Records `node_id` FAILED, creating the record if the failure happened
    /// before the node could be started.
    pub fn fail_node(&mut self, node_id: &str, error: impl Into<String>) {
        if self.node_mut(node_id).is_none() {
            self.node_executions.push(NodeExecution::new(node_id));
        }
        if let Some(record) = self.node_mut(node_id) {
            record.fail(error);
        }
    }

    /// Records `node_id` WAITING_INPUT. No-op if the node was never started.
    pub fn wait_node(&mut self, node_id: &str) {
        if let Some(record) = self.node_mut(node_id) {
            record.wait();
        }
    }

    /// Records `node_id` SKIPPED, creating the record if needed.
    pub fn skip_node(&mut self, node_id: &str) {
        if self.node_mut(node_id).is_none() {
            self.node_executions.push(NodeExecution::new(node_id));
        }
        if let Some(record) = self.node_mut(node_id) {
            record.skip();
        }
    }

    /// Bumps the node's retry counter.
    pub fn increment_retry(&mut self, node_id: &str) {
        if let Some(record) = self.node_mut(node_id) {
            record.retry_count += 1;
        }
    }

    /// Looks up the record for `node_id`.
    #[must_use]
    pub fn get_node(&self, node_id: &str) -> Option<&NodeExecution> {
        self.node_executions.iter().find(|n| n.node_id == node_id)
    }

    /// Output of the most recently completed node, by completion time.
    #[must_use]
    pub fn latest_completed_output(&self) -> Option<&JsonValue> {
        self.node_executions
            .iter()
            .filter(|n| n.status == NodeStatus::Completed)
            .max_by_key(|n| n.completed_at)
            .and_then(|n| n.output.as_ref())
    }

    fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeExecution> {
        self.node_executions
            .iter_mut()
            .find(|n| n.node_id == node_id)
    }
}
