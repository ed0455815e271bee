//! The graph execution engine.
//!
//! [`ExecutionEngine::execute`] accepts a run, checkpoints it PENDING and
//! returns immediately; an independent tokio task then walks the graph
//! depth-first with an explicit work stack, dispatching each node by type,
//! checkpointing and publishing after every state transition. Sibling
//! branches are strictly serialized: the first qualifying branch and
//! everything downstream of it finishes before the next sibling starts.
//!
//! Cancellation is cooperative. Every run carries a [`CancellationToken`]
//! that is checked before each node dispatch and raced against the resume
//! channel while suspended, so a cancel halts further node starts promptly
//! without interrupting a collaborator call already in flight.
//!
//! Checkpoint writes are load-bearing and a failed write aborts the run;
//! progress publishes are best effort and only logged on failure.

use crate::error::EngineError;
use crate::execution::{NodeStatus, WorkflowExecution};
use crate::graph::GraphSnapshot;
use crate::invoker::{AgentInvoker, ToolInvoker};
use crate::node::{NodeKind, WorkflowNode};
use crate::policy;
use crate::publisher::{NodeUpdate, ProgressPublisher};
use crate::resume::ResumeRegistry;
use crate::store::{ExecutionStore, StoreError, WorkflowSource};
use amber_loom_core::{ExecutionId, UserId, WorkflowId};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry limit for nodes that opt into retry without naming their own
    /// `maxRetries`.
    pub default_max_retries: u32,
    /// How often a single node may be visited in one run before the run is
    /// failed as a suspected cycle.
    pub max_node_visits: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            max_node_visits: 100,
        }
    }
}

/// Where one node visit left the traversal.
enum NodeOutcome {
    /// Node completed; follow its outgoing edges.
    Advanced,
    /// Node completed but terminates its branch (END).
    Terminal,
    /// Node failed with no retry budget left; fails the run.
    Failed(String),
    /// Cancellation observed while the node was suspended.
    Cancelled,
}

/// Result of dispatching one node attempt.
enum Dispatched {
    Output(JsonValue),
    Failed { message: String, retryable: bool },
    Cancelled,
}

/// Orchestrates workflow runs against pluggable collaborators.
///
/// Cloning is cheap and every clone drives the same shared state; the
/// engine hands a clone to each spawned run task.
#[derive(Clone)]
pub struct ExecutionEngine {
    source: Arc<dyn WorkflowSource>,
    store: Arc<dyn ExecutionStore>,
    agents: Arc<dyn AgentInvoker>,
    tools: Arc<dyn ToolInvoker>,
    publisher: Arc<dyn ProgressPublisher>,
    resumes: Arc<ResumeRegistry>,
    cancellations: Arc<Mutex<HashMap<ExecutionId, CancellationToken>>>,
    config: EngineConfig,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(
        source: Arc<dyn WorkflowSource>,
        store: Arc<dyn ExecutionStore>,
        agents: Arc<dyn AgentInvoker>,
        tools: Arc<dyn ToolInvoker>,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self {
            source,
            store,
            agents,
            tools,
            publisher,
            resumes: Arc::new(ResumeRegistry::new()),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Accepts a run: loads the workflow, re-validates its definition,
    /// persists a PENDING execution and spawns the walk as a background
    /// task. Returns the PENDING aggregate without waiting for the run.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::WorkflowNotFound` for an unknown workflow id,
    /// `EngineError::InvalidDefinition` when the stored definition fails
    /// validation (no execution is created in that case), and
    /// `EngineError::Store` when the initial checkpoint cannot be written.
    pub async fn execute(
        &self,
        workflow_id: WorkflowId,
        input: JsonValue,
        user_id: UserId,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self
            .source
            .fetch(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;

        let graph = GraphSnapshot::from_definition(&workflow.definition)
            .map_err(|report| EngineError::InvalidDefinition { report })?;

        let execution = WorkflowExecution::new(workflow_id, user_id, input);
        self.store.create(&execution).await?;

        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .await
            .insert(execution.id, token.clone());

        let engine = self.clone();
        let background = execution.clone();
        tokio::spawn(async move {
            engine.run(graph, background, token).await;
        });

        tracing::info!(execution_id = %execution.id, %workflow_id, "execution accepted");
        Ok(execution)
    }

    /// Current persisted state of an execution, or `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` when the store cannot be read.
    pub async fn get_status(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, EngineError> {
        Ok(self.store.fetch(execution_id).await?)
    }

    /// Requests cooperative cancellation.
    ///
    /// A non-terminal execution is marked CANCELLED immediately; its run
    /// task observes the token before the next dispatch (or while suspended)
    /// and stops. Returns `true` when this call performed the transition,
    /// `false` when the execution was already terminal.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ExecutionNotFound` for an unknown id and
    /// `EngineError::Store` when the store cannot be updated.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<bool, EngineError> {
        let Some(mut execution) = self.store.fetch(execution_id).await? else {
            return Err(EngineError::ExecutionNotFound { execution_id });
        };
        if execution.status.is_terminal() {
            return Ok(false);
        }

        if let Some(token) = self.cancellations.lock().await.get(&execution_id) {
            token.cancel();
        }

        execution.cancel();
        self.store.replace(&execution).await?;
        self.publish_execution(&execution).await;
        self.resumes.clear_execution(execution_id).await;

        tracing::info!(%execution_id, "cancellation requested");
        Ok(true)
    }

    /// Delivers human input to a node suspended in WAITING_INPUT.
    ///
    /// Returns `true` when a suspended node accepted the input. Delivery is
    /// not buffered: `false` means nothing was waiting under
    /// `(execution_id, node_id)` and the input was dropped.
    pub async fn resume_node(
        &self,
        execution_id: ExecutionId,
        node_id: &str,
        response: JsonValue,
    ) -> bool {
        let delivered = self.resumes.deliver(execution_id, node_id, response).await;
        if !delivered {
            tracing::warn!(%execution_id, node_id, "resume input dropped, no node is waiting");
        }
        delivered
    }

    /// Background task body: walks the graph, then releases the run's
    /// cancellation token and any leftover resume waiters.
    async fn run(
        self,
        graph: GraphSnapshot,
        mut execution: WorkflowExecution,
        token: CancellationToken,
    ) {
        let execution_id = execution.id;
        if let Err(error) = self.drive(&graph, &mut execution, &token).await {
            tracing::error!(%execution_id, %error, "checkpoint failed, aborting run");
            execution.fail(format!("checkpoint failed: {error}"));
            if let Err(error) = self.store.replace(&execution).await {
                tracing::error!(%execution_id, %error, "could not persist the aborted run");
            }
        }

        self.cancellations.lock().await.remove(&execution_id);
        self.resumes.clear_execution(execution_id).await;
        tracing::info!(%execution_id, status = ?execution.status, "run finished");
    }

    /// Depth-first walk over the graph.
    ///
    /// The work stack replaces recursion: qualifying targets are pushed in
    /// reverse so the first listed edge is walked, with its whole subtree,
    /// before its siblings. Context variables start as a shallow copy of the
    /// run input (empty when the input is not an object) and absorb every
    /// completed node's output along the way; they become the run output.
    ///
    /// # Errors
    ///
    /// Propagates the first failed checkpoint write.
    async fn drive(
        &self,
        graph: &GraphSnapshot,
        execution: &mut WorkflowExecution,
        token: &CancellationToken,
    ) -> Result<(), StoreError> {
        execution.start();
        self.checkpoint(execution).await?;

        let mut context = match &execution.input {
            JsonValue::Object(map) => map.clone(),
            _ => Map::new(),
        };

        let Some(start) = policy::find_start_node(graph) else {
            // Validation guarantees a START node; this only fires if the
            // definition changed underneath us.
            execution.fail("definition has no START node");
            self.checkpoint(execution).await?;
            return Ok(());
        };

        let mut stack = vec![start.id.clone()];
        let mut visits: HashMap<String, u32> = HashMap::new();

        while let Some(node_id) = stack.pop() {
            if token.is_cancelled() {
                execution.cancel();
                self.checkpoint(execution).await?;
                return Ok(());
            }

            let seen = visits.entry(node_id.clone()).or_insert(0);
            *seen += 1;
            let seen = *seen;
            if seen > self.config.max_node_visits {
                let message = format!(
                    "node '{node_id}' visited {seen} times (limit {}), aborting suspected cycle",
                    self.config.max_node_visits
                );
                tracing::error!(execution_id = %execution.id, node_id, "{message}");
                execution.fail_node(&node_id, message.clone());
                self.checkpoint(execution).await?;
                let mut update = NodeUpdate::new(node_id.as_str(), NodeStatus::Failed)
                    .with_data(json!({"error": message.clone()}));
                if let Some(node) = graph.node(&node_id) {
                    update = update.with_name(node.display_name());
                }
                self.publish_node(execution, update).await;
                execution.fail(message);
                self.checkpoint(execution).await?;
                return Ok(());
            }

            match self
                .run_node(graph, execution, &mut context, &node_id, token)
                .await?
            {
                NodeOutcome::Advanced => {
                    let next = policy::determine_next_nodes(graph, &node_id, execution);
                    for target in next.into_iter().rev() {
                        stack.push(target);
                    }
                }
                NodeOutcome::Terminal => {}
                NodeOutcome::Failed(message) => {
                    execution.fail(message);
                    self.checkpoint(execution).await?;
                    return Ok(());
                }
                NodeOutcome::Cancelled => {
                    execution.cancel();
                    self.checkpoint(execution).await?;
                    return Ok(());
                }
            }
        }

        if token.is_cancelled() {
            execution.cancel();
        } else {
            execution.complete(JsonValue::Object(context));
        }
        self.checkpoint(execution).await?;
        Ok(())
    }

    /// Runs a single node visit, including its retry loop.
    async fn run_node(
        &self,
        graph: &GraphSnapshot,
        execution: &mut WorkflowExecution,
        context: &mut Map<String, JsonValue>,
        node_id: &str,
        token: &CancellationToken,
    ) -> Result<NodeOutcome, StoreError> {
        let Some(node) = graph.node(node_id) else {
            // Targets come from validated edges, so this is unreachable
            // short of a corrupted snapshot.
            return Ok(NodeOutcome::Failed(format!(
                "node '{node_id}' is not part of the graph"
            )));
        };

        let input = policy::build_node_input(node, execution, context);

        if policy::is_end_node(node) {
            execution.start_node(node_id, input.clone());
            execution.complete_node(node_id, input.clone());
            self.checkpoint(execution).await?;
            self.publish_node(
                execution,
                NodeUpdate::new(node_id, NodeStatus::Completed)
                    .with_name(node.display_name())
                    .with_data(input),
            )
            .await;
            return Ok(NodeOutcome::Terminal);
        }

        let max_retries = node
            .config
            .max_retries
            .unwrap_or(self.config.default_max_retries);

        loop {
            execution.start_node(node_id, input.clone());
            self.checkpoint(execution).await?;
            self.publish_node(
                execution,
                NodeUpdate::new(node_id, NodeStatus::Running)
                    .with_name(node.display_name())
                    .with_data(input.clone()),
            )
            .await;

            match self.dispatch(node, execution, input.clone(), token).await? {
                Dispatched::Output(output) => {
                    execution.complete_node(node_id, output.clone());
                    merge_output(context, node_id, &output);
                    self.checkpoint(execution).await?;
                    self.publish_node(
                        execution,
                        NodeUpdate::new(node_id, NodeStatus::Completed)
                            .with_name(node.display_name())
                            .with_data(output),
                    )
                    .await;
                    return Ok(NodeOutcome::Advanced);
                }
                Dispatched::Cancelled => return Ok(NodeOutcome::Cancelled),
                Dispatched::Failed { message, retryable } => {
                    let eligible = retryable
                        && execution
                            .get_node(node_id)
                            .is_some_and(|record| policy::should_retry(node, record, max_retries));
                    if eligible {
                        execution.increment_retry(node_id);
                        self.checkpoint(execution).await?;
                        let retry_count =
                            execution.get_node(node_id).map_or(0, |r| r.retry_count);
                        tracing::warn!(
                            execution_id = %execution.id,
                            node_id,
                            retry_count,
                            error = %message,
                            "node failed, retrying"
                        );
                        continue;
                    }

                    execution.fail_node(node_id, message.clone());
                    self.checkpoint(execution).await?;
                    self.publish_node(
                        execution,
                        NodeUpdate::new(node_id, NodeStatus::Failed)
                            .with_name(node.display_name())
                            .with_data(json!({"error": message.clone()})),
                    )
                    .await;
                    return Ok(NodeOutcome::Failed(message));
                }
            }
        }
    }

    /// One dispatch attempt for a non-END node.
    ///
    /// Branching for CONDITIONAL nodes lives entirely on the outgoing
    /// edges, so the node itself passes through like START/TEXT/FILE.
    async fn dispatch(
        &self,
        node: &WorkflowNode,
        execution: &mut WorkflowExecution,
        input: JsonValue,
        token: &CancellationToken,
    ) -> Result<Dispatched, StoreError> {
        let dispatched = match node.kind {
            NodeKind::Start
            | NodeKind::End
            | NodeKind::Text
            | NodeKind::File
            | NodeKind::Conditional => Dispatched::Output(input),
            NodeKind::Agent => {
                let Some(agent_id) = node.config.agent_id.as_deref() else {
                    return Ok(Dispatched::Failed {
                        message: format!("AGENT node '{}' has no agentId configured", node.id),
                        retryable: false,
                    });
                };
                match self.agents.invoke(agent_id, &input, &node.config).await {
                    Ok(output) => Dispatched::Output(output),
                    Err(error) => Dispatched::Failed {
                        message: error.to_string(),
                        retryable: true,
                    },
                }
            }
            NodeKind::Tool => {
                let Some(tool_id) = node.config.tool_id.as_deref() else {
                    return Ok(Dispatched::Failed {
                        message: format!("TOOL node '{}' has no toolId configured", node.id),
                        retryable: false,
                    });
                };
                match self.tools.invoke(tool_id, &input, &node.config).await {
                    Ok(output) => Dispatched::Output(output),
                    Err(error) => Dispatched::Failed {
                        message: error.to_string(),
                        retryable: true,
                    },
                }
            }
            NodeKind::Transform => match policy::transform(input, &node.config) {
                Ok(output) => Dispatched::Output(output),
                Err(error) => Dispatched::Failed {
                    message: error.to_string(),
                    retryable: true,
                },
            },
            NodeKind::Prompt => {
                return self.suspend_for_input(node, execution, input, token).await;
            }
        };
        Ok(dispatched)
    }

    /// PROMPT node suspension.
    ///
    /// Renders the prompt, registers the one-shot waiter before announcing
    /// the suspension (so a resume racing the announcement is not lost),
    /// records WAITING_INPUT, then parks the run until input arrives or the
    /// token fires. On resume the node is re-recorded RUNNING and completes
    /// with `{prompt, response}`.
    async fn suspend_for_input(
        &self,
        node: &WorkflowNode,
        execution: &mut WorkflowExecution,
        input: JsonValue,
        token: &CancellationToken,
    ) -> Result<Dispatched, StoreError> {
        let template = node.config.prompt.as_deref().unwrap_or_default();
        let prompt = policy::render_prompt(template, &input);

        let receiver = self.resumes.register(execution.id, &node.id).await;

        execution.wait_node(&node.id);
        if let Err(error) = self.checkpoint(execution).await {
            self.resumes.abandon(execution.id, &node.id).await;
            return Err(error);
        }
        self.publish_node(
            execution,
            NodeUpdate::new(node.id.as_str(), NodeStatus::WaitingInput)
                .with_name(node.display_name())
                .with_data(json!({"prompt": prompt.clone()})),
        )
        .await;
        tracing::info!(
            execution_id = %execution.id,
            node_id = %node.id,
            "suspended, waiting for input"
        );

        let response = tokio::select! {
            biased;
            () = token.cancelled() => {
                self.resumes.abandon(execution.id, &node.id).await;
                return Ok(Dispatched::Cancelled);
            }
            received = receiver => match received {
                Ok(response) => response,
                Err(_) => {
                    // Waiter was dropped without a delivery, which only
                    // happens on cancel/teardown races; treat as terminal
                    // for this node.
                    return Ok(Dispatched::Failed {
                        message: format!(
                            "input channel for node '{}' closed before a response arrived",
                            node.id
                        ),
                        retryable: false,
                    });
                }
            },
        };

        execution.start_node(&node.id, input);
        self.checkpoint(execution).await?;
        self.publish_node(
            execution,
            NodeUpdate::new(node.id.as_str(), NodeStatus::Running)
                .with_name(node.display_name()),
        )
        .await;

        Ok(Dispatched::Output(json!({
            "prompt": prompt,
            "response": response,
        })))
    }

    /// Durable write plus a best-effort execution-level progress event.
    async fn checkpoint(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        self.store.replace(execution).await?;
        self.publish_execution(execution).await;
        Ok(())
    }

    async fn publish_execution(&self, execution: &WorkflowExecution) {
        if let Err(error) = self.publisher.execution_changed(execution).await {
            tracing::warn!(execution_id = %execution.id, %error, "progress publish failed");
        }
    }

    async fn publish_node(&self, execution: &WorkflowExecution, update: NodeUpdate) {
        if let Err(error) = self.publisher.node_changed(execution, &update).await {
            tracing::warn!(
                execution_id = %execution.id,
                node_id = %update.node_id,
                %error,
                "progress publish failed"
            );
        }
    }
}

/// Folds a completed node's output into the shared context variables.
/// Objects merge shallowly with later keys overwriting earlier ones; other
/// values land under the node's id; null carries nothing and is dropped.
fn merge_output(context: &mut Map<String, JsonValue>, node_id: &str, output: &JsonValue) {
    match output {
        JsonValue::Object(map) => {
            for (key, value) in map {
                context.insert(key.clone(), value.clone());
            }
        }
        JsonValue::Null => {}
        other => {
            context.insert(node_id.to_string(), other.clone());
        }
    }
}
