//! Workflow graph execution engine for amber-loom.
//!
//! This crate turns a persisted graph definition into a running, stateful
//! execution:
//!
//! - **Graph Model**: validated definitions compiled into petgraph snapshots
//! - **Execution State**: the per-run aggregate with one record per node
//! - **Execution Policy**: next-node resolution, condition evaluation, input
//!   construction, transforms, retry eligibility
//! - **Expressions**: the sandboxed language used by edge conditions and
//!   TRANSFORM scripts
//! - **Engine**: the orchestrator that walks the graph, dispatches by node
//!   type, suspends on PROMPT nodes, checkpoints and publishes progress
//! - **Collaborator seams**: agent/tool invocation, durable storage and
//!   progress publishing as traits, with a JetStream publisher included

pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod execution;
pub mod expr;
pub mod graph;
pub mod invoker;
pub mod nats;
pub mod node;
pub mod policy;
pub mod publisher;
pub mod resume;
pub mod store;

pub use definition::{Workflow, WorkflowDefinition, WorkflowStatus};
pub use edge::WorkflowEdge;
pub use engine::{EngineConfig, ExecutionEngine};
pub use error::{EngineError, ValidationError, ValidationReport};
pub use execution::{ExecutionStatus, NodeExecution, NodeStatus, WorkflowExecution};
pub use graph::GraphSnapshot;
pub use invoker::{AgentInvoker, InvokeError, ToolInvoker};
pub use node::{NodeConfig, NodeKind, WorkflowNode};
pub use publisher::{NodeUpdate, ProgressPublisher, PublishError};
pub use store::{ExecutionStore, StoreError, WorkflowSource};
