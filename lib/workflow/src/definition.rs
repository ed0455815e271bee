//! Workflow definitions and their validation.
//!
//! A [`Workflow`] is the long-lived, user-edited record; its
//! [`WorkflowDefinition`] is the node/edge graph the editor produces. The
//! engine treats definitions as read-only: it takes a point-in-time snapshot
//! at execution start and never writes one back.

use crate::edge::WorkflowEdge;
use crate::error::{ValidationError, ValidationReport};
use crate::node::{NodeKind, WorkflowNode};
use amber_loom_core::{UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Publication state of a workflow, as shown in the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Inactive,
    Archived,
}

/// The node/edge graph of one workflow, as authored in the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,

    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,

    /// Editor schema version of this definition.
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl Default for WorkflowDefinition {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            version: default_version(),
        }
    }
}

impl WorkflowDefinition {
    /// Creates a definition from nodes and edges.
    #[must_use]
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self {
            nodes,
            edges,
            version: default_version(),
        }
    }

    /// Checks every structural invariant and accumulates all violations.
    ///
    /// Invariants: at least one node, exactly one START, at least one END,
    /// unique node ids, and every edge endpoint referencing an existing node.
    /// Acyclicity is deliberately not required; the engine bounds repeated
    /// visits at traversal time instead.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();

        if self.nodes.is_empty() {
            errors.push(ValidationError::NoNodes);
        }

        let start_count = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Start)
            .count();
        if !self.nodes.is_empty() {
            match start_count {
                0 => errors.push(ValidationError::MissingStartNode),
                1 => {}
                count => errors.push(ValidationError::MultipleStartNodes { count }),
            }

            if !self.nodes.iter().any(|n| n.kind == NodeKind::End) {
                errors.push(ValidationError::MissingEndNode);
            }
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(ValidationError::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
            }
        }

        for edge in &self.edges {
            if !seen.contains(edge.source.as_str()) {
                errors.push(ValidationError::UnknownEdgeSource {
                    edge_id: edge.id.clone(),
                    node_id: edge.source.clone(),
                });
            }
            if !seen.contains(edge.target.as_str()) {
                errors.push(ValidationError::UnknownEdgeTarget {
                    edge_id: edge.id.clone(),
                    node_id: edge.target.clone(),
                });
            }
        }

        ValidationReport { errors }
    }
}

/// A user's workflow: metadata plus the editable graph definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner_id: UserId,
    pub status: WorkflowStatus,
    pub definition: WorkflowDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates a DRAFT workflow owned by `owner_id`.
    #[must_use]
    pub fn new(name: impl Into<String>, owner_id: UserId, definition: WorkflowDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: None,
            owner_id,
            status: WorkflowStatus::Draft,
            definition,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the publication status.
    #[must_use]
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }
}
