//! Edge types for workflow definitions.
//!
//! An edge connects two nodes by id and optionally carries a condition
//! expression. Unconditional edges are always taken; conditional edges are
//! taken only when the expression evaluates truthy against the most recently
//! completed node's output (see the policy module).

use serde::{Deserialize, Serialize};

/// A directed connection between two nodes in a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    /// Editor-assigned edge id.
    pub id: String,

    /// Source node id.
    pub source: String,

    /// Target node id.
    pub target: String,

    /// Condition expression; absent means the edge is unconditional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl WorkflowEdge {
    /// Creates an unconditional edge.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    /// Attaches a condition expression.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// True when this edge carries a condition.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}
