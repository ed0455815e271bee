//! Error types for the workflow engine.
//!
//! Collaborator traits carry their own error enums next to their definitions
//! (`StoreError`, `InvokeError`, `PublishError`); this module holds the
//! definition-validation errors and the engine's inbound-operation error.

use crate::store::StoreError;
use amber_loom_core::{ExecutionId, WorkflowId};
use std::fmt;

/// One violated definition invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The definition has no nodes at all.
    NoNodes,
    /// No START node is present.
    MissingStartNode,
    /// More than one START node is present.
    MultipleStartNodes {
        /// How many START nodes were found.
        count: usize,
    },
    /// No END node is present.
    MissingEndNode,
    /// Two nodes share the same id.
    DuplicateNodeId { node_id: String },
    /// An edge's source references a node id that does not exist.
    UnknownEdgeSource { edge_id: String, node_id: String },
    /// An edge's target references a node id that does not exist.
    UnknownEdgeTarget { edge_id: String, node_id: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNodes => write!(f, "definition has no nodes"),
            Self::MissingStartNode => write!(f, "definition has no START node"),
            Self::MultipleStartNodes { count } => {
                write!(f, "definition has {count} START nodes, expected exactly one")
            }
            Self::MissingEndNode => write!(f, "definition has no END node"),
            Self::DuplicateNodeId { node_id } => {
                write!(f, "node id '{node_id}' is used more than once")
            }
            Self::UnknownEdgeSource { edge_id, node_id } => {
                write!(f, "edge '{edge_id}' source references unknown node '{node_id}'")
            }
            Self::UnknownEdgeTarget { edge_id, node_id } => {
                write!(f, "edge '{edge_id}' target references unknown node '{node_id}'")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Accumulated result of validating a definition.
///
/// All violations are collected in one pass; `is_valid()` is simply "no
/// errors". An empty report never blocks execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Every invariant violation found, in check order.
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    /// True when no invariant was violated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Violations rendered as messages, for API responses and logs.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "valid");
        }
        write!(f, "{} error(s): ", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Errors surfaced by the engine's inbound operations.
#[derive(Debug)]
pub enum EngineError {
    /// `execute` was asked for a workflow id the source does not know.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The workflow's definition failed re-validation before the run.
    InvalidDefinition { report: ValidationReport },
    /// `cancel` or `get_status` was asked for an unknown execution id.
    ExecutionNotFound { execution_id: ExecutionId },
    /// The checkpoint store failed.
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow {workflow_id} not found")
            }
            Self::InvalidDefinition { report } => {
                write!(f, "workflow definition is invalid: {report}")
            }
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution {execution_id} not found")
            }
            Self::Store(e) => write!(f, "checkpoint store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_messages() {
        assert_eq!(
            ValidationError::MissingStartNode.to_string(),
            "definition has no START node"
        );
        assert_eq!(
            ValidationError::UnknownEdgeTarget {
                edge_id: "e9".into(),
                node_id: "ghost".into(),
            }
            .to_string(),
            "edge 'e9' target references unknown node 'ghost'"
        );
    }

    #[test]
    fn report_display_joins_errors() {
        let report = ValidationReport {
            errors: vec![
                ValidationError::MissingStartNode,
                ValidationError::MissingEndNode,
            ],
        };
        assert!(!report.is_valid());
        let shown = report.to_string();
        assert!(shown.starts_with("2 error(s)"));
        assert!(shown.contains("no START node"));
        assert!(shown.contains("no END node"));
        assert_eq!(report.messages().len(), 2);
    }

    #[test]
    fn empty_report_is_valid() {
        let report = ValidationReport::default();
        assert!(report.is_valid());
        assert_eq!(report.to_string(), "valid");
    }

    #[test]
    fn engine_error_display() {
        let id = WorkflowId::new();
        let err = EngineError::WorkflowNotFound { workflow_id: id };
        assert_eq!(err.to_string(), format!("workflow {id} not found"));
    }
}
