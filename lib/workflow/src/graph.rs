//! Runtime graph snapshot used during one execution.
//!
//! Built once from a validated definition when a run starts; immutable for
//! the lifetime of that run. Backed by a petgraph `DiGraph` with a node-id
//! index map so traversal does lookups by the editor-assigned string ids.

use crate::definition::WorkflowDefinition;
use crate::edge::WorkflowEdge;
use crate::error::ValidationReport;
use crate::node::WorkflowNode;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// Immutable graph view of one workflow definition.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    graph: DiGraph<WorkflowNode, WorkflowEdge>,
    indices: HashMap<String, NodeIndex>,
}

impl GraphSnapshot {
    /// Validates the definition and builds the snapshot.
    ///
    /// # Errors
    ///
    /// Returns the full validation report if any invariant is violated; a
    /// snapshot is never built over an invalid definition.
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self, ValidationReport> {
        let report = definition.validate();
        if !report.is_valid() {
            return Err(report);
        }

        let mut graph = DiGraph::new();
        let mut indices = HashMap::with_capacity(definition.nodes.len());

        for node in &definition.nodes {
            let index = graph.add_node(node.clone());
            indices.insert(node.id.clone(), index);
        }

        // Validation guarantees both endpoints exist. Edge insertion order is
        // definition order, which `outgoing` relies on.
        for edge in &definition.edges {
            if let (Some(&source), Some(&target)) =
                (indices.get(&edge.source), indices.get(&edge.target))
            {
                graph.add_edge(source, target, edge.clone());
            }
        }

        Ok(Self { graph, indices })
    }

    /// Looks up a node by its definition id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.indices.get(node_id).map(|&index| &self.graph[index])
    }

    /// Iterates all nodes in definition order.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.graph.node_weights()
    }

    /// Outgoing edges of a node paired with their target nodes, in the
    /// definition's listed edge order. Unknown ids yield nothing.
    ///
    /// petgraph walks outgoing edges newest-first, so the edges are re-sorted
    /// by edge index (insertion order) to restore the listed order.
    #[must_use]
    pub fn outgoing(&self, node_id: &str) -> Vec<(&WorkflowEdge, &WorkflowNode)> {
        let Some(&index) = self.indices.get(node_id) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .collect();
        edges.sort_by_key(|edge| edge.id());

        edges
            .into_iter()
            .map(|edge| (edge.weight(), &self.graph[edge.target()]))
            .collect()
    }

    /// Number of nodes in the snapshot.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges in the snapshot.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
