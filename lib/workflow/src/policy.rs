//! Stateless execution policy: next-node resolution, condition evaluation,
//! input construction, transforms, retry eligibility and prompt rendering.
//!
//! Everything here is a pure function over the graph snapshot and the
//! execution aggregate; the engine owns all side effects. Condition failures
//! are swallowed to "edge not taken" by contract, transform failures are the
//! caller's problem.

use crate::execution::{NodeExecution, WorkflowExecution};
use crate::expr::{self, Binding, ExprError};
use crate::graph::GraphSnapshot;
use crate::node::{NodeConfig, NodeKind, WorkflowNode};
use serde_json::{Map, Value as JsonValue};

/// Variable name an edge condition sees: the most recently completed node's
/// output. Bare identifiers in a condition resolve as its fields.
pub const OUTPUT_BINDING: &str = "output";

/// Variable name a transform expression sees: the node's built input.
pub const DATA_BINDING: &str = "data";

/// The unique START node of the graph, if present.
#[must_use]
pub fn find_start_node(graph: &GraphSnapshot) -> Option<&WorkflowNode> {
    graph.nodes().find(|node| node.kind == NodeKind::Start)
}

/// True when the node terminates its branch.
#[must_use]
pub fn is_end_node(node: &WorkflowNode) -> bool {
    node.kind == NodeKind::End
}

/// Resolves which nodes to visit after `current_node_id`, in the
/// definition's listed edge order.
///
/// Unconditional edges are always taken. A conditional edge is taken only
/// when its expression is truthy against the most recently completed node's
/// output; an expression that fails to parse or evaluate is logged and
/// treated as false, never aborting the run.
#[must_use]
pub fn determine_next_nodes(
    graph: &GraphSnapshot,
    current_node_id: &str,
    execution: &WorkflowExecution,
) -> Vec<String> {
    let null = JsonValue::Null;
    let basis = execution.latest_completed_output().unwrap_or(&null);
    let binding = Binding::new(OUTPUT_BINDING, basis);

    let mut targets = Vec::new();
    for (edge, target) in graph.outgoing(current_node_id) {
        match &edge.condition {
            None => targets.push(target.id.clone()),
            Some(condition) => match expr::evaluate_source(condition, &binding) {
                Ok(value) if expr::is_truthy(&value) => targets.push(target.id.clone()),
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(
                        edge_id = %edge.id,
                        %error,
                        "edge condition failed to evaluate, treating as false"
                    );
                }
            },
        }
    }
    targets
}

/// Builds the input value for a node about to be dispatched.
///
/// With a declared input mapping, each mapped key resolves a
/// `$output.<nodeId>` or `$variables.<name>` reference by dot path; anything
/// unresolvable maps to null and a value matching neither prefix is copied
/// through literally. Without a mapping the input defaults to the most
/// recently completed node's output, falling back to the shared context
/// variables when nothing has completed yet.
#[must_use]
pub fn build_node_input(
    node: &WorkflowNode,
    execution: &WorkflowExecution,
    context: &Map<String, JsonValue>,
) -> JsonValue {
    if let Some(mapping) = &node.config.input_mapping
        && !mapping.is_empty()
    {
        let mut built = Map::new();
        for (key, reference) in mapping {
            built.insert(key.clone(), resolve_reference(reference, execution, context));
        }
        return JsonValue::Object(built);
    }

    match execution.latest_completed_output() {
        Some(output) => output.clone(),
        None => JsonValue::Object(context.clone()),
    }
}

fn resolve_reference(
    reference: &str,
    execution: &WorkflowExecution,
    context: &Map<String, JsonValue>,
) -> JsonValue {
    if let Some(rest) = reference.strip_prefix("$output.") {
        let (node_id, path) = split_head(rest);
        let Some(output) = execution.get_node(node_id).and_then(|n| n.output.as_ref()) else {
            return JsonValue::Null;
        };
        resolve_tail(output, path)
    } else if let Some(rest) = reference.strip_prefix("$variables.") {
        let (name, path) = split_head(rest);
        let Some(value) = context.get(name) else {
            return JsonValue::Null;
        };
        resolve_tail(value, path)
    } else {
        JsonValue::String(reference.to_string())
    }
}

fn split_head(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (reference, None),
    }
}

fn resolve_tail(value: &JsonValue, path: Option<&str>) -> JsonValue {
    match path {
        Some(path) => walk_dotted(value, path).cloned().unwrap_or(JsonValue::Null),
        None => value.clone(),
    }
}

/// Walks a `a.b.0.c` style path. Returns `None` the moment a step is
/// missing, which callers use to tell "absent" apart from an explicit null.
fn walk_dotted<'v>(value: &'v JsonValue, path: &str) -> Option<&'v JsonValue> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Applies the node's transform expression to `data`, or passes `data`
/// through untouched when no script is configured.
///
/// # Errors
///
/// Expression errors propagate; unlike edge conditions they become a node
/// failure.
pub fn transform(data: JsonValue, config: &NodeConfig) -> Result<JsonValue, ExprError> {
    match &config.script {
        Some(script) => expr::evaluate_source(script, &Binding::new(DATA_BINDING, &data)),
        None => Ok(data),
    }
}

/// True when the node opted into retry and its budget is not yet spent.
#[must_use]
pub fn should_retry(node: &WorkflowNode, record: &NodeExecution, max_retries: u32) -> bool {
    node.config.retry && record.retry_count < max_retries
}

/// Substitutes every `{{dotted.path}}` placeholder with the value at that
/// path in `input`. String values substitute raw, other values as compact
/// JSON; placeholders whose path is absent stay verbatim, braces included.
#[must_use]
pub fn render_prompt(template: &str, input: &JsonValue) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        rendered.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            // Unclosed placeholder; emit the remainder untouched.
            rendered.push_str(&rest[open..]);
            return rendered;
        };

        let placeholder = &after_open[..close];
        match walk_dotted(input, placeholder.trim()) {
            Some(value) => rendered.push_str(&placeholder_text(value)),
            None => rendered.push_str(&rest[open..open + close + 4]),
        }
        rest = &after_open[close + 2..];
    }

    rendered.push_str(rest);
    rendered
}

fn placeholder_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
