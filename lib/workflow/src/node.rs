//! Node types for workflow definitions.
//!
//! Nodes are authored in the visual editor and arrive as JSON: an UPPERCASE
//! `type` discriminant, camelCase configuration keys, and a canvas position.
//! Node ids are editor-assigned strings, unique within one definition; they
//! appear verbatim in `$output.<nodeId>` input-mapping references, so they are
//! never rewritten on this side.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of work a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    /// Entry point of the graph; exactly one per definition.
    Start,
    /// Terminal marker; passes its input through and stops the branch.
    End,
    /// Invokes an AI agent via the agent collaborator.
    Agent,
    /// Invokes a tool via the tool collaborator.
    Tool,
    /// Branch point; the branching itself lives on the outgoing edges.
    Conditional,
    /// Reshapes data with a transform expression.
    Transform,
    /// Suspends the run and waits for a human response.
    Prompt,
    /// Static text step placed by the editor.
    Text,
    /// File reference step placed by the editor.
    File,
}

impl NodeKind {
    /// Wire name of the kind, as the editor serializes it.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::End => "END",
            Self::Agent => "AGENT",
            Self::Tool => "TOOL",
            Self::Conditional => "CONDITIONAL",
            Self::Transform => "TRANSFORM",
            Self::Prompt => "PROMPT",
            Self::Text => "TEXT",
            Self::File => "FILE",
        }
    }

    /// True for kinds whose dispatch is a no-op: output equals input.
    ///
    /// CONDITIONAL is passthrough on purpose; its branch logic is evaluated
    /// on the outgoing edges, not in the node itself.
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        matches!(self, Self::Start | Self::Text | Self::File | Self::Conditional)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node configuration.
///
/// Only the keys the engine acts on are typed here; everything else the
/// editor stores (colors, collapsed state, legacy keys) is preserved in
/// `extra` and round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// Target agent for AGENT nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Target tool for TOOL nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,

    /// Transform expression for TRANSFORM nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    /// Prompt template for PROMPT nodes, with `{{dotted.path}}` placeholders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Whether a failed dispatch of this node may be retried.
    pub retry: bool,

    /// Retry limit override; the engine default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Declarative input mapping: output key to a `$output.<nodeId>` or
    /// `$variables.<name>` reference (dot paths allowed after either).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_mapping: Option<BTreeMap<String, String>>,

    /// Editor-owned keys the engine does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl NodeConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the agent target.
    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Sets the tool target.
    #[must_use]
    pub fn with_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    /// Sets the transform expression.
    #[must_use]
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Sets the prompt template.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Opts into retry with an explicit attempt limit.
    #[must_use]
    pub fn with_retry(mut self, max_retries: u32) -> Self {
        self.retry = true;
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the declarative input mapping.
    #[must_use]
    pub fn with_input_mapping(mut self, mapping: BTreeMap<String, String>) -> Self {
        self.input_mapping = Some(mapping);
        self
    }
}

/// Canvas coordinates assigned by the editor. Not semantically load-bearing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One step in a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Editor-assigned id, unique within the definition.
    pub id: String,

    /// What this node does.
    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// Optional display name shown in the editor and in progress updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Per-kind configuration.
    #[serde(default)]
    pub config: NodeConfig,

    /// Canvas position.
    #[serde(default)]
    pub position: Position,
}

impl WorkflowNode {
    /// Creates a node with empty configuration at the origin.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            config: NodeConfig::default(),
            position: Position::default(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Name used in progress updates: the display name when set, else the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
