use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node kind marker for multi-way branching.
pub const MULTI_IF: &str = "multiIf";

/// Canvas position. Only the x coordinate carries meaning at runtime: it
/// orders branch targets deterministically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// A single node in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    /// Command or registry name. Names beginning with `route_` expose
    /// gateway routes.
    pub func: String,
    /// Declarative command spec: one YAML mapping with `flags`/`args`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    /// Successor node id for linear nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Successor table for branching nodes, keyed "0", "1", ...
    #[serde(default, rename = "nextMap", skip_serializing_if = "Option::is_none")]
    pub next_map: Option<BTreeMap<String, String>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub position: Position,
    /// Positional arguments used when the node carries no `info` spec.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, func: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            func: func.into(),
            info: None,
            next: None,
            next_map: None,
            kind: None,
            position: Position::default(),
            args: Vec::new(),
        }
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn is_multi_if(&self) -> bool {
        self.kind.as_deref() == Some(MULTI_IF)
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_builder() {
        let node = WorkflowNode::new("1", "echo")
            .with_args(vec![json!("hi")])
            .with_next("2")
            .at(40.0, 10.0);
        assert_eq!(node.id, "1");
        assert_eq!(node.func, "echo");
        assert_eq!(node.next.as_deref(), Some("2"));
        assert_eq!(node.position.x, 40.0);
        assert!(!node.is_multi_if());
    }

    #[test]
    fn test_node_deserializes_editor_json() {
        let json = r#"{
            "id": "3",
            "func": "grep",
            "info": "grep:\n  flags:\n    i: null\n  args: [\"pattern\"]",
            "type": "multiIf",
            "nextMap": {"0": "4", "1": "5"},
            "position": {"x": 120, "y": 80}
        }"#;
        let node: WorkflowNode = serde_json::from_str(json).unwrap();
        assert!(node.is_multi_if());
        assert_eq!(node.next_map.as_ref().unwrap()["1"], "5");
        assert_eq!(node.position.x, 120.0);
    }
}
