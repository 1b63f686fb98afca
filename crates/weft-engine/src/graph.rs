use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use weft_core::error::{Result, WeftError};

use crate::node::{Edge, WorkflowNode, MULTI_IF};

/// A workflow: nodes plus edges, compiled into per-node successor links
/// before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Parse a workflow from its JSON file format and compile it.
    pub fn from_json(json: &str) -> Result<Workflow> {
        let workflow: Workflow = serde_json::from_str(json)
            .map_err(|e| WeftError::Workflow(format!("workflow parse error: {}", e)))?;
        Ok(workflow.compile())
    }

    /// Load and compile a workflow file.
    pub fn load(path: &Path) -> Result<Workflow> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Derive `next`/`next_map` on every node from the edge list.
    ///
    /// Applied once at load time; traversal never recomputes successor
    /// links. A node with more than one outgoing edge becomes a multiIf
    /// node whose targets are keyed "0", "1", ... in ascending x-position
    /// order, the sole tie-break rule.
    pub fn compile(mut self) -> Workflow {
        let positions: HashMap<&str, f64> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.position.x))
            .collect();

        let mut children: HashMap<&str, Vec<String>> = HashMap::new();
        for edge in &self.edges {
            children
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.clone());
        }

        type Successors = (Option<String>, Option<BTreeMap<String, String>>);
        let mut compiled: HashMap<String, Successors> = HashMap::new();
        for (source, mut targets) in children {
            if targets.len() > 1 {
                targets.sort_by(|a, b| {
                    let xa = positions.get(a.as_str()).copied().unwrap_or(0.0);
                    let xb = positions.get(b.as_str()).copied().unwrap_or(0.0);
                    xa.partial_cmp(&xb).unwrap_or(Ordering::Equal)
                });
                let map = targets
                    .into_iter()
                    .enumerate()
                    .map(|(i, target)| (i.to_string(), target))
                    .collect();
                compiled.insert(source.to_string(), (None, Some(map)));
            } else if let Some(target) = targets.pop() {
                compiled.insert(source.to_string(), (Some(target), None));
            }
        }

        for node in &mut self.nodes {
            if let Some((next, next_map)) = compiled.remove(&node.id) {
                if next_map.is_some() {
                    node.kind = Some(MULTI_IF.to_string());
                }
                node.next = next;
                node.next_map = next_map;
            }
        }
        self
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
