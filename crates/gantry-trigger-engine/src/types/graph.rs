//! Workflow-graph snapshot types.
//!
//! An event carries an immutable graph snapshot; the engine only queries it.
//! Graph construction and validation happen upstream of this crate.

use serde::{Deserialize, Serialize};

use super::JobId;

/// A workflow graph: jobs as nodes, trigger relationships as edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkflowGraph {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

/// One node of the workflow graph.
///
/// Internal nodes carry the id of the job they name. External nodes
/// (`sd@<pipeline>:<job>`) reference a job in another pipeline and carry
/// no local id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkflowNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    pub name: String,
}

/// A directed trigger edge between two named nodes.
///
/// Sources prefixed with `~` are OR triggers: any one of them launches the
/// destination. Edges with `join` set participate in an AND join: the
/// destination waits for all of its join sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkflowEdge {
    pub src: String,
    pub dest: String,
    #[serde(default)]
    pub join: bool,
}

impl WorkflowGraph {
    /// Look up a node by exact name.
    pub fn node_by_name(&self, name: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Look up the node representing an external job, matching any
    /// decoration (`sd@2:deploy` and `~sd@2:deploy` both match).
    pub fn node_containing(&self, fragment: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.name.contains(fragment))
    }
}
