//! Workflow-graph queries.
//!
//! The engine consumes graph snapshots read-only through two questions:
//! which jobs follow a finished trigger, and which sources an AND join
//! waits on.

use crate::trigger::name::{is_pr, trim_job_name};
use crate::types::WorkflowGraph;

/// Jobs triggered when `trigger` completes.
///
/// An edge matches on its bare source name or its `~`-decorated OR form.
/// When `trigger` is a pull-request job and PR chaining is on, edges from
/// the canonical job name match too and the destinations inherit the PR
/// prefix, so the whole chain runs in the PR's namespace.
pub fn next_jobs(graph: &WorkflowGraph, trigger: &str, chain_pr: bool) -> Vec<String> {
    let mut next = Vec::new();
    let mut push = |name: String| {
        if !next.contains(&name) {
            next.push(name);
        }
    };

    for edge in &graph.edges {
        if edge.src == trigger || edge.src.strip_prefix('~') == Some(trigger) {
            push(edge.dest.clone());
        }
    }

    if chain_pr && is_pr(trigger) {
        let canonical = trim_job_name(trigger);
        let prefix = &trigger[..trigger.len() - canonical.len()];
        for edge in &graph.edges {
            if edge.src == canonical || edge.src.strip_prefix('~') == Some(canonical) {
                push(format!("{prefix}{}", edge.dest));
            }
        }
    }

    next
}

/// Sources the AND join on `job_name` waits for.
///
/// Only edges flagged as join edges participate; OR sources launch the
/// destination on their own and are excluded. Returns an empty list for
/// sequential and OR-only destinations.
pub fn src_for_join(graph: &WorkflowGraph, job_name: &str) -> Vec<String> {
    let canonical = trim_job_name(job_name);
    graph
        .edges
        .iter()
        .filter(|edge| edge.join && edge.dest == canonical)
        .map(|edge| edge.src.clone())
        .collect()
}
