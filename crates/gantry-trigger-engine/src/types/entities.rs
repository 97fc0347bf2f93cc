//! Pipeline, job, event, and build records.
//!
//! These are plain data snapshots handed across the factory traits. All
//! mutation goes through the factories — records never carry behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::{BuildId, BuildStatus, EventId, JobId, PipelineId};
use crate::ledger::ParentBuilds;
use crate::types::graph::WorkflowGraph;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A versioned CI configuration tied to a source-control repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Pipeline {
    pub id: PipelineId,
    pub scm_context: String,
    pub scm_uri: String,
    /// Pipeline that owns this pipeline's configuration, when split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_pipeline_id: Option<PipelineId>,
    /// Whether pull-request builds chain into downstream jobs.
    #[serde(default)]
    pub chain_pr: bool,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Whether a job accepts new builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Enabled,
    Disabled,
}

/// One job within a pipeline.
///
/// A name containing `:` denotes a pull-request job (`PR-<n>:<job>`); the
/// portion after the `:` is the canonical name for workflow-graph lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Job {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub state: JobState,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Pull-request context attached to an event or forwarded into a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PrInfo {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub branch_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Provider-specific PR metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

/// What caused an event to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Pipeline,
    Pr,
}

/// One execution of a pipeline's workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Event {
    pub id: EventId,
    pub pipeline_id: PipelineId,
    /// Root of the restart chain. Equals the event's own id for root events
    /// and is invariant across restarts.
    pub group_event_id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<EventId>,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_pipeline_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<PrInfo>,
    /// Immutable graph snapshot taken at event creation.
    pub workflow_graph: WorkflowGraph,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating an event through the event factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NewEvent {
    pub pipeline_id: PipelineId,
    /// Workflow trigger the new event starts from, e.g. `~sd@1:main`.
    pub start_from: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub cause_message: String,
    pub username: String,
    pub scm_context: String,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_pipeline_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_build_id: Option<BuildId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_builds: Option<ParentBuilds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_event_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// One execution of one job within one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Build {
    pub id: BuildId,
    pub event_id: EventId,
    pub job_id: JobId,
    pub status: BuildStatus,
    pub sha: String,
    /// Upstream builds that caused this build, most recent first. Inbound
    /// payloads may carry a bare scalar; it is promoted to a list here.
    #[serde(default, deserialize_with = "scalar_or_list")]
    pub parent_build_id: Vec<BuildId>,
    /// Which upstream builds have contributed so far, per pipeline.
    #[serde(default)]
    pub parent_builds: ParentBuilds,
    /// Bumped on every persisted update. A stale revision loses the write.
    #[serde(default)]
    pub revision: u64,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a build through the build factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NewBuild {
    pub job_id: JobId,
    pub event_id: EventId,
    pub sha: String,
    pub username: String,
    pub scm_context: String,
    #[serde(default, deserialize_with = "scalar_or_list")]
    pub parent_build_id: Vec<BuildId>,
    #[serde(default)]
    pub parent_builds: ParentBuilds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_pipeline_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<PrInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    /// Whether the build should be queued immediately after creation.
    #[serde(default = "default_true")]
    pub start: bool,
}

fn default_true() -> bool {
    true
}

/// Accept `7` or `[7, 3]` for an upstream-build list.
fn scalar_or_list<'de, D>(deserializer: D) -> Result<Vec<BuildId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ScalarOrList {
        Scalar(BuildId),
        List(Vec<BuildId>),
    }

    Ok(match ScalarOrList::deserialize(deserializer)? {
        ScalarOrList::Scalar(id) => vec![id],
        ScalarOrList::List(ids) => ids,
    })
}
