//! Core identifiers and status vocabulary shared across the engine.

use serde::{Deserialize, Serialize};

pub mod entities;
pub mod graph;

pub use entities::{Build, Event, EventKind, Job, JobState, NewBuild, NewEvent, Pipeline, PrInfo};
pub use graph::{WorkflowEdge, WorkflowGraph, WorkflowNode};

/// Identity of a pipeline. The external-trigger grammar `sd@<digits>:<job>`
/// fixes pipeline ids as integers.
pub type PipelineId = u64;
/// Identity of a job within a pipeline.
pub type JobId = u64;
/// Identity of one execution of a pipeline's workflow graph.
pub type EventId = u64;
/// Identity of one execution of one job within one event.
pub type BuildId = u64;

// ---------------------------------------------------------------------------
// Build status
// ---------------------------------------------------------------------------

/// Lifecycle status of a build.
///
/// The wire vocabulary is upper-case (`CREATED`, `QUEUED`, …) to match the
/// orchestrator's status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum BuildStatus {
    Created,
    Queued,
    Running,
    Success,
    Failure,
    Aborted,
    Unstable,
    Collapsed,
}

impl BuildStatus {
    /// Whether the build has reached a final state.
    ///
    /// `Unstable` is terminal: the build finished, even though its result
    /// should not propagate downstream.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Aborted | Self::Unstable | Self::Collapsed
        )
    }

    /// Whether the build counts as a failed join parent.
    ///
    /// `Unstable` counts as failure so that unstable results never start
    /// downstream joins.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::Failure | Self::Aborted | Self::Unstable | Self::Collapsed
        )
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Aborted => "ABORTED",
            Self::Unstable => "UNSTABLE",
            Self::Collapsed => "COLLAPSED",
        };
        write!(f, "{s}")
    }
}
