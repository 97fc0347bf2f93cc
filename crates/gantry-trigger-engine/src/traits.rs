//! Collaborator contracts consumed by the trigger engine.
//!
//! All persistence and source-control access happens behind these async
//! traits. The engine owns no mutable state of its own; the in-memory
//! implementations in `defaults/` exist for tests and lightweight
//! embedding.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{FactoryError, ScmError};
use crate::types::{
    Build, BuildId, BuildStatus, Event, EventId, Job, JobId, NewBuild, NewEvent, Pipeline,
    PipelineId,
};

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn get(&self, id: PipelineId) -> Result<Pipeline, FactoryError>;

    /// The admin principal for a pipeline, able to mint a source-control
    /// token on its behalf.
    async fn admin(&self, id: PipelineId) -> Result<Arc<dyn AdminPrincipal>, FactoryError>;
}

/// A principal acting for a pipeline.
///
/// The unsealed token is a short-lived secret scoped to a single event
/// creation. Implementations and callers must never log it or cache it
/// across calls.
#[async_trait]
pub trait AdminPrincipal: Send + Sync {
    fn username(&self) -> &str;

    async fn unseal_token(&self) -> Result<String, ScmError>;
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Filter for event listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub pipeline_id: Option<PipelineId>,
    pub parent_event_id: Option<EventId>,
    pub group_event_id: Option<EventId>,
}

#[async_trait]
pub trait EventFactory: Send + Sync {
    async fn get(&self, id: EventId) -> Result<Event, FactoryError>;

    /// Matching events, most recent first.
    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, FactoryError>;

    async fn create(&self, payload: NewEvent) -> Result<Event, FactoryError>;

    /// All builds belonging to an event.
    async fn builds(&self, id: EventId) -> Result<Vec<Build>, FactoryError>;
}

// ---------------------------------------------------------------------------
// Builds
// ---------------------------------------------------------------------------

/// Sort direction for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Filter for build listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct BuildFilter {
    pub event_id: Option<EventId>,
    pub job_id: Option<JobId>,
    pub status: Option<BuildStatus>,
    pub sort: SortOrder,
}

#[async_trait]
pub trait BuildFactory: Send + Sync {
    async fn get(&self, id: BuildId) -> Result<Build, FactoryError>;

    async fn list(&self, filter: &BuildFilter) -> Result<Vec<Build>, FactoryError>;

    /// The most recent build per job across every event of a restart
    /// lineage (all events sharing `group_event_id`).
    async fn latest_builds(&self, group_event_id: EventId) -> Result<Vec<Build>, FactoryError>;

    async fn create(&self, payload: NewBuild) -> Result<Build, FactoryError>;

    /// Persist a modified build record.
    ///
    /// Implementations compare `build.revision` against the stored record
    /// and return [`FactoryError::Conflict`] when the caller's read is
    /// stale. The persisted record carries the bumped revision.
    async fn update(&self, build: &Build) -> Result<Build, FactoryError>;

    /// Flag a build ready to run. Scheduling is out of scope; this only
    /// transitions the record to `QUEUED`.
    async fn start(&self, id: BuildId) -> Result<Build, FactoryError>;

    async fn remove(&self, id: BuildId) -> Result<(), FactoryError>;
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[async_trait]
pub trait JobFactory: Send + Sync {
    async fn get_by_id(&self, id: JobId) -> Result<Job, FactoryError>;

    /// Look up a job by canonical name within a pipeline. Returns `None`
    /// when the pipeline has no such job.
    async fn get_by_name(
        &self,
        pipeline_id: PipelineId,
        name: &str,
    ) -> Result<Option<Job>, FactoryError>;
}

// ---------------------------------------------------------------------------
// Source control
// ---------------------------------------------------------------------------

/// Arguments for resolving the tip commit of a repository.
#[derive(Debug, Clone)]
pub struct CommitShaArgs {
    pub scm_context: String,
    pub scm_uri: String,
    /// Unsealed admin token. Short-lived; never logged.
    pub token: String,
}

#[async_trait]
pub trait Scm: Send + Sync {
    async fn get_commit_sha(&self, args: &CommitShaArgs) -> Result<String, ScmError>;
}
