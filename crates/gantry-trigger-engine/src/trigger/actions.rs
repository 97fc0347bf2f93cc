//! Build lifecycle actions: create, update-ledger, queue-and-start, delete.

use crate::errors::{FactoryError, TriggerError};
use crate::ledger::{self, ParentBuilds};
use crate::traits::{BuildFactory, CommitShaArgs, EventFactory, JobFactory, PipelineFactory, Scm};
use crate::trigger::join::JoinOutcome;
use crate::types::{
    Build, BuildId, BuildStatus, Event, EventId, EventKind, Job, JobId, JobState, NewBuild,
    NewEvent, PipelineId,
};

// ---------------------------------------------------------------------------
// Internal builds
// ---------------------------------------------------------------------------

/// Which job a new internal build belongs to.
#[derive(Debug, Clone, Copy)]
pub enum JobRef<'a> {
    ById(JobId),
    ByName(PipelineId, &'a str),
}

/// Everything needed to create a build inside an existing event.
pub struct InternalBuildSpec<'a> {
    pub job: JobRef<'a>,
    pub event: &'a Event,
    /// Overrides the event sha when set.
    pub sha: Option<&'a str>,
    pub parent_build_id: Vec<BuildId>,
    pub parent_builds: ParentBuilds,
    pub username: &'a str,
    pub scm_context: &'a str,
    pub start: bool,
}

/// Create a build for a job within an event.
///
/// Returns `Ok(None)` when the job is disabled — disabled jobs silently
/// absorb their triggers.
pub async fn create_internal_build(
    spec: InternalBuildSpec<'_>,
    jobs: &dyn JobFactory,
    builds: &dyn BuildFactory,
) -> Result<Option<Build>, FactoryError> {
    let job: Job = match spec.job {
        JobRef::ById(id) => jobs.get_by_id(id).await?,
        JobRef::ByName(pipeline_id, name) => {
            match jobs.get_by_name(pipeline_id, name).await? {
                Some(job) => job,
                None => {
                    return Err(FactoryError::Store {
                        message: format!("no job named {name} in pipeline {pipeline_id}"),
                    })
                }
            }
        }
    };

    if job.state == JobState::Disabled {
        tracing::debug!(job_id = job.id, job_name = %job.name, "job disabled, skipping build");
        return Ok(None);
    }

    let build = builds
        .create(NewBuild {
            job_id: job.id,
            event_id: spec.event.id,
            sha: spec
                .sha
                .map(str::to_string)
                .unwrap_or_else(|| spec.event.sha.clone()),
            username: spec.username.to_string(),
            scm_context: spec.scm_context.to_string(),
            parent_build_id: spec.parent_build_id,
            parent_builds: spec.parent_builds,
            config_pipeline_sha: spec.event.config_pipeline_sha.clone(),
            pr: spec.event.pr.clone(),
            base_branch: spec.event.base_branch.clone(),
            start: spec.start,
        })
        .await?;

    tracing::info!(
        build_id = build.id,
        job_id = job.id,
        event_id = spec.event.id,
        start = spec.start,
        "build created"
    );

    if spec.start {
        return Ok(Some(builds.start(build.id).await?));
    }
    Ok(Some(build))
}

// ---------------------------------------------------------------------------
// External events
// ---------------------------------------------------------------------------

/// Configuration for creating a downstream event on another pipeline.
#[derive(Debug, Clone)]
pub struct ExternalEventArgs {
    pub pipeline_id: PipelineId,
    /// Workflow trigger the new event starts from, e.g. `~sd@1:main`.
    pub start_from: String,
    pub cause_message: String,
    pub parent_build_id: BuildId,
    pub parent_builds: Option<ParentBuilds>,
    pub parent_event_id: Option<EventId>,
    pub group_event_id: Option<EventId>,
}

/// Create an event on another pipeline, resolving its tip commit through
/// the pipeline admin's token.
///
/// The unsealed token flows only into the commit-sha call and is dropped
/// immediately after.
pub async fn create_external_event(
    args: ExternalEventArgs,
    pipelines: &dyn PipelineFactory,
    events: &dyn EventFactory,
    scm: &dyn Scm,
) -> Result<Event, TriggerError> {
    let pipeline = pipelines.get(args.pipeline_id).await?;
    let admin = pipelines.admin(args.pipeline_id).await?;

    let sha = {
        let token = admin.unseal_token().await?;
        scm.get_commit_sha(&CommitShaArgs {
            scm_context: pipeline.scm_context.clone(),
            scm_uri: pipeline.scm_uri.clone(),
            token,
        })
        .await?
    };

    let config_pipeline_sha = match pipeline.config_pipeline_id {
        Some(config_id) => {
            let config_pipeline = pipelines.get(config_id).await?;
            let config_admin = pipelines.admin(config_id).await?;
            let token = config_admin.unseal_token().await?;
            Some(
                scm.get_commit_sha(&CommitShaArgs {
                    scm_context: config_pipeline.scm_context.clone(),
                    scm_uri: config_pipeline.scm_uri.clone(),
                    token,
                })
                .await?,
            )
        }
        None => None,
    };

    let event = events
        .create(NewEvent {
            pipeline_id: args.pipeline_id,
            start_from: args.start_from,
            kind: EventKind::Pipeline,
            cause_message: args.cause_message,
            username: admin.username().to_string(),
            scm_context: pipeline.scm_context.clone(),
            sha,
            config_pipeline_sha,
            parent_build_id: Some(args.parent_build_id),
            parent_builds: args.parent_builds,
            parent_event_id: args.parent_event_id,
            group_event_id: args.group_event_id,
            base_branch: None,
        })
        .await?;

    tracing::info!(
        event_id = event.id,
        pipeline_id = event.pipeline_id,
        parent_build_id = args.parent_build_id,
        "downstream event created"
    );

    Ok(event)
}

// ---------------------------------------------------------------------------
// Ledger updates
// ---------------------------------------------------------------------------

/// The ledger fragments a next-build update merges, left to right. The
/// contribution of the build that just finished comes last and wins.
pub struct LedgerUpdate {
    /// All-unknown entries for the destination's join list.
    pub join_skeleton: ParentBuilds,
    /// The finished build's own ledger.
    pub current_ledger: ParentBuilds,
    /// The finished build's contribution.
    pub contribution: ParentBuilds,
}

/// Record a new upstream contribution on an existing next build.
///
/// The next build's ledger is re-read and re-merged on every attempt so
/// the last writer observes a superset of prior contributions; a lost
/// race surfaces as a conflict and is retried up to `retries` times.
pub async fn update_parent_builds(
    next_build_id: BuildId,
    update: &LedgerUpdate,
    current_build: &Build,
    builds: &dyn BuildFactory,
    retries: u32,
) -> Result<Build, FactoryError> {
    let mut attempt = 0;
    loop {
        let mut fresh = builds.get(next_build_id).await?;

        fresh.parent_builds = ledger::merge_all([
            update.join_skeleton.clone(),
            update.current_ledger.clone(),
            fresh.parent_builds,
            update.contribution.clone(),
        ]);
        if !fresh.parent_build_id.contains(&current_build.id) {
            fresh.parent_build_id.insert(0, current_build.id);
        }

        match builds.update(&fresh).await {
            Ok(updated) => return Ok(updated),
            Err(FactoryError::Conflict { message }) if attempt < retries => {
                attempt += 1;
                tracing::debug!(
                    build_id = next_build_id,
                    attempt,
                    %message,
                    "ledger update lost a race, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Join settlement
// ---------------------------------------------------------------------------

/// Apply a join outcome to a pending next build.
///
/// Incomplete joins are left alone. Poisoned joins delete the pending
/// build (best-effort: a failed delete is logged, not retried). Complete
/// joins queue the build and start it.
pub async fn handle_new_build(
    outcome: JoinOutcome,
    new_build: Build,
    builds: &dyn BuildFactory,
) -> Result<Option<Build>, FactoryError> {
    if !outcome.done {
        return Ok(None);
    }

    if outcome.has_failure {
        tracing::info!(
            build_id = new_build.id,
            event_id = new_build.event_id,
            "join parent failed, removing pending build"
        );
        if let Err(e) = builds.remove(new_build.id).await {
            tracing::warn!(build_id = new_build.id, error = %e, "failed to remove pending build");
        }
        return Ok(None);
    }

    let mut build = new_build;
    build.status = BuildStatus::Queued;
    let build = builds.update(&build).await?;
    let started = builds.start(build.id).await?;
    tracing::info!(build_id = started.id, event_id = started.event_id, "build started");
    Ok(Some(started))
}
