//! Next-build resolution.
//!
//! When a join destination may already have a pending build, the engine
//! must find it rather than create a duplicate. Candidates come from the
//! current restart lineage and from sibling events across pipeline
//! boundaries.

use futures::future::try_join_all;

use crate::errors::FactoryError;
use crate::traits::{BuildFactory, BuildFilter, EventFactory, EventFilter, JobFactory, SortOrder};
use crate::trigger::name::trim_job_name;
use crate::types::{Build, BuildStatus, Event, EventId, JobId, PipelineId, WorkflowGraph};

/// Builds of the event's restart lineage: the most recent build per job
/// across every event sharing the group event id.
pub async fn finished_builds(
    event: &Event,
    builds: &dyn BuildFactory,
) -> Result<Vec<Build>, FactoryError> {
    builds.latest_builds(event.group_event_id).await
}

/// Builds of sibling events: children of `parent_event_id` in other
/// pipelines. These carry the contributions a cross-pipeline join needs to
/// consolidate.
pub async fn parallel_builds(
    parent_event_id: EventId,
    exclude_pipeline_id: PipelineId,
    events: &dyn EventFactory,
) -> Result<Vec<Build>, FactoryError> {
    let siblings = events
        .list(&EventFilter {
            parent_event_id: Some(parent_event_id),
            ..Default::default()
        })
        .await?;

    let loads = siblings
        .iter()
        .filter(|e| e.pipeline_id != exclude_pipeline_id)
        .map(|e| events.builds(e.id));

    Ok(try_join_all(loads).await?.into_iter().flatten().collect())
}

/// All candidate builds an internal resolution considers: the restart
/// lineage plus, when the event has a parent, the sibling events' builds.
pub async fn candidate_builds(
    event: &Event,
    builds: &dyn BuildFactory,
    events: &dyn EventFactory,
) -> Result<Vec<Build>, FactoryError> {
    let mut candidates = finished_builds(event, builds).await?;
    if let Some(parent_event_id) = event.parent_event_id {
        let mut siblings = parallel_builds(parent_event_id, event.pipeline_id, events).await?;
        candidates.append(&mut siblings);
    }
    Ok(candidates)
}

/// Resolve the job id behind a graph node, falling back to a factory
/// lookup for nodes that carry no local id.
pub async fn job_id_for_node(
    graph: &WorkflowGraph,
    pipeline_id: PipelineId,
    job_name: &str,
    jobs: &dyn JobFactory,
) -> Result<Option<JobId>, FactoryError> {
    let canonical = trim_job_name(job_name);
    if let Some(node) = graph.node_by_name(canonical) {
        if let Some(id) = node.id {
            return Ok(Some(id));
        }
    }
    Ok(jobs
        .get_by_name(pipeline_id, canonical)
        .await?
        .map(|job| job.id))
}

/// Find the existing next build for an internal destination: the candidate
/// for the destination's job within the current event. `None` means the
/// next build must be created.
pub async fn find_internal(
    next_job_name: &str,
    event: &Event,
    candidates: &[Build],
    jobs: &dyn JobFactory,
) -> Result<Option<Build>, FactoryError> {
    let Some(job_id) = job_id_for_node(
        &event.workflow_graph,
        event.pipeline_id,
        next_job_name,
        jobs,
    )
    .await?
    else {
        tracing::warn!(
            pipeline_id = event.pipeline_id,
            job_name = %next_job_name,
            "no workflow node for next job"
        );
        return Ok(None);
    };

    Ok(candidates
        .iter()
        .find(|b| b.job_id == job_id && b.event_id == event.id)
        .cloned())
}

/// Find the pending next build for an external destination: the most
/// recently created `CREATED` build of the target job within the given
/// event. `None` means the next build must be created.
pub async fn find_external(
    pipeline_id: PipelineId,
    job_name: &str,
    event_id: EventId,
    builds: &dyn BuildFactory,
    jobs: &dyn JobFactory,
) -> Result<Option<Build>, FactoryError> {
    let Some(job) = jobs.get_by_name(pipeline_id, trim_job_name(job_name)).await? else {
        tracing::warn!(pipeline_id, job_name = %job_name, "external job not found");
        return Ok(None);
    };

    let pending = builds
        .list(&BuildFilter {
            event_id: Some(event_id),
            job_id: Some(job.id),
            status: Some(BuildStatus::Created),
            sort: SortOrder::Descending,
        })
        .await?;

    Ok(pending.into_iter().next())
}
