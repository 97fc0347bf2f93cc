//! External re-entry handling.
//!
//! A pipeline that triggered another pipeline may be triggered back: the
//! downstream flow re-enters the pipeline the flow originated from. The
//! originating event already exists, so instead of opening a fresh event
//! the engine reconciles against it — updating its pending build,
//! creating the missing one, or forking a restart event when the prior
//! build already ran.

use crate::errors::TriggerError;
use crate::ledger;
use crate::trigger::actions::{
    create_external_event, create_internal_build, update_parent_builds, ExternalEventArgs,
    InternalBuildSpec, JobRef, LedgerUpdate,
};
use crate::trigger::join::{self, JoinOutcome};
use crate::trigger::name::{external_trigger_name, tilde_trigger_name, trim_job_name};
use crate::trigger::resolve;
use crate::trigger::TriggerContext;
use crate::types::{Build, BuildId, BuildStatus, Event, EventId, Job, Pipeline, PipelineId};
use crate::workflow;

/// Everything the re-entry path needs about the finished build and the
/// external destination.
pub(crate) struct ReentryInput<'a> {
    pub current_pipeline: &'a Pipeline,
    pub current_job: &'a Job,
    pub current_build: &'a Build,
    pub current_event: &'a Event,
    pub external_pipeline_id: PipelineId,
    /// The destination job inside the external pipeline.
    pub external_job_name: &'a str,
    /// The event of the originating flow on the external pipeline.
    pub external_event_id: EventId,
    /// Ledger fragments computed for this next job.
    pub update: &'a LedgerUpdate,
    pub username: &'a str,
    pub scm_context: &'a str,
}

/// The event a re-entering trigger reconciles against, if any.
///
/// Re-entry applies only when the finished build's own ledger knows which
/// external event the flow came from; a skeleton entry without an event id
/// is not a re-entry.
pub(crate) fn reentry_event_id(build: &Build, pipeline_id: PipelineId) -> Option<EventId> {
    build
        .parent_builds
        .get(&pipeline_id)
        .and_then(|contribution| contribution.event_id)
}

pub(crate) async fn handle(
    ctx: &TriggerContext<'_>,
    input: ReentryInput<'_>,
) -> Result<Option<Build>, TriggerError> {
    let external_event = ctx.events.get(input.external_event_id).await?;
    let graph = &external_event.workflow_graph;
    let canonical = trim_job_name(input.external_job_name);
    let external_name = external_trigger_name(input.external_pipeline_id, canonical);

    let target = graph
        .node_by_name(canonical)
        .or_else(|| graph.node_containing(&external_name))
        .ok_or_else(|| TriggerError::Graph {
            message: format!(
                "event {} has no node for {external_name}",
                external_event.id
            ),
        })?;

    // Candidates: the external lineage, whatever it triggered sideways,
    // and the event the finishing build belongs to.
    let mut candidates = resolve::finished_builds(&external_event, ctx.builds).await?;
    candidates.extend(
        resolve::parallel_builds(external_event.id, external_event.pipeline_id, ctx.events)
            .await?,
    );
    if input.current_event.id != external_event.id {
        candidates.extend(ctx.events.builds(input.current_event.id).await?);
    }

    // Patch the travelling ledger from what the external flow already ran.
    let mut filled = ledger::merge_all([
        input.update.join_skeleton.clone(),
        input.update.current_ledger.clone(),
        input.update.contribution.clone(),
    ]);
    ledger::fill(
        &mut filled,
        graph,
        input.external_pipeline_id,
        &candidates,
        ctx.jobs,
    )
    .await?;

    let target_job_id = match target.id {
        Some(id) => id,
        None => ctx
            .jobs
            .get_by_name(input.external_pipeline_id, canonical)
            .await?
            .map(|job| job.id)
            .ok_or_else(|| TriggerError::Graph {
                message: format!(
                    "pipeline {} has no job named {canonical}",
                    input.external_pipeline_id
                ),
            })?,
    };

    let next_build = candidates
        .iter()
        .find(|b| b.job_id == target_job_id)
        .cloned();

    let current_canonical = trim_job_name(&input.current_job.name);
    let settled = match next_build {
        // The originating event never produced this build: create it there.
        None => {
            let parent_build_id =
                resolve_reentry_parent(&input, graph, current_canonical);
            let created = create_internal_build(
                InternalBuildSpec {
                    job: JobRef::ById(target_job_id),
                    event: &external_event,
                    sha: None,
                    parent_build_id,
                    parent_builds: filled.clone(),
                    username: input.username,
                    scm_context: input.scm_context,
                    start: false,
                },
                ctx.jobs,
                ctx.builds,
            )
            .await?;
            match created {
                Some(build) => build,
                None => return Ok(None),
            }
        }

        // The prior build already ran: restart the external flow in a
        // fresh event pinned to the same lineage.
        Some(prior) if prior.status != BuildStatus::Created => {
            let current_external = external_trigger_name(
                input.current_pipeline.id,
                current_canonical,
            );
            let start_from = if graph.node_containing(&current_external).is_some() {
                tilde_trigger_name(input.current_pipeline.id, current_canonical)
            } else {
                canonical.to_string()
            };
            create_external_event(
                ExternalEventArgs {
                    pipeline_id: input.external_pipeline_id,
                    start_from,
                    cause_message: format!("Triggered by {current_external}"),
                    parent_build_id: input.current_build.id,
                    parent_builds: Some(ledger::merge(prior.parent_builds.clone(), filled)),
                    parent_event_id: None,
                    group_event_id: Some(prior.event_id),
                },
                ctx.pipelines,
                ctx.events,
                ctx.scm,
            )
            .await?;
            return Ok(None);
        }

        // Still pending: record the new contribution, fill included.
        Some(prior) => {
            let update = LedgerUpdate {
                join_skeleton: input.update.join_skeleton.clone(),
                current_ledger: filled.clone(),
                contribution: input.update.contribution.clone(),
            };
            update_parent_builds(
                prior.id,
                &update,
                input.current_build,
                ctx.builds,
                ctx.config.ledger_update_retries,
            )
            .await?
        }
    };

    let join_names = workflow::src_for_join(graph, canonical);
    let outcome = if join_names.is_empty() {
        JoinOutcome::complete()
    } else {
        join::evaluate(
            &settled.parent_builds,
            &join_names,
            input.external_pipeline_id,
            ctx.builds,
        )
        .await?
    };

    Ok(crate::trigger::actions::handle_new_build(outcome, settled, ctx.builds).await?)
}

/// The upstream build inside the external pipeline that caused this
/// trigger: resolved through the edge that originally left the external
/// pipeline towards the current job.
fn resolve_reentry_parent(
    input: &ReentryInput<'_>,
    graph: &crate::types::WorkflowGraph,
    current_canonical: &str,
) -> Vec<BuildId> {
    let current_external =
        external_trigger_name(input.current_pipeline.id, current_canonical);
    let parent_job = graph
        .edges
        .iter()
        .find(|edge| edge.dest.contains(&current_external))
        .map(|edge| edge.src.trim_start_matches('~').to_string());

    let resolved = parent_job.and_then(|name| {
        input
            .current_build
            .parent_builds
            .get(&input.external_pipeline_id)
            .and_then(|contribution| contribution.jobs.get(trim_job_name(&name)))
            .copied()
            .flatten()
    });

    match resolved {
        Some(id) => vec![id],
        None => {
            tracing::debug!(
                build_id = input.current_build.id,
                pipeline_id = input.external_pipeline_id,
                "no recorded parent in the external pipeline, using current build"
            );
            vec![input.current_build.id]
        }
    }
}
