//! Downstream trigger orchestration.
//!
//! When a build finishes, the orchestrator consults the event's workflow
//! graph and, for each next job, dispatches to the correct path: direct
//! creation for sequential and OR edges, resolve-update-evaluate for AND
//! joins, and event reconciliation for cross-pipeline triggers.
//!
//! Next jobs are processed sequentially; one job's failure is captured and
//! logged without affecting the others.

pub mod actions;
pub mod join;
pub mod name;
pub(crate) mod reentry;
pub mod resolve;

use crate::engine::TriggerEngineConfig;
use crate::errors::TriggerError;
use crate::ledger::{self, ParentBuilds};
use crate::traits::{
    BuildFactory, EventFactory, EventFilter, JobFactory, PipelineFactory, Scm,
};
use crate::types::{Build, BuildStatus, Event, Job, Pipeline, PipelineId};
use crate::workflow;

use actions::{ExternalEventArgs, InternalBuildSpec, JobRef, LedgerUpdate};
use reentry::ReentryInput;

/// Collaborators and configuration shared by one trigger pass.
pub(crate) struct TriggerContext<'a> {
    pub pipelines: &'a dyn PipelineFactory,
    pub events: &'a dyn EventFactory,
    pub builds: &'a dyn BuildFactory,
    pub jobs: &'a dyn JobFactory,
    pub scm: &'a dyn Scm,
    pub config: &'a TriggerEngineConfig,
}

/// Ledger fragments and join list computed for one next job.
struct NextJobInfo {
    join_names: Vec<String>,
    update: LedgerUpdate,
    parent_builds: ParentBuilds,
}

fn parse_job_info(
    current_pipeline_id: PipelineId,
    job: &Job,
    build: &Build,
    event: &Event,
    next_job_name: &str,
) -> NextJobInfo {
    let join_names = workflow::src_for_join(&event.workflow_graph, next_job_name);
    let join_skeleton = ledger::join_skeleton(current_pipeline_id, &join_names);
    let current_ledger = build.parent_builds.clone();
    let contribution = ledger::singleton(
        current_pipeline_id,
        event.id,
        name::trim_job_name(&job.name),
        build.id,
    );
    let parent_builds = ledger::merge_all([
        join_skeleton.clone(),
        current_ledger.clone(),
        contribution.clone(),
    ]);
    NextJobInfo {
        join_names,
        update: LedgerUpdate {
            join_skeleton,
            current_ledger,
            contribution,
        },
        parent_builds,
    }
}

/// Trigger every next job of a finished build.
///
/// Returns the builds that were created or promoted by this pass. Builds
/// left pending on an incomplete join are not included.
pub(crate) async fn trigger_next_jobs(
    ctx: &TriggerContext<'_>,
    pipeline: &Pipeline,
    job: &Job,
    build: &Build,
    username: &str,
    scm_context: &str,
) -> Result<Vec<Build>, TriggerError> {
    let event = ctx.events.get(build.event_id).await?;
    let next_names = workflow::next_jobs(&event.workflow_graph, &job.name, pipeline.chain_pr);
    tracing::debug!(
        build_id = build.id,
        event_id = event.id,
        next = ?next_names,
        "computed next jobs"
    );

    let mut triggered = Vec::new();
    for next_name in &next_names {
        match trigger_next_job(ctx, pipeline, job, build, &event, next_name, username, scm_context)
            .await
        {
            Ok(Some(next_build)) => triggered.push(next_build),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    build_id = build.id,
                    next_job = %next_name,
                    error = %e,
                    "failed to trigger next job"
                );
            }
        }
    }
    Ok(triggered)
}

#[allow(clippy::too_many_arguments)]
async fn trigger_next_job(
    ctx: &TriggerContext<'_>,
    pipeline: &Pipeline,
    job: &Job,
    build: &Build,
    event: &Event,
    next_name: &str,
    username: &str,
    scm_context: &str,
) -> Result<Option<Build>, TriggerError> {
    let info = parse_job_info(pipeline.id, job, build, event, next_name);
    let trigger = name::classify(next_name, pipeline.id);
    let current_canonical = name::trim_job_name(&job.name);
    let external_self = name::external_trigger_name(pipeline.id, current_canonical);

    // An OR trigger bypasses the join machinery: the destination declares a
    // join, but not on the job that just finished.
    let is_or_trigger = !info
        .join_names
        .iter()
        .any(|n| n == current_canonical || *n == external_self);

    if info.join_names.is_empty() || is_or_trigger {
        // Direct triggers only propagate success.
        if build.status != BuildStatus::Success {
            tracing::debug!(
                build_id = build.id,
                status = %build.status,
                next_job = %next_name,
                "upstream build did not succeed, skipping direct trigger"
            );
            return Ok(None);
        }

        if !trigger.is_external {
            return Ok(actions::create_internal_build(
                InternalBuildSpec {
                    job: JobRef::ByName(pipeline.id, &trigger.job_name),
                    event,
                    sha: None,
                    parent_build_id: vec![build.id],
                    parent_builds: info.parent_builds,
                    username,
                    scm_context,
                    start: true,
                },
                ctx.jobs,
                ctx.builds,
            )
            .await?);
        }

        // The flow may have originated in the destination pipeline: go back
        // into its event instead of opening a new one.
        if let Some(external_event_id) = reentry::reentry_event_id(build, trigger.pipeline_id) {
            return reentry::handle(
                ctx,
                ReentryInput {
                    current_pipeline: pipeline,
                    current_job: job,
                    current_build: build,
                    current_event: event,
                    external_pipeline_id: trigger.pipeline_id,
                    external_job_name: &trigger.job_name,
                    external_event_id,
                    update: &info.update,
                    username,
                    scm_context,
                },
            )
            .await;
        }

        actions::create_external_event(
            ExternalEventArgs {
                pipeline_id: trigger.pipeline_id,
                start_from: name::tilde_trigger_name(pipeline.id, current_canonical),
                cause_message: format!("Triggered by {external_self}"),
                parent_build_id: build.id,
                parent_builds: Some(info.parent_builds),
                parent_event_id: event.parent_event_id.is_none().then_some(event.id),
                group_event_id: None,
            },
            ctx.pipelines,
            ctx.events,
            ctx.scm,
        )
        .await?;
        return Ok(None);
    }

    // AND join.
    if !trigger.is_external {
        let candidates = resolve::candidate_builds(event, ctx.builds, ctx.events).await?;
        let settled = match resolve::find_internal(next_name, event, &candidates, ctx.jobs).await? {
            Some(existing) => {
                actions::update_parent_builds(
                    existing.id,
                    &info.update,
                    build,
                    ctx.builds,
                    ctx.config.ledger_update_retries,
                )
                .await?
            }
            None => {
                match actions::create_internal_build(
                    InternalBuildSpec {
                        job: JobRef::ByName(pipeline.id, &trigger.job_name),
                        event,
                        sha: None,
                        parent_build_id: vec![build.id],
                        parent_builds: info.parent_builds.clone(),
                        username,
                        scm_context,
                        start: false,
                    },
                    ctx.jobs,
                    ctx.builds,
                )
                .await?
                {
                    Some(created) => created,
                    None => return Ok(None),
                }
            }
        };

        let outcome = join::evaluate(
            &settled.parent_builds,
            &info.join_names,
            pipeline.id,
            ctx.builds,
        )
        .await?;
        return Ok(actions::handle_new_build(outcome, settled, ctx.builds).await?);
    }

    // External join: reconcile against the event the flow came from, or the
    // downstream event a sibling parent already opened.
    let external_event_id = match reentry::reentry_event_id(build, trigger.pipeline_id) {
        Some(id) => Some(id),
        None => ctx
            .events
            .list(&EventFilter {
                pipeline_id: Some(trigger.pipeline_id),
                parent_event_id: Some(event.id),
                ..Default::default()
            })
            .await?
            .first()
            .map(|e| e.id),
    };

    if let Some(external_event_id) = external_event_id {
        return reentry::handle(
            ctx,
            ReentryInput {
                current_pipeline: pipeline,
                current_job: job,
                current_build: build,
                current_event: event,
                external_pipeline_id: trigger.pipeline_id,
                external_job_name: &trigger.job_name,
                external_event_id,
                update: &info.update,
                username,
                scm_context,
            },
        )
        .await;
    }

    // No downstream event exists yet. A failed parent has nothing to
    // poison, so only success opens one.
    if build.status != BuildStatus::Success {
        tracing::debug!(
            build_id = build.id,
            status = %build.status,
            next_job = %next_name,
            "upstream build did not succeed, not opening a downstream event"
        );
        return Ok(None);
    }

    actions::create_external_event(
        ExternalEventArgs {
            pipeline_id: trigger.pipeline_id,
            start_from: name::tilde_trigger_name(pipeline.id, current_canonical),
            cause_message: format!("Triggered by {external_self}"),
            parent_build_id: build.id,
            parent_builds: Some(info.parent_builds),
            parent_event_id: event.parent_event_id.is_none().then_some(event.id),
            group_event_id: None,
        },
        ctx.pipelines,
        ctx.events,
        ctx.scm,
    )
    .await?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::InMemoryCluster;
    use crate::types::JobId;

    fn ctx<'a>(
        cluster: &'a InMemoryCluster,
        config: &'a TriggerEngineConfig,
    ) -> TriggerContext<'a> {
        TriggerContext {
            pipelines: cluster,
            events: cluster,
            builds: cluster,
            jobs: cluster,
            scm: cluster,
            config,
        }
    }

    async fn run(
        cluster: &InMemoryCluster,
        pipeline_id: PipelineId,
        job_id: JobId,
        build: &Build,
    ) -> Vec<Build> {
        let config = TriggerEngineConfig::default();
        let pipeline = cluster.pipeline(pipeline_id).expect("pipeline");
        let job = cluster.job(job_id).expect("job");
        trigger_next_jobs(
            &ctx(cluster, &config),
            &pipeline,
            &job,
            build,
            "dev",
            "github:github.com",
        )
        .await
        .expect("trigger pass")
    }

    async fn record_upstream_ledger(
        cluster: &InMemoryCluster,
        build: &Build,
        ledger: ParentBuilds,
    ) -> Build {
        let mut copy = cluster.build(build.id).expect("build");
        copy.parent_builds = ledger;
        BuildFactory::update(cluster, &copy).await.expect("seed ledger")
    }

    // -----------------------------------------------------------------------
    // Sequential internal edge
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn sequential_edge_creates_and_starts_the_next_build() {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_job(3, 1, "compile");
        cluster.add_job(4, 1, "package");
        cluster.set_graph(
            1,
            &[("compile", "package", false)],
            &[("compile", Some(3)), ("package", Some(4))],
        );
        let event = cluster.add_event(1, "cafe".into(), None, None);
        let upstream = cluster.add_build(event.id, 3, BuildStatus::Success);

        let triggered = run(&cluster, 1, 3, &upstream).await;

        assert_eq!(triggered.len(), 1);
        let next = &triggered[0];
        assert_eq!(next.job_id, 4);
        assert_eq!(next.event_id, event.id);
        assert_eq!(next.status, BuildStatus::Queued);
        assert_eq!(next.parent_build_id, vec![upstream.id]);
        assert_eq!(next.parent_builds[&1].event_id, Some(event.id));
        assert_eq!(next.parent_builds[&1].jobs["compile"], Some(upstream.id));
    }

    #[tokio::test]
    async fn failed_upstream_does_not_direct_trigger() {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_job(3, 1, "compile");
        cluster.add_job(4, 1, "package");
        cluster.set_graph(
            1,
            &[("compile", "package", false)],
            &[("compile", Some(3)), ("package", Some(4))],
        );
        let event = cluster.add_event(1, "cafe".into(), None, None);
        let upstream = cluster.add_build(event.id, 3, BuildStatus::Failure);

        let triggered = run(&cluster, 1, 3, &upstream).await;

        assert!(triggered.is_empty());
        assert_eq!(cluster.builds_of(event.id).len(), 1);
    }

    // -----------------------------------------------------------------------
    // Internal AND join
    // -----------------------------------------------------------------------

    fn join_world() -> (InMemoryCluster, Event) {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_job(3, 1, "unit");
        cluster.add_job(4, 1, "lint");
        cluster.add_job(5, 1, "release");
        cluster.set_graph(
            1,
            &[("unit", "release", true), ("lint", "release", true)],
            &[("unit", Some(3)), ("lint", Some(4)), ("release", Some(5))],
        );
        let event = cluster.add_event(1, "cafe".into(), None, None);
        (cluster, event)
    }

    #[tokio::test]
    async fn join_waits_for_all_parents_then_starts() {
        let (cluster, event) = join_world();
        let unit = cluster.add_build(event.id, 3, BuildStatus::Success);

        // First parent: the join target is created but held back.
        let first_pass = run(&cluster, 1, 3, &unit).await;
        assert!(first_pass.is_empty());
        let pending = cluster
            .builds_of(event.id)
            .into_iter()
            .find(|b| b.job_id == 5)
            .expect("pending join target");
        assert_eq!(pending.status, BuildStatus::Created);
        assert_eq!(pending.parent_builds[&1].jobs["unit"], Some(unit.id));
        assert_eq!(pending.parent_builds[&1].jobs["lint"], None);

        // Second parent: the pending build is updated, evaluated, started.
        let lint = cluster.add_build(event.id, 4, BuildStatus::Success);
        let second_pass = run(&cluster, 1, 4, &lint).await;
        assert_eq!(second_pass.len(), 1);
        let released = &second_pass[0];
        assert_eq!(released.id, pending.id);
        assert_eq!(released.status, BuildStatus::Queued);
        assert_eq!(released.parent_builds[&1].jobs["lint"], Some(lint.id));
        assert_eq!(released.parent_build_id, vec![lint.id, unit.id]);
    }

    #[tokio::test]
    async fn join_with_failed_parent_removes_the_target() {
        let (cluster, event) = join_world();
        let unit = cluster.add_build(event.id, 3, BuildStatus::Success);
        run(&cluster, 1, 3, &unit).await;
        let pending = cluster
            .builds_of(event.id)
            .into_iter()
            .find(|b| b.job_id == 5)
            .expect("pending join target");

        let lint = cluster.add_build(event.id, 4, BuildStatus::Failure);
        let second_pass = run(&cluster, 1, 4, &lint).await;

        assert!(second_pass.is_empty());
        assert!(cluster.build(pending.id).is_none());
    }

    // -----------------------------------------------------------------------
    // OR trigger
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn or_trigger_starts_immediately() {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_job(3, 1, "unit");
        cluster.add_job(4, 1, "lint");
        cluster.add_job(6, 1, "nightly");
        cluster.add_job(7, 1, "report");
        cluster.set_graph(
            1,
            &[
                ("~nightly", "report", false),
                ("unit", "report", true),
                ("lint", "report", true),
            ],
            &[
                ("unit", Some(3)),
                ("lint", Some(4)),
                ("nightly", Some(6)),
                ("report", Some(7)),
            ],
        );
        let event = cluster.add_event(1, "cafe".into(), None, None);
        let nightly = cluster.add_build(event.id, 6, BuildStatus::Success);

        let triggered = run(&cluster, 1, 6, &nightly).await;

        assert_eq!(triggered.len(), 1);
        let report = &triggered[0];
        assert_eq!(report.job_id, 7);
        assert_eq!(report.status, BuildStatus::Queued);
        assert_eq!(report.parent_builds[&1].jobs["nightly"], Some(nightly.id));
        // The bypassed join parents remain placeholders.
        assert_eq!(report.parent_builds[&1].jobs["unit"], None);
        assert_eq!(report.parent_builds[&1].jobs["lint"], None);
    }

    // -----------------------------------------------------------------------
    // Pull-request chaining
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pr_chain_triggers_the_pr_variant_with_a_canonical_ledger_key() {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline_record(Pipeline {
            id: 1,
            scm_context: "github:github.com".into(),
            scm_uri: "github.com:1001:main".into(),
            config_pipeline_id: None,
            chain_pr: true,
        });
        // Canonical jobs plus their materialized PR variants.
        cluster.add_job(3, 1, "compile");
        cluster.add_job(4, 1, "package");
        cluster.add_job(13, 1, "PR-9:compile");
        cluster.add_job(14, 1, "PR-9:package");
        cluster.set_graph(
            1,
            &[("compile", "package", false)],
            &[("compile", Some(3)), ("package", Some(4))],
        );
        let event = cluster.add_event(1, "cafe".into(), None, None);
        let upstream = cluster.add_build(event.id, 13, BuildStatus::Success);

        let triggered = run(&cluster, 1, 13, &upstream).await;

        assert_eq!(triggered.len(), 1);
        let next = &triggered[0];
        assert_eq!(next.job_id, 14);
        assert_eq!(next.status, BuildStatus::Queued);
        // The ledger key is the trimmed job name, not the PR form.
        assert_eq!(next.parent_builds[&1].jobs["compile"], Some(upstream.id));
        assert!(!next.parent_builds[&1].jobs.contains_key("PR-9:compile"));
    }

    // -----------------------------------------------------------------------
    // External fan-out
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn external_edge_opens_a_downstream_event() {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_pipeline(2, "github:github.com", "github.com:2002:main");
        cluster.add_job(3, 1, "publish");
        cluster.add_job(8, 2, "consume");
        cluster.set_graph(
            1,
            &[("publish", "sd@2:consume", false)],
            &[("publish", Some(3)), ("sd@2:consume", None)],
        );
        cluster.set_graph(2, &[], &[("consume", Some(8))]);
        cluster.set_commit_sha("github.com:2002:main", "beefbeef");
        let event = cluster.add_event(1, "cafe".into(), None, None);
        let upstream = cluster.add_build(event.id, 3, BuildStatus::Success);

        let triggered = run(&cluster, 1, 3, &upstream).await;
        assert!(triggered.is_empty());

        let payloads = cluster.created_event_payloads();
        assert_eq!(payloads.len(), 1);
        let payload = &payloads[0];
        assert_eq!(payload.pipeline_id, 2);
        assert_eq!(payload.start_from, "~sd@1:publish");
        assert_eq!(payload.cause_message, "Triggered by sd@1:publish");
        assert_eq!(payload.parent_build_id, Some(upstream.id));
        // The current event is a root, so it becomes the parent.
        assert_eq!(payload.parent_event_id, Some(event.id));
        assert_eq!(payload.sha, "beefbeef");
        assert_eq!(payload.username, "admin-2");

        let downstream = cluster.events_of(2);
        assert_eq!(downstream.len(), 1);
        assert_eq!(downstream[0].parent_event_id, Some(event.id));
    }

    #[tokio::test]
    async fn external_edge_from_a_child_event_forwards_no_parent() {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_pipeline(2, "github:github.com", "github.com:2002:main");
        cluster.add_job(3, 1, "publish");
        cluster.add_job(8, 2, "consume");
        cluster.set_graph(
            1,
            &[("publish", "sd@2:consume", false)],
            &[("publish", Some(3)), ("sd@2:consume", None)],
        );
        let root = cluster.add_event(1, "cafe".into(), None, None);
        let child = cluster.add_event(1, "cafe".into(), Some(root.id), None);
        let upstream = cluster.add_build(child.id, 3, BuildStatus::Success);

        run(&cluster, 1, 3, &upstream).await;

        let payloads = cluster.created_event_payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].parent_event_id, None);
    }

    // -----------------------------------------------------------------------
    // External re-entry
    // -----------------------------------------------------------------------

    /// Pipeline 2 triggered pipeline 1; pipeline 1 triggers back into a
    /// join that consolidates contributions from both sides.
    async fn reentry_world() -> (InMemoryCluster, Event, Event, Build, Build) {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_pipeline(2, "github:github.com", "github.com:2002:main");
        cluster.add_job(3, 1, "analyze");
        cluster.add_job(8, 2, "extract");
        cluster.add_job(9, 2, "report");
        cluster.set_graph(
            1,
            &[("analyze", "sd@2:report", false)],
            &[("analyze", Some(3)), ("sd@2:report", None)],
        );
        cluster.set_graph(
            2,
            &[
                ("extract", "sd@1:analyze", false),
                ("extract", "report", true),
                ("sd@1:analyze", "report", true),
            ],
            &[
                ("extract", Some(8)),
                ("report", Some(9)),
                ("sd@1:analyze", None),
            ],
        );

        let origin = cluster.add_event(2, "beef".into(), None, None);
        let extract = cluster.add_build(origin.id, 8, BuildStatus::Success);
        let here = cluster.add_event(1, "cafe".into(), Some(origin.id), None);
        let analyze = cluster.add_build(here.id, 3, BuildStatus::Success);
        let analyze = record_upstream_ledger(
            &cluster,
            &analyze,
            ledger::singleton(2, origin.id, "extract", extract.id),
        )
        .await;
        (cluster, origin, here, extract, analyze)
    }

    #[tokio::test]
    async fn reentry_creates_fills_and_starts_the_pending_join() {
        let (cluster, origin, here, extract, analyze) = reentry_world().await;

        let triggered = run(&cluster, 1, 3, &analyze).await;

        assert_eq!(triggered.len(), 1);
        let report = &triggered[0];
        assert_eq!(report.job_id, 9);
        assert_eq!(report.event_id, origin.id);
        assert_eq!(report.status, BuildStatus::Queued);
        assert_eq!(report.parent_builds[&2].jobs["extract"], Some(extract.id));
        assert_eq!(report.parent_builds[&1].jobs["analyze"], Some(analyze.id));
        assert_eq!(report.parent_builds[&1].event_id, Some(here.id));
        // The parent inside the external pipeline is the recorded extract
        // build, not the re-entering one.
        assert_eq!(report.parent_build_id, vec![extract.id]);
    }

    #[tokio::test]
    async fn reentry_updates_a_pending_build_instead_of_duplicating() {
        let (cluster, origin, _here, extract, analyze) = reentry_world().await;
        let pending = cluster.add_build(origin.id, 9, BuildStatus::Created);

        let triggered = run(&cluster, 1, 3, &analyze).await;

        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].id, pending.id);
        assert_eq!(triggered[0].status, BuildStatus::Queued);
        assert_eq!(
            triggered[0].parent_builds[&2].jobs["extract"],
            Some(extract.id)
        );
        assert_eq!(
            triggered[0].parent_builds[&1].jobs["analyze"],
            Some(analyze.id)
        );
        // No duplicate report build appeared.
        let reports: Vec<_> = cluster
            .builds_of(origin.id)
            .into_iter()
            .filter(|b| b.job_id == 9)
            .collect();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn reentry_after_a_finished_build_forks_a_restart_event() {
        let (cluster, origin, _here, _extract, analyze) = reentry_world().await;
        cluster.add_build(origin.id, 9, BuildStatus::Success);

        let triggered = run(&cluster, 1, 3, &analyze).await;
        assert!(triggered.is_empty());

        let payloads = cluster.created_event_payloads();
        assert_eq!(payloads.len(), 1);
        let payload = &payloads[0];
        assert_eq!(payload.pipeline_id, 2);
        assert_eq!(payload.start_from, "~sd@1:analyze");
        assert_eq!(payload.group_event_id, Some(origin.id));
        let forked = &cluster.events_of(2)[0];
        assert_eq!(forked.group_event_id, origin.id);
    }

    // -----------------------------------------------------------------------
    // External AND join, forward direction
    // -----------------------------------------------------------------------

    /// Two internal parents join on an external destination. The first
    /// parent opens the downstream event; the second reconciles into it.
    #[tokio::test]
    async fn external_join_consolidates_through_one_downstream_event() {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_pipeline(2, "github:github.com", "github.com:2002:main");
        cluster.add_job(3, 1, "unit");
        cluster.add_job(4, 1, "lint");
        cluster.add_job(9, 2, "gate");
        cluster.set_graph(
            1,
            &[("unit", "sd@2:gate", true), ("lint", "sd@2:gate", true)],
            &[("unit", Some(3)), ("lint", Some(4)), ("sd@2:gate", None)],
        );
        cluster.set_graph(
            2,
            &[("sd@1:unit", "gate", true), ("sd@1:lint", "gate", true)],
            &[("gate", Some(9)), ("sd@1:unit", None), ("sd@1:lint", None)],
        );
        let event = cluster.add_event(1, "cafe".into(), None, None);
        let unit = cluster.add_build(event.id, 3, BuildStatus::Success);

        let first_pass = run(&cluster, 1, 3, &unit).await;
        assert!(first_pass.is_empty());
        let downstream = cluster.events_of(2);
        assert_eq!(downstream.len(), 1, "first parent opens the event");

        let lint = cluster.add_build(event.id, 4, BuildStatus::Success);
        let second_pass = run(&cluster, 1, 4, &lint).await;

        // No second event was opened.
        assert_eq!(cluster.events_of(2).len(), 1);
        assert_eq!(second_pass.len(), 1);
        let gate = &second_pass[0];
        assert_eq!(gate.job_id, 9);
        assert_eq!(gate.event_id, downstream[0].id);
        assert_eq!(gate.status, BuildStatus::Queued);
        assert_eq!(gate.parent_builds[&1].jobs["unit"], Some(unit.id));
        assert_eq!(gate.parent_builds[&1].jobs["lint"], Some(lint.id));
    }

    // -----------------------------------------------------------------------
    // Error capture
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn one_failing_next_job_does_not_block_the_others() {
        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_job(3, 1, "compile");
        cluster.add_job(4, 1, "package");
        // "ghost" appears in the graph but has no job behind it.
        cluster.set_graph(
            1,
            &[("compile", "ghost", false), ("compile", "package", false)],
            &[
                ("compile", Some(3)),
                ("ghost", None),
                ("package", Some(4)),
            ],
        );
        let event = cluster.add_event(1, "cafe".into(), None, None);
        let upstream = cluster.add_build(event.id, 3, BuildStatus::Success);

        let triggered = run(&cluster, 1, 3, &upstream).await;

        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].job_id, 4);
    }
}
