//! The parent-builds ledger.
//!
//! Every build carries a nested map recording which upstream builds have
//! contributed to it: `pipeline id → { event id, job name → build id }`.
//! A `None` build id means "not yet known" — the join for that entry is
//! incomplete and will be re-evaluated when the next upstream build reports
//! in.
//!
//! **Invariant**: the ledger uses `BTreeMap`, never `HashMap`. HashMap
//! produces nondeterministic JSON key ordering, which breaks payload
//! comparison across redeliveries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::FactoryError;
use crate::traits::JobFactory;
use crate::trigger::name::{classify, external_trigger_name, trim_job_name};
use crate::types::{Build, BuildId, EventId, PipelineId, WorkflowGraph};

/// What one pipeline has contributed to a build so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineContribution {
    /// The event that produced the most recent contribution.
    pub event_id: Option<EventId>,
    /// Upstream job name → contributing build id, `None` until known.
    pub jobs: BTreeMap<String, Option<BuildId>>,
}

/// The ledger a build carries: contributions keyed by pipeline id.
pub type ParentBuilds = BTreeMap<PipelineId, PipelineContribution>;

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

/// A ledger with exactly one known contribution.
pub fn singleton(
    pipeline_id: PipelineId,
    event_id: EventId,
    job_name: &str,
    build_id: BuildId,
) -> ParentBuilds {
    let mut jobs = BTreeMap::new();
    jobs.insert(job_name.to_string(), Some(build_id));
    let mut ledger = ParentBuilds::new();
    ledger.insert(
        pipeline_id,
        PipelineContribution {
            event_id: Some(event_id),
            jobs,
        },
    );
    ledger
}

/// An all-unknown ledger covering every name in a join list.
///
/// Names are classified relative to `current_pipeline_id`, so entries for
/// the same pipeline merge into one contribution.
pub fn join_skeleton(current_pipeline_id: PipelineId, join_names: &[String]) -> ParentBuilds {
    let mut ledger = ParentBuilds::new();
    for name in join_names {
        let trigger = classify(name, current_pipeline_id);
        ledger
            .entry(trigger.pipeline_id)
            .or_default()
            .jobs
            .insert(trim_job_name(&trigger.job_name).to_string(), None);
    }
    ledger
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Deep-merge two ledgers, right-biased at known leaves.
///
/// Keys union at every level. A `Some` leaf from `overlay` replaces the
/// base value; a `None` leaf only reserves the key — it never erases
/// knowledge the base already has. That asymmetry is what makes merging
/// the same contribution twice a no-op.
pub fn merge(mut base: ParentBuilds, overlay: ParentBuilds) -> ParentBuilds {
    for (pipeline_id, contribution) in overlay {
        let entry = base.entry(pipeline_id).or_default();
        if contribution.event_id.is_some() {
            entry.event_id = contribution.event_id;
        }
        for (job_name, build_id) in contribution.jobs {
            match build_id {
                Some(_) => {
                    entry.jobs.insert(job_name, build_id);
                }
                None => {
                    entry.jobs.entry(job_name).or_insert(None);
                }
            }
        }
    }
    base
}

/// Fold a sequence of ledgers left to right with [`merge`].
pub fn merge_all<I>(ledgers: I) -> ParentBuilds
where
    I: IntoIterator<Item = ParentBuilds>,
{
    ledgers.into_iter().fold(ParentBuilds::new(), merge)
}

// ---------------------------------------------------------------------------
// Fill
// ---------------------------------------------------------------------------

/// Patch unknown ledger entries from a set of candidate builds.
///
/// For every `(pipeline, job)` entry still `None`, locate the matching
/// workflow-graph node — by canonical name for the current pipeline, by
/// `sd@<pid>:<job>` fragment otherwise — and, if a candidate build exists
/// for that job, record its id and event. A missing node or candidate is
/// logged and skipped: the join simply evaluates as not-done until the
/// upstream build reports in.
pub async fn fill(
    ledger: &mut ParentBuilds,
    graph: &WorkflowGraph,
    current_pipeline_id: PipelineId,
    candidates: &[Build],
    jobs: &dyn JobFactory,
) -> Result<(), FactoryError> {
    let pending: Vec<(PipelineId, String)> = ledger
        .iter()
        .flat_map(|(pid, contribution)| {
            contribution
                .jobs
                .iter()
                .filter(|(_, build_id)| build_id.is_none())
                .map(|(name, _)| (*pid, name.clone()))
        })
        .collect();

    for (pipeline_id, job_name) in pending {
        let canonical = trim_job_name(&job_name);
        let node = if pipeline_id == current_pipeline_id {
            graph.node_by_name(canonical)
        } else {
            graph.node_containing(&external_trigger_name(pipeline_id, canonical))
        };

        let Some(node) = node else {
            tracing::warn!(
                pipeline_id,
                job_name = %job_name,
                "no workflow node for ledger entry, skipping"
            );
            continue;
        };

        // External nodes carry no local job id; resolve through the factory.
        let job_id = match node.id {
            Some(id) => Some(id),
            None => jobs
                .get_by_name(pipeline_id, canonical)
                .await?
                .map(|job| job.id),
        };
        let Some(job_id) = job_id else {
            tracing::warn!(
                pipeline_id,
                job_name = %job_name,
                "no job behind workflow node, skipping ledger entry"
            );
            continue;
        };

        if let Some(found) = candidates.iter().find(|b| b.job_id == job_id) {
            let entry = ledger.entry(pipeline_id).or_default();
            entry.jobs.insert(job_name, Some(found.id));
            entry.event_id = Some(found.event_id);
        } else {
            tracing::debug!(
                pipeline_id,
                job_name = %job_name,
                "no candidate build for ledger entry yet"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(event_id: Option<EventId>, jobs: &[(&str, Option<BuildId>)]) -> ParentBuilds {
        let mut ledger = ParentBuilds::new();
        ledger.insert(
            1,
            PipelineContribution {
                event_id,
                jobs: jobs
                    .iter()
                    .map(|(name, id)| (name.to_string(), *id))
                    .collect(),
            },
        );
        ledger
    }

    #[test]
    fn singleton_shape() {
        let ledger = singleton(1, 100, "main", 10);
        assert_eq!(ledger[&1].event_id, Some(100));
        assert_eq!(ledger[&1].jobs["main"], Some(10));
    }

    #[test]
    fn skeleton_merges_same_pipeline() {
        let names = vec![
            "build".to_string(),
            "lint".to_string(),
            "sd@2:publish".to_string(),
        ];
        let ledger = join_skeleton(1, &names);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[&1].jobs.len(), 2);
        assert_eq!(ledger[&1].jobs["build"], None);
        assert_eq!(ledger[&2].jobs["publish"], None);
        assert_eq!(ledger[&1].event_id, None);
    }

    #[test]
    fn skeleton_trims_pr_names() {
        let ledger = join_skeleton(1, &["PR-7:build".to_string()]);
        assert!(ledger[&1].jobs.contains_key("build"));
    }

    #[test]
    fn merge_is_right_biased_at_known_leaves() {
        let left = contribution(Some(100), &[("build", Some(10))]);
        let right = contribution(Some(101), &[("build", Some(11))]);
        let merged = merge(left, right);
        assert_eq!(merged[&1].jobs["build"], Some(11));
        assert_eq!(merged[&1].event_id, Some(101));
    }

    #[test]
    fn merge_none_never_erases() {
        let known = contribution(Some(100), &[("build", Some(10))]);
        let skeleton = contribution(None, &[("build", None), ("lint", None)]);
        let merged = merge(known, skeleton);
        assert_eq!(merged[&1].jobs["build"], Some(10));
        assert_eq!(merged[&1].jobs["lint"], None);
        assert_eq!(merged[&1].event_id, Some(100));
    }

    #[test]
    fn merge_unions_pipelines() {
        let mut other = ParentBuilds::new();
        other.insert(
            2,
            PipelineContribution {
                event_id: Some(200),
                jobs: [("publish".to_string(), Some(30))].into_iter().collect(),
            },
        );
        let merged = merge(contribution(Some(100), &[("build", Some(10))]), other);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[&1].jobs["build"], Some(10));
        assert_eq!(merged[&2].jobs["publish"], Some(30));
    }

    #[test]
    fn merge_is_associative() {
        let a = contribution(Some(100), &[("build", Some(10)), ("lint", None)]);
        let b = contribution(None, &[("lint", Some(12))]);
        let c = contribution(Some(102), &[("build", Some(13))]);

        let left_first = merge(merge(a.clone(), b.clone()), c.clone());
        let right_first = merge(a, merge(b, c));
        assert_eq!(left_first, right_first);
    }

    #[test]
    fn merge_same_contribution_twice_is_idempotent() {
        let base = contribution(Some(100), &[("build", Some(10)), ("lint", None)]);
        let update = contribution(Some(100), &[("lint", Some(12))]);

        let once = merge(base.clone(), update.clone());
        let twice = merge(once.clone(), update);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn fill_patches_unknown_entries_from_candidates() {
        use crate::defaults::InMemoryCluster;
        use crate::types::{BuildStatus, WorkflowNode};

        let cluster = InMemoryCluster::new();
        cluster.add_pipeline(1, "github:github.com", "github.com:1001:main");
        cluster.add_pipeline(2, "github:github.com", "github.com:2002:main");
        cluster.add_job(3, 1, "build");
        cluster.add_job(9, 2, "publish");
        let here = cluster.add_event(1, "cafe".into(), None, None);
        let there = cluster.add_event(2, "beef".into(), None, None);
        let internal = cluster.add_build(here.id, 3, BuildStatus::Success);
        let external = cluster.add_build(there.id, 9, BuildStatus::Success);

        let graph = WorkflowGraph {
            nodes: vec![
                WorkflowNode {
                    id: Some(3),
                    name: "build".into(),
                },
                WorkflowNode {
                    id: None,
                    name: "sd@2:publish".into(),
                },
            ],
            edges: vec![],
        };

        let mut ledger = join_skeleton(
            1,
            &[
                "build".to_string(),
                "sd@2:publish".to_string(),
                "ghost".to_string(),
            ],
        );
        let candidates = [internal.clone(), external.clone()];
        fill(&mut ledger, &graph, 1, &candidates, &cluster)
            .await
            .expect("fill");

        assert_eq!(ledger[&1].jobs["build"], Some(internal.id));
        assert_eq!(ledger[&1].event_id, Some(here.id));
        // External nodes carry no local id; the job factory resolves them.
        assert_eq!(ledger[&2].jobs["publish"], Some(external.id));
        assert_eq!(ledger[&2].event_id, Some(there.id));
        // An entry with no workflow node is skipped, not fatal.
        assert_eq!(ledger[&1].jobs["ghost"], None);
    }
}
