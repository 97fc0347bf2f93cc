//! Join completeness evaluation.
//!
//! Given a build's ledger and the join list it must satisfy, decide whether
//! every declared parent has reached a terminal state and whether any of
//! them failed.

use futures::future::try_join_all;

use crate::errors::FactoryError;
use crate::ledger::ParentBuilds;
use crate::traits::BuildFactory;
use crate::trigger::name::{classify, trim_job_name};
use crate::types::PipelineId;

/// Result of a join evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Every join parent is known and terminal.
    pub done: bool,
    /// At least one join parent ended in a non-success terminal state.
    pub has_failure: bool,
}

impl JoinOutcome {
    /// The outcome used when there is nothing to wait for.
    pub fn complete() -> Self {
        Self {
            done: true,
            has_failure: false,
        }
    }
}

/// Evaluate a ledger against its join list.
///
/// Unknown entries short-circuit `done` without touching the factory;
/// known entries are loaded in one fan-out and folded by status. A parent
/// still in flight clears `done`; a failed, aborted, collapsed, or
/// unstable parent sets `has_failure`.
pub async fn evaluate(
    ledger: &ParentBuilds,
    join_names: &[String],
    current_pipeline_id: PipelineId,
    builds: &dyn BuildFactory,
) -> Result<JoinOutcome, FactoryError> {
    let mut outcome = JoinOutcome::complete();
    let mut to_load = Vec::new();

    for name in join_names {
        let trigger = classify(name, current_pipeline_id);
        let known = ledger
            .get(&trigger.pipeline_id)
            .and_then(|contribution| contribution.jobs.get(trim_job_name(&trigger.job_name)))
            .copied()
            .flatten();

        match known {
            Some(build_id) => to_load.push(builds.get(build_id)),
            None => outcome.done = false,
        }
    }

    for parent in try_join_all(to_load).await? {
        if parent.status.is_failure() {
            outcome.has_failure = true;
        }
        if !parent.status.is_terminal() {
            outcome.done = false;
        }
    }

    Ok(outcome)
}
