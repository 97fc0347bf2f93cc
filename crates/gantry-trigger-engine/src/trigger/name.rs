//! Trigger-name classification.
//!
//! Node names in a workflow graph come in three shapes: plain job names,
//! external references (`sd@<pipeline>:<job>`), and pull-request jobs
//! (`PR-<n>:<job>`). OR triggers prefix any of these with `~`.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::PipelineId;

static EXTERNAL_TRIGGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sd@(\d+):([\w-]+)$").unwrap());

/// A classified trigger name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerName {
    pub pipeline_id: PipelineId,
    pub job_name: String,
    pub is_external: bool,
}

impl TriggerName {
    /// The canonical spelling of this trigger: `sd@<pid>:<job>` for external
    /// names, the bare job name otherwise.
    pub fn canonical_name(&self) -> String {
        if self.is_external {
            external_trigger_name(self.pipeline_id, &self.job_name)
        } else {
            self.job_name.clone()
        }
    }
}

/// Classify a node name as internal or external.
///
/// External names match `sd@<digits>:<job>` exactly; everything else is a
/// job within `current_pipeline_id`.
pub fn classify(name: &str, current_pipeline_id: PipelineId) -> TriggerName {
    if let Some(captures) = EXTERNAL_TRIGGER.captures(name) {
        // The digits group cannot fail to parse on sane pipeline ids; an
        // overflow falls through to the internal interpretation.
        if let Ok(pipeline_id) = captures[1].parse::<PipelineId>() {
            return TriggerName {
                pipeline_id,
                job_name: captures[2].to_string(),
                is_external: true,
            };
        }
    }
    TriggerName {
        pipeline_id: current_pipeline_id,
        job_name: name.to_string(),
        is_external: false,
    }
}

/// Whether a name denotes a pull-request job (`PR-<n>:<job>`).
///
/// The `:` separator is shared with the external grammar; the `sd@` prefix
/// disambiguates.
pub fn is_pr(name: &str) -> bool {
    name.contains(':') && !EXTERNAL_TRIGGER.is_match(name)
}

/// Canonical job name: the portion after `:` for a PR job, the name
/// unchanged otherwise.
pub fn trim_job_name(name: &str) -> &str {
    if is_pr(name) {
        match name.split_once(':') {
            Some((_, rest)) => rest,
            None => name,
        }
    } else {
        name
    }
}

/// The external spelling of a job: `sd@<pid>:<job>`.
pub fn external_trigger_name(pipeline_id: PipelineId, job_name: &str) -> String {
    format!("sd@{pipeline_id}:{job_name}")
}

/// The OR-trigger spelling of an external job: `~sd@<pid>:<job>`.
pub fn tilde_trigger_name(pipeline_id: PipelineId, job_name: &str) -> String {
    format!("~sd@{pipeline_id}:{job_name}")
}
