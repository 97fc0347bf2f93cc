//! The assembled trigger engine — the single entry point for downstream
//! trigger decisions.
//!
//! ```rust,ignore
//! let engine = TriggerEngine::builder()
//!     .pipeline_factory(cluster.clone())
//!     .event_factory(cluster.clone())
//!     .build_factory(cluster.clone())
//!     .job_factory(cluster.clone())
//!     .scm(cluster)
//!     .build()?;
//!
//! engine.trigger_next_jobs(&pipeline, &job, &build, "octocat", scm_ctx).await?;
//! ```

mod builder;

pub use builder::TriggerEngineBuilder;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::TriggerError;
use crate::traits::{BuildFactory, EventFactory, JobFactory, PipelineFactory, Scm};
use crate::trigger::actions::{create_external_event, ExternalEventArgs};
use crate::trigger::{self, TriggerContext};
use crate::types::{Build, Event, Job, Pipeline};

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct TriggerEngineConfig {
    /// How many times a lost ledger-update race is retried with a fresh
    /// read before the conflict propagates.
    pub ledger_update_retries: u32,
}

impl Default for TriggerEngineConfig {
    fn default() -> Self {
        Self {
            ledger_update_retries: 3,
        }
    }
}

/// The assembled trigger engine.
///
/// Owns no mutable state — all state lives behind the factories. The
/// engine is `Clone`-friendly; all internals are `Arc`-wrapped.
#[derive(Clone)]
pub struct TriggerEngine {
    pub(super) pipelines: Arc<dyn PipelineFactory>,
    pub(super) events: Arc<dyn EventFactory>,
    pub(super) builds: Arc<dyn BuildFactory>,
    pub(super) jobs: Arc<dyn JobFactory>,
    pub(super) scm: Arc<dyn Scm>,
    pub(super) config: TriggerEngineConfig,
}

impl TriggerEngine {
    /// Create a new [`TriggerEngineBuilder`].
    pub fn builder() -> TriggerEngineBuilder {
        TriggerEngineBuilder::new()
    }

    fn context(&self) -> TriggerContext<'_> {
        TriggerContext {
            pipelines: self.pipelines.as_ref(),
            events: self.events.as_ref(),
            builds: self.builds.as_ref(),
            jobs: self.jobs.as_ref(),
            scm: self.scm.as_ref(),
            config: &self.config,
        }
    }

    /// Create a downstream event for an arbitrary pipeline.
    ///
    /// Resolves the pipeline's admin, unseals a token for the commit-sha
    /// lookup, and persists the event through the event factory.
    pub async fn trigger_event(&self, args: ExternalEventArgs) -> Result<Event, TriggerError> {
        create_external_event(
            args,
            self.pipelines.as_ref(),
            self.events.as_ref(),
            self.scm.as_ref(),
        )
        .await
    }

    /// Trigger every downstream job of a finished build.
    ///
    /// Returns the builds created or promoted by this pass. A single next
    /// job's failure is logged and does not fail the pass.
    pub async fn trigger_next_jobs(
        &self,
        pipeline: &Pipeline,
        job: &Job,
        build: &Build,
        username: &str,
        scm_context: &str,
    ) -> Result<Vec<Build>, TriggerError> {
        trigger::trigger_next_jobs(&self.context(), pipeline, job, build, username, scm_context)
            .await
    }

    /// Access the event factory (for the host layer).
    pub fn event_factory(&self) -> &Arc<dyn EventFactory> {
        &self.events
    }

    /// Access the build factory (for the host layer).
    pub fn build_factory(&self) -> &Arc<dyn BuildFactory> {
        &self.builds
    }
}
