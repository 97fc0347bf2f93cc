//! Engine builder — wires the collaborator factories together.

use std::sync::Arc;

use super::{TriggerEngine, TriggerEngineConfig};
use crate::errors::TriggerError;
use crate::traits::{BuildFactory, EventFactory, JobFactory, PipelineFactory, Scm};

/// Builder for assembling the [`TriggerEngine`].
///
/// Persistence is a consumed collaborator, so every factory must be
/// supplied — there are no file-backed defaults. [`build()`](Self::build)
/// fails with a build error when one is missing.
pub struct TriggerEngineBuilder {
    pipelines: Option<Arc<dyn PipelineFactory>>,
    events: Option<Arc<dyn EventFactory>>,
    builds: Option<Arc<dyn BuildFactory>>,
    jobs: Option<Arc<dyn JobFactory>>,
    scm: Option<Arc<dyn Scm>>,
    config: TriggerEngineConfig,
}

impl TriggerEngineBuilder {
    pub(super) fn new() -> Self {
        Self {
            pipelines: None,
            events: None,
            builds: None,
            jobs: None,
            scm: None,
            config: TriggerEngineConfig::default(),
        }
    }

    pub fn pipeline_factory(mut self, factory: impl PipelineFactory + 'static) -> Self {
        self.pipelines = Some(Arc::new(factory));
        self
    }

    pub fn event_factory(mut self, factory: impl EventFactory + 'static) -> Self {
        self.events = Some(Arc::new(factory));
        self
    }

    pub fn build_factory(mut self, factory: impl BuildFactory + 'static) -> Self {
        self.builds = Some(Arc::new(factory));
        self
    }

    pub fn job_factory(mut self, factory: impl JobFactory + 'static) -> Self {
        self.jobs = Some(Arc::new(factory));
        self
    }

    pub fn scm(mut self, scm: impl Scm + 'static) -> Self {
        self.scm = Some(Arc::new(scm));
        self
    }

    pub fn config(mut self, config: TriggerEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the engine, verifying every factory is present.
    pub fn build(self) -> Result<TriggerEngine, TriggerError> {
        fn require<T: ?Sized>(
            slot: Option<Arc<T>>,
            what: &str,
        ) -> Result<Arc<T>, TriggerError> {
            slot.ok_or_else(|| TriggerError::Build {
                message: format!("{what} is required"),
            })
        }

        Ok(TriggerEngine {
            pipelines: require(self.pipelines, "pipeline factory")?,
            events: require(self.events, "event factory")?,
            builds: require(self.builds, "build factory")?,
            jobs: require(self.jobs, "job factory")?,
            scm: require(self.scm, "scm provider")?,
            config: self.config,
        })
    }
}
