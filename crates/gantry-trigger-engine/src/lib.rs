//! Gantry trigger engine — downstream trigger decisions for a CI build
//! orchestrator.
//!
//! When a build finishes, this crate decides which downstream builds to
//! create, which to merely update, and which to start — within the same
//! pipeline and across pipelines. It handles sequential edges, OR
//! triggers, AND joins with cross-entity completeness tracking, and
//! external re-entry where a triggered pipeline triggers back.
//!
//! The crate is designed to be embedded in a host process and has zero
//! dependencies on web servers or databases: all persistence and
//! source-control access is consumed through the factory traits in
//! [`traits`].

pub mod defaults;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod traits;
pub mod trigger;
pub mod types;
pub mod workflow;

// Re-export the public surface at the crate level.

// defaults
pub use defaults::{InMemoryAdmin, InMemoryCluster};

// engine
pub use engine::{TriggerEngine, TriggerEngineBuilder, TriggerEngineConfig};

// errors
pub use errors::{FactoryError, ScmError, TriggerError};

// ledger
pub use ledger::{ParentBuilds, PipelineContribution};

// traits
pub use traits::{
    AdminPrincipal, BuildFactory, BuildFilter, CommitShaArgs, EventFactory, EventFilter,
    JobFactory, PipelineFactory, Scm, SortOrder,
};

// trigger
pub use trigger::actions::ExternalEventArgs;
pub use trigger::join::JoinOutcome;
pub use trigger::name::TriggerName;

// types
pub use types::{
    Build, BuildId, BuildStatus, Event, EventId, EventKind, Job, JobId, JobState, NewBuild,
    NewEvent, Pipeline, PipelineId, PrInfo, WorkflowEdge, WorkflowGraph, WorkflowNode,
};
