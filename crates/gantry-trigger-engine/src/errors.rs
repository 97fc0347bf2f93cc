//! Error types for the trigger engine and its factory contracts.

use thiserror::Error;

/// Errors from the persistence factories
/// ([`BuildFactory`](crate::traits::BuildFactory),
/// [`EventFactory`](crate::traits::EventFactory), …).
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The entity does not exist — usually a stale event or a lost race.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: u64 },
    /// Downstream persistence failure.
    #[error("factory error: {message}")]
    Store { message: String },
    /// An update lost a concurrent race; the caller re-reads and retries.
    #[error("concurrent update conflict: {message}")]
    Conflict { message: String },
}

/// Errors from the source-control interface ([`Scm`](crate::traits::Scm)).
#[derive(Debug, Error)]
pub enum ScmError {
    #[error("scm provider error: {message}")]
    Provider { message: String },
}

/// Errors from [`TriggerEngine`](crate::engine::TriggerEngine) operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TriggerError {
    /// A factory call failed.
    #[error("factory error: {0}")]
    Factory(#[from] FactoryError),
    /// A source-control call failed.
    #[error("scm error: {0}")]
    Scm(#[from] ScmError),
    /// The workflow graph does not contain an expected node or edge.
    #[error("workflow graph mismatch: {message}")]
    Graph { message: String },
    /// An error during engine construction.
    #[error("build error: {message}")]
    Build { message: String },
}
