//! Default implementations of the collaborator contracts.
//!
//! Production embeddings supply their own factories; the in-memory cluster
//! here backs tests and short-lived processes.

pub mod in_memory;

pub use in_memory::{InMemoryAdmin, InMemoryCluster};
