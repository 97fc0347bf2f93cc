//! In-memory factory cluster for testing and lightweight usage.
//!
//! One seedable world implementing every collaborator contract. Uses
//! `BTreeMap` for deterministic iteration order (project convention).
//! Locks are held only for synchronous map access, never across await
//! points.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::{FactoryError, ScmError};
use crate::traits::{
    AdminPrincipal, BuildFactory, BuildFilter, CommitShaArgs, EventFactory, EventFilter,
    JobFactory, PipelineFactory, Scm, SortOrder,
};
use crate::types::{
    Build, BuildId, BuildStatus, Event, EventId, Job, JobId, JobState, NewBuild, NewEvent,
    Pipeline, PipelineId, WorkflowEdge, WorkflowGraph, WorkflowNode,
};

#[derive(Default)]
struct ClusterState {
    pipelines: BTreeMap<PipelineId, Pipeline>,
    admins: BTreeMap<PipelineId, InMemoryAdmin>,
    graphs: BTreeMap<PipelineId, WorkflowGraph>,
    jobs: BTreeMap<JobId, Job>,
    events: BTreeMap<EventId, Event>,
    builds: BTreeMap<BuildId, Build>,
    commit_shas: BTreeMap<String, String>,
    /// Journal of event-creation payloads, for assertions.
    created_events: Vec<NewEvent>,
    next_event_id: EventId,
    next_build_id: BuildId,
}

/// In-memory implementation of all five factory contracts plus the SCM
/// interface.
#[derive(Clone)]
pub struct InMemoryCluster {
    state: Arc<RwLock<ClusterState>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ClusterState {
                next_event_id: 100,
                next_build_id: 1,
                ..ClusterState::default()
            })),
        }
    }

    // -- seeding -----------------------------------------------------------

    /// Register a pipeline with a default admin principal.
    pub fn add_pipeline(&self, id: PipelineId, scm_context: &str, scm_uri: &str) {
        self.add_pipeline_record(Pipeline {
            id,
            scm_context: scm_context.to_string(),
            scm_uri: scm_uri.to_string(),
            config_pipeline_id: None,
            chain_pr: false,
        });
    }

    pub fn add_pipeline_record(&self, pipeline: Pipeline) {
        let mut state = self.state.write().expect("cluster lock");
        state.admins.insert(
            pipeline.id,
            InMemoryAdmin {
                username: format!("admin-{}", pipeline.id),
                token: format!("sealed-token-{}", pipeline.id),
            },
        );
        state.pipelines.insert(pipeline.id, pipeline);
    }

    /// Register the workflow graph snapshotted into this pipeline's events.
    pub fn set_graph(
        &self,
        pipeline_id: PipelineId,
        edges: &[(&str, &str, bool)],
        nodes: &[(&str, Option<JobId>)],
    ) {
        let graph = WorkflowGraph {
            nodes: nodes
                .iter()
                .map(|(name, id)| WorkflowNode {
                    id: *id,
                    name: name.to_string(),
                })
                .collect(),
            edges: edges
                .iter()
                .map(|(src, dest, join)| WorkflowEdge {
                    src: src.to_string(),
                    dest: dest.to_string(),
                    join: *join,
                })
                .collect(),
        };
        self.state
            .write()
            .expect("cluster lock")
            .graphs
            .insert(pipeline_id, graph);
    }

    pub fn add_job(&self, id: JobId, pipeline_id: PipelineId, name: &str) {
        self.add_job_with_state(id, pipeline_id, name, JobState::Enabled);
    }

    pub fn add_job_with_state(
        &self,
        id: JobId,
        pipeline_id: PipelineId,
        name: &str,
        state: JobState,
    ) {
        self.state.write().expect("cluster lock").jobs.insert(
            id,
            Job {
                id,
                pipeline_id,
                name: name.to_string(),
                state,
            },
        );
    }

    /// Create an event snapshotting the pipeline's current graph.
    pub fn add_event(
        &self,
        pipeline_id: PipelineId,
        sha: String,
        parent_event_id: Option<EventId>,
        group_event_id: Option<EventId>,
    ) -> Event {
        let mut state = self.state.write().expect("cluster lock");
        let id = state.next_event_id;
        state.next_event_id += 1;
        let event = Event {
            id,
            pipeline_id,
            group_event_id: group_event_id.unwrap_or(id),
            parent_event_id,
            sha,
            config_pipeline_sha: None,
            base_branch: None,
            pr: None,
            workflow_graph: state.graphs.get(&pipeline_id).cloned().unwrap_or_default(),
            created_at: Utc::now(),
        };
        state.events.insert(id, event.clone());
        event
    }

    pub fn add_build(&self, event_id: EventId, job_id: JobId, status: BuildStatus) -> Build {
        let mut state = self.state.write().expect("cluster lock");
        let id = state.next_build_id;
        state.next_build_id += 1;
        let sha = state
            .events
            .get(&event_id)
            .map(|e| e.sha.clone())
            .unwrap_or_default();
        let build = Build {
            id,
            event_id,
            job_id,
            status,
            sha,
            parent_build_id: Vec::new(),
            parent_builds: BTreeMap::new(),
            revision: 0,
            created_at: Utc::now(),
        };
        state.builds.insert(id, build.clone());
        build
    }

    /// Pin the commit sha returned for a repository.
    pub fn set_commit_sha(&self, scm_uri: &str, sha: &str) {
        self.state
            .write()
            .expect("cluster lock")
            .commit_shas
            .insert(scm_uri.to_string(), sha.to_string());
    }

    // -- inspection --------------------------------------------------------

    pub fn pipeline(&self, id: PipelineId) -> Option<Pipeline> {
        self.state
            .read()
            .expect("cluster lock")
            .pipelines
            .get(&id)
            .cloned()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.state.read().expect("cluster lock").jobs.get(&id).cloned()
    }

    pub fn build(&self, id: BuildId) -> Option<Build> {
        self.state.read().expect("cluster lock").builds.get(&id).cloned()
    }

    pub fn event(&self, id: EventId) -> Option<Event> {
        self.state.read().expect("cluster lock").events.get(&id).cloned()
    }

    /// Events of a pipeline, most recent first.
    pub fn events_of(&self, pipeline_id: PipelineId) -> Vec<Event> {
        let state = self.state.read().expect("cluster lock");
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|e| e.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.id.cmp(&a.id));
        events
    }

    pub fn builds_of(&self, event_id: EventId) -> Vec<Build> {
        let state = self.state.read().expect("cluster lock");
        state
            .builds
            .values()
            .filter(|b| b.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Event-creation payloads seen so far, in order.
    pub fn created_event_payloads(&self) -> Vec<NewEvent> {
        self.state.read().expect("cluster lock").created_events.clone()
    }
}

/// Admin principal backed by a fixed sealed token.
#[derive(Debug, Clone)]
pub struct InMemoryAdmin {
    username: String,
    token: String,
}

#[async_trait]
impl AdminPrincipal for InMemoryAdmin {
    fn username(&self) -> &str {
        &self.username
    }

    async fn unseal_token(&self) -> Result<String, ScmError> {
        Ok(self.token.clone())
    }
}

// ---------------------------------------------------------------------------
// Factory implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl PipelineFactory for InMemoryCluster {
    async fn get(&self, id: PipelineId) -> Result<Pipeline, FactoryError> {
        self.state
            .read()
            .expect("cluster lock")
            .pipelines
            .get(&id)
            .cloned()
            .ok_or(FactoryError::NotFound {
                entity: "pipeline",
                id,
            })
    }

    async fn admin(&self, id: PipelineId) -> Result<Arc<dyn AdminPrincipal>, FactoryError> {
        let admin = self
            .state
            .read()
            .expect("cluster lock")
            .admins
            .get(&id)
            .cloned()
            .ok_or(FactoryError::NotFound {
                entity: "pipeline",
                id,
            })?;
        Ok(Arc::new(admin))
    }
}

#[async_trait]
impl EventFactory for InMemoryCluster {
    async fn get(&self, id: EventId) -> Result<Event, FactoryError> {
        self.state
            .read()
            .expect("cluster lock")
            .events
            .get(&id)
            .cloned()
            .ok_or(FactoryError::NotFound { entity: "event", id })
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, FactoryError> {
        let state = self.state.read().expect("cluster lock");
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|e| {
                filter.pipeline_id.is_none_or(|pid| e.pipeline_id == pid)
                    && filter
                        .parent_event_id
                        .is_none_or(|pe| e.parent_event_id == Some(pe))
                    && filter
                        .group_event_id
                        .is_none_or(|ge| e.group_event_id == ge)
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(events)
    }

    async fn create(&self, payload: NewEvent) -> Result<Event, FactoryError> {
        let mut state = self.state.write().expect("cluster lock");
        let id = state.next_event_id;
        state.next_event_id += 1;
        let event = Event {
            id,
            pipeline_id: payload.pipeline_id,
            group_event_id: payload.group_event_id.unwrap_or(id),
            parent_event_id: payload.parent_event_id,
            sha: payload.sha.clone(),
            config_pipeline_sha: payload.config_pipeline_sha.clone(),
            base_branch: payload.base_branch.clone(),
            pr: None,
            workflow_graph: state
                .graphs
                .get(&payload.pipeline_id)
                .cloned()
                .unwrap_or_default(),
            created_at: Utc::now(),
        };
        state.events.insert(id, event.clone());
        state.created_events.push(payload);
        Ok(event)
    }

    async fn builds(&self, id: EventId) -> Result<Vec<Build>, FactoryError> {
        Ok(self.builds_of(id))
    }
}

#[async_trait]
impl BuildFactory for InMemoryCluster {
    async fn get(&self, id: BuildId) -> Result<Build, FactoryError> {
        self.build(id).ok_or(FactoryError::NotFound {
            entity: "build",
            id,
        })
    }

    async fn list(&self, filter: &BuildFilter) -> Result<Vec<Build>, FactoryError> {
        let state = self.state.read().expect("cluster lock");
        let mut builds: Vec<Build> = state
            .builds
            .values()
            .filter(|b| {
                filter.event_id.is_none_or(|eid| b.event_id == eid)
                    && filter.job_id.is_none_or(|jid| b.job_id == jid)
                    && filter.status.is_none_or(|s| b.status == s)
            })
            .cloned()
            .collect();
        match filter.sort {
            SortOrder::Ascending => builds.sort_by_key(|b| b.id),
            SortOrder::Descending => builds.sort_by(|a, b| b.id.cmp(&a.id)),
        }
        Ok(builds)
    }

    async fn latest_builds(&self, group_event_id: EventId) -> Result<Vec<Build>, FactoryError> {
        let state = self.state.read().expect("cluster lock");
        let mut latest: BTreeMap<JobId, Build> = BTreeMap::new();
        for build in state.builds.values() {
            let in_group = state
                .events
                .get(&build.event_id)
                .is_some_and(|e| e.group_event_id == group_event_id);
            if !in_group {
                continue;
            }
            match latest.get(&build.job_id) {
                Some(existing) if existing.id >= build.id => {}
                _ => {
                    latest.insert(build.job_id, build.clone());
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn create(&self, payload: NewBuild) -> Result<Build, FactoryError> {
        let mut state = self.state.write().expect("cluster lock");
        let id = state.next_build_id;
        state.next_build_id += 1;
        let build = Build {
            id,
            event_id: payload.event_id,
            job_id: payload.job_id,
            status: BuildStatus::Created,
            sha: payload.sha,
            parent_build_id: payload.parent_build_id,
            parent_builds: payload.parent_builds,
            revision: 0,
            created_at: Utc::now(),
        };
        state.builds.insert(id, build.clone());
        Ok(build)
    }

    async fn update(&self, build: &Build) -> Result<Build, FactoryError> {
        let mut state = self.state.write().expect("cluster lock");
        let stored = state
            .builds
            .get(&build.id)
            .ok_or(FactoryError::NotFound {
                entity: "build",
                id: build.id,
            })?;
        if stored.revision != build.revision {
            return Err(FactoryError::Conflict {
                message: format!(
                    "build {} is at revision {}, caller had {}",
                    build.id, stored.revision, build.revision
                ),
            });
        }
        let mut updated = build.clone();
        updated.revision += 1;
        state.builds.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn start(&self, id: BuildId) -> Result<Build, FactoryError> {
        let mut state = self.state.write().expect("cluster lock");
        let build = state.builds.get_mut(&id).ok_or(FactoryError::NotFound {
            entity: "build",
            id,
        })?;
        if !build.status.is_terminal() {
            build.status = BuildStatus::Queued;
        }
        build.revision += 1;
        Ok(build.clone())
    }

    async fn remove(&self, id: BuildId) -> Result<(), FactoryError> {
        let mut state = self.state.write().expect("cluster lock");
        state
            .builds
            .remove(&id)
            .map(|_| ())
            .ok_or(FactoryError::NotFound {
                entity: "build",
                id,
            })
    }
}

#[async_trait]
impl JobFactory for InMemoryCluster {
    async fn get_by_id(&self, id: JobId) -> Result<Job, FactoryError> {
        self.state
            .read()
            .expect("cluster lock")
            .jobs
            .get(&id)
            .cloned()
            .ok_or(FactoryError::NotFound { entity: "job", id })
    }

    async fn get_by_name(
        &self,
        pipeline_id: PipelineId,
        name: &str,
    ) -> Result<Option<Job>, FactoryError> {
        Ok(self
            .state
            .read()
            .expect("cluster lock")
            .jobs
            .values()
            .find(|j| j.pipeline_id == pipeline_id && j.name == name)
            .cloned())
    }
}

#[async_trait]
impl Scm for InMemoryCluster {
    async fn get_commit_sha(&self, args: &CommitShaArgs) -> Result<String, ScmError> {
        let state = self.state.read().expect("cluster lock");
        Ok(state
            .commit_shas
            .get(&args.scm_uri)
            .cloned()
            .unwrap_or_else(|| format!("{}-head", args.scm_uri)))
    }
}
