//! Workers and the worker registry
//!
//! A `Worker` is owned exclusively by the registry for its lifetime; callers
//! hold a `WorkerHandle` and go through the pool for every operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::traits::BackendClient;

/// Opaque context attached to a worker at creation
///
/// `workflow` and `project` label the cost buckets this worker's spend is
/// attributed to; `metadata` is forwarded unchanged and never interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerContext {
    pub workflow: Option<String>,
    pub project: Option<String>,
    pub metadata: Value,
}

/// A worker creation request
#[derive(Debug, Clone)]
pub struct CreateWorkerRequest {
    pub role: String,
    pub context: WorkerContext,
    /// Higher priority drains first when the request has to queue
    pub priority: i32,
}

impl CreateWorkerRequest {
    /// Create a request for a role with default priority
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            context: WorkerContext::default(),
            priority: 0,
        }
    }

    /// Set the queueing priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the full context
    pub fn with_context(mut self, context: WorkerContext) -> Self {
        self.context = context;
        self
    }

    /// Attribute this worker's cost to a workflow
    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.context.workflow = Some(workflow.into());
        self
    }

    /// Attribute this worker's cost to a project
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.context.project = Some(project.into());
        self
    }

    /// Attach opaque metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.context.metadata = metadata;
        self
    }
}

/// An active worker, owned by the registry
pub(crate) struct Worker {
    pub id: Uuid,
    pub role: String,
    pub client: Arc<dyn BackendClient>,
    pub profile: String,
    pub context: WorkerContext,
    pub started_at: DateTime<Utc>,
    /// Monotonic start time used for lifetime eviction and durations
    pub started_instant: Instant,
    pub accumulated_cost: f64,
    pub invocations: u64,
}

impl Worker {
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            id: self.id,
            role: self.role.clone(),
            started_at: self.started_at,
        }
    }
}

/// Snapshot of a worker returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct WorkerHandle {
    pub id: Uuid,
    pub role: String,
    pub started_at: DateTime<Utc>,
}

/// The set of currently active workers
#[derive(Default)]
pub(crate) struct WorkerRegistry {
    workers: HashMap<Uuid, Worker>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, worker: Worker) {
        self.workers.insert(worker.id, worker);
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Worker> {
        self.workers.remove(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<&Worker> {
        self.workers.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Worker> {
        self.workers.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.workers.keys().copied().collect()
    }

    /// Workers whose lifetime strictly exceeds `max_lifetime`
    ///
    /// Strict comparison: a worker at exactly the limit survives the sweep.
    pub fn expired(&self, max_lifetime: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        self.workers
            .values()
            .filter(|w| now.duration_since(w.started_instant) > max_lifetime)
            .map(|w| w.id)
            .collect()
    }
}
