//! Pool statistics and cost accounting
//!
//! Both snapshots are pure reads: the pool copies them out under its state
//! lock without touching the queue or any pending drain.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Point-in-time pool statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// Currently active workers
    pub active_workers: usize,
    /// Concurrency cap
    pub max_concurrent: usize,
    /// Creation requests waiting for a slot
    pub queued_requests: usize,
    /// Workers ever created by this pool
    pub total_workers_created: u64,
    /// Cost across every worker, destroyed or active
    pub total_cost: f64,
}

/// Cost broken down by attribution bucket
///
/// All counters are monotonic: costs are folded in at invocation time and
/// survive the destruction of the worker that incurred them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostMetrics {
    pub total_cost: f64,
    pub by_role: HashMap<String, f64>,
    pub by_workflow: HashMap<String, f64>,
    pub by_project: HashMap<String, f64>,
}

impl CostMetrics {
    /// Fold one invocation's cost into the total and its buckets
    pub(crate) fn record(
        &mut self,
        role: &str,
        workflow: Option<&str>,
        project: Option<&str>,
        cost: f64,
    ) {
        self.total_cost += cost;
        *self.by_role.entry(role.to_string()).or_default() += cost;
        if let Some(workflow) = workflow {
            *self.by_workflow.entry(workflow.to_string()).or_default() += cost;
        }
        if let Some(project) = project {
            *self.by_project.entry(project.to_string()).or_default() += cost;
        }
    }
}
