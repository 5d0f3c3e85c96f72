//! Priority queue of pending creation requests
//!
//! Requests queue when the pool is at capacity. The drain order is a total
//! order: priority descending, then `queued_at` ascending; the sort is
//! stable, so requests enqueued at the same instant keep submission order.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::worker::{WorkerContext, WorkerHandle};

/// A queued creation request awaiting a free slot
pub(crate) struct PendingRequest {
    pub role: String,
    pub context: WorkerContext,
    pub priority: i32,
    pub queued_at: DateTime<Utc>,
    /// Settles the original caller's `create` future exactly once
    pub reply: oneshot::Sender<Result<WorkerHandle>>,
}

/// Ordered sequence of pending creation requests
#[derive(Default)]
pub(crate) struct AdmissionQueue {
    entries: Vec<PendingRequest>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: PendingRequest) {
        self.entries.push(request);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-sort and remove the highest-priority, oldest request
    pub fn pop_next(&mut self) -> Option<PendingRequest> {
        if self.entries.is_empty() {
            return None;
        }
        // Stable sort keeps submission order for equal (priority, queued_at)
        self.entries
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.queued_at.cmp(&b.queued_at)));
        Some(self.entries.remove(0))
    }

    /// Take every queued request, e.g. to reject them all at shutdown
    pub fn drain_all(&mut self) -> Vec<PendingRequest> {
        std::mem::take(&mut self.entries)
    }
}
