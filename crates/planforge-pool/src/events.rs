//! Pool lifecycle events
//!
//! PoolEvent covers the four observable worker transitions:
//! started, invoked, completed (destroyed), and error. External
//! collaborators subscribe through the pool; a listener panic is caught
//! and logged, never allowed to interrupt the emitting operation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::traits::UsageStats;

/// Events emitted by the pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PoolEvent {
    /// Worker admitted and registered
    WorkerStarted {
        worker_id: Uuid,
        role: String,
        timestamp: DateTime<Utc>,
    },

    /// Worker invocation completed successfully
    WorkerInvoked {
        worker_id: Uuid,
        role: String,
        latency_ms: u64,
        cost: f64,
        usage: UsageStats,
        timestamp: DateTime<Utc>,
    },

    /// Worker destroyed (by caller or health monitor)
    WorkerCompleted {
        worker_id: Uuid,
        role: String,
        duration_ms: u64,
        total_cost: f64,
        invocations: u64,
        timestamp: DateTime<Utc>,
    },

    /// Worker invocation failed
    WorkerError {
        worker_id: Uuid,
        role: String,
        error: String,
        /// Truncated payload excerpt; never the full payload
        payload_excerpt: String,
        timestamp: DateTime<Utc>,
    },
}

impl PoolEvent {
    /// Create a worker started event
    pub fn started(worker_id: Uuid, role: impl Into<String>) -> Self {
        PoolEvent::WorkerStarted {
            worker_id,
            role: role.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a worker invoked event
    pub fn invoked(
        worker_id: Uuid,
        role: impl Into<String>,
        latency_ms: u64,
        cost: f64,
        usage: UsageStats,
    ) -> Self {
        PoolEvent::WorkerInvoked {
            worker_id,
            role: role.into(),
            latency_ms,
            cost,
            usage,
            timestamp: Utc::now(),
        }
    }

    /// Create a worker completed event
    pub fn completed(
        worker_id: Uuid,
        role: impl Into<String>,
        duration_ms: u64,
        total_cost: f64,
        invocations: u64,
    ) -> Self {
        PoolEvent::WorkerCompleted {
            worker_id,
            role: role.into(),
            duration_ms,
            total_cost,
            invocations,
            timestamp: Utc::now(),
        }
    }

    /// Create a worker error event
    pub fn error(
        worker_id: Uuid,
        role: impl Into<String>,
        error: impl Into<String>,
        payload_excerpt: impl Into<String>,
    ) -> Self {
        PoolEvent::WorkerError {
            worker_id,
            role: role.into(),
            error: error.into(),
            payload_excerpt: payload_excerpt.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the worker id for this event
    pub fn worker_id(&self) -> Uuid {
        match self {
            PoolEvent::WorkerStarted { worker_id, .. } => *worker_id,
            PoolEvent::WorkerInvoked { worker_id, .. } => *worker_id,
            PoolEvent::WorkerCompleted { worker_id, .. } => *worker_id,
            PoolEvent::WorkerError { worker_id, .. } => *worker_id,
        }
    }

    /// Get the role for this event
    pub fn role(&self) -> &str {
        match self {
            PoolEvent::WorkerStarted { role, .. } => role,
            PoolEvent::WorkerInvoked { role, .. } => role,
            PoolEvent::WorkerCompleted { role, .. } => role,
            PoolEvent::WorkerError { role, .. } => role,
        }
    }

    /// Event kind discriminant, for listeners that filter by type
    pub fn kind(&self) -> &'static str {
        match self {
            PoolEvent::WorkerStarted { .. } => "started",
            PoolEvent::WorkerInvoked { .. } => "invoked",
            PoolEvent::WorkerCompleted { .. } => "completed",
            PoolEvent::WorkerError { .. } => "error",
        }
    }
}

/// A subscribed event listener
///
/// Listeners are called synchronously on the emitting task; they should be
/// fast and non-blocking. For heavy processing, spawn from the listener.
pub type EventListener = Arc<dyn Fn(&PoolEvent) + Send + Sync>;

/// Fan-out of pool events to subscribed listeners
#[derive(Default)]
pub(crate) struct EventBroadcaster {
    listeners: RwLock<Vec<EventListener>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener; it receives every subsequent event
    pub fn subscribe(&self, listener: EventListener) {
        self.listeners.write().push(listener);
    }

    /// Deliver an event to every listener, isolating panics per listener
    pub fn emit(&self, event: &PoolEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(
                    worker_id = %event.worker_id(),
                    kind = event.kind(),
                    "Event listener panicked; continuing"
                );
            }
        }
    }
}

/// Render a truncated excerpt of a payload for ERROR events
///
/// Truncation lands on a char boundary so the excerpt stays valid UTF-8.
pub(crate) fn payload_excerpt(payload: &Value, max_len: usize) -> String {
    let rendered = payload.to_string();
    if rendered.len() <= max_len {
        return rendered;
    }
    let mut end = max_len;
    while !rendered.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &rendered[..end])
}
