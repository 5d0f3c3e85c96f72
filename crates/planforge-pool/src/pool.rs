//! Worker pool: admission control, queue drain, health monitoring, shutdown
//!
//! One `parking_lot` mutex owns the registry, the queue, the reservation
//! count, and the cost counters, so capacity-check-then-reserve and
//! pop-then-admit are atomic regions. Collaborator I/O (role lookup, client
//! construction, profile loading, invocations) always runs with the lock
//! released and, for creations, with a slot reserved.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkerPoolConfig;
use crate::error::{PoolError, Result};
use crate::events::{payload_excerpt, EventBroadcaster, EventListener, PoolEvent};
use crate::metrics::{CostMetrics, PoolStats};
use crate::queue::{AdmissionQueue, PendingRequest};
use crate::traits::{
    BackendClientFactory, BackendResponse, InvokeOptions, ProfileLoader, RoleConfigProvider,
};
use crate::worker::{CreateWorkerRequest, Worker, WorkerContext, WorkerHandle, WorkerRegistry};

/// Shared mutable pool state, guarded by a single mutex
struct PoolInner {
    registry: WorkerRegistry,
    queue: AdmissionQueue,
    /// Slots held by creations between reservation and registration
    reserved: usize,
    drain_in_progress: bool,
    shutting_down: bool,
    total_workers_created: u64,
    costs: CostMetrics,
}

impl PoolInner {
    fn occupied(&self) -> usize {
        self.registry.len() + self.reserved
    }

    fn has_capacity(&self, max_concurrent: usize) -> bool {
        self.occupied() < max_concurrent
    }
}

struct PoolCore {
    config: WorkerPoolConfig,
    roles: Arc<dyn RoleConfigProvider>,
    backends: Arc<dyn BackendClientFactory>,
    profiles: Arc<dyn ProfileLoader>,
    inner: Mutex<PoolInner>,
    events: EventBroadcaster,
    shutdown_tx: watch::Sender<bool>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Worker pool for role-bound planning workers
///
/// Cheap to clone; all clones share the same pool state.
///
/// # Example
///
/// ```ignore
/// use planforge_pool::{CreateWorkerRequest, WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::default(), roles, backends, profiles)?;
///
/// let worker = pool.create(CreateWorkerRequest::new("epic-planner")).await?;
/// let response = pool.invoke(worker.id, &payload).await?;
/// pool.destroy(worker.id).await?;
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    core: Arc<PoolCore>,
}

impl WorkerPool {
    /// Create a new pool with injected collaborators
    ///
    /// Must be called within a Tokio runtime: the health monitor (when
    /// enabled) is spawned here and runs until [`WorkerPool::shutdown`].
    pub fn new(
        config: WorkerPoolConfig,
        roles: Arc<dyn RoleConfigProvider>,
        backends: Arc<dyn BackendClientFactory>,
        profiles: Arc<dyn ProfileLoader>,
    ) -> Result<Self> {
        config.validate()?;

        let (shutdown_tx, _) = watch::channel(false);
        let pool = Self {
            core: Arc::new(PoolCore {
                config,
                roles,
                backends,
                profiles,
                inner: Mutex::new(PoolInner {
                    registry: WorkerRegistry::new(),
                    queue: AdmissionQueue::new(),
                    reserved: 0,
                    drain_in_progress: false,
                    shutting_down: false,
                    total_workers_created: 0,
                    costs: CostMetrics::default(),
                }),
                events: EventBroadcaster::new(),
                shutdown_tx,
                monitor_handle: Mutex::new(None),
            }),
        };

        if pool.core.config.auto_evict_hung_workers {
            pool.spawn_health_monitor();
        }

        info!(
            max_concurrent = pool.core.config.max_concurrent,
            auto_evict = pool.core.config.auto_evict_hung_workers,
            "Worker pool created"
        );

        Ok(pool)
    }

    /// Create a worker for a role
    ///
    /// Admits immediately when a slot is free; otherwise the request queues
    /// and this future resolves when a later drain admits it. Queueing is
    /// normal backpressure, not an error.
    pub async fn create(&self, request: CreateWorkerRequest) -> Result<WorkerHandle> {
        validate_role(&request.role)?;

        let queued = {
            let mut inner = self.core.inner.lock();
            if inner.shutting_down {
                return Err(PoolError::ShuttingDown);
            }
            if inner.has_capacity(self.core.config.max_concurrent) {
                inner.reserved += 1;
                None
            } else {
                let (reply, rx) = oneshot::channel();
                inner.queue.push(PendingRequest {
                    role: request.role.clone(),
                    context: request.context.clone(),
                    priority: request.priority,
                    queued_at: Utc::now(),
                    reply,
                });
                debug!(
                    role = %request.role,
                    priority = request.priority,
                    queue_len = inner.queue.len(),
                    "Pool at capacity, creation request queued"
                );
                Some(rx)
            }
        };

        match queued {
            None => self.admit(&request.role, request.context).await,
            // The sender is dropped without settling only when the pool is
            // torn down before the request is drained
            Some(rx) => rx.await.map_err(|_| PoolError::ShuttingDown)?,
        }
    }

    /// Invoke a worker's backend with an opaque payload
    ///
    /// The pool records latency and folds the backend's own cost estimate
    /// into the worker and the aggregate counters. It performs no retries.
    pub async fn invoke(&self, worker_id: Uuid, payload: &Value) -> Result<BackendResponse> {
        let (client, role, workflow, project, options) = {
            let inner = self.core.inner.lock();
            let worker = inner
                .registry
                .get(&worker_id)
                .ok_or(PoolError::WorkerNotFound(worker_id))?;
            (
                Arc::clone(&worker.client),
                worker.role.clone(),
                worker.context.workflow.clone(),
                worker.context.project.clone(),
                InvokeOptions {
                    system_prompt: Some(worker.profile.clone()),
                    timeout: None,
                },
            )
        };

        let started = Instant::now();
        let response = match client.invoke(payload, &options).await {
            Ok(response) => response,
            Err(source) => {
                let excerpt = payload_excerpt(payload, self.core.config.error_excerpt_len);
                warn!(worker_id = %worker_id, role = %role, error = %source, "Backend invocation failed");
                self.core
                    .events
                    .emit(&PoolEvent::error(worker_id, role.as_str(), source.to_string(), excerpt));
                return Err(PoolError::invocation(source));
            }
        };
        let latency = started.elapsed();

        let cost = client.estimate_cost(payload, &response);
        let usage = client.usage_stats();

        {
            let mut inner = self.core.inner.lock();
            // The worker may have been destroyed while the call was in
            // flight; the cost still counts toward the aggregates
            if let Some(worker) = inner.registry.get_mut(&worker_id) {
                worker.accumulated_cost += cost;
                worker.invocations += 1;
            }
            inner
                .costs
                .record(&role, workflow.as_deref(), project.as_deref(), cost);
        }

        debug!(
            worker_id = %worker_id,
            role = %role,
            latency_ms = latency.as_millis() as u64,
            cost,
            "Worker invoked"
        );
        self.core.events.emit(&PoolEvent::invoked(
            worker_id,
            role.as_str(),
            latency.as_millis() as u64,
            cost,
            usage,
        ));

        Ok(response)
    }

    /// Destroy a worker and free its slot
    ///
    /// Safe to race with the health monitor evicting the same worker: the
    /// second caller observes `WorkerNotFound`. Afterwards a queue drain is
    /// triggered fire-and-forget; drain failures never reach this caller.
    pub async fn destroy(&self, worker_id: Uuid) -> Result<()> {
        let worker = {
            let mut inner = self.core.inner.lock();
            inner
                .registry
                .remove(&worker_id)
                .ok_or(PoolError::WorkerNotFound(worker_id))?
        };

        let duration = worker.started_instant.elapsed();
        info!(
            worker_id = %worker.id,
            role = %worker.role,
            duration_ms = duration.as_millis() as u64,
            total_cost = worker.accumulated_cost,
            "Worker destroyed"
        );
        self.core.events.emit(&PoolEvent::completed(
            worker.id,
            worker.role.as_str(),
            duration.as_millis() as u64,
            worker.accumulated_cost,
            worker.invocations,
        ));

        self.spawn_drain();
        Ok(())
    }

    /// Snapshot of pool statistics; never blocks on pending drains
    pub fn stats(&self) -> PoolStats {
        let inner = self.core.inner.lock();
        PoolStats {
            active_workers: inner.registry.len(),
            max_concurrent: self.core.config.max_concurrent,
            queued_requests: inner.queue.len(),
            total_workers_created: inner.total_workers_created,
            total_cost: inner.costs.total_cost,
        }
    }

    /// Snapshot of cost, broken down by role/workflow/project
    pub fn cost_metrics(&self) -> CostMetrics {
        self.core.inner.lock().costs.clone()
    }

    /// Subscribe to pool lifecycle events
    ///
    /// Listeners are called synchronously on the emitting task; a panic in
    /// one listener is caught and logged without affecting the others.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&PoolEvent) + Send + Sync + 'static,
    {
        self.core.events.subscribe(Arc::new(listener) as EventListener);
    }

    /// Shut the pool down
    ///
    /// Stops the health monitor first, rejects everything still queued with
    /// [`PoolError::ShuttingDown`], then destroys all active workers
    /// concurrently. Individual destroy failures are logged, not raised.
    pub async fn shutdown(&self) -> Result<()> {
        let pending = {
            let mut inner = self.core.inner.lock();
            if inner.shutting_down {
                return Ok(());
            }
            inner.shutting_down = true;
            inner.queue.drain_all()
        };

        info!(queued_rejected = pending.len(), "Worker pool shutting down");
        let _ = self.core.shutdown_tx.send(true);

        // Stop the monitor deterministically before tearing workers down
        let monitor = self.core.monitor_handle.lock().take();
        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        for request in pending {
            let _ = request.reply.send(Err(PoolError::ShuttingDown));
        }

        let ids = self.core.inner.lock().registry.ids();
        let results = join_all(ids.iter().map(|id| self.destroy(*id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(error) = result {
                warn!(worker_id = %id, %error, "Failed to destroy worker during shutdown");
            }
        }

        info!("Worker pool stopped");
        Ok(())
    }

    /// Build and register a worker into an already-reserved slot
    async fn admit(&self, role: &str, context: WorkerContext) -> Result<WorkerHandle> {
        match self.build_worker(role, context).await {
            Ok(worker) => {
                let handle = worker.handle();
                {
                    let mut inner = self.core.inner.lock();
                    inner.reserved -= 1;
                    // Shutdown may have started while collaborator I/O was in
                    // flight; registering now would leave a live worker no
                    // shutdown pass will ever see
                    if inner.shutting_down {
                        return Err(PoolError::ShuttingDown);
                    }
                    inner.registry.insert(worker);
                    inner.total_workers_created += 1;
                }
                info!(worker_id = %handle.id, role = %handle.role, "Worker started");
                self.core
                    .events
                    .emit(&PoolEvent::started(handle.id, handle.role.as_str()));
                Ok(handle)
            }
            Err(error) => {
                {
                    let mut inner = self.core.inner.lock();
                    inner.reserved -= 1;
                }
                // The reserved slot is free again; give it to queued work
                self.spawn_drain();
                Err(error)
            }
        }
    }

    /// Resolve collaborators and assemble a worker; no state is mutated here
    async fn build_worker(&self, role: &str, context: WorkerContext) -> Result<Worker> {
        let role_config = self
            .core
            .roles
            .lookup(role)
            .await?
            .ok_or_else(|| PoolError::RoleNotConfigured(role.to_string()))?;

        let client = self
            .core
            .backends
            .build(&role_config)
            .await
            .map_err(|source| PoolError::backend_creation(role, source))?;

        let profile = self
            .core
            .profiles
            .load(role)
            .await
            .map_err(|source| PoolError::profile_load(role, source))?;

        Ok(Worker {
            id: Uuid::now_v7(),
            role: role.to_string(),
            client,
            profile,
            context,
            started_at: Utc::now(),
            started_instant: Instant::now(),
            accumulated_cost: 0.0,
            invocations: 0,
        })
    }

    /// Trigger a queue drain without making the caller wait for it
    fn spawn_drain(&self) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.drain_queue().await;
        });
    }

    /// Admit queued requests into free slots, one at a time
    ///
    /// Guarded by `drain_in_progress`: a drain attempt that finds another
    /// drain in flight is a no-op. The guard is released and re-checked
    /// under the same lock, so a destroy racing with drain exit cannot
    /// strand a queued request.
    async fn drain_queue(&self) {
        {
            let mut inner = self.core.inner.lock();
            if inner.drain_in_progress {
                return;
            }
            inner.drain_in_progress = true;
        }

        loop {
            let request = {
                let mut inner = self.core.inner.lock();
                if inner.shutting_down || !inner.has_capacity(self.core.config.max_concurrent) {
                    None
                } else {
                    inner.queue.pop_next().map(|request| {
                        inner.reserved += 1;
                        request
                    })
                }
            };

            match request {
                Some(request) => {
                    debug!(role = %request.role, priority = request.priority, "Draining queued request");
                    let result = self.admit(&request.role, request.context.clone()).await;
                    if let Err(unsent) = request.reply.send(result) {
                        // The queued caller dropped its future; free the slot
                        // so it is not leaked
                        if let Ok(handle) = unsent {
                            warn!(
                                worker_id = %handle.id,
                                role = %handle.role,
                                "Queued caller went away, destroying admitted worker"
                            );
                            let _ = self.destroy(handle.id).await;
                        }
                    }
                }
                None => {
                    let mut inner = self.core.inner.lock();
                    // Re-check before releasing the guard: a destroy may have
                    // freed a slot after we decided to exit
                    if !inner.shutting_down
                        && !inner.queue.is_empty()
                        && inner.has_capacity(self.core.config.max_concurrent)
                    {
                        continue;
                    }
                    inner.drain_in_progress = false;
                    return;
                }
            }
        }
    }

    /// Spawn the periodic health sweep
    fn spawn_health_monitor(&self) {
        let pool = self.clone();
        let mut shutdown_rx = self.core.shutdown_tx.subscribe();
        let interval = self.core.config.health_check_interval;
        let max_lifetime = self.core.config.max_worker_lifetime;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pool.sweep(max_lifetime).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Health monitor: shutdown requested");
                        break;
                    }
                }
            }
            debug!("Health monitor exited");
        });

        *self.core.monitor_handle.lock() = Some(handle);
    }

    /// One health sweep: evict every worker past its maximum lifetime
    ///
    /// Eviction failures are logged and never halt the sweep or the timer.
    async fn sweep(&self, max_lifetime: Duration) {
        let expired = self.core.inner.lock().registry.expired(max_lifetime);
        for worker_id in expired {
            warn!(%worker_id, "Evicting worker past max lifetime");
            match self.destroy(worker_id).await {
                Ok(()) => {}
                // The caller destroyed it first; nothing left to do
                Err(PoolError::WorkerNotFound(_)) => {}
                Err(error) => warn!(%worker_id, %error, "Eviction failed"),
            }
        }
    }
}

/// Role names are restricted to alphanumerics, `-`, and `_`
fn validate_role(role: &str) -> Result<()> {
    let valid = !role.is_empty()
        && role
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PoolError::InvalidRoleName(role.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_role() {
        assert!(validate_role("epic-planner").is_ok());
        assert!(validate_role("story_writer_2").is_ok());
        assert!(validate_role("").is_err());
        assert!(validate_role("bad role").is_err());
        assert!(validate_role("role/with/slashes").is_err());
        assert!(validate_role("émigré").is_err());
    }
}
