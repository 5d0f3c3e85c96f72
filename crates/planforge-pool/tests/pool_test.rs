//! End-to-end pool behavior against the simulated backend

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use planforge_llmsim::{SimBackendConfig, SimBackendFactory};
use planforge_pool::{
    CreateWorkerRequest, PoolError, PoolEvent, ProfileLoader, RoleConfig, StaticProfileLoader,
    StaticRoleConfigProvider, WorkerPool, WorkerPoolConfig,
};

/// Profile loader that suspends mid-creation, between the slot reservation
/// and the worker registration
struct SlowProfileLoader(Duration);

#[async_trait]
impl ProfileLoader for SlowProfileLoader {
    async fn load(&self, _role: &str) -> anyhow::Result<String> {
        tokio::time::sleep(self.0).await;
        Ok("You plan.".to_string())
    }
}

/// Pool whose worker creations take `load_delay` to finish
fn slow_pool(config: WorkerPoolConfig, load_delay: Duration) -> WorkerPool {
    let roles = StaticRoleConfigProvider::new().with_role("epic-planner", RoleConfig::new("sim"));
    let backends = SimBackendFactory::new().with_backend("sim", SimBackendConfig::default());
    WorkerPool::new(
        config,
        Arc::new(roles),
        Arc::new(backends),
        Arc::new(SlowProfileLoader(load_delay)),
    )
    .unwrap()
}

/// Pool wired to simulated collaborators; auto-eviction off unless asked for
fn test_pool(config: WorkerPoolConfig) -> WorkerPool {
    let roles = StaticRoleConfigProvider::new()
        .with_role("epic-planner", RoleConfig::new("sim"))
        .with_role("story-writer", RoleConfig::new("sim-cheap"))
        .with_role("dep-mapper", RoleConfig::new("sim"))
        .with_role("flaky", RoleConfig::new("sim-flaky"))
        .with_role("unprofiled", RoleConfig::new("sim"));

    let backends = SimBackendFactory::new()
        .with_backend("sim", SimBackendConfig::fixed("Epic: rebuild the CRM").with_cost(0.5))
        .with_backend("sim-cheap", SimBackendConfig::fixed("Story: login flow").with_cost(0.25))
        .with_backend("sim-flaky", SimBackendConfig::failing("simulated outage"));

    let profiles = StaticProfileLoader::new()
        .with_profile("epic-planner", "You decompose requirements into epics.")
        .with_profile("story-writer", "You break epics into stories.")
        .with_profile("dep-mapper", "You detect dependencies between stories.")
        .with_profile("flaky", "You fail a lot.");

    WorkerPool::new(config, Arc::new(roles), Arc::new(backends), Arc::new(profiles)).unwrap()
}

fn no_evict(max_concurrent: usize) -> WorkerPoolConfig {
    WorkerPoolConfig::new()
        .with_max_concurrent(max_concurrent)
        .with_auto_evict(false)
}

/// Let spawned drains and queued creates make progress
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[test_log::test(tokio::test)]
async fn capacity_scenario_destroy_admits_queued() {
    // maxConcurrent = 2; a and b admitted, c queued; destroy(a) admits c
    let pool = test_pool(no_evict(2));

    let a = pool.create(CreateWorkerRequest::new("epic-planner")).await.unwrap();
    let b = pool.create(CreateWorkerRequest::new("story-writer")).await.unwrap();

    let queued = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.create(CreateWorkerRequest::new("dep-mapper")).await })
    };
    settle().await;

    let stats = pool.stats();
    assert_eq!(stats.active_workers, 2);
    assert_eq!(stats.queued_requests, 1);

    pool.destroy(a.id).await.unwrap();
    let c = queued.await.unwrap().unwrap();
    assert_eq!(c.role, "dep-mapper");

    let stats = pool.stats();
    assert_eq!(stats.active_workers, 2);
    assert_eq!(stats.queued_requests, 0);
    assert_eq!(stats.total_workers_created, 3);

    // b survived throughout
    pool.invoke(b.id, &json!({})).await.unwrap();
}

#[test_log::test(tokio::test)]
async fn queued_requests_drain_by_priority_then_fifo() {
    let pool = test_pool(no_evict(1));

    let started: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let started = Arc::clone(&started);
        pool.subscribe(move |event| {
            if let PoolEvent::WorkerStarted { role, .. } = event {
                started.lock().push(role.clone());
            }
        });
    }

    let seed = pool.create(CreateWorkerRequest::new("epic-planner")).await.unwrap();

    // Queue p=1, p=5, p=1 in submission order
    let mut handles = Vec::new();
    for (role, priority) in [("story-writer", 1), ("dep-mapper", 5), ("story-writer", 1)] {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.create(CreateWorkerRequest::new(role).with_priority(priority)).await
        }));
        settle().await;
    }
    assert_eq!(pool.stats().queued_requests, 3);

    // Free slots one at a time; each drain admits exactly one request
    pool.destroy(seed.id).await.unwrap();
    let first = handles.remove(1).await.unwrap().unwrap();
    assert_eq!(first.role, "dep-mapper");

    pool.destroy(first.id).await.unwrap();
    let second = handles.remove(0).await.unwrap().unwrap();
    pool.destroy(second.id).await.unwrap();
    let third = handles.remove(0).await.unwrap().unwrap();
    pool.destroy(third.id).await.unwrap();

    let order = started.lock().clone();
    assert_eq!(
        order,
        vec!["epic-planner", "dep-mapper", "story-writer", "story-writer"]
    );
}

#[test_log::test(tokio::test)]
async fn destroy_admits_exactly_one_queued_request() {
    let pool = test_pool(no_evict(2));

    let a = pool.create(CreateWorkerRequest::new("epic-planner")).await.unwrap();
    let _b = pool.create(CreateWorkerRequest::new("epic-planner")).await.unwrap();

    let mut queued = Vec::new();
    for _ in 0..2 {
        let pool = pool.clone();
        queued.push(tokio::spawn(async move {
            pool.create(CreateWorkerRequest::new("dep-mapper")).await
        }));
        settle().await;
    }
    assert_eq!(pool.stats().queued_requests, 2);

    pool.destroy(a.id).await.unwrap();
    settle().await;

    // One slot freed, one admission: never zero, never two
    let stats = pool.stats();
    assert_eq!(stats.active_workers, 2);
    assert_eq!(stats.queued_requests, 1);
    assert_eq!(stats.total_workers_created, 3);
}

#[test_log::test(tokio::test)]
async fn cost_accounting_survives_destroyed_workers() {
    let pool = test_pool(no_evict(3));

    let epic = pool
        .create(
            CreateWorkerRequest::new("epic-planner")
                .with_workflow("plan-run-1")
                .with_project("crm"),
        )
        .await
        .unwrap();
    let story = pool
        .create(
            CreateWorkerRequest::new("story-writer")
                .with_workflow("plan-run-1")
                .with_project("crm"),
        )
        .await
        .unwrap();

    // epic: 2 invocations at 0.5, story: 3 at 0.25
    for _ in 0..2 {
        pool.invoke(epic.id, &json!({"requirements": "crm"})).await.unwrap();
    }
    for _ in 0..3 {
        pool.invoke(story.id, &json!({"epic": "rebuild"})).await.unwrap();
    }

    // Destroying a worker must not lose its contribution
    pool.destroy(epic.id).await.unwrap();
    pool.invoke(story.id, &json!({"epic": "rebuild"})).await.unwrap();

    let metrics = pool.cost_metrics();
    assert!((metrics.total_cost - 2.0).abs() < 1e-9);
    assert!((metrics.by_role["epic-planner"] - 1.0).abs() < 1e-9);
    assert!((metrics.by_role["story-writer"] - 1.0).abs() < 1e-9);
    assert!((metrics.by_workflow["plan-run-1"] - 2.0).abs() < 1e-9);
    assert!((metrics.by_project["crm"] - 2.0).abs() < 1e-9);
    assert!((pool.stats().total_cost - 2.0).abs() < 1e-9);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn health_monitor_evicts_only_past_max_lifetime() {
    let config = WorkerPoolConfig::new()
        .with_max_concurrent(2)
        .with_health_check_interval(Duration::from_millis(100))
        .with_max_worker_lifetime(Duration::from_millis(1000));
    let pool = test_pool(config);

    let completed = Arc::new(Mutex::new(Vec::new()));
    {
        let completed = Arc::clone(&completed);
        pool.subscribe(move |event| {
            if let PoolEvent::WorkerCompleted { worker_id, .. } = event {
                completed.lock().push(*worker_id);
            }
        });
    }

    let worker = pool.create(CreateWorkerRequest::new("epic-planner")).await.unwrap();

    // Sweeps up to t=900 see a lifetime below the limit: no eviction
    tokio::time::sleep(Duration::from_millis(999)).await;
    settle().await;
    assert_eq!(pool.stats().active_workers, 1);

    // Next sweep sees lifetime > max: evicted
    tokio::time::sleep(Duration::from_millis(150)).await;
    settle().await;
    assert_eq!(pool.stats().active_workers, 0);
    assert_eq!(completed.lock().as_slice(), &[worker.id]);

    // The evicted slot goes back to admission
    pool.create(CreateWorkerRequest::new("story-writer")).await.unwrap();

    pool.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn invoke_after_destroy_is_worker_not_found() {
    let pool = test_pool(no_evict(2));

    let worker = pool.create(CreateWorkerRequest::new("epic-planner")).await.unwrap();
    pool.invoke(worker.id, &json!({})).await.unwrap();
    pool.destroy(worker.id).await.unwrap();

    match pool.invoke(worker.id, &json!({})).await {
        Err(PoolError::WorkerNotFound(id)) => assert_eq!(id, worker.id),
        other => panic!("expected WorkerNotFound, got {other:?}"),
    }
    // Destroying twice reports the same
    assert!(matches!(
        pool.destroy(worker.id).await,
        Err(PoolError::WorkerNotFound(_))
    ));
}

#[test_log::test(tokio::test)]
async fn creation_failures_are_fail_fast() {
    let pool = test_pool(no_evict(2));

    assert!(matches!(
        pool.create(CreateWorkerRequest::new("bad role!")).await,
        Err(PoolError::InvalidRoleName(_))
    ));
    assert!(matches!(
        pool.create(CreateWorkerRequest::new("never-configured")).await,
        Err(PoolError::RoleNotConfigured(_))
    ));
    assert!(matches!(
        pool.create(CreateWorkerRequest::new("unprofiled")).await,
        Err(PoolError::ProfileLoad { .. })
    ));

    // No partial worker registered by any failure
    let stats = pool.stats();
    assert_eq!(stats.active_workers, 0);
    assert_eq!(stats.queued_requests, 0);
    assert_eq!(stats.total_workers_created, 0);
}

#[test_log::test(tokio::test)]
async fn backend_construction_failure_registers_nothing() {
    let roles = StaticRoleConfigProvider::new().with_role("epic-planner", RoleConfig::new("sim"));
    let backends = SimBackendFactory::new()
        .with_backend("sim", SimBackendConfig::default())
        .failing_builds();
    let profiles = StaticProfileLoader::new().with_fallback("You plan.");

    let pool = WorkerPool::new(
        no_evict(2),
        Arc::new(roles),
        Arc::new(backends),
        Arc::new(profiles),
    )
    .unwrap();

    assert!(matches!(
        pool.create(CreateWorkerRequest::new("epic-planner")).await,
        Err(PoolError::BackendClientCreation { .. })
    ));
    assert_eq!(pool.stats().active_workers, 0);
}

#[test_log::test(tokio::test)]
async fn invocation_failure_emits_error_event_with_excerpt() {
    let pool = test_pool(
        no_evict(2).with_error_excerpt_len(20),
    );

    let errors = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = Arc::clone(&errors);
        pool.subscribe(move |event| {
            if let PoolEvent::WorkerError { error, payload_excerpt, .. } = event {
                errors.lock().push((error.clone(), payload_excerpt.clone()));
            }
        });
    }

    let worker = pool.create(CreateWorkerRequest::new("flaky")).await.unwrap();
    let payload = json!({"requirements": "x".repeat(500)});

    match pool.invoke(worker.id, &payload).await {
        Err(PoolError::Invocation { source }) => {
            assert!(source.to_string().contains("simulated outage"));
        }
        other => panic!("expected Invocation error, got {other:?}"),
    }

    let errors = errors.lock().clone();
    assert_eq!(errors.len(), 1);
    let (error, excerpt) = &errors[0];
    assert!(error.contains("simulated outage"));
    // Excerpt is truncated, never the full payload
    assert!(excerpt.ends_with('…'));
    assert!(excerpt.len() < payload.to_string().len());

    // The failed invocation is not billed and the worker stays usable state-wise
    assert_eq!(pool.stats().total_cost, 0.0);
    assert_eq!(pool.stats().active_workers, 1);
}

#[test_log::test(tokio::test)]
async fn shutdown_rejects_queued_and_destroys_active() {
    let pool = test_pool(no_evict(1));

    let seed = pool.create(CreateWorkerRequest::new("epic-planner")).await.unwrap();
    let queued = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.create(CreateWorkerRequest::new("story-writer")).await })
    };
    settle().await;
    assert_eq!(pool.stats().queued_requests, 1);

    pool.shutdown().await.unwrap();

    assert!(matches!(
        queued.await.unwrap(),
        Err(PoolError::ShuttingDown)
    ));
    assert_eq!(pool.stats().active_workers, 0);
    assert!(matches!(
        pool.invoke(seed.id, &json!({})).await,
        Err(PoolError::WorkerNotFound(_))
    ));

    // New creations are refused and a second shutdown is a no-op
    assert!(matches!(
        pool.create(CreateWorkerRequest::new("epic-planner")).await,
        Err(PoolError::ShuttingDown)
    ));
    pool.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn create_racing_shutdown_is_rejected() {
    let pool = slow_pool(no_evict(2), Duration::from_millis(200));

    // Reserves a slot, then suspends in collaborator I/O
    let pending = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.create(CreateWorkerRequest::new("epic-planner")).await })
    };
    settle().await;

    pool.shutdown().await.unwrap();

    // The in-flight creation must not register a worker the shutdown pass
    // could never have seen
    assert!(matches!(
        pending.await.unwrap(),
        Err(PoolError::ShuttingDown)
    ));
    let stats = pool.stats();
    assert_eq!(stats.active_workers, 0);
    assert_eq!(stats.total_workers_created, 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn concurrent_creates_never_exceed_capacity() {
    let pool = slow_pool(no_evict(3), Duration::from_millis(10));

    let started: Arc<Mutex<Vec<Uuid>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let started = Arc::clone(&started);
        pool.subscribe(move |event| {
            if let PoolEvent::WorkerStarted { worker_id, .. } = event {
                started.lock().push(*worker_id);
            }
        });
    }

    // All sixteen creations observe capacity at once; only three may insert
    let mut handles = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.create(CreateWorkerRequest::new("epic-planner")).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    settle().await;

    let stats = pool.stats();
    assert_eq!(stats.active_workers, 3);
    assert_eq!(stats.queued_requests, 13);
    assert_eq!(stats.total_workers_created, 3);

    // Drain the backlog one destroy at a time; the cap holds at every step
    for destroyed in 0..16 {
        let id = started.lock()[destroyed];
        pool.destroy(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;
        assert!(pool.stats().active_workers <= 3);
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    let stats = pool.stats();
    assert_eq!(stats.total_workers_created, 16);
    assert_eq!(stats.active_workers, 0);
    assert_eq!(stats.queued_requests, 0);
}

#[test_log::test(tokio::test)]
async fn lifecycle_events_track_execution() {
    let pool = test_pool(no_evict(2));

    let kinds = Arc::new(Mutex::new(Vec::new()));
    {
        let kinds = Arc::clone(&kinds);
        pool.subscribe(move |event| kinds.lock().push(event.kind()));
    }

    let worker = pool.create(CreateWorkerRequest::new("epic-planner")).await.unwrap();
    pool.invoke(worker.id, &json!({})).await.unwrap();
    pool.destroy(worker.id).await.unwrap();

    assert_eq!(kinds.lock().as_slice(), &["started", "invoked", "completed"]);
}
