//! # Planforge Worker Pool
//!
//! A single-process pool of short-lived, role-bound workers. Each worker is
//! backed by a pluggable inference backend and produces opaque task output;
//! what a worker generates is the caller's business, the pool only manages
//! lifecycle, capacity, and cost.
//!
//! ## Features
//!
//! - **Admission control**: a hard concurrency cap that holds even under
//!   concurrent creation attempts; excess demand queues instead of failing
//! - **Priority queue**: pending creations drain in (priority desc, FIFO)
//!   order, one per freed slot
//! - **Health eviction**: a periodic sweep force-destroys workers that
//!   exceed their configured maximum lifetime
//! - **Cost accounting**: per-worker, per-role, per-workflow, and
//!   per-project cost counters fed by the backend's own estimates
//! - **Lifecycle events**: `STARTED | INVOKED | COMPLETED | ERROR`
//!   notifications with per-listener panic isolation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌──────────────┐  ┌───────────────┐  ┌──────────────────┐  │
//! │  │  Admission   │  │ AdmissionQueue│  │  Health Monitor  │  │
//! │  │  (create /   │──│ (priority +   │  │  (interval sweep │  │
//! │  │   drain)     │  │  FIFO order)  │  │   → destroy)     │  │
//! │  └──────┬───────┘  └───────────────┘  └──────────────────┘  │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        WorkerRegistry (≤ max_concurrent)            │    │
//! │  │  [Worker: role + backend client + profile + cost]   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use planforge_pool::{CreateWorkerRequest, WorkerPool, WorkerPoolConfig};
//!
//! let config = WorkerPoolConfig::default().with_max_concurrent(4);
//! let pool = WorkerPool::new(config, roles, backends, profiles)?;
//!
//! let worker = pool
//!     .create(CreateWorkerRequest::new("epic-planner").with_priority(5))
//!     .await?;
//! let response = pool.invoke(worker.id, &payload).await?;
//! pool.destroy(worker.id).await?;
//!
//! pool.shutdown().await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod traits;
pub mod worker;

// In-memory collaborator implementations for examples and testing
pub mod memory;

pub use config::WorkerPoolConfig;
pub use error::{PoolError, Result};
pub use events::{EventListener, PoolEvent};
pub use metrics::{CostMetrics, PoolStats};
pub use pool::WorkerPool;
pub use traits::{
    BackendClient, BackendClientFactory, BackendResponse, CompletionMetadata, InvokeOptions,
    ProfileLoader, RoleConfig, RoleConfigProvider, UsageStats,
};
pub use worker::{CreateWorkerRequest, WorkerContext, WorkerHandle};

pub use memory::{StaticProfileLoader, StaticRoleConfigProvider};
