// Collaborator capabilities consumed by the pool
//
// These traits allow the pool to be wired to different backends:
// - Real inference providers in production
// - In-memory / simulated implementations for examples and testing
//
// Collaborators return anyhow::Result; the pool wraps failures into its
// own error taxonomy at the call site.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// RoleConfigProvider - role name → backend configuration
// ============================================================================

/// Resolved backend configuration for a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Which backend implementation to construct
    pub backend_id: String,
    /// Opaque connection parameters forwarded to the factory
    pub connection: Value,
}

impl RoleConfig {
    /// Create a config for a backend with no connection parameters
    pub fn new(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            connection: Value::Null,
        }
    }

    /// Set the connection parameters
    pub fn with_connection(mut self, connection: Value) -> Self {
        self.connection = connection;
        self
    }
}

/// Trait for looking up which backend a role uses
#[async_trait]
pub trait RoleConfigProvider: Send + Sync {
    /// Resolve the backend configuration for a role, or `None` if the role
    /// is not configured
    async fn lookup(&self, role: &str) -> anyhow::Result<Option<RoleConfig>>;
}

// ============================================================================
// BackendClient - performs the actual unit of work
// ============================================================================

/// Options for a single backend invocation
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Static role profile injected by the pool as the system prompt
    pub system_prompt: Option<String>,
    /// Optional per-call deadline, interpreted by the backend
    pub timeout: Option<Duration>,
}

/// Metadata about a completed invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionMetadata {
    /// Total tokens used
    pub total_tokens: Option<u32>,
    /// Prompt tokens
    pub prompt_tokens: Option<u32>,
    /// Completion tokens
    pub completion_tokens: Option<u32>,
    /// Model used
    pub model: Option<String>,
    /// Finish reason
    pub finish_reason: Option<String>,
}

/// Response from a backend invocation
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub text: String,
    pub metadata: CompletionMetadata,
}

impl BackendResponse {
    /// Create a response with empty metadata
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: CompletionMetadata::default(),
        }
    }
}

/// Cumulative usage reported by a backend client
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Trait for backend clients
///
/// Implementations handle provider-specific API calls and report their own
/// usage and cost estimates; the pool only does the bookkeeping.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Perform one unit of work
    async fn invoke(&self, payload: &Value, options: &InvokeOptions)
        -> anyhow::Result<BackendResponse>;

    /// Estimate the cost of a completed invocation
    fn estimate_cost(&self, payload: &Value, response: &BackendResponse) -> f64;

    /// Cumulative usage for this client
    fn usage_stats(&self) -> UsageStats;
}

// ============================================================================
// BackendClientFactory - builds clients from role configuration
// ============================================================================

/// Trait for constructing backend clients
#[async_trait]
pub trait BackendClientFactory: Send + Sync {
    /// Build a client for the given backend configuration
    async fn build(&self, config: &RoleConfig) -> anyhow::Result<Arc<dyn BackendClient>>;
}

// ============================================================================
// ProfileLoader - static role profiles (personas)
// ============================================================================

/// Trait for loading a role's static profile text
///
/// Callers that want caching should wrap the loader; the pool loads once
/// per worker creation and never caches.
#[async_trait]
pub trait ProfileLoader: Send + Sync {
    /// Load the profile text for a role
    async fn load(&self, role: &str) -> anyhow::Result<String>;
}
