// Simulated backend implementation
//
// Supports:
// - Configurable response modes (fixed, echo, sequence)
// - Flat per-invocation cost for deterministic accounting tests
// - Optional latency simulation with jitter
// - Failure injection for both client construction and invocations
//
// Design: intended for unit and integration tests. Each SimBackend is
// configured per-test to return specific responses or errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use planforge_pool::{
    BackendClient, BackendClientFactory, BackendResponse, CompletionMetadata, InvokeOptions,
    RoleConfig, UsageStats,
};

// ============================================================================
// Configuration
// ============================================================================

/// Response generation mode
#[derive(Debug, Clone)]
pub enum ResponseMode {
    /// Return a fixed response
    Fixed(String),
    /// Echo the payload back
    Echo,
    /// Return responses in order, repeating the last one when exhausted
    Sequence(Vec<String>),
}

/// Configuration for a simulated backend
#[derive(Debug, Clone)]
pub struct SimBackendConfig {
    /// Response generation mode
    pub response: ResponseMode,
    /// Flat cost reported for every invocation
    pub cost_per_invocation: f64,
    /// Optional simulated latency (plus up to 20% jitter)
    pub latency: Option<Duration>,
    /// When set, every invocation fails with this message
    pub fail_with: Option<String>,
    /// Model name to report in metadata
    pub model_name: String,
}

impl Default for SimBackendConfig {
    fn default() -> Self {
        Self {
            response: ResponseMode::Fixed("Simulated planning output.".to_string()),
            cost_per_invocation: 0.01,
            latency: None,
            fail_with: None,
            model_name: "planforge-sim".to_string(),
        }
    }
}

impl SimBackendConfig {
    /// Create a config with a fixed response
    pub fn fixed(response: impl Into<String>) -> Self {
        Self {
            response: ResponseMode::Fixed(response.into()),
            ..Default::default()
        }
    }

    /// Create a config that echoes the payload
    pub fn echo() -> Self {
        Self {
            response: ResponseMode::Echo,
            ..Default::default()
        }
    }

    /// Create a config with a sequence of responses
    pub fn sequence(responses: Vec<String>) -> Self {
        Self {
            response: ResponseMode::Sequence(responses),
            ..Default::default()
        }
    }

    /// Create a config whose every invocation fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Default::default()
        }
    }

    /// Set the flat per-invocation cost
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_per_invocation = cost;
        self
    }

    /// Enable latency simulation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Set the model name reported in metadata
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_name = model.into();
        self
    }
}

// ============================================================================
// SimBackend
// ============================================================================

/// A simulated backend client
pub struct SimBackend {
    config: SimBackendConfig,
    calls: AtomicUsize,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl SimBackend {
    pub fn new(config: SimBackendConfig) -> Self {
        Self {
            config,
            calls: AtomicUsize::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        }
    }

    /// Number of invocations seen so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn render(&self, payload: &Value, call_index: usize) -> String {
        match &self.config.response {
            ResponseMode::Fixed(text) => text.clone(),
            ResponseMode::Echo => payload.to_string(),
            ResponseMode::Sequence(responses) => responses
                .get(call_index.min(responses.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// Rough token estimate: ~4 characters per token
fn approx_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}

#[async_trait]
impl BackendClient for SimBackend {
    async fn invoke(
        &self,
        payload: &Value,
        options: &InvokeOptions,
    ) -> anyhow::Result<BackendResponse> {
        if let Some(latency) = self.config.latency {
            let jitter_ms = rand::thread_rng().gen_range(0..=latency.as_millis() as u64 / 5);
            tokio::time::sleep(latency + Duration::from_millis(jitter_ms)).await;
        }

        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.config.fail_with {
            anyhow::bail!("{message}");
        }

        let text = self.render(payload, call_index);
        let prompt_tokens = approx_tokens(&payload.to_string())
            + options
                .system_prompt
                .as_deref()
                .map(approx_tokens)
                .unwrap_or(0);
        let completion_tokens = approx_tokens(&text);

        self.prompt_tokens
            .fetch_add(u64::from(prompt_tokens), Ordering::SeqCst);
        self.completion_tokens
            .fetch_add(u64::from(completion_tokens), Ordering::SeqCst);

        debug!(call_index, completion_tokens, "Simulated invocation");

        Ok(BackendResponse {
            text,
            metadata: CompletionMetadata {
                total_tokens: Some(prompt_tokens + completion_tokens),
                prompt_tokens: Some(prompt_tokens),
                completion_tokens: Some(completion_tokens),
                model: Some(self.config.model_name.clone()),
                finish_reason: Some("stop".to_string()),
            },
        })
    }

    fn estimate_cost(&self, _payload: &Value, _response: &BackendResponse) -> f64 {
        self.config.cost_per_invocation
    }

    fn usage_stats(&self) -> UsageStats {
        UsageStats {
            requests: self.calls.load(Ordering::SeqCst) as u64,
            prompt_tokens: self.prompt_tokens.load(Ordering::SeqCst),
            completion_tokens: self.completion_tokens.load(Ordering::SeqCst),
        }
    }
}

// ============================================================================
// SimBackendFactory
// ============================================================================

/// Factory mapping backend ids to simulated backend configurations
///
/// # Example
///
/// ```ignore
/// use planforge_llmsim::{SimBackendConfig, SimBackendFactory};
///
/// let factory = SimBackendFactory::new()
///     .with_backend("sim", SimBackendConfig::fixed("Epic: rebuild the CRM"))
///     .with_backend("sim-flaky", SimBackendConfig::failing("simulated outage"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimBackendFactory {
    backends: HashMap<String, SimBackendConfig>,
    fail_builds: bool,
}

impl SimBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend configuration under an id
    pub fn with_backend(mut self, backend_id: impl Into<String>, config: SimBackendConfig) -> Self {
        self.backends.insert(backend_id.into(), config);
        self
    }

    /// Make every build attempt fail
    pub fn failing_builds(mut self) -> Self {
        self.fail_builds = true;
        self
    }
}

#[async_trait]
impl BackendClientFactory for SimBackendFactory {
    async fn build(&self, config: &RoleConfig) -> anyhow::Result<Arc<dyn BackendClient>> {
        if self.fail_builds {
            anyhow::bail!("simulated backend construction failure");
        }
        let sim_config = self
            .backends
            .get(&config.backend_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown backend id: {}", config.backend_id))?;
        Ok(Arc::new(SimBackend::new(sim_config)))
    }
}
