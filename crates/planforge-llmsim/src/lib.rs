// Simulated Inference Backend
//
// This crate provides a fake backend for testing and local development.
// It implements the BackendClient and BackendClientFactory traits from
// planforge-pool, so a pool can be exercised end to end without any
// network or provider credentials.

mod backend;


pub use backend::{ResponseMode, SimBackend, SimBackendConfig, SimBackendFactory};

// Re-export pool traits for convenience
pub use planforge_pool::{BackendClient, BackendClientFactory};
