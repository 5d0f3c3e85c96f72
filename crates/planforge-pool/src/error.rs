// Error types for the worker pool

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur during pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// Role name contains characters outside [A-Za-z0-9_-]
    #[error("invalid role name: {0:?}")]
    InvalidRoleName(String),

    /// No backend configuration exists for the role
    #[error("no backend configured for role: {0}")]
    RoleNotConfigured(String),

    /// The backend client factory failed
    #[error("failed to build backend client for role {role}: {source}")]
    BackendClientCreation {
        role: String,
        #[source]
        source: anyhow::Error,
    },

    /// The profile loader failed
    #[error("failed to load profile for role {role}: {source}")]
    ProfileLoad {
        role: String,
        #[source]
        source: anyhow::Error,
    },

    /// Worker id is not (or no longer) registered
    #[error("worker not found: {0}")]
    WorkerNotFound(Uuid),

    /// A backend invocation failed; the pool performs no retries
    #[error("backend invocation failed: {source}")]
    Invocation {
        #[source]
        source: anyhow::Error,
    },

    /// The pool is shutting down and no longer admits work
    #[error("pool is shutting down")]
    ShuttingDown,

    /// Invalid pool configuration
    #[error("invalid pool configuration: {0}")]
    Configuration(String),

    /// Internal error (collaborator transport failures etc.)
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PoolError {
    /// Create a backend client creation error
    pub fn backend_creation(role: impl Into<String>, source: anyhow::Error) -> Self {
        PoolError::BackendClientCreation {
            role: role.into(),
            source,
        }
    }

    /// Create a profile load error
    pub fn profile_load(role: impl Into<String>, source: anyhow::Error) -> Self {
        PoolError::ProfileLoad {
            role: role.into(),
            source,
        }
    }

    /// Create an invocation error wrapping the backend's cause
    pub fn invocation(source: anyhow::Error) -> Self {
        PoolError::Invocation { source }
    }
}
