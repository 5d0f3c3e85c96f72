//! In-memory collaborator implementations for examples and testing

use std::collections::HashMap;

use async_trait::async_trait;

use crate::traits::{ProfileLoader, RoleConfig, RoleConfigProvider};

/// Role configuration provider backed by a static map
///
/// # Example
///
/// ```ignore
/// use planforge_pool::{RoleConfig, StaticRoleConfigProvider};
///
/// let roles = StaticRoleConfigProvider::new()
///     .with_role("epic-planner", RoleConfig::new("sim"))
///     .with_role("story-writer", RoleConfig::new("sim"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticRoleConfigProvider {
    roles: HashMap<String, RoleConfig>,
}

impl StaticRoleConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role
    pub fn with_role(mut self, role: impl Into<String>, config: RoleConfig) -> Self {
        self.roles.insert(role.into(), config);
        self
    }
}

#[async_trait]
impl RoleConfigProvider for StaticRoleConfigProvider {
    async fn lookup(&self, role: &str) -> anyhow::Result<Option<RoleConfig>> {
        Ok(self.roles.get(role).cloned())
    }
}

/// Profile loader backed by a static map with an optional fallback
#[derive(Debug, Clone, Default)]
pub struct StaticProfileLoader {
    profiles: HashMap<String, String>,
    fallback: Option<String>,
}

impl StaticProfileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile for a role
    pub fn with_profile(mut self, role: impl Into<String>, profile: impl Into<String>) -> Self {
        self.profiles.insert(role.into(), profile.into());
        self
    }

    /// Profile returned for roles without a registered one
    pub fn with_fallback(mut self, profile: impl Into<String>) -> Self {
        self.fallback = Some(profile.into());
        self
    }
}

#[async_trait]
impl ProfileLoader for StaticProfileLoader {
    async fn load(&self, role: &str) -> anyhow::Result<String> {
        self.profiles
            .get(role)
            .cloned()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow::anyhow!("no profile registered for role: {role}"))
    }
}
