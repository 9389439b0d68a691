//! Role generation.
//!
//! The IDP resolves a principal's roles through a `RoleGenerator` chosen by
//! name from a registry of statically-known implementations. Configuration
//! selects a generator; it never names types to instantiate reflectively.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FederationError, FederationResult};

/// Produces the roles granted to a principal.
pub trait RoleGenerator: Send + Sync {
    /// Returns the roles for the given principal name.
    fn roles_for(&self, principal: &str) -> Vec<String>;
}

/// Role generator over a fixed principal-to-roles map.
#[derive(Debug, Default)]
pub struct StaticRoleGenerator {
    roles: HashMap<String, Vec<String>>,
    default_roles: Vec<String>,
}

impl StaticRoleGenerator {
    /// Creates a generator granting nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants roles to a specific principal.
    #[must_use]
    pub fn with_principal(mut self, name: impl Into<String>, roles: Vec<String>) -> Self {
        self.roles.insert(name.into(), roles);
        self
    }

    /// Grants roles to every principal without an explicit entry.
    #[must_use]
    pub fn with_default_roles(mut self, roles: Vec<String>) -> Self {
        self.default_roles = roles;
        self
    }
}

impl RoleGenerator for StaticRoleGenerator {
    fn roles_for(&self, principal: &str) -> Vec<String> {
        self.roles
            .get(principal)
            .cloned()
            .unwrap_or_else(|| self.default_roles.clone())
    }
}

/// Registry of role generators keyed by configuration name.
#[derive(Default)]
pub struct RoleGeneratorRegistry {
    generators: HashMap<String, Arc<dyn RoleGenerator>>,
}

impl RoleGeneratorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a generator under a name.
    pub fn register(&mut self, name: impl Into<String>, generator: Arc<dyn RoleGenerator>) {
        self.generators.insert(name.into(), generator);
    }

    /// Resolves a generator by name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown names.
    pub fn get(&self, name: &str) -> FederationResult<Arc<dyn RoleGenerator>> {
        self.generators.get(name).cloned().ok_or_else(|| {
            FederationError::Configuration(format!("unknown role generator '{name}'"))
        })
    }
}
