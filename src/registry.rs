//! Provider registry: a role + `TargetSpec` resolves to a constructed
//! provider instance, via a runtime string-keyed constructor table.
//! New providers register a constructor; no core code changes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{OrchestratorError, Result};
use crate::model::{ProviderBinding, TargetSpec};
use crate::provider::TargetProvider;

pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderBinding) -> Result<Arc<dyn TargetProvider>> + Send + Sync>;

/// Synonym rule: an empty role or `"container"` both resolve
/// against a binding declared under the `"instance"` role.
fn canonical_role(role: &str) -> &str {
    if role.is_empty() || role == "container" {
        "instance"
    } else {
        role
    }
}

pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers a constructor for a provider type name (e.g. `"helm.v3"`).
    pub fn register(
        &mut self,
        provider_type: impl Into<String>,
        constructor: ProviderConstructor,
    ) {
        self.constructors.insert(provider_type.into(), constructor);
    }

    /// Resolves the provider for `role` on `target` by walking its
    /// topologies' bindings in order and constructing the first match.
    /// Fails with `BadConfig` when no binding matches the role or the
    /// provider type is unregistered.
    pub fn resolve(&self, role: &str, target: &TargetSpec) -> Result<Arc<dyn TargetProvider>> {
        let canonical = canonical_role(role);
        let binding = target
            .topologies
            .iter()
            .flat_map(|t| t.bindings.iter())
            .find(|b| canonical_role(&b.role) == canonical)
            .ok_or_else(|| {
                OrchestratorError::BadConfig(format!(
                    "target '{}' has no binding for role '{}'",
                    target.display_name, role
                ))
            })?;

        let constructor = self.constructors.get(&binding.provider).ok_or_else(|| {
            OrchestratorError::BadConfig(format!("unknown provider type '{}'", binding.provider))
        })?;

        constructor(binding)
    }
}
