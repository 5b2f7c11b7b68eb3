//! An IoT Edge-module-shaped provider. Resolves the open
//! question around route rewriting conservatively: a
//! route is only removed on delete if this provider instance is the one
//! that created it, never a route some other module or the device twin
//! declared independently.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::model::{ComponentResultSpec, ComponentSpec, DeploymentSpec, DeploymentStep, StepAction};
use crate::provider::{PropertyDesc, TargetProvider, ValidationRule};

#[derive(Default)]
pub struct IotEdgeProvider {
    modules: RwLock<BTreeMap<String, ComponentSpec>>,
    owned_routes: RwLock<BTreeSet<String>>,
}

impl IotEdgeProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TargetProvider for IotEdgeProvider {
    async fn get(&self, _deployment: &DeploymentSpec, references: &[String]) -> Result<Vec<ComponentSpec>> {
        let modules = self.modules.read().expect("iot edge state lock poisoned");
        Ok(references
            .iter()
            .filter_map(|name| modules.get(name).cloned())
            .collect())
    }

    async fn apply(
        &self,
        _deployment: &DeploymentSpec,
        step: &DeploymentStep,
        is_dry_run: bool,
    ) -> Result<BTreeMap<String, ComponentResultSpec>> {
        let mut results = BTreeMap::new();
        let mut modules = self.modules.write().expect("iot edge state lock poisoned");
        let mut owned_routes = self.owned_routes.write().expect("route ownership lock poisoned");

        for action in &step.components {
            let name = action.component.name.clone();
            match action.action {
                StepAction::Update => {
                    if is_dry_run {
                        info!(module = %name, "would deploy edge module");
                    } else {
                        for route in &action.component.routes {
                            owned_routes.insert(route.route.clone());
                        }
                        modules.insert(name.clone(), action.component.clone());
                    }
                    results.insert(
                        name,
                        ComponentResultSpec {
                            status: "OK".into(),
                            message: if is_dry_run { "would deploy".into() } else { "deployed".into() },
                        },
                    );
                }
                StepAction::Delete => {
                    if !is_dry_run {
                        if let Some(existing) = modules.remove(&name) {
                            for route in &existing.routes {
                                // Only drop routes this provider created;
                                // a route declared elsewhere on the device
                                // twin is left untouched (spec §F open
                                // question, resolved in DESIGN.md).
                                if owned_routes.remove(&route.route) {
                                    info!(route = %route.route, "removing owned route");
                                }
                            }
                        }
                    }
                    results.insert(
                        name,
                        ComponentResultSpec {
                            status: "OK".into(),
                            message: if is_dry_run { "would remove".into() } else { "removed".into() },
                        },
                    );
                }
            }
        }

        Ok(results)
    }

    fn get_validation_rule(&self) -> ValidationRule {
        ValidationRule {
            required_properties: vec!["module.version".to_string()],
            optional_properties: vec!["module.createOptions".to_string()],
            change_detection_properties: vec![
                PropertyDesc::component_name(),
                PropertyDesc::named("module.version"),
                PropertyDesc::named("module.createOptions").skip_if_missing(),
            ],
            ..Default::default()
        }
    }
}
