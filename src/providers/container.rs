//! A plain container provider: tracks "deployed" components in memory,
//! without talking to a real container runtime.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::model::{ComponentResultSpec, ComponentSpec, DeploymentSpec, DeploymentStep, StepAction};
use crate::provider::{PropertyDesc, TargetProvider, ValidationRule};

#[derive(Default)]
pub struct ContainerProvider {
    deployed: RwLock<BTreeMap<String, ComponentSpec>>,
}

impl ContainerProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TargetProvider for ContainerProvider {
    async fn get(&self, _deployment: &DeploymentSpec, references: &[String]) -> Result<Vec<ComponentSpec>> {
        let deployed = self.deployed.read().expect("container state lock poisoned");
        Ok(references
            .iter()
            .filter_map(|name| deployed.get(name).cloned())
            .collect())
    }

    async fn apply(
        &self,
        _deployment: &DeploymentSpec,
        step: &DeploymentStep,
        is_dry_run: bool,
    ) -> Result<BTreeMap<String, ComponentResultSpec>> {
        let mut results = BTreeMap::new();
        let mut deployed = self.deployed.write().expect("container state lock poisoned");

        for action in &step.components {
            let name = action.component.name.clone();
            match action.action {
                StepAction::Update => {
                    if is_dry_run {
                        info!(component = %name, "would create or update container");
                    } else {
                        deployed.insert(name.clone(), action.component.clone());
                    }
                    results.insert(
                        name,
                        ComponentResultSpec {
                            status: "OK".into(),
                            message: if is_dry_run { "would apply".into() } else { "applied".into() },
                        },
                    );
                }
                StepAction::Delete => {
                    if !is_dry_run {
                        deployed.remove(&name);
                    }
                    results.insert(
                        name,
                        ComponentResultSpec {
                            status: "OK".into(),
                            message: if is_dry_run { "would delete".into() } else { "deleted".into() },
                        },
                    );
                }
            }
        }

        Ok(results)
    }

    fn get_validation_rule(&self) -> ValidationRule {
        ValidationRule {
            required_properties: vec!["container.image".to_string()],
            optional_properties: vec!["container.args".to_string(), "container.ports".to_string()],
            change_detection_properties: vec![
                PropertyDesc::component_name(),
                PropertyDesc::named("container.image"),
                PropertyDesc::named("container.args").skip_if_missing(),
                PropertyDesc::named("env.*"),
            ],
            ..Default::default()
        }
    }
}
