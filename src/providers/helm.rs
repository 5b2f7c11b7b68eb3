//! A Helm-shaped provider: tracks "installed releases" keyed by
//! component name, comparing `chart.repo`/`chart.version` as strings and
//! `values` by structural JSON equality rather than stringified
//! comparison, since nested Helm values maps don't have a stable string
//! form. This is an illustrative backend, not a port of the Helm SDK.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use crate::error::{OrchestratorError, Result};
use crate::model::{ComponentResultSpec, ComponentSpec, DeploymentSpec, DeploymentStep, ProviderBinding, StepAction};
use crate::provider::{PropertyDesc, TargetProvider, ValidationRule};

fn values_changed(old: Option<&serde_json::Value>, new: Option<&serde_json::Value>) -> bool {
    match (old, new) {
        (None, None) => false,
        (Some(serde_json::Value::Null), None) | (None, Some(serde_json::Value::Null)) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}

/// Parses `chart.timeout`/`timeout` (seconds, as a number or numeric
/// string) and rejects a negative or unparseable value with `BadRequest`
/// before any remote call — spec §5/§8: "Invalid timeouts (negative,
/// unparseable) fail early with `BadRequest` before any side effect."
fn validate_timeout(component: &ComponentSpec) -> Result<()> {
    let Some(raw) = component
        .properties
        .get("chart.timeout")
        .or_else(|| component.properties.get("timeout"))
    else {
        return Ok(());
    };

    let seconds = match raw {
        serde_json::Value::Number(n) => n.as_i64().ok_or_else(|| {
            OrchestratorError::BadRequest(format!(
                "helm timeout '{n}' for component '{}' is not a valid integer",
                component.name
            ))
        })?,
        serde_json::Value::String(s) => s.trim().parse::<i64>().map_err(|_| {
            OrchestratorError::BadRequest(format!(
                "helm timeout '{s}' for component '{}' is not parseable",
                component.name
            ))
        })?,
        other => {
            return Err(OrchestratorError::BadRequest(format!(
                "helm timeout for component '{}' must be a number or numeric string, got {other}",
                component.name
            )))
        }
    };

    if seconds < 0 {
        return Err(OrchestratorError::BadRequest(format!(
            "helm timeout '{seconds}' for component '{}' must not be negative",
            component.name
        )));
    }

    Ok(())
}

pub struct HelmProvider {
    namespace: String,
    releases: RwLock<BTreeMap<String, ComponentSpec>>,
}

impl HelmProvider {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            releases: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_binding(binding: &ProviderBinding) -> Self {
        Self::new(
            binding
                .config
                .get("namespace")
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
        )
    }
}

#[async_trait]
impl TargetProvider for HelmProvider {
    async fn get(&self, _deployment: &DeploymentSpec, references: &[String]) -> Result<Vec<ComponentSpec>> {
        let releases = self.releases.read().expect("helm state lock poisoned");
        Ok(references
            .iter()
            .filter_map(|name| releases.get(name).cloned())
            .collect())
    }

    async fn apply(
        &self,
        _deployment: &DeploymentSpec,
        step: &DeploymentStep,
        is_dry_run: bool,
    ) -> Result<BTreeMap<String, ComponentResultSpec>> {
        for action in &step.components {
            validate_timeout(&action.component)?;
        }

        let mut results = BTreeMap::new();
        let mut releases = self.releases.write().expect("helm state lock poisoned");

        for action in &step.components {
            let name = action.component.name.clone();
            match action.action {
                StepAction::Update => {
                    let message = if releases.contains_key(&name) { "upgraded" } else { "installed" };
                    if is_dry_run {
                        info!(release = %name, namespace = %self.namespace, "would helm-upgrade release");
                    } else {
                        releases.insert(name.clone(), action.component.clone());
                    }
                    results.insert(
                        name,
                        ComponentResultSpec {
                            status: "OK".into(),
                            message: if is_dry_run { format!("would be {message}") } else { message.to_string() },
                        },
                    );
                }
                StepAction::Delete => {
                    if !is_dry_run {
                        releases.remove(&name);
                    }
                    results.insert(
                        name,
                        ComponentResultSpec {
                            status: "OK".into(),
                            message: if is_dry_run { "would uninstall".into() } else { "uninstalled".into() },
                        },
                    );
                }
            }
        }

        Ok(results)
    }

    fn get_validation_rule(&self) -> ValidationRule {
        ValidationRule {
            required_properties: vec!["chart.repo".to_string(), "chart.version".to_string()],
            optional_properties: vec!["values".to_string()],
            change_detection_properties: vec![
                PropertyDesc::component_name(),
                PropertyDesc::named("chart.repo"),
                PropertyDesc::named("chart.version"),
                PropertyDesc::named("values").with_deep_compare(values_changed),
            ],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn release(name: &str, version: &str, values: serde_json::Value) -> ComponentSpec {
        ComponentSpec {
            name: name.to_string(),
            component_type: "helm.v3".into(),
            properties: Map::from([
                ("chart.repo".to_string(), serde_json::Value::String("oci://charts".into())),
                ("chart.version".to_string(), serde_json::Value::String(version.to_string())),
                ("values".to_string(), values),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn unchanged_nested_values_do_not_trigger_a_change() {
        let rule = HelmProvider::new("default").get_validation_rule();
        let a = release("nginx", "4.7.1", serde_json::json!({"replicaCount": 2}));
        let b = release("nginx", "4.7.1", serde_json::json!({"replicaCount": 2}));
        assert!(!rule.is_component_changed(&a, &b));
    }

    #[test]
    fn reordered_object_keys_still_compare_equal() {
        let rule = HelmProvider::new("default").get_validation_rule();
        let a = release("nginx", "4.7.1", serde_json::json!({"a": 1, "b": 2}));
        let b = release("nginx", "4.7.1", serde_json::json!({"b": 2, "a": 1}));
        assert!(!rule.is_component_changed(&a, &b));
    }

    #[test]
    fn changed_nested_values_trigger_a_change() {
        let rule = HelmProvider::new("default").get_validation_rule();
        let a = release("nginx", "4.7.1", serde_json::json!({"replicaCount": 2}));
        let b = release("nginx", "4.7.1", serde_json::json!({"replicaCount": 3}));
        assert!(rule.is_component_changed(&a, &b));
    }

    #[tokio::test]
    async fn apply_install_then_upgrade_reports_distinct_messages() {
        let provider = HelmProvider::new("prod");
        let deployment_ctx = DeploymentSpec {
            job_id: "j1".into(),
            instance: crate::model::InstanceWithMeta {
                object_meta: crate::model::ObjectMeta::named("i1"),
                spec: crate::model::InstanceSpec::default(),
            },
            solution: crate::model::SolutionSpec::default(),
            targets: Map::new(),
            assignments: Map::new(),
            active_target: String::new(),
            is_dry_run: false,
            is_in_active: false,
        };
        let step = |c: ComponentSpec| DeploymentStep {
            target: "t1".into(),
            role: "instance".into(),
            components: vec![crate::model::PlannedComponentAction {
                action: StepAction::Update,
                component: c,
            }],
        };

        let first = provider
            .apply(&deployment_ctx, &step(release("nginx", "4.7.1", serde_json::json!({}))), false)
            .await
            .unwrap();
        assert_eq!(first["nginx"].message, "installed");

        let second = provider
            .apply(&deployment_ctx, &step(release("nginx", "4.7.2", serde_json::json!({}))), false)
            .await
            .unwrap();
        assert_eq!(second["nginx"].message, "upgraded");
    }

    #[tokio::test]
    async fn negative_timeout_fails_before_any_release_is_installed() {
        let provider = HelmProvider::new("prod");
        let deployment_ctx = DeploymentSpec {
            job_id: "j1".into(),
            instance: crate::model::InstanceWithMeta {
                object_meta: crate::model::ObjectMeta::named("i1"),
                spec: crate::model::InstanceSpec::default(),
            },
            solution: crate::model::SolutionSpec::default(),
            targets: Map::new(),
            assignments: Map::new(),
            active_target: String::new(),
            is_dry_run: false,
            is_in_active: false,
        };

        let mut component = release("nginx", "4.7.1", serde_json::json!({}));
        component
            .properties
            .insert("chart.timeout".to_string(), serde_json::Value::String("-5".into()));
        let step = DeploymentStep {
            target: "t1".into(),
            role: "instance".into(),
            components: vec![crate::model::PlannedComponentAction {
                action: StepAction::Update,
                component,
            }],
        };

        let err = provider.apply(&deployment_ctx, &step, false).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::BadRequest(_)));

        let observed = provider
            .get(&deployment_ctx, &["nginx".to_string()])
            .await
            .unwrap();
        assert!(observed.is_empty());
    }
}
