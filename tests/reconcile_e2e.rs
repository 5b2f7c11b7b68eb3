//! Whole-engine scenarios, exercised through the public `reconcile`
//! entrypoint rather than internal helpers, asserting on the externally
//! observable result.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use symphonia::model::{
    ComponentResultSpec, ComponentSpec, DeploymentStep, InstanceSpec, InstanceWithMeta,
    ObjectMeta, ProviderBinding, SolutionSpec, StepAction, TargetSelector, TargetSpec,
    TopologySpec,
};
use symphonia::provider::ValidationRule;
use symphonia::state_store::MemoryStateStore;
use symphonia::summary::MemorySummaryStore;
use symphonia::{reconcile, DeploymentSpec, Deps, ProviderRegistry, Result, TargetProvider};

struct FlakyProvider {
    fail_on: &'static str,
}

#[async_trait]
impl TargetProvider for FlakyProvider {
    async fn get(&self, _: &DeploymentSpec, _: &[String]) -> Result<Vec<ComponentSpec>> {
        Ok(Vec::new())
    }

    async fn apply(
        &self,
        _: &DeploymentSpec,
        step: &DeploymentStep,
        _: bool,
    ) -> Result<BTreeMap<String, ComponentResultSpec>> {
        if step.target == self.fail_on {
            return Err(symphonia::OrchestratorError::Internal(
                "simulated provider failure".into(),
            ));
        }
        Ok(step
            .components
            .iter()
            .map(|a| {
                (
                    a.component.name.clone(),
                    ComponentResultSpec {
                        status: "OK".into(),
                        message: "applied".into(),
                    },
                )
            })
            .collect())
    }

    fn get_validation_rule(&self) -> ValidationRule {
        ValidationRule::default()
    }
}

fn component(name: &str) -> ComponentSpec {
    ComponentSpec {
        name: name.to_string(),
        component_type: "container".into(),
        properties: BTreeMap::from([(
            "container.image".to_string(),
            serde_json::Value::String("nginx:1.25".into()),
        )]),
        ..Default::default()
    }
}

fn target(name: &str) -> TargetSpec {
    TargetSpec {
        display_name: name.to_string(),
        components: vec![component("nginx")],
        topologies: vec![TopologySpec {
            bindings: vec![ProviderBinding {
                role: "instance".into(),
                provider: "flaky".into(),
                config: BTreeMap::new(),
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn deployment(targets: BTreeMap<String, TargetSpec>) -> DeploymentSpec {
    DeploymentSpec {
        job_id: "job-multi".into(),
        instance: InstanceWithMeta {
            object_meta: ObjectMeta::named("i1"),
            spec: InstanceSpec {
                solution: "sol:1.0.0".into(),
                target: TargetSelector::default(),
                ..Default::default()
            },
        },
        solution: SolutionSpec::default(),
        targets,
        assignments: BTreeMap::new(),
        active_target: String::new(),
        is_dry_run: false,
        is_in_active: false,
    }
}

fn deps(fail_on: &'static str) -> Deps {
    let mut registry = ProviderRegistry::new();
    registry.register(
        "flaky",
        Arc::new(move |_| Ok(Arc::new(FlakyProvider { fail_on }) as _)),
    );
    let mut deps = Deps::new(
        Arc::new(MemoryStateStore::new()),
        Arc::new(MemorySummaryStore::new()),
        Arc::new(registry),
    );
    deps.max_retries = 0;
    deps
}

/// Scenario 4: two targets, one provider fails. `t1` should land `OK`,
/// `t2` should carry the error, and overall completion should be partial.
#[tokio::test]
async fn multi_target_partial_failure_reports_per_target_results() {
    let mut targets = BTreeMap::new();
    targets.insert("t1".to_string(), target("t1"));
    targets.insert("t2".to_string(), target("t2"));

    let deps = deps("t2");
    let deployment = deployment(targets);

    let summary = reconcile(&deps, &deployment, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.target_results["t1"].status, "OK");
    assert_eq!(summary.target_results["t2"].status, "Failed");
    assert_eq!(summary.success_count, 1);
    assert!(!summary.all_assigned_deployed);
}

/// Scenario: a fully successful multi-target run reports every target `OK`
/// and `allAssignedDeployed`.
#[tokio::test]
async fn multi_target_success_reports_all_assigned_deployed() {
    let mut targets = BTreeMap::new();
    targets.insert("t1".to_string(), target("t1"));
    targets.insert("t2".to_string(), target("t2"));

    let deps = deps("nonexistent-target");
    let deployment = deployment(targets);

    let summary = reconcile(&deps, &deployment, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.success_count, 2);
    assert!(summary.all_assigned_deployed);
}

/// Scenario 6: a dependency cycle fails the whole reconciliation before any
/// state-store write, surfaced as `BadRequest`.
#[tokio::test]
async fn dependency_cycle_fails_before_any_state_write() {
    let mut a = component("a");
    a.dependencies = vec!["b".to_string()];
    let mut b = component("b");
    b.dependencies = vec!["a".to_string()];

    let mut t1 = target("t1");
    t1.components = vec![a, b];
    let mut targets = BTreeMap::new();
    targets.insert("t1".to_string(), t1);

    let deps = deps("t1");
    let deployment = deployment(targets);

    let err = reconcile(&deps, &deployment, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, symphonia::OrchestratorError::BadRequest(_)));

    let meta = symphonia::state_store::StateMeta::new(
        "solution.symphony",
        "v1",
        "deploystates",
        "default",
    );
    assert!(deps.state_store.get("i1", &meta).await.is_err());
}
