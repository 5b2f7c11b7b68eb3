//! Reconciler: loads the previous desired state,
//! observes the target, three-way merges, plans, and executes each step in
//! order, persisting the summary after every step so a concurrent reader
//! always sees progress. Grounded on
//! `original_source/debug/main.go`'s `reconcileCore` shape: role
//! defaulting, `NewDeploymentState`, `PlanForDeployment`,
//! `MergeDeploymentStates`, `desiredState.MarkRemoveAll()`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::error::{OrchestratorError, Result};
use crate::merge::{can_skip_step, merge_with_observed, untouched_results};
use crate::model::{
    ComponentResultSpec, DeploymentSpec, DeploymentState, DeploymentStep, SummarySpec,
    TargetResultSpec,
};
use crate::plan::plan_for_deployment;
use crate::registry::ProviderRegistry;
use crate::state_store::{StateMeta, StateStore, UpsertRequest};
use crate::summary::SummaryStore;

pub const GROUP: &str = "solution.symphony";
pub const VERSION: &str = "v1";
const DEPLOYSTATES_RESOURCE: &str = "deploystates";

/// Explicit dependency bundle replacing the source's
/// package-level singletons: every entry point that needs shared state
/// takes a `&Deps` rather than reaching for a global.
pub struct Deps {
    pub state_store: Arc<dyn StateStore>,
    pub summary_store: Arc<dyn SummaryStore>,
    pub registry: Arc<ProviderRegistry>,
    pub max_retries: u32,
    pub retry_wait: Duration,
}

impl Deps {
    pub fn new(
        state_store: Arc<dyn StateStore>,
        summary_store: Arc<dyn SummaryStore>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            state_store,
            summary_store,
            registry,
            max_retries: 3,
            retry_wait: Duration::from_millis(200),
        }
    }
}

/// Builds the "current desired" state directly from the deployment request
///: every component's role defaults to `"container"`,
/// and removal mode tombstones every entry up front.
fn build_desired_state(deployment: &DeploymentSpec) -> DeploymentState {
    let mut state = DeploymentState::default();
    let mut seen = std::collections::BTreeSet::new();

    for (target_name, target) in &deployment.targets {
        for component in &target.components {
            if seen.insert(component.name.clone()) {
                state.components.push(component.clone());
            }
            let key = DeploymentState::target_component_key(&component.name, target_name);
            state
                .target_component
                .insert(key, component.role().to_string());
        }
    }

    if deployment.removal_requested() {
        state.mark_remove_all();
    }

    state
}

/// Calls each target's provider to learn what is actually deployed there
///, folding the results into one `DeploymentState` keyed
/// the same way as the desired state so the merge/skip logic can compare
/// like with like.
async fn observe_state(
    deps: &Deps,
    deployment: &DeploymentSpec,
    desired: &DeploymentState,
) -> Result<DeploymentState> {
    let mut observed = DeploymentState::default();

    let mut target_names: Vec<&String> = deployment.targets.keys().collect();
    target_names.sort();

    for target_name in target_names {
        let target = &deployment.targets[target_name];
        let references: Vec<String> = target.components.iter().map(|c| c.name.clone()).collect();
        if references.is_empty() {
            continue;
        }

        let mut by_role: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for component in &target.components {
            by_role
                .entry(component.role())
                .or_default()
                .push(component.name.clone());
        }

        for (role, names) in by_role {
            let provider = deps.registry.resolve(role, target)?;
            let found = provider.get(deployment, &names).await?;
            for component in found {
                let key = DeploymentState::target_component_key(&component.name, target_name);
                let role = desired
                    .target_component
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| role.to_string());
                observed.target_component.insert(key, role);
                if observed.find_component(&component.name).is_none() {
                    observed.components.push(component);
                }
            }
        }
    }

    Ok(observed)
}

fn state_meta(namespace: &str) -> StateMeta {
    StateMeta::new(GROUP, VERSION, DEPLOYSTATES_RESOURCE, namespace)
}

async fn load_previous_state(deps: &Deps, deployment: &DeploymentSpec) -> Result<DeploymentState> {
    let meta = state_meta(deployment.instance.object_meta.namespace_or_default());
    match deps
        .state_store
        .get(&deployment.instance.object_meta.name, &meta)
        .await
    {
        Ok(entry) => Ok(serde_json::from_value(entry.body)?),
        Err(OrchestratorError::NotFound(_)) => Ok(DeploymentState::default()),
        Err(other) => Err(other),
    }
}

async fn save_state(deps: &Deps, deployment: &DeploymentSpec, state: &DeploymentState) -> Result<()> {
    let meta = state_meta(deployment.instance.object_meta.namespace_or_default());
    let id = &deployment.instance.object_meta.name;
    let etag = match deps.state_store.get(id, &meta).await {
        Ok(entry) => Some(entry.etag),
        Err(OrchestratorError::NotFound(_)) => None,
        Err(other) => return Err(other),
    };
    deps.state_store
        .upsert(
            UpsertRequest {
                id: id.clone(),
                body: serde_json::to_value(state)?,
                etag,
            },
            &meta,
        )
        .await?;
    Ok(())
}

/// spec §4.7 step 8 / §3 lifecycle: on a successful full removal the
/// deploystate record is deleted rather than rewritten with the (now
/// all-tombstoned) state.
async fn delete_state(deps: &Deps, deployment: &DeploymentSpec) -> Result<()> {
    let meta = state_meta(deployment.instance.object_meta.namespace_or_default());
    deps.state_store
        .delete(&deployment.instance.object_meta.name, &meta)
        .await
}

/// Runs one full reconciliation of `deployment` to convergence, retrying
/// transient provider failures per step and checking
/// `cancellation` between steps so a long-running job can be abandoned
/// without leaving a step half-applied.
pub async fn reconcile(
    deps: &Deps,
    deployment: &DeploymentSpec,
    cancellation: &CancellationToken,
) -> Result<SummarySpec> {
    let span = info_span!(
        "reconcile",
        job_id = %deployment.job_id,
        namespace = %deployment.instance.object_meta.namespace_or_default(),
        instance = %deployment.instance.object_meta.name,
    );
    do_reconcile(deps, deployment, cancellation)
        .instrument(span)
        .await
}

async fn do_reconcile(
    deps: &Deps,
    deployment: &DeploymentSpec,
    cancellation: &CancellationToken,
) -> Result<SummarySpec> {
    let previous = load_previous_state(deps, deployment).await?;
    let current = build_desired_state(deployment);
    let observed = observe_state(deps, deployment, &current).await?;
    let merged = merge_with_observed(&previous, &current, &observed);

    let plan = plan_for_deployment(deployment, &merged)?;
    info!(steps = plan.steps.len(), "plan computed");

    let mut summary = SummarySpec::new(
        deployment.job_id.clone(),
        deployment.targets.len(),
        plan.steps.len(),
    );
    summary.is_removal = deployment.removal_requested();

    for step in &plan.steps {
        if cancellation.is_cancelled() {
            warn!(target = %step.target, "reconciliation cancelled before step");
            summary.status = "Cancelled".to_string();
            deps.summary_store.upsert(&deployment.job_id, summary.clone()).await?;
            return Ok(summary);
        }

        let step_span = info_span!("step", target = %step.target, role = %step.role);
        match run_step(deps, deployment, &previous, &merged, step)
            .instrument(step_span)
            .await
        {
            Ok(results) => {
                record_step(&mut summary, step, results);
                summary.current_deployed += 1;
            }
            Err(err) if err.is_job_fatal() => return Err(err),
            Err(err) => {
                warn!(target = %step.target, error = %err, "step failed, recording failure and continuing");
                record_step(&mut summary, step, failed_results(step, &err));
            }
        }
        summary.recompute_all_assigned_deployed();
        deps.summary_store.upsert(&deployment.job_id, summary.clone()).await?;
    }

    let removal_succeeded = deployment.removal_requested()
        && summary.target_results.values().all(|r| r.status == "OK");
    if removal_succeeded {
        delete_state(deps, deployment).await?;
    } else {
        save_state(deps, deployment, &current).await?;
    }

    summary.recompute_all_assigned_deployed();
    summary.status = if summary.target_results.values().all(|r| r.status == "OK") {
        "OK".to_string()
    } else {
        "Failed".to_string()
    };
    deps.summary_store.upsert(&deployment.job_id, summary.clone()).await?;
    Ok(summary)
}

async fn run_step(
    deps: &Deps,
    deployment: &DeploymentSpec,
    previous: &DeploymentState,
    merged: &DeploymentState,
    step: &DeploymentStep,
) -> Result<BTreeMap<String, ComponentResultSpec>> {
    let target = deployment
        .targets
        .get(&step.target)
        .ok_or_else(|| OrchestratorError::BadRequest(format!("unknown target '{}'", step.target)))?;
    let provider = deps.registry.resolve(&step.role, target)?;

    if !previous.components.is_empty()
        && can_skip_step(step, &step.target, &provider, &previous.components, merged)
    {
        info!("step unchanged, skipping apply");
        return Ok(untouched_results(step));
    }

    apply_with_retry(deps, deployment, step, &provider).await
}

async fn apply_with_retry(
    deps: &Deps,
    deployment: &DeploymentSpec,
    step: &DeploymentStep,
    provider: &Arc<dyn crate::provider::TargetProvider>,
) -> Result<BTreeMap<String, ComponentResultSpec>> {
    let mut attempt = 0;
    loop {
        match provider.apply(deployment, step, deployment.is_dry_run).await {
            Ok(results) => return Ok(results),
            Err(err) if err.is_retryable() && attempt < deps.max_retries => {
                attempt += 1;
                warn!(attempt, error = %err, "retrying step after transient failure");
                tokio::time::sleep(deps.retry_wait * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Builds per-component `Failed` results for a step whose `Apply` returned
/// an error, carrying the error message so `componentResults` explains the
/// failure (spec §7 "Partial failure": the job records it against the
/// target and continues with remaining steps).
fn failed_results(
    step: &DeploymentStep,
    err: &OrchestratorError,
) -> BTreeMap<String, ComponentResultSpec> {
    step.components
        .iter()
        .map(|a| {
            (
                a.component.name.clone(),
                ComponentResultSpec {
                    status: "Failed".into(),
                    message: err.to_string(),
                },
            )
        })
        .collect()
}

fn record_step(
    summary: &mut SummarySpec,
    step: &DeploymentStep,
    results: BTreeMap<String, ComponentResultSpec>,
) {
    let entry = summary
        .target_results
        .entry(step.target.clone())
        .or_insert_with(|| TargetResultSpec {
            status: "OK".into(),
            message: String::new(),
            component_results: BTreeMap::new(),
        });
    entry.component_results.extend(results);
    entry.status = if entry.component_results.values().all(|r| r.status == "OK") {
        "OK".to_string()
    } else {
        "Failed".to_string()
    };

    // successCount counts targets, not steps, so it stays bounded by
    // targetCount even when a target spans multiple steps.
    summary.success_count = summary
        .target_results
        .values()
        .filter(|r| r.status == "OK")
        .count();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ComponentSpec, InstanceSpec, InstanceWithMeta, ObjectMeta, ProviderBinding, SolutionSpec,
        TargetSelector, TargetSpec, TopologySpec,
    };
    use crate::provider::{TargetProvider, ValidationRule};
    use crate::state_store::MemoryStateStore;
    use crate::summary::MemorySummaryStore;
    use async_trait::async_trait;

    struct RecordingProvider {
        observed: Vec<ComponentSpec>,
    }

    #[async_trait]
    impl TargetProvider for RecordingProvider {
        async fn get(&self, _: &DeploymentSpec, _: &[String]) -> Result<Vec<ComponentSpec>> {
            Ok(self.observed.clone())
        }

        async fn apply(
            &self,
            _: &DeploymentSpec,
            step: &DeploymentStep,
            _: bool,
        ) -> Result<BTreeMap<String, ComponentResultSpec>> {
            Ok(step
                .components
                .iter()
                .map(|a| {
                    (
                        a.component.name.clone(),
                        ComponentResultSpec {
                            status: "OK".into(),
                            message: String::new(),
                        },
                    )
                })
                .collect())
        }

        fn get_validation_rule(&self) -> ValidationRule {
            ValidationRule {
                change_detection_properties: vec![crate::provider::PropertyDesc::named(
                    "container.image",
                )],
                ..Default::default()
            }
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl TargetProvider for FailingProvider {
        async fn get(&self, _: &DeploymentSpec, _: &[String]) -> Result<Vec<ComponentSpec>> {
            Ok(Vec::new())
        }

        async fn apply(
            &self,
            _: &DeploymentSpec,
            _: &DeploymentStep,
            _: bool,
        ) -> Result<BTreeMap<String, ComponentResultSpec>> {
            Err(OrchestratorError::Internal("provider unavailable".into()))
        }

        fn get_validation_rule(&self) -> ValidationRule {
            ValidationRule::default()
        }
    }

    fn component(name: &str, image: &str) -> ComponentSpec {
        ComponentSpec {
            name: name.to_string(),
            component_type: "container".into(),
            properties: BTreeMap::from([(
                "container.image".to_string(),
                serde_json::Value::String(image.to_string()),
            )]),
            ..Default::default()
        }
    }

    fn deployment(components: Vec<ComponentSpec>) -> DeploymentSpec {
        let mut targets = BTreeMap::new();
        targets.insert(
            "t1".to_string(),
            TargetSpec {
                display_name: "t1".into(),
                components: components.clone(),
                topologies: vec![TopologySpec {
                    bindings: vec![ProviderBinding {
                        role: "instance".into(),
                        provider: "container".into(),
                        config: BTreeMap::new(),
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        DeploymentSpec {
            job_id: "job-1".into(),
            instance: InstanceWithMeta {
                object_meta: ObjectMeta::named("i1"),
                spec: InstanceSpec {
                    solution: "sol:1.0.0".into(),
                    target: TargetSelector::default(),
                    ..Default::default()
                },
            },
            solution: SolutionSpec {
                components,
                ..Default::default()
            },
            targets,
            assignments: BTreeMap::new(),
            active_target: String::new(),
            is_dry_run: false,
            is_in_active: false,
        }
    }

    fn deps_with_observed(observed: Vec<ComponentSpec>) -> Deps {
        let mut registry = ProviderRegistry::new();
        registry.register(
            "container",
            Arc::new(move |_| {
                Ok(Arc::new(RecordingProvider {
                    observed: observed.clone(),
                }) as _)
            }),
        );
        Deps::new(
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemorySummaryStore::new()),
            Arc::new(registry),
        )
    }

    #[tokio::test]
    async fn first_reconcile_applies_every_component() {
        let deps = deps_with_observed(vec![]);
        let deployment = deployment(vec![component("nginx", "nginx:1.25")]);
        let summary = reconcile(&deps, &deployment, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.current_deployed, 1);
        assert_eq!(summary.target_results["t1"].status, "OK");
    }

    #[tokio::test]
    async fn second_reconcile_with_no_changes_skips_apply() {
        let deps = deps_with_observed(vec![component("nginx", "nginx:1.25")]);
        let deployment = deployment(vec![component("nginx", "nginx:1.25")]);
        reconcile(&deps, &deployment, &CancellationToken::new())
            .await
            .unwrap();
        let summary = reconcile(&deps, &deployment, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            summary.target_results["t1"].component_results["nginx"].message,
            "untouched"
        );
    }

    #[tokio::test]
    async fn successful_removal_deletes_the_deploystate_record() {
        let deps = deps_with_observed(vec![component("nginx", "nginx:1.25")]);
        let mut deployment = deployment(vec![component("nginx", "nginx:1.25")]);

        reconcile(&deps, &deployment, &CancellationToken::new())
            .await
            .unwrap();
        let meta = state_meta(deployment.instance.object_meta.namespace_or_default());
        assert!(deps
            .state_store
            .get(&deployment.instance.object_meta.name, &meta)
            .await
            .is_ok());

        deployment.is_in_active = true;
        let summary = reconcile(&deps, &deployment, &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.is_removal);
        let err = deps
            .state_store
            .get(&deployment.instance.object_meta.name, &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancelled_token_writes_a_terminal_cancelled_summary() {
        let deps = deps_with_observed(vec![]);
        let deployment = deployment(vec![component("nginx", "nginx:1.25")]);
        let token = CancellationToken::new();
        token.cancel();
        let summary = reconcile(&deps, &deployment, &token).await.unwrap();
        assert_eq!(summary.status, "Cancelled");
        assert_eq!(summary.current_deployed, 0);
        let stored = deps.summary_store.get(&deployment.job_id).await.unwrap();
        assert_eq!(stored.status, "Cancelled");
    }

    /// spec §7 "Partial failure": a step whose `Apply` errors is recorded
    /// as a `Failed` target result rather than aborting the job, and
    /// `current_deployed` does not count it.
    #[tokio::test]
    async fn provider_apply_failure_is_recorded_and_job_continues() {
        let mut registry = ProviderRegistry::new();
        registry.register("container", Arc::new(|_| Ok(Arc::new(RecordingProvider { observed: vec![] }) as _)));
        registry.register("failing", Arc::new(|_| Ok(Arc::new(FailingProvider) as _)));
        let deps = Deps::new(
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemorySummaryStore::new()),
            Arc::new(registry),
        );

        let mut targets = BTreeMap::new();
        targets.insert(
            "t1".to_string(),
            TargetSpec {
                display_name: "t1".into(),
                components: vec![component("nginx", "nginx:1.25")],
                topologies: vec![TopologySpec {
                    bindings: vec![ProviderBinding {
                        role: "instance".into(),
                        provider: "container".into(),
                        config: BTreeMap::new(),
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        targets.insert(
            "t2".to_string(),
            TargetSpec {
                display_name: "t2".into(),
                components: vec![component("redis", "redis:7")],
                topologies: vec![TopologySpec {
                    bindings: vec![ProviderBinding {
                        role: "instance".into(),
                        provider: "failing".into(),
                        config: BTreeMap::new(),
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let deployment = DeploymentSpec {
            job_id: "job-partial".into(),
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
        };

        let summary = reconcile(&deps, &deployment, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.target_results["t1"].status, "OK");
        assert_eq!(summary.target_results["t2"].status, "Failed");
        assert_eq!(
            summary.target_results["t2"].component_results["redis"].status,
            "Failed"
        );
        assert_eq!(summary.current_deployed, 1);
        assert_eq!(summary.success_count, 1);
        assert!(!summary.all_assigned_deployed);
        assert_eq!(summary.status, "Failed");
    }
}
