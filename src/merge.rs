//! Three-way deployment-state merge and skip detector, with the
//! skip-check's four branches each independently reachable.

use std::sync::Arc;

use crate::model::{
    is_tombstone, tombstone, ComponentResultSpec, ComponentSpec, DeploymentState, DeploymentStep,
    StepAction,
};
use crate::provider::TargetProvider;

/// `merged.components` unions by name with `current` winning on conflict;
/// components present only in `previous` but still observed are carried
/// with a tombstone role. `merged.targetComponent[k] = current[k] ??
/// previous[k] ?? fallback` is realized here by folding `previous` first
/// and letting `current` overwrite.
pub fn merge_states(previous: &DeploymentState, current: &DeploymentState) -> DeploymentState {
    let mut merged = DeploymentState::default();

    let mut by_name: std::collections::BTreeMap<String, ComponentSpec> = std::collections::BTreeMap::new();
    for c in &previous.components {
        by_name.insert(c.name.clone(), c.clone());
    }
    for c in &current.components {
        by_name.insert(c.name.clone(), c.clone());
    }
    merged.components = by_name.into_values().collect();

    for (key, role) in &previous.target_component {
        merged.target_component.insert(key.clone(), role.clone());
    }
    for (key, role) in &current.target_component {
        merged.target_component.insert(key.clone(), role.clone());
    }

    merged
}

/// Carries components present only in `previous` but still present in
/// `observed` into `merged`, tombstoned — the half of the merge rule
/// that `merge_states` alone (a plain union) doesn't express, since
/// it needs to know what's still observed.
pub fn merge_with_observed(
    previous: &DeploymentState,
    current: &DeploymentState,
    observed: &DeploymentState,
) -> DeploymentState {
    let mut merged = merge_states(previous, current);

    for prev_component in &previous.components {
        let still_observed = observed.find_component(&prev_component.name).is_some();
        let already_in_current = current.find_component(&prev_component.name).is_some();
        if still_observed && !already_in_current {
            for (key, role) in &previous.target_component {
                if key.starts_with(&format!("{}::", prev_component.name)) && !is_tombstone(role) {
                    merged.target_component.insert(key.clone(), tombstone(role));
                }
            }
        }
    }

    merged
}

/// Removal mode: sets every non-tombstone role to its
/// tombstone form.
pub fn mark_remove_all(state: &mut DeploymentState) {
    state.mark_remove_all();
}

/// Before executing a step, if a previous desired state exists, decide
/// whether every component in the step is already converged and can be
/// recorded `OK`/`"untouched"` without calling `Apply`.
pub fn can_skip_step(
    step: &DeploymentStep,
    target: &str,
    provider: &Arc<dyn TargetProvider>,
    previous_components: &[ComponentSpec],
    test_state: &DeploymentState,
) -> bool {
    let rule = provider.get_validation_rule();

    for planned in &step.components {
        let key = DeploymentState::target_component_key(&planned.component.name, target);

        match planned.action {
            StepAction::Delete => {
                let still_present = previous_components
                    .iter()
                    .any(|c| c.name == planned.component.name)
                    && test_state
                        .target_component
                        .get(&key)
                        .is_some_and(|role| !role.is_empty());
                if still_present {
                    return false;
                }
            }
            StepAction::Update => {
                let previous_match = previous_components.iter().find(|c| {
                    c.name == planned.component.name
                        && test_state
                            .target_component
                            .get(&key)
                            .is_some_and(|role| !role.is_empty() && !is_tombstone(role))
                });

                let Some(previous) = previous_match else {
                    // Desired is to update a component with no matching
                    // previous entry: a brand-new component never skips.
                    return false;
                };

                let current_match = test_state.find_component(&previous.name);
                let changed_from_previous = rule.is_component_changed(previous, &planned.component);
                let changed_from_current = current_match
                    .map(|c| rule.is_component_changed(c, &planned.component))
                    .unwrap_or(false);

                if changed_from_previous || changed_from_current {
                    return false;
                }
            }
        }
    }

    true
}

/// Builds the `{status: "OK", message: "untouched"}` result set for a
/// skipped step.
pub fn untouched_results(step: &DeploymentStep) -> std::collections::BTreeMap<String, ComponentResultSpec> {
    step.components
        .iter()
        .map(|a| {
            (
                a.component.name.clone(),
                ComponentResultSpec {
                    status: "OK".into(),
                    message: "untouched".into(),
                },
            )
        })
        .collect()
}
