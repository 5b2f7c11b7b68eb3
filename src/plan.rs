//! Deployment planner. Pure and deterministic: same inputs
//! yield the same plan.

use std::collections::{BTreeMap, HashSet};

use crate::error::{OrchestratorError, Result};
use crate::model::{
    is_tombstone, ComponentSpec, DeploymentPlan, DeploymentSpec, DeploymentState,
    DeploymentStep, PlannedComponentAction, StepAction,
};

/// Builds the ordered step sequence for `deployment` given the already
/// three-way-merged `state`.
pub fn plan_for_deployment(
    deployment: &DeploymentSpec,
    state: &DeploymentState,
) -> Result<DeploymentPlan> {
    let mut steps = Vec::new();

    let mut target_names: Vec<&String> = deployment.targets.keys().collect();
    target_names.sort();

    for target_name in target_names {
        let target = &deployment.targets[target_name];

        let mut by_role: BTreeMap<&str, Vec<&ComponentSpec>> = BTreeMap::new();
        for component in &target.components {
            by_role.entry(component.role()).or_default().push(component);
        }

        for (role, components) in by_role {
            let ordered = topological_order(&components)?;

            let mut actions = Vec::new();
            for component in ordered {
                let key = DeploymentState::target_component_key(&component.name, target_name);
                let tombstoned = state
                    .target_component
                    .get(&key)
                    .is_some_and(|role| is_tombstone(role));

                let action = if tombstoned || deployment.removal_requested() {
                    StepAction::Delete
                } else {
                    StepAction::Update
                };

                actions.push(PlannedComponentAction {
                    action,
                    component: component.clone(),
                });
            }

            if !actions.is_empty() {
                steps.push(DeploymentStep {
                    target: target_name.clone(),
                    role: role.to_string(),
                    components: actions,
                });
            }
        }
    }

    Ok(DeploymentPlan { steps })
}

/// Kahn's algorithm over `dependencies`, ties broken by original insertion
/// order. A cycle fails with `BadRequest`.
fn topological_order<'a>(components: &[&'a ComponentSpec]) -> Result<Vec<&'a ComponentSpec>> {
    let index_of: BTreeMap<&str, usize> = components
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.as_str(), i))
        .collect();

    let mut indegree = vec![0usize; components.len()];
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); components.len()];

    for (i, component) in components.iter().enumerate() {
        for dep in &component.dependencies {
            if let Some(&dep_idx) = index_of.get(dep.as_str()) {
                edges[dep_idx].push(i);
                indegree[i] += 1;
            }
            // Dependencies on components outside this target+role group are
            // not this planner's concern (cross-target dependencies are
            // enforced at the solution level).
        }
    }

    let mut ready: Vec<usize> = (0..components.len())
        .filter(|&i| indegree[i] == 0)
        .collect();
    // `ready` is built in index order already, giving insertion-order tie
    // breaking without an explicit sort.
    let mut visited = HashSet::new();
    let mut order = Vec::with_capacity(components.len());

    let mut cursor = 0;
    while cursor < ready.len() {
        let i = ready[cursor];
        cursor += 1;
        if !visited.insert(i) {
            continue;
        }
        order.push(components[i]);
        for &next in &edges[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(next);
            }
        }
    }

    if order.len() != components.len() {
        return Err(OrchestratorError::BadRequest(
            "dependency cycle detected among components".into(),
        ));
    }

    Ok(order)
}
