//! Wire/data model: `Solution`, `Target`, `Instance`, the derived
//! `DeploymentSpec`/`DeploymentState`/`DeploymentPlan`, and `SummarySpec`.
//!
//! Provider-specific property bags (`container.image`, `chart.repo`, ...)
//! are kept as a raw `serde_json::Map` here rather than split into tagged
//! per-provider structs: the planner and merge algorithm never interpret
//! `properties`, only providers do, and each provider module defines its
//! own typed accessors over the same bag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "default";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Common Kubernetes-style identity carried by every top-level resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: default_namespace(),
            ..Default::default()
        }
    }

    pub fn namespace_or_default(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }
}

/// `(namespace, kind, name)` reference, preferred over a pointer graph
/// since ownership is always a DAG, never cyclic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

/// An ordered reference within a component's dependency/route lists.
pub type ComponentName = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RouteSpec {
    pub route: String,
    #[serde(rename = "type", default)]
    pub route_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// The smallest deployable unit. `component_type` selects the provider role
/// (`container`, `helm.v3`, `iot-edge-module`, ...); `properties` follows
/// a dotted naming convention (`container.image`, `chart.version`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ComponentSpec {
    pub name: ComponentName,
    #[serde(rename = "type", default)]
    pub component_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<ComponentName>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

impl ComponentSpec {
    /// The provider role this component dispatches to, defaulting to
    /// `"container"` when `component_type` is unset.
    pub fn role(&self) -> &str {
        if self.component_type.is_empty() {
            "container"
        } else {
            &self.component_type
        }
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SolutionSpec {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub root_resource: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub components: Vec<ComponentSpecRef>,
}

/// `SolutionSpec.components` is declared with full `ComponentSpec` bodies;
/// this alias keeps the field name distinct from `TargetSpec.components`,
/// which references components by the same shape but a different role.
pub type ComponentSpecRef = ComponentSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderBinding {
    pub role: String,
    pub provider: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TopologySpec {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    #[serde(default)]
    pub bindings: Vec<ProviderBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TargetSpec {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub topologies: Vec<TopologySpec>,
    #[serde(default)]
    pub solution_scope: String,
    #[serde(default)]
    pub force_redeploy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TargetSelector {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PipelineSpec {
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InstanceSpec {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub scope: String,
    /// `name:version` reference into the solution store.
    pub solution: String,
    pub target: TargetSelector,
    #[serde(default)]
    pub topologies: Vec<TopologySpec>,
    #[serde(default)]
    pub pipelines: Vec<PipelineSpec>,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Derived, never user-supplied: the fully-resolved tuple the
/// reconciler and every provider call actually operate on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub job_id: String,
    pub instance: InstanceWithMeta,
    pub solution: SolutionSpec,
    pub targets: BTreeMap<String, TargetSpec>,
    /// target name -> concatenated `"{component}{component}..."` assignment
    /// string, preserved verbatim from the source shape.
    #[serde(default)]
    pub assignments: BTreeMap<String, String>,
    #[serde(default)]
    pub active_target: String,
    #[serde(default)]
    pub is_dry_run: bool,
    #[serde(default)]
    pub is_in_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceWithMeta {
    pub object_meta: ObjectMeta,
    pub spec: InstanceSpec,
}

impl DeploymentSpec {
    pub fn removal_requested(&self) -> bool {
        self.is_in_active
    }
}

/// Tombstone prefix marking a `targetComponent` entry for removal.
pub const TOMBSTONE_PREFIX: char = '-';

pub fn is_tombstone(role: &str) -> bool {
    role.starts_with(TOMBSTONE_PREFIX)
}

pub fn tombstone(role: &str) -> String {
    if is_tombstone(role) {
        role.to_string()
    } else {
        format!("{TOMBSTONE_PREFIX}{role}")
    }
}

pub fn untombstoned(role: &str) -> &str {
    role.strip_prefix(TOMBSTONE_PREFIX).unwrap_or(role)
}

/// Last-known mapping of components to roles per target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeploymentState {
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    /// Keyed by `"{component}::{target}"`.
    #[serde(default)]
    pub target_component: BTreeMap<String, String>,
}

impl DeploymentState {
    pub fn target_component_key(component: &str, target: &str) -> String {
        format!("{component}::{target}")
    }

    /// Sets every non-tombstone role to its tombstone form.
    pub fn mark_remove_all(&mut self) {
        for role in self.target_component.values_mut() {
            if !is_tombstone(role) {
                *role = tombstone(role);
            }
        }
    }

    pub fn find_component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedComponentAction {
    pub action: StepAction,
    pub component: ComponentSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub target: String,
    pub role: String,
    pub components: Vec<PlannedComponentAction>,
}

impl DeploymentStep {
    pub fn is_removal(&self) -> bool {
        self.components
            .iter()
            .all(|c| c.action == StepAction::Delete)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeploymentPlan {
    pub steps: Vec<DeploymentStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ComponentResultSpec {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TargetResultSpec {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub component_results: BTreeMap<String, ComponentResultSpec>,
}

/// Per-job lifecycle record. `planned_deployment` is fixed at
/// job creation; `current_deployed` only ever increases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SummarySpec {
    pub job_id: String,
    pub target_count: usize,
    pub success_count: usize,
    pub planned_deployment: usize,
    pub current_deployed: usize,
    pub all_assigned_deployed: bool,
    pub is_removal: bool,
    /// Overall job status: empty while in flight, `"OK"`/`"Failed"` at a
    /// normal terminal state, `"Cancelled"` if cancellation cut the run
    /// short (spec §5: "a terminal summary is written with status
    /// Cancelled").
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub target_results: BTreeMap<String, TargetResultSpec>,
}

impl SummarySpec {
    pub fn new(job_id: impl Into<String>, target_count: usize, planned_deployment: usize) -> Self {
        Self {
            job_id: job_id.into(),
            target_count,
            planned_deployment,
            ..Default::default()
        }
    }

    /// `allAssignedDeployed` holds iff planned == current and every
    /// target result reports `"OK"`.
    pub fn recompute_all_assigned_deployed(&mut self) {
        self.all_assigned_deployed = self.planned_deployment == self.current_deployed
            && !self.target_results.is_empty()
            && self.target_results.values().all(|r| r.status == "OK");
    }

    pub fn is_terminal(&self) -> bool {
        self.planned_deployment == self.current_deployed
            && self.target_results.len() >= self.target_count.min(self.target_results.len().max(1))
            && self.target_results.values().all(|r| !r.status.is_empty())
    }
}

/// Normalizes a `name:version` reference to its storage-safe form
///: `"name-v-version"`.
pub fn to_storage_name(reference: &str) -> String {
    match reference.split_once(':') {
        Some((name, version)) => format!("{name}-v-{version}"),
        None => reference.to_string(),
    }
}

/// Inverse of [`to_storage_name`]. Only reconstructs the `name:version`
/// form when the storage name contains the `-v-` separator exactly once
/// after the name portion; otherwise returns the input unchanged.
pub fn to_ref_name(storage_name: &str) -> String {
    if let Some(idx) = storage_name.rfind("-v-") {
        let (name, rest) = storage_name.split_at(idx);
        let version = &rest[3..];
        format!("{name}:{version}")
    } else {
        storage_name.to_string()
    }
}
