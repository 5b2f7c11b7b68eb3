//! `ITargetProvider` contract: the uniform surface every
//! backend exposes, plus the change-detection comparator the skip
//! detector (`merge.rs`) relies on.

use std::collections::BTreeMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::model::{ComponentSpec, ComponentResultSpec, DeploymentSpec, DeploymentStep};

/// Declarative description of a property the skip detector should compare
/// when deciding whether a component actually changed.
#[derive(Debug, Clone)]
pub struct PropertyDesc {
    /// Property name, or a `*`-glob (e.g. `"env.*"`) matched against the
    /// union of keys present in either side.
    pub name: String,
    pub ignore_case: bool,
    pub prefix_match: bool,
    pub skip_if_missing: bool,
    /// When true, compares component *names* instead of a property.
    pub is_component_name: bool,
    /// Optional deep-equality override (e.g. for nested Helm values); when
    /// absent, values are compared as their `Display`-ish string form.
    pub prop_changed: Option<fn(Option<&serde_json::Value>, Option<&serde_json::Value>) -> bool>,
}

impl PropertyDesc {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ignore_case: false,
            prefix_match: false,
            skip_if_missing: false,
            is_component_name: false,
            prop_changed: None,
        }
    }

    pub fn component_name() -> Self {
        Self {
            is_component_name: true,
            ..Self::named("")
        }
    }

    pub fn skip_if_missing(mut self) -> Self {
        self.skip_if_missing = true;
        self
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    pub fn with_deep_compare(
        mut self,
        f: fn(Option<&serde_json::Value>, Option<&serde_json::Value>) -> bool,
    ) -> Self {
        self.prop_changed = Some(f);
        self
    }
}

/// What a provider requires/supports, used by the engine to short-circuit
/// no-op reconciliations.
#[derive(Debug, Clone, Default)]
pub struct ValidationRule {
    pub required_properties: Vec<String>,
    pub optional_properties: Vec<String>,
    pub required_metadata: Vec<String>,
    pub change_detection_properties: Vec<PropertyDesc>,
    pub sidecar_change_detection: Vec<PropertyDesc>,
    pub allow_sidecar: bool,
}

impl ValidationRule {
    /// A component is unchanged iff every change-detection rule reports
    /// no change across both `properties` and `metadata`.
    pub fn is_component_changed(&self, old: &ComponentSpec, new: &ComponentSpec) -> bool {
        detect_changes(
            &self.change_detection_properties,
            &old.name,
            &new.name,
            &old.properties,
            &new.properties,
        ) || detect_changes_str(
            &self.change_detection_properties,
            &old.name,
            &new.name,
            &old.metadata,
            &new.metadata,
        )
    }
}

static GLOB_CACHE: Lazy<std::sync::Mutex<BTreeMap<String, Regex>>> =
    Lazy::new(|| std::sync::Mutex::new(BTreeMap::new()));

fn glob_regex(pattern: &str) -> Regex {
    let mut cache = GLOB_CACHE.lock().expect("glob cache lock poisoned");
    if let Some(re) = cache.get(pattern) {
        return re.clone();
    }
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    let re = Regex::new(&format!("^{escaped}$")).expect("glob compiles to a valid regex");
    cache.insert(pattern.to_string(), re.clone());
    re
}

fn compare_strings(a: &str, b: &str, ignore_case: bool, prefix_match: bool) -> bool {
    let (a, b) = if ignore_case {
        (a.to_lowercase(), b.to_lowercase())
    } else {
        (a.to_string(), b.to_string())
    };
    if !prefix_match {
        a == b
    } else {
        b.starts_with(&a) || a.starts_with(&b)
    }
}

fn is_empty_value(value: Option<&serde_json::Value>) -> bool {
    match value {
        None => true,
        Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Object(map)) => map.is_empty(),
        _ => false,
    }
}

/// Deep-equality special case: a missing property on both sides
/// compares equal, and an empty map on one side vs. absent on the other
/// also compares equal — mirrors the source's `propChange`/`isEmpty`.
fn prop_changed_default(old: Option<&serde_json::Value>, new: Option<&serde_json::Value>) -> bool {
    if is_empty_value(old) && is_empty_value(new) {
        return false;
    }
    old != new
}

fn compare_properties(
    desc: &PropertyDesc,
    old: &BTreeMap<String, serde_json::Value>,
    new: &BTreeMap<String, serde_json::Value>,
    key: &str,
) -> bool {
    let ov = old.get(key);
    let nv = new.get(key);
    if let Some(custom) = desc.prop_changed {
        return custom(ov, nv);
    }
    match (ov, nv) {
        (Some(a), Some(b)) => {
            let (sa, sb) = (json_display(a), json_display(b));
            !compare_strings(&sa, &sb, desc.ignore_case, desc.prefix_match)
        }
        (None, None) => false,
        _ => !desc.skip_if_missing,
    }
}

fn json_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn merged_keys<'a>(
    old: &'a BTreeMap<String, serde_json::Value>,
    new: &'a BTreeMap<String, serde_json::Value>,
) -> Vec<&'a str> {
    let mut keys: Vec<&str> = old.keys().chain(new.keys()).map(String::as_str).collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

fn detect_changes(
    properties: &[PropertyDesc],
    old_name: &str,
    new_name: &str,
    old_values: &BTreeMap<String, serde_json::Value>,
    new_values: &BTreeMap<String, serde_json::Value>,
) -> bool {
    for desc in properties {
        if desc.is_component_name {
            if !compare_strings(old_name, new_name, desc.ignore_case, desc.prefix_match) {
                return true;
            }
            continue;
        }
        if desc.name.contains('*') {
            let re = glob_regex(&desc.name);
            for key in merged_keys(old_values, new_values) {
                if re.is_match(key) && compare_properties(desc, old_values, new_values, key) {
                    return true;
                }
            }
        } else if compare_properties(desc, old_values, new_values, &desc.name) {
            return true;
        }
    }
    false
}

/// `metadata` is `BTreeMap<String, String>`; lift it to the JSON-valued
/// shape `detect_changes` operates on so the same comparator serves both.
fn detect_changes_str(
    properties: &[PropertyDesc],
    old_name: &str,
    new_name: &str,
    old_values: &BTreeMap<String, String>,
    new_values: &BTreeMap<String, String>,
) -> bool {
    let lift = |m: &BTreeMap<String, String>| {
        m.iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<BTreeMap<_, _>>()
    };
    detect_changes(properties, old_name, new_name, &lift(old_values), &lift(new_values))
}

/// Capability-typed plugin interface every backend implements.
/// `Get`/`Apply` may suspend on provider I/O; cancellation is honored by
/// returning early between components rather than mid-call.
#[async_trait]
pub trait TargetProvider: Send + Sync {
    /// Observed state of the listed component names on this target.
    async fn get(
        &self,
        deployment: &DeploymentSpec,
        references: &[String],
    ) -> Result<Vec<ComponentSpec>>;

    /// Executes a step. On `is_dry_run`, performs only read-only validation
    /// and returns what would change, without side effects. Must be
    /// idempotent when invoked twice with an already-converged state.
    async fn apply(
        &self,
        deployment: &DeploymentSpec,
        step: &DeploymentStep,
        is_dry_run: bool,
    ) -> Result<BTreeMap<String, ComponentResultSpec>>;

    fn get_validation_rule(&self) -> ValidationRule;

    /// Default `needs_update`: true unless every change-detection rule
    /// reports no change for at least one matching pair. Providers may
    /// override for role-specific nuance.
    fn needs_update(&self, desired: &[ComponentSpec], current: &[ComponentSpec]) -> bool {
        let rule = self.get_validation_rule();
        for d in desired {
            match current.iter().find(|c| c.name == d.name) {
                Some(c) if !rule.is_component_changed(c, d) => continue,
                _ => return true,
            }
        }
        false
    }

    /// True when a component the desired set no longer references is still
    /// observed on the target — i.e. removal is needed (spec §9 open
    /// question: defined here as "exists in both", kept symmetric with
    /// `needs_update` rather than reproducing the source's possible
    /// first-match-true quirk).
    fn needs_remove(&self, desired: &[ComponentSpec], current: &[ComponentSpec]) -> bool {
        current
            .iter()
            .any(|c| !desired.iter().any(|d| d.name == c.name))
    }
}
