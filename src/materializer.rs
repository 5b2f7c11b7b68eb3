//! Catalog materialization. A catalog entry's `objString`
//! becomes `"{origin}-{objString}"` when created, the stage-supplied
//! namespace always overrides whatever the inner spec carries, an empty
//! inner name falls back to the (de-prefixed) catalog name, and a batch
//! that creates fewer objects than it was asked to fails with
//! `MaterializeBatchFailed` — with no rollback of what already landed.

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::model::{InstanceSpec, ObjectMeta, SolutionSpec, TargetSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub object_string: String,
    #[serde(rename = "type")]
    pub catalog_type: CatalogType,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogType {
    Instance,
    Solution,
    Target,
    /// Any other catalog type is treated as a nested catalog reference and
    /// materialized generically.
    #[serde(other)]
    Nested,
}

#[derive(Debug, Clone)]
pub enum MaterializedObject {
    Instance(ObjectMeta, InstanceSpec),
    Solution(ObjectMeta, SolutionSpec),
    Target(ObjectMeta, TargetSpec),
}

impl MaterializedObject {
    pub fn name(&self) -> &str {
        match self {
            MaterializedObject::Instance(meta, _)
            | MaterializedObject::Solution(meta, _)
            | MaterializedObject::Target(meta, _) => &meta.name,
        }
    }
}

/// Prefixes a catalog-derived object name with its origin, unless already
/// prefixed (idempotent re-materialization), mirroring
/// `fmt.Sprintf("%s-%s", origin, objString)`.
pub fn prefixed_name(origin: &str, object_string: &str) -> String {
    let prefix = format!("{origin}-");
    if object_string.starts_with(&prefix) {
        object_string.to_string()
    } else {
        format!("{prefix}{object_string}")
    }
}

fn strip_origin<'a>(origin: &str, name: &'a str) -> &'a str {
    name.strip_prefix(&format!("{origin}-")).unwrap_or(name)
}

/// `updateObjectMeta`: the stage-supplied namespace always wins;
/// an empty inner name is replaced by the catalog name with its origin
/// prefix stripped back off; an inner spec's own non-empty `displayName`
/// wins over both.
fn update_object_meta(
    mut meta: ObjectMeta,
    prefixed_catalog_name: &str,
    origin: &str,
    stage_namespace: &str,
    display_name: &str,
) -> ObjectMeta {
    if meta.name.is_empty() {
        meta.name = strip_origin(origin, prefixed_catalog_name).to_string();
    }
    if !display_name.is_empty() {
        meta.name = display_name.to_string();
    }
    meta.namespace = if stage_namespace.is_empty() {
        crate::model::DEFAULT_NAMESPACE.to_string()
    } else {
        stage_namespace.to_string()
    };
    meta
}

fn decode_instance(entry: &CatalogEntry, name: &str, namespace: &str, origin: &str) -> Result<MaterializedObject> {
    let spec: InstanceSpec = serde_json::from_value(entry.body.clone()).map_err(|e| {
        OrchestratorError::InvalidCatalog {
            kind: "instance",
            name: entry.object_string.clone(),
            reason: e.to_string(),
        }
    })?;
    let meta = update_object_meta(ObjectMeta::named(name), name, origin, namespace, &spec.display_name);
    Ok(MaterializedObject::Instance(meta, spec))
}

fn decode_solution(entry: &CatalogEntry, name: &str, namespace: &str, origin: &str) -> Result<MaterializedObject> {
    let spec: SolutionSpec = serde_json::from_value(entry.body.clone()).map_err(|e| {
        OrchestratorError::InvalidCatalog {
            kind: "solution",
            name: entry.object_string.clone(),
            reason: e.to_string(),
        }
    })?;
    let meta = update_object_meta(ObjectMeta::named(name), name, origin, namespace, &spec.display_name);
    Ok(MaterializedObject::Solution(meta, spec))
}

fn decode_target(entry: &CatalogEntry, name: &str, namespace: &str, origin: &str) -> Result<MaterializedObject> {
    let spec: TargetSpec = serde_json::from_value(entry.body.clone()).map_err(|e| {
        OrchestratorError::InvalidCatalog {
            kind: "target",
            name: entry.object_string.clone(),
            reason: e.to_string(),
        }
    })?;
    let meta = update_object_meta(ObjectMeta::named(name), name, origin, namespace, &spec.display_name);
    Ok(MaterializedObject::Target(meta, spec))
}

/// Nested catalogs reference another catalog entry rather than carrying a
/// materializable spec directly; this crate only resolves a single level,
/// so a nested reference is rejected rather than silently dropped.
fn decode_nested(entry: &CatalogEntry) -> Result<MaterializedObject> {
    Err(OrchestratorError::InvalidCatalog {
        kind: "nested",
        name: entry.object_string.clone(),
        reason: "nested catalog references are not materializable directly".into(),
    })
}

fn materialize_one(entry: &CatalogEntry, origin: &str, namespace: &str) -> Result<MaterializedObject> {
    let prefixed = prefixed_name(origin, &entry.object_string);
    match entry.catalog_type {
        CatalogType::Instance => decode_instance(entry, &prefixed, namespace, origin),
        CatalogType::Solution => decode_solution(entry, &prefixed, namespace, origin),
        CatalogType::Target => decode_target(entry, &prefixed, namespace, origin),
        CatalogType::Nested => decode_nested(entry),
    }
}

/// Materializes every entry in `catalogs`, continuing past per-entry
/// failures so the caller can see how many of the requested objects could
/// actually be built. If any entry failed to decode or be created, the
/// whole batch is reported as `MaterializeBatchFailed` — matching the
/// source's no-rollback semantics: objects already created are left in
/// place.
pub fn materialize_batch(
    catalogs: &[CatalogEntry],
    origin: &str,
    namespace: &str,
) -> Result<Vec<MaterializedObject>> {
    let requested = catalogs.len();
    let mut created = Vec::with_capacity(requested);
    let mut first_error = None;

    for entry in catalogs {
        match materialize_one(entry, origin, namespace) {
            Ok(obj) => created.push(obj),
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    if created.len() < requested {
        if let Some(err) = first_error {
            tracing::warn!(
                created = created.len(),
                requested,
                error = %err,
                "materialize batch incomplete"
            );
        }
        return Err(OrchestratorError::MaterializeBatchFailed {
            created: created.len(),
            requested,
        });
    }

    Ok(created)
}

/// The stage entrypoint: given the requested `names`, an
/// optional `__origin`, a target `namespace`, and the authoritative catalog
/// list fetched from the API collaborator, looks each requested name up by
/// its origin-prefixed lookup key and materializes the ones found.
pub fn materialize_for_names(
    names: &[String],
    origin: Option<&str>,
    namespace: &str,
    catalogs: &[CatalogEntry],
) -> Result<Vec<MaterializedObject>> {
    let origin = origin.unwrap_or("");
    let mut matched = Vec::with_capacity(names.len());

    for name in names {
        let lookup_key = if origin.is_empty() {
            name.clone()
        } else {
            prefixed_name(origin, name)
        };
        if let Some(entry) = catalogs.iter().find(|c| c.object_string == lookup_key) {
            matched.push(entry.clone());
        }
    }

    if matched.len() < names.len() {
        tracing::warn!(
            matched = matched.len(),
            requested = names.len(),
            "fewer catalogs found than names requested"
        );
        return Err(OrchestratorError::MaterializeBatchFailed {
            created: matched.len(),
            requested: names.len(),
        });
    }

    materialize_batch(&matched, origin, namespace)
}
