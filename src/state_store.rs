//! Keyed JSON blob store: a multi-record store addressed by
//! `(group, version, resource, namespace, id)`, with optimistic
//! concurrency checked via ETags.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Names the `(group, version, resource, namespace)` coordinate a record
/// lives at (`deployments`, `deploystates`, `summaries`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateMeta {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: String,
}

impl StateMeta {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            namespace: namespace.into(),
        }
    }

    fn bucket_key(&self) -> String {
        format!("{}/{}/{}/{}", self.group, self.version, self.resource, self.namespace)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub id: String,
    pub body: serde_json::Value,
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub id: String,
    pub body: serde_json::Value,
    /// When set, the upsert fails with `Conflict` unless it matches the
    /// stored etag.
    pub etag: Option<String>,
}

/// `StateStore` is shared across jobs; writes to the same key are
/// serialized, but the store makes no cross-key transactional guarantee.
/// `MemoryStateStore` serializes per-bucket via an `RwLock`, which is
/// sufficient to provide per-key write ordering for a single-process
/// engine.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, id: &str, meta: &StateMeta) -> Result<StateEntry>;
    async fn upsert(&self, request: UpsertRequest, meta: &StateMeta) -> Result<String>;
    async fn list(&self, meta: &StateMeta) -> Result<Vec<StateEntry>>;
    /// Idempotent: deleting an absent key succeeds.
    async fn delete(&self, id: &str, meta: &StateMeta) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStateStore {
    buckets: RwLock<HashMap<String, HashMap<String, StateEntry>>>,
    next_etag: std::sync::atomic::AtomicU64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_etag(&self) -> String {
        let n = self
            .next_etag
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("etag-{n}")
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, id: &str, meta: &StateMeta) -> Result<StateEntry> {
        let buckets = self.buckets.read().expect("state store lock poisoned");
        buckets
            .get(&meta.bucket_key())
            .and_then(|bucket| bucket.get(id))
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("{}/{}", meta.bucket_key(), id)))
    }

    async fn upsert(&self, request: UpsertRequest, meta: &StateMeta) -> Result<String> {
        let mut buckets = self.buckets.write().expect("state store lock poisoned");
        let bucket = buckets.entry(meta.bucket_key()).or_default();

        if let Some(expected) = &request.etag {
            if let Some(existing) = bucket.get(&request.id) {
                if &existing.etag != expected {
                    return Err(OrchestratorError::Conflict(format!(
                        "etag mismatch for {}/{}",
                        meta.bucket_key(),
                        request.id
                    )));
                }
            } else {
                return Err(OrchestratorError::Conflict(format!(
                    "etag provided for nonexistent entry {}/{}",
                    meta.bucket_key(),
                    request.id
                )));
            }
        }

        let etag = self.fresh_etag();
        bucket.insert(
            request.id.clone(),
            StateEntry {
                id: request.id,
                body: request.body,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn list(&self, meta: &StateMeta) -> Result<Vec<StateEntry>> {
        let buckets = self.buckets.read().expect("state store lock poisoned");
        Ok(buckets
            .get(&meta.bucket_key())
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, id: &str, meta: &StateMeta) -> Result<()> {
        let mut buckets = self.buckets.write().expect("state store lock poisoned");
        if let Some(bucket) = buckets.get_mut(&meta.bucket_key()) {
            bucket.remove(id);
        }
        Ok(())
    }
}
