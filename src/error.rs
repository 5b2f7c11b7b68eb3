use std::io;

use thiserror::Error;

/// The engine's error taxonomy. Variants describe *kind*, not
/// which subsystem raised them — a malformed solution and a dependency
/// cycle both surface as `BadRequest`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad config: {0}")]
    BadConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("failed to list catalogs: {0}")]
    CatalogsGetFailed(String),

    #[error("invalid {kind} catalog '{name}': {reason}")]
    InvalidCatalog {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("failed to create {kind} '{name}' from catalog: {reason}")]
    CreateFromCatalogFailed {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("materialized {created} of {requested} requested objects")]
    MaterializeBatchFailed { created: usize, requested: usize },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// Whether the reconciler's retry loop should retry this error.
    /// `BadRequest`/`BadConfig`/`Serialization` are terminal; `Internal` and
    /// `Conflict` are retried with backoff up to a configured bound.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Internal(_) | OrchestratorError::Conflict(_)
        )
    }

    /// Whether a step-level failure should abort the whole job rather than
    /// being recorded against the target and letting the job continue
    /// (spec §7 "Partial failure" / §4.7 step 7: "unless the provider's
    /// failure is fatal (e.g. auth)"). `BadConfig` covers provider
    /// misconfiguration/auth-class failures; every other apply-time error
    /// is a per-target outcome.
    pub fn is_job_fatal(&self) -> bool {
        matches!(self, OrchestratorError::BadConfig(_))
    }
}
