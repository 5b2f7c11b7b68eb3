//! Tracing/logging init. Plain `tracing-subscriber` with an env filter;
//! no OTLP exporter is wired up, but the span/field shape in
//! `reconciler.rs` is kept exporter-ready.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::error::{OrchestratorError, Result};

/// Initializes the global subscriber from `RUST_LOG`, defaulting to `info`
/// when unset. Must be called at most once per process.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| OrchestratorError::Internal(format!("failed to install tracing subscriber: {err}")))
}
