//! Engine configuration and CLI surface. `EngineConfig` carries the
//! environment-derived settings the reconciler needs; `CliArgs`/`Command`
//! expose a thin synchronous CLI over `reconcile`/summary lookup for
//! local testing and ops use.

use std::env;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Output format for CLI commands.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Path to a deployment spec JSON file.
    #[arg(long)]
    pub deployment: PathBuf,

    /// Render the plan without calling any provider's `apply`.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Mark every component for removal instead of reconciling to desired
    /// state.
    #[arg(long, default_value_t = false)]
    pub remove: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    /// Job id to look up.
    pub job_id: String,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Debug, Parser)]
#[command(
    name = "symphonia",
    version,
    about = "Declarative reconciliation engine for deploying heterogeneous solutions to heterogeneous targets."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile a deployment spec to convergence.
    Reconcile(ReconcileArgs),
    /// Print the last known summary for a job id.
    Summary(SummaryArgs),
}

/// Environment-derived settings, read from unprefixed env var names.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_base_url: Option<String>,
    pub sa_token_path: Option<PathBuf>,
    pub use_service_account_token: bool,
    pub api_cert_path: Option<PathBuf>,
    pub config_name: String,
    pub subscriber_retry_count: u32,
    pub subscriber_retry_wait_seconds: u64,
    pub worker_pool_size: usize,
    pub queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            sa_token_path: None,
            use_service_account_token: false,
            api_cert_path: None,
            config_name: "default".to_string(),
            subscriber_retry_count: 3,
            subscriber_retry_wait_seconds: 1,
            worker_pool_size: 4,
            queue_depth: 64,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.api_base_url = env::var("API_BASE_URL").ok();
        config.sa_token_path = env::var("SA_TOKEN_PATH").ok().map(PathBuf::from);
        config.use_service_account_token = env::var("USE_SERVICE_ACCOUNT_TOKEN")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        config.api_cert_path = env::var("API_CERT_PATH").ok().map(PathBuf::from);
        if let Ok(name) = env::var("CONFIG_NAME") {
            config.config_name = name;
        }

        if let Ok(count) = env::var("SUBSCRIBER_RETRY_COUNT") {
            config.subscriber_retry_count = count.parse().map_err(|_| {
                OrchestratorError::BadConfig(format!("SUBSCRIBER_RETRY_COUNT '{count}' is not a number"))
            })?;
        }
        if let Ok(wait) = env::var("SUBSCRIBER_RETRY_WAIT_SECONDS") {
            config.subscriber_retry_wait_seconds = wait.parse().map_err(|_| {
                OrchestratorError::BadConfig(format!(
                    "SUBSCRIBER_RETRY_WAIT_SECONDS '{wait}' is not a number"
                ))
            })?;
        }

        if config.use_service_account_token && config.sa_token_path.is_none() {
            return Err(OrchestratorError::BadConfig(
                "USE_SERVICE_ACCOUNT_TOKEN is set but SA_TOKEN_PATH is missing".into(),
            ));
        }

        Ok(config)
    }
}
