use std::fs;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use symphonia::config::{CliArgs, Command, EngineConfig, OutputFormat};
use symphonia::error::OrchestratorError;
use symphonia::model::DeploymentSpec;
use symphonia::providers::register_builtin_providers;
use symphonia::reconciler::{reconcile, Deps};
use symphonia::registry::ProviderRegistry;
use symphonia::state_store::MemoryStateStore;
use symphonia::summary::{MemorySummaryStore, SummaryStore};

#[tokio::main]
async fn main() {
    if let Err(err) = symphonia::telemetry::init() {
        eprintln!("failed to initialize logging: {err}");
    }

    let cli = CliArgs::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: CliArgs) -> i32 {
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return 2;
        }
    };

    match cli.command {
        Command::Reconcile(args) => {
            let raw = match fs::read_to_string(&args.deployment) {
                Ok(raw) => raw,
                Err(err) => {
                    eprintln!("failed to read {}: {err}", args.deployment.display());
                    return 1;
                }
            };
            let mut deployment: DeploymentSpec = match serde_json::from_str(&raw) {
                Ok(d) => d,
                Err(err) => {
                    eprintln!("invalid deployment spec: {err}");
                    return 2;
                }
            };
            deployment.is_dry_run = args.dry_run;
            deployment.is_in_active = args.remove;

            let deps = build_deps(&config);
            let token = CancellationToken::new();
            match reconcile(&deps, &deployment, &token).await {
                Ok(summary) => {
                    print_result(&summary, args.output);
                    if summary.status == "OK" {
                        0
                    } else {
                        3
                    }
                }
                Err(err) => {
                    eprintln!("reconciliation failed: {err}");
                    exit_code_for(&err)
                }
            }
        }
        Command::Summary(args) => {
            let store = MemorySummaryStore::new();
            match store.get(&args.job_id).await {
                Ok(summary) => {
                    print_result(&summary, args.output);
                    0
                }
                Err(err) => {
                    eprintln!("{err}");
                    exit_code_for(&err)
                }
            }
        }
    }
}

fn build_deps(config: &EngineConfig) -> Deps {
    let mut registry = ProviderRegistry::new();
    register_builtin_providers(&mut registry);
    let mut deps = Deps::new(
        Arc::new(MemoryStateStore::new()),
        Arc::new(MemorySummaryStore::new()),
        Arc::new(registry),
    );
    deps.max_retries = config.subscriber_retry_count;
    deps.retry_wait = std::time::Duration::from_secs(config.subscriber_retry_wait_seconds);
    deps
}

fn print_result(summary: &symphonia::model::SummarySpec, output: OutputFormat) {
    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(summary) {
            Ok(payload) => println!("{payload}"),
            Err(err) => eprintln!("failed to render summary as JSON: {err}"),
        },
        OutputFormat::Yaml => match serde_yaml_bw::to_string(summary) {
            Ok(payload) => println!("{payload}"),
            Err(err) => eprintln!("failed to render summary as YAML: {err}"),
        },
        OutputFormat::Text => {
            println!(
                "job {}: {}/{} deployed, all_assigned_deployed={}",
                summary.job_id, summary.current_deployed, summary.planned_deployment, summary.all_assigned_deployed
            );
            for (target, result) in &summary.target_results {
                println!("  {target}: {}", result.status);
            }
        }
    }
}

fn exit_code_for(err: &OrchestratorError) -> i32 {
    match err {
        OrchestratorError::BadConfig(_) => 2,
        OrchestratorError::BadRequest(_) | OrchestratorError::NotFound(_) => 1,
        _ if !err.is_retryable() => 3,
        _ => 1,
    }
}
