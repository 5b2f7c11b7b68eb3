#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod materializer;
pub mod merge;
pub mod model;
pub mod plan;
pub mod provider;
pub mod providers;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod state_store;
pub mod summary;
pub mod telemetry;

pub use config::{CliArgs, Command, EngineConfig, OutputFormat};
pub use error::{OrchestratorError, Result};
pub use model::{
    ComponentSpec, DeploymentPlan, DeploymentSpec, DeploymentState, DeploymentStep, InstanceSpec,
    ObjectMeta, SolutionSpec, SummarySpec, TargetSpec,
};
pub use provider::{PropertyDesc, TargetProvider, ValidationRule};
pub use reconciler::{reconcile, Deps};
pub use registry::ProviderRegistry;
