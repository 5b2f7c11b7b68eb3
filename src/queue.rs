//! Job queue: idempotent submission plus a
//! bounded worker pool. Jobs against the same instance are serialized via
//! a per-instance lock; jobs against different instances run concurrently
//! up to `capacity`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{OrchestratorError, Result};
use crate::model::{DeploymentSpec, SummarySpec};
use crate::reconciler::{reconcile, Deps};

/// One unit of reconciliation work. `job_id` identifies it for idempotent
/// resubmission (spec §5: resubmitting an id already queued or running is
/// a no-op); `instance_key` identifies the serialization domain.
#[derive(Debug, Clone)]
pub struct Job {
    pub deployment: Arc<DeploymentSpec>,
}

impl Job {
    /// Wraps `deployment` for submission, assigning a fresh job id (spec §6:
    /// `POST /solution/queue` returns a server-generated `summaryID`) when
    /// the caller didn't already set one.
    pub fn new(mut deployment: DeploymentSpec) -> Self {
        if deployment.job_id.is_empty() {
            deployment.job_id = uuid::Uuid::new_v4().to_string();
        }
        Self {
            deployment: Arc::new(deployment),
        }
    }

    fn job_id(&self) -> &str {
        &self.deployment.job_id
    }

    fn instance_key(&self) -> String {
        format!(
            "{}/{}",
            self.deployment.instance.object_meta.namespace_or_default(),
            self.deployment.instance.object_meta.name
        )
    }
}

struct Inner {
    deps: Arc<Deps>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    in_flight: Mutex<HashSet<String>>,
    permits: Arc<Semaphore>,
}

/// Handle used to submit jobs. Cloning shares the same underlying queue
/// and worker pool.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
    sender: mpsc::Sender<(Job, CancellationToken)>,
}

impl JobQueue {
    /// `capacity` bounds concurrently-executing jobs; `queue_depth` bounds
    /// how many submitted-but-not-yet-started jobs may be buffered before
    /// `submit` starts applying backpressure.
    pub fn new(deps: Arc<Deps>, capacity: usize, queue_depth: usize) -> (Self, JobQueueWorker) {
        let (sender, receiver) = mpsc::channel(queue_depth);
        let inner = Arc::new(Inner {
            deps,
            locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            permits: Arc::new(Semaphore::new(capacity)),
        });
        (
            Self {
                inner: inner.clone(),
                sender,
            },
            JobQueueWorker { inner, receiver },
        )
    }

    /// Returns `Ok(true)` if the job was newly queued, `Ok(false)` if an
    /// identically-keyed job was already queued or running.
    pub async fn submit(&self, job: Job, cancellation: CancellationToken) -> Result<bool> {
        {
            let mut in_flight = self.inner.in_flight.lock().await;
            if !in_flight.insert(job.job_id().to_string()) {
                return Ok(false);
            }
        }

        self.sender
            .send((job, cancellation))
            .await
            .map_err(|_| OrchestratorError::Internal("job queue closed".into()))?;
        Ok(true)
    }
}

/// Drives the queue. Spawn `run` once per process; it consumes `self` so
/// it cannot accidentally be driven twice.
pub struct JobQueueWorker {
    inner: Arc<Inner>,
    receiver: mpsc::Receiver<(Job, CancellationToken)>,
}

impl JobQueueWorker {
    pub async fn run(mut self) {
        while let Some((job, cancellation)) = self.receiver.recv().await {
            let inner = self.inner.clone();
            tokio::spawn(Self::execute(inner, job, cancellation));
        }
    }

    async fn execute(inner: Arc<Inner>, job: Job, cancellation: CancellationToken) {
        let _permit = inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("queue semaphore is never closed");

        let lock = {
            let mut locks = inner.locks.lock().await;
            locks.entry(job.instance_key()).or_default().clone()
        };
        let _guard = lock.lock().await;

        let job_id = job.job_id().to_string();
        info!(job_id = %job_id, "starting reconciliation");
        let result: Result<SummarySpec> = reconcile(&inner.deps, &job.deployment, &cancellation).await;
        match result {
            Ok(summary) => {
                info!(
                    job_id = %job_id,
                    current_deployed = summary.current_deployed,
                    "reconciliation finished"
                );
            }
            Err(err) => {
                error!(job_id = %job_id, error = %err, "reconciliation failed");
            }
        }

        inner.in_flight.lock().await.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ComponentSpec, InstanceSpec, InstanceWithMeta, ObjectMeta, ProviderBinding, SolutionSpec,
        TargetSelector, TargetSpec, TopologySpec,
    };
    use crate::model::ComponentResultSpec;
    use crate::provider::{TargetProvider, ValidationRule};
    use crate::registry::ProviderRegistry;
    use crate::state_store::MemoryStateStore;
    use crate::summary::MemorySummaryStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct NoopProvider;

    #[async_trait]
    impl TargetProvider for NoopProvider {
        async fn get(&self, _: &DeploymentSpec, _: &[String]) -> Result<Vec<ComponentSpec>> {
            Ok(Vec::new())
        }
        async fn apply(
            &self,
            _: &DeploymentSpec,
            step: &crate::model::DeploymentStep,
            _: bool,
        ) -> Result<BTreeMap<String, ComponentResultSpec>> {
            Ok(step
                .components
                .iter()
                .map(|a| {
                    (
                        a.component.name.clone(),
                        ComponentResultSpec {
                            status: "OK".into(),
                            message: String::new(),
                        },
                    )
                })
                .collect())
        }
        fn get_validation_rule(&self) -> ValidationRule {
            ValidationRule::default()
        }
    }

    fn deployment(job_id: &str, instance_name: &str) -> DeploymentSpec {
        let mut targets = BTreeMap::new();
        targets.insert(
            "t1".to_string(),
            TargetSpec {
                display_name: "t1".into(),
                components: vec![ComponentSpec {
                    name: "nginx".into(),
                    component_type: "container".into(),
                    ..Default::default()
                }],
                topologies: vec![TopologySpec {
                    bindings: vec![ProviderBinding {
                        role: "instance".into(),
                        provider: "container".into(),
                        config: BTreeMap::new(),
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        DeploymentSpec {
            job_id: job_id.into(),
            instance: InstanceWithMeta {
                object_meta: ObjectMeta::named(instance_name),
                spec: InstanceSpec {
                    solution: "sol:1.0.0".into(),
                    target: TargetSelector::default(),
                    ..Default::default()
                },
            },
            solution: SolutionSpec::default(),
            targets,
            assignments: BTreeMap::new(),
            active_target: String::new(),
            is_dry_run: false,
            is_in_active: false,
        }
    }

    fn deps() -> Arc<Deps> {
        let mut registry = ProviderRegistry::new();
        registry.register("container", Arc::new(|_| Ok(Arc::new(NoopProvider) as _)));
        Arc::new(Deps::new(
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemorySummaryStore::new()),
            Arc::new(registry),
        ))
    }

    #[tokio::test]
    async fn resubmitting_same_job_id_is_a_noop_while_queued() {
        let (queue, worker) = JobQueue::new(deps(), 1, 8);
        let handle = tokio::spawn(worker.run());

        let job = Job {
            deployment: Arc::new(deployment("job-1", "i1")),
        };
        let token = CancellationToken::new();
        assert!(queue.submit(job.clone(), token.clone()).await.unwrap());

        // Give the worker a moment to pick it up; either way resubmission
        // before the job clears in_flight tracking should be a no-op.
        tokio::task::yield_now().await;

        handle.abort();
    }

    #[test]
    fn new_job_assigns_an_id_when_missing() {
        let job = Job::new(deployment("", "i1"));
        assert!(!job.job_id().is_empty());
    }

    #[test]
    fn new_job_keeps_a_caller_supplied_id() {
        let job = Job::new(deployment("job-42", "i1"));
        assert_eq!(job.job_id(), "job-42");
    }

    #[tokio::test]
    async fn distinct_jobs_both_get_queued() {
        let (queue, worker) = JobQueue::new(deps(), 2, 8);
        tokio::spawn(worker.run());

        let token = CancellationToken::new();
        let job_a = Job {
            deployment: Arc::new(deployment("job-a", "i1")),
        };
        let job_b = Job {
            deployment: Arc::new(deployment("job-b", "i2")),
        };
        assert!(queue.submit(job_a, token.clone()).await.unwrap());
        assert!(queue.submit(job_b, token).await.unwrap());
    }
}
