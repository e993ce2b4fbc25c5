//! Top-level facade tying the queue, worker pool, and lifecycle machine
//! together behind a small submit/inspect/cancel surface.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::cache::{ArtifactCache, InMemoryArtifactCache};
use crate::cancellation::CancellationRegistry;
use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::events::{EventSink, NoOpEventSink};
use crate::lifecycle::{
    BuildPhase, BuildRecord, BuildTable, LifecycleMachine, PhasePlanner, StaticPlanner,
};
use crate::ports::{InMemoryPersistence, Persistence};
use crate::queue::{Job, JobQueue, JobStatus, Tier};
use crate::spec::BuildSpec;
use crate::worker::WorkerPool;

/// Identifiers handed back on admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Queue-level job id; use for status and dead-letter operations.
    pub job_id: String,
    /// Build id; use for phase queries and cancellation.
    pub build_id: String,
}

/// Configures and constructs an [`Orchestrator`].
///
/// Every collaborator has an in-process default so tests and small
/// deployments can start with `Orchestrator::builder(config).build()`.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    planner: Arc<dyn PhasePlanner>,
    persistence: Arc<dyn Persistence>,
    cache: Arc<dyn ArtifactCache>,
    sink: Arc<dyn EventSink>,
}

impl OrchestratorBuilder {
    fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            planner: Arc::new(StaticPlanner::new()),
            persistence: Arc::new(InMemoryPersistence::new()),
            cache: Arc::new(InMemoryArtifactCache::new()),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the planner that maps build phases to step plans.
    #[must_use]
    pub fn with_planner(mut self, planner: Arc<dyn PhasePlanner>) -> Self {
        self.planner = planner;
        self
    }

    /// Sets the persistence backend for phase and log writes.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    /// Sets the artifact cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ArtifactCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the event sink notified of build lifecycle events.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Builds the orchestrator and starts its worker pool.
    #[must_use]
    pub fn build(self) -> Orchestrator {
        let registry = Arc::new(CancellationRegistry::new());
        let builds = Arc::new(BuildTable::new());
        let persistence = Arc::clone(&self.persistence);

        let queue = Arc::new(JobQueue::new(
            self.config.tenant_quota,
            self.config.dequeues_per_minute,
            self.config.retry.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.persistence),
        ));

        let machine = Arc::new(LifecycleMachine::new(
            self.config.clone(),
            self.planner,
            self.persistence,
            self.cache,
            Arc::clone(&registry),
            self.sink,
            Arc::clone(&builds),
        ));

        let pool = WorkerPool::spawn(self.config.worker_count, Arc::clone(&queue), machine);
        info!(
            workers = self.config.worker_count,
            max_concurrency = self.config.max_concurrency,
            "orchestrator started"
        );

        Orchestrator {
            config: self.config,
            queue,
            registry,
            builds,
            persistence,
            pool,
        }
    }
}

/// Build orchestration service: admits specs, drives their builds through
/// the lifecycle, and answers status queries.
pub struct Orchestrator {
    config: OrchestratorConfig,
    queue: Arc<JobQueue>,
    registry: Arc<CancellationRegistry>,
    builds: Arc<BuildTable>,
    persistence: Arc<dyn Persistence>,
    pool: WorkerPool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.pool.len())
            .field("queued", &self.queue.queued_len())
            .finish()
    }
}

impl Orchestrator {
    /// Starts configuring an orchestrator.
    #[must_use]
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Validates a raw spec and admits it as a job.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidSpec`] when the payload does not parse
    /// or fails validation; [`OrchestratorError::QuotaExceeded`] when the
    /// tenant already has its quota of live jobs.
    pub fn submit(
        &self,
        raw_spec: &Value,
        tenant_key: Option<String>,
        tier: Tier,
    ) -> Result<SubmitReceipt, OrchestratorError> {
        let spec = BuildSpec::from_json(raw_spec)?;
        let job = Job::new(spec, tenant_key, tier, self.config.retry.max_attempts);
        let receipt = SubmitReceipt {
            job_id: job.id.clone(),
            build_id: job.build_id.clone(),
        };
        self.queue.submit(job)?;
        Ok(receipt)
    }

    /// Queue-level status of a job. Jobs the queue no longer tracks (for
    /// example after a retention purge) are looked up in persistence.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::JobNotFound`] for unknown ids;
    /// [`OrchestratorError::Persistence`] when the fallback read fails.
    pub fn get_job_status(&self, job_id: &str) -> Result<JobStatus, OrchestratorError> {
        match self.queue.get_status(job_id) {
            Err(OrchestratorError::JobNotFound(_)) => self
                .persistence
                .load_job(job_id)?
                .map(|job| JobStatus {
                    state: job.state,
                    attempts: job.attempts,
                    last_error: job.last_error,
                })
                .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string())),
            other => other,
        }
    }

    /// Current lifecycle phase of a build. Known only once a worker has
    /// picked the job up.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::BuildNotFound`] for builds with no record yet.
    pub fn get_build_phase(&self, build_id: &str) -> Result<BuildPhase, OrchestratorError> {
        self.builds
            .phase(build_id)
            .ok_or_else(|| OrchestratorError::BuildNotFound(build_id.to_string()))
    }

    /// Full build record including cancellation flag and artifacts.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::BuildNotFound`] for builds with no record yet.
    pub fn get_build_record(&self, build_id: &str) -> Result<BuildRecord, OrchestratorError> {
        self.builds
            .record(build_id)
            .ok_or_else(|| OrchestratorError::BuildNotFound(build_id.to_string()))
    }

    /// Requests cancellation of a build. Idempotent; the first reason wins.
    /// Steps already in flight are allowed to finish, and no further phase
    /// starts.
    pub fn request_cancellation(&self, build_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        info!(build_id = %build_id, reason = %reason, "cancellation requested");
        self.registry.request(build_id, reason);
    }

    /// Jobs parked in the dead-letter set.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<Job> {
        self.queue.dead_letters()
    }

    /// Returns a dead-lettered job to the queue with a fresh retry budget.
    ///
    /// A pending cancellation on the job's build is discarded: the job
    /// keeps its build id across resubmission, and a stale flag would fail
    /// the rerun the moment a worker picked it up.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::JobNotFound`] when the id is not dead-lettered;
    /// [`OrchestratorError::QuotaExceeded`] when re-admission fails.
    pub fn resubmit_dead_letter(&self, job_id: &str) -> Result<(), OrchestratorError> {
        if let Some(job) = self.queue.get_job(job_id) {
            self.registry.remove(&job.build_id);
        }
        self.queue.resubmit_dead_letter(job_id)
    }

    /// Drops jobs that have been terminal for longer than the configured
    /// retention window, along with their build records and any leftover
    /// cancellation flags. Returns the number of jobs purged.
    ///
    /// Purged builds remain queryable through persistence only.
    pub fn purge_terminal(&self) -> usize {
        let retention = std::time::Duration::from_secs(self.config.retention_seconds);
        let purged = self.queue.purge_terminal(retention);
        for job in &purged {
            self.builds.remove(&job.build_id);
            self.registry.remove(&job.build_id);
        }
        purged.len()
    }

    /// Number of jobs currently queued.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.queued_len()
    }

    /// Stops the worker pool. In-flight builds finish and report first.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::queue::JobState;
    use crate::scheduler::{StepPlan, StepSpec};
    use crate::testing::{artifact_step, failing_step, minimal_spec_json, slow_step, CountingStep};
    use std::time::Duration;

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_dequeues_per_minute(10_000)
            .with_retry(
                crate::config::RetryConfig::new()
                    .with_base_delay_ms(1)
                    .with_jitter(false),
            )
    }

    #[tokio::test]
    async fn test_submit_runs_build_to_complete() {
        let plan = StepPlan::new(vec![StepSpec::new("iso", artifact_step("iso", "steelos.iso"))])
            .unwrap();
        let planner =
            StaticPlanner::new().with_phase(BuildPhase::ArtifactGenerating, plan);

        let orch = Orchestrator::builder(fast_config())
            .with_planner(Arc::new(planner))
            .build();

        let receipt = orch
            .submit(&minimal_spec_json(), None, Tier::Standard)
            .unwrap();

        wait_for(|| {
            orch.get_job_status(&receipt.job_id)
                .is_ok_and(|s| s.state == JobState::Completed)
        })
        .await;

        let record = orch.get_build_record(&receipt.build_id).unwrap();
        assert_eq!(record.phase, BuildPhase::Complete);
        assert_eq!(record.artifacts.len(), 1);
        assert_eq!(record.artifacts[0].file_name, "steelos.iso");

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_spec_is_rejected_at_submit() {
        let orch = Orchestrator::builder(fast_config()).build();

        let raw = serde_json::json!({ "base": "gentoo" });
        let err = orch.submit(&raw, None, Tier::Free).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidSpec(_)));
        assert_eq!(orch.queued_len(), 0);

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_tenant_quota_is_enforced() {
        // Slow steps keep both workers busy so the tenant's jobs stay live.
        let plan = StepPlan::new(vec![StepSpec::new(
            "wait",
            slow_step(Duration::from_secs(1)),
        )])
        .unwrap();
        let planner = StaticPlanner::new().with_phase(BuildPhase::Building, plan);

        let orch = Orchestrator::builder(fast_config())
            .with_planner(Arc::new(planner))
            .build();

        let tenant = Some("acme".to_string());
        orch.submit(&minimal_spec_json(), tenant.clone(), Tier::Standard)
            .unwrap();
        orch.submit(&minimal_spec_json(), tenant.clone(), Tier::Standard)
            .unwrap();

        let err = orch
            .submit(&minimal_spec_json(), tenant, Tier::Standard)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::QuotaExceeded { .. }));

        // Another tenant is unaffected.
        orch.submit(&minimal_spec_json(), Some("globex".to_string()), Tier::Free)
            .unwrap();

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancellation_stops_later_phases() {
        let counter = CountingStep::new();
        let parse_plan = StepPlan::new(vec![StepSpec::new(
            "parse",
            slow_step(Duration::from_millis(300)),
        )])
        .unwrap();
        let build_plan =
            StepPlan::new(vec![StepSpec::new("image", counter.clone())]).unwrap();
        let planner = StaticPlanner::new()
            .with_phase(BuildPhase::Parsing, parse_plan)
            .with_phase(BuildPhase::Building, build_plan);
        let sink = Arc::new(CollectingEventSink::new());

        let orch = Orchestrator::builder(fast_config())
            .with_planner(Arc::new(planner))
            .with_sink(Arc::clone(&sink) as Arc<dyn EventSink>)
            .build();

        let receipt = orch
            .submit(&minimal_spec_json(), None, Tier::Premium)
            .unwrap();

        // Cancel while the parse step is still sleeping.
        wait_for(|| {
            orch.get_build_phase(&receipt.build_id)
                .is_ok_and(|p| p == BuildPhase::Parsing)
        })
        .await;
        orch.request_cancellation(&receipt.build_id, "user aborted");

        wait_for(|| {
            orch.get_job_status(&receipt.job_id)
                .is_ok_and(|s| s.state != JobState::Queued && s.state != JobState::Active)
        })
        .await;

        wait_for(|| {
            orch.get_build_record(&receipt.build_id)
                .is_ok_and(|r| r.cancel_requested && r.phase == BuildPhase::Failed)
        })
        .await;
        assert_eq!(counter.count(), 0);
        assert!(!sink.events_of_type("build.cancelled").is_empty());

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_dead_letter_resubmit_runs_again() {
        let plan = StepPlan::new(vec![StepSpec::new("boom", failing_step("disk full"))]).unwrap();
        let planner = StaticPlanner::new().with_phase(BuildPhase::Generating, plan);

        let orch = Orchestrator::builder(fast_config())
            .with_planner(Arc::new(planner))
            .build();

        let receipt = orch.submit(&minimal_spec_json(), None, Tier::Free).unwrap();

        wait_for(|| {
            orch.get_job_status(&receipt.job_id)
                .is_ok_and(|s| s.state == JobState::DeadLettered)
        })
        .await;

        let parked = orch.dead_letters();
        assert_eq!(parked.len(), 1);
        assert!(parked[0].last_error.as_deref().unwrap().contains("disk full"));

        orch.resubmit_dead_letter(&receipt.job_id).unwrap();

        // A fresh retry budget, back in the queue.
        wait_for(|| {
            orch.get_job_status(&receipt.job_id)
                .is_ok_and(|s| s.state != JobState::DeadLettered)
        })
        .await;

        // The plan still fails, so it lands back in the dead-letter set.
        wait_for(|| {
            orch.get_job_status(&receipt.job_id)
                .is_ok_and(|s| s.state == JobState::DeadLettered)
        })
        .await;

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_resubmitted_cancelled_build_runs_fresh() {
        let counter = CountingStep::new();
        let parse_plan = StepPlan::new(vec![StepSpec::new(
            "parse",
            slow_step(Duration::from_millis(200)),
        )])
        .unwrap();
        let build_plan =
            StepPlan::new(vec![StepSpec::new("image", counter.clone())]).unwrap();
        let planner = StaticPlanner::new()
            .with_phase(BuildPhase::Parsing, parse_plan)
            .with_phase(BuildPhase::Building, build_plan);

        let orch = Orchestrator::builder(fast_config())
            .with_planner(Arc::new(planner))
            .build();

        let receipt = orch
            .submit(&minimal_spec_json(), None, Tier::Standard)
            .unwrap();

        // Cancel mid-parse; the retries then burn out against the standing
        // cancellation flag and the job dead-letters without building.
        wait_for(|| {
            orch.get_build_phase(&receipt.build_id)
                .is_ok_and(|p| p == BuildPhase::Parsing)
        })
        .await;
        orch.request_cancellation(&receipt.build_id, "user aborted");

        wait_for(|| {
            orch.get_job_status(&receipt.job_id)
                .is_ok_and(|s| s.state == JobState::DeadLettered)
        })
        .await;
        assert_eq!(counter.count(), 0);

        // Resubmission discards the stale flag; the same build id must run
        // all the way through this time.
        orch.resubmit_dead_letter(&receipt.job_id).unwrap();

        wait_for(|| {
            orch.get_job_status(&receipt.job_id)
                .is_ok_and(|s| s.state == JobState::Completed)
        })
        .await;
        assert!(counter.count() >= 1);

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_purge_drops_terminal_records_but_keeps_persisted_status() {
        let orch = Orchestrator::builder(fast_config().with_retention_seconds(0)).build();

        let receipt = orch.submit(&minimal_spec_json(), None, Tier::Free).unwrap();
        wait_for(|| {
            orch.get_job_status(&receipt.job_id)
                .is_ok_and(|s| s.state == JobState::Completed)
        })
        .await;

        assert_eq!(orch.purge_terminal(), 1);

        // The live build record is gone; job status still answers from
        // persistence.
        assert!(matches!(
            orch.get_build_phase(&receipt.build_id),
            Err(OrchestratorError::BuildNotFound(_))
        ));
        let status = orch.get_job_status(&receipt.job_id).unwrap();
        assert_eq!(status.state, JobState::Completed);

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_fallback_surfaces_persistence_failure() {
        let mut mock = crate::ports::MockPersistence::new();
        mock.expect_load_job()
            .returning(|_| Err(crate::ports::PersistenceError::new("backend down")));

        let orch = Orchestrator::builder(fast_config())
            .with_persistence(Arc::new(mock))
            .build();

        let err = orch.get_job_status("gone").unwrap_err();
        assert!(matches!(err, OrchestratorError::Persistence(_)));

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_ids_return_not_found() {
        let orch = Orchestrator::builder(fast_config()).build();

        assert!(matches!(
            orch.get_job_status("nope"),
            Err(OrchestratorError::JobNotFound(_))
        ));
        assert!(matches!(
            orch.get_build_phase("nope"),
            Err(OrchestratorError::BuildNotFound(_))
        ));

        orch.shutdown().await;
    }
}
