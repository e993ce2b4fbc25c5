//! The lifecycle state machine driving one build through its phases.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::phase::{BuildPhase, BuildRecord};
use super::planner::PhasePlanner;
use crate::cache::{ArtifactCache, ArtifactRef};
use crate::cancellation::CancellationRegistry;
use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::events::{BuildNotification, BuildStatus, EventSink};
use crate::ports::Persistence;
use crate::queue::Job;
use crate::scheduler::{DagScheduler, StepContext};

/// Live lifecycle records, readable by the query surface while the
/// machine mutates them.
#[derive(Debug, Default)]
pub struct BuildTable {
    records: DashMap<String, BuildRecord>,
}

impl BuildTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase of a build, if known.
    #[must_use]
    pub fn phase(&self, build_id: &str) -> Option<BuildPhase> {
        self.records.get(build_id).map(|r| r.phase)
    }

    /// Snapshot of a build's record, if known.
    #[must_use]
    pub fn record(&self, build_id: &str) -> Option<BuildRecord> {
        self.records.get(build_id).map(|r| r.clone())
    }

    /// Removes a build's record, returning whether one existed.
    pub fn remove(&self, build_id: &str) -> bool {
        self.records.remove(build_id).is_some()
    }

    fn insert(&self, record: BuildRecord) {
        self.records.insert(record.build_id.clone(), record);
    }

    fn update(&self, build_id: &str, f: impl FnOnce(&mut BuildRecord)) {
        if let Some(mut record) = self.records.get_mut(build_id) {
            f(&mut record);
        }
    }
}

/// Terminal result of running one build, handed back to the queue for
/// its retry decision.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// The build that ran.
    pub build_id: String,
    /// Terminal status.
    pub status: BuildStatus,
    /// Artifacts produced (or reused from cache).
    pub artifacts: Vec<ArtifactRef>,
    /// Failure or cancellation reason.
    pub reason: Option<String>,
}

impl BuildOutcome {
    /// Converts to the queue's result form: `Ok` on success, the reason
    /// string otherwise.
    #[must_use]
    pub fn as_queue_result(&self) -> Result<(), String> {
        match self.status {
            BuildStatus::Success => Ok(()),
            _ => Err(self
                .reason
                .clone()
                .unwrap_or_else(|| "build failed".to_string())),
        }
    }
}

/// Drives one build through its ordered phases, invoking the DAG
/// scheduler for each phase's unit of work.
pub struct LifecycleMachine {
    config: OrchestratorConfig,
    scheduler: DagScheduler,
    planner: Arc<dyn PhasePlanner>,
    persistence: Arc<dyn Persistence>,
    cache: Arc<dyn ArtifactCache>,
    registry: Arc<CancellationRegistry>,
    sink: Arc<dyn EventSink>,
    builds: Arc<BuildTable>,
}

impl std::fmt::Debug for LifecycleMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleMachine")
            .field("max_concurrency", &self.config.max_concurrency)
            .finish()
    }
}

impl LifecycleMachine {
    /// Creates a machine over the shared collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        planner: Arc<dyn PhasePlanner>,
        persistence: Arc<dyn Persistence>,
        cache: Arc<dyn ArtifactCache>,
        registry: Arc<CancellationRegistry>,
        sink: Arc<dyn EventSink>,
        builds: Arc<BuildTable>,
    ) -> Self {
        let scheduler = DagScheduler::new(config.max_concurrency, Arc::clone(&sink));
        Self {
            config,
            scheduler,
            planner,
            persistence,
            cache,
            registry,
            sink,
            builds,
        }
    }

    /// Runs a job's build to a terminal state. Never panics out of the
    /// phase loop; every path produces an outcome for the queue.
    pub async fn run(&self, job: &Job) -> BuildOutcome {
        let build_id = job.build_id.clone();
        let cancel = self.registry.handle(&build_id);

        self.builds.insert(BuildRecord::new(&build_id));
        self.persist_phase(&build_id, BuildPhase::Pending);
        info!(build_id = %build_id, job_id = %job.id, tier = %job.tier, "build started");

        let ctx = StepContext::new(
            &build_id,
            Arc::new(job.spec.clone()),
            Arc::clone(&cancel),
            self.config.timeout_for_tier(job.tier),
        );
        let spec_hash = job.spec.canonical_hash();

        let work = BuildPhase::work_sequence();
        let mut current = BuildPhase::Pending;
        let mut from_cache = false;
        let mut idx = 0;

        while idx < work.len() {
            let phase = work[idx];

            if cancel.is_cancelled() {
                let reason = cancel
                    .reason()
                    .unwrap_or_else(|| "cancellation requested".to_string());
                return self.fail(&build_id, &OrchestratorError::Cancelled(reason), &ctx);
            }

            // The only fast path: a fresh cache hit skips the build-heavy
            // phases and jumps straight to uploading.
            if phase == BuildPhase::Building {
                if let Some(artifacts) = self.cache.lookup(&spec_hash).await {
                    info!(build_id = %build_id, "artifact cache hit; skipping building phases");
                    self.append_log(
                        &build_id,
                        "artifact cache hit; skipping building and artifact-generating",
                    );
                    for artifact in artifacts {
                        ctx.record_artifact(artifact);
                    }
                    from_cache = true;
                    idx = work
                        .iter()
                        .position(|p| *p == BuildPhase::Uploading)
                        .unwrap_or(work.len() - 1);
                    continue;
                }
            }

            current = self.advance(&build_id, current, phase);

            let plan = match self.planner.plan(phase, &job.spec) {
                Ok(plan) => plan,
                Err(e) => return self.fail(&build_id, &e, &ctx),
            };

            let result = self.scheduler.execute(&plan, &ctx).await;
            if let Some(err) = result.as_error() {
                return self.fail(&build_id, &err, &ctx);
            }

            idx += 1;
        }

        let artifacts = ctx.artifacts();
        if !from_cache && !artifacts.is_empty() {
            self.cache
                .store(
                    &spec_hash,
                    artifacts.clone(),
                    Duration::from_secs(self.config.cache_ttl_seconds),
                )
                .await;
        }

        self.advance(&build_id, current, BuildPhase::Complete);
        self.builds.update(&build_id, |r| {
            r.artifacts = artifacts.clone();
        });
        self.registry.remove(&build_id);

        info!(build_id = %build_id, artifact_count = artifacts.len(), "build complete");
        let notification = BuildNotification::success(&build_id, artifacts.clone());
        self.notify(&notification);

        BuildOutcome {
            build_id,
            status: BuildStatus::Success,
            artifacts,
            reason: None,
        }
    }

    /// Moves the build forward one phase, persisting the transition.
    fn advance(&self, build_id: &str, from: BuildPhase, to: BuildPhase) -> BuildPhase {
        debug_assert!(from.can_advance_to(to), "illegal transition {from} -> {to}");

        self.builds.update(build_id, |r| r.phase = to);
        self.persist_phase(build_id, to);
        self.append_log(build_id, &format!("entering phase {to}"));
        self.sink.try_emit(
            "build.phase",
            Some(serde_json::json!({ "buildId": build_id, "phase": to.to_string() })),
        );
        to
    }

    /// Terminal failure path. Cancellation is derived from the error so
    /// every caller reports through the same taxonomy.
    fn fail(&self, build_id: &str, err: &OrchestratorError, ctx: &StepContext) -> BuildOutcome {
        let cancelled = err.is_cancellation();
        let reason = err.reason();
        self.builds.update(build_id, |r| {
            r.phase = BuildPhase::Failed;
            r.cancel_requested = cancelled;
        });
        self.persist_phase(build_id, BuildPhase::Failed);
        self.append_log(build_id, &format!("build failed: {reason}"));
        warn!(build_id, cancelled, reason = %reason, "build failed");

        // Best-effort workspace cleanup would hook here; nothing to roll
        // back in earlier phases.

        let (status, notification) = if cancelled {
            (
                BuildStatus::Cancelled,
                BuildNotification::cancelled(build_id, reason.clone()),
            )
        } else {
            self.registry.remove(build_id);
            (
                BuildStatus::Failed,
                BuildNotification::failed(build_id, reason.clone()),
            )
        };
        self.notify(&notification);

        BuildOutcome {
            build_id: build_id.to_string(),
            status,
            artifacts: ctx.artifacts(),
            reason: Some(reason),
        }
    }

    /// Persistence writes are surfaced in the log but never abort the
    /// in-memory state machine.
    fn persist_phase(&self, build_id: &str, phase: BuildPhase) {
        if let Err(e) = self.persistence.save_build_phase(build_id, phase) {
            warn!(build_id, %phase, error = %e, "failed to persist build phase");
        }
    }

    fn append_log(&self, build_id: &str, message: &str) {
        if let Err(e) = self.persistence.append_log(build_id, message) {
            warn!(build_id, error = %e, "failed to persist build log");
        }
    }

    fn notify(&self, notification: &BuildNotification) {
        let event_type = match notification.status {
            BuildStatus::Success => "build.completed",
            BuildStatus::Failed => "build.failed",
            BuildStatus::Cancelled => "build.cancelled",
        };
        let payload = serde_json::to_value(notification).ok();
        self.sink.try_emit(event_type, payload);
    }
}
