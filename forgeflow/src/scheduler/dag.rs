//! Dependency-DAG step scheduler.
//!
//! Runs ready steps up to a concurrency bound, heavier steps first, until
//! every step terminates or no progress is possible. The scheduler holds no
//! lock across a running step: launched steps are independent tokio tasks,
//! and the tick loop only re-synchronizes when one finishes.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::step::{StepContext, StepPlan, StepResult, StepSpec, StepStatus};
use crate::errors::OrchestratorError;
use crate::events::EventSink;

/// How a DAG execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DagOutcome {
    /// Every step completed.
    Completed,
    /// One or more steps failed; everything else still terminated.
    StepsFailed {
        /// Ids of the failed steps.
        failed: Vec<String>,
    },
    /// No step was ready, none running, at least one still pending.
    ///
    /// Indicates a cyclic or unsatisfiable graph, or steps stranded behind
    /// a failed dependency. A construction defect, not a runtime fault.
    Deadlocked {
        /// Ids of the steps that can never become ready.
        pending: Vec<String>,
        /// Ids of steps that failed and stranded the pending ones, if any.
        failed: Vec<String>,
    },
    /// Cancellation was observed; no further steps were started.
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
}

/// Result of executing a step plan.
#[derive(Debug)]
pub struct DagExecutionResult {
    /// True iff every step ended completed.
    pub success: bool,
    /// Wall-clock duration of the whole execution.
    pub total_duration: Duration,
    /// Per-step terminal records, keyed by step id.
    pub steps: HashMap<String, StepResult>,
    /// How the execution ended.
    pub outcome: DagOutcome,
}

impl DagExecutionResult {
    /// Maps a non-successful outcome onto the orchestrator error taxonomy.
    ///
    /// Step failures become [`OrchestratorError::StepFailed`] (keyed by the
    /// first failed step, with every failure detailed in the message), a
    /// graph that stalled with nothing failed becomes
    /// [`OrchestratorError::Deadlock`], and a cancelled run becomes
    /// [`OrchestratorError::Cancelled`].
    #[must_use]
    pub fn as_error(&self) -> Option<OrchestratorError> {
        match &self.outcome {
            DagOutcome::Completed => None,
            DagOutcome::StepsFailed { failed } => Some(OrchestratorError::StepFailed {
                step: failed.first().cloned().unwrap_or_default(),
                message: self.failed_step_detail(failed),
            }),
            DagOutcome::Deadlocked { pending, failed } => {
                if failed.is_empty() {
                    Some(OrchestratorError::Deadlock {
                        pending: pending.clone(),
                    })
                } else {
                    Some(OrchestratorError::StepFailed {
                        step: failed.first().cloned().unwrap_or_default(),
                        message: format!(
                            "{}; left {pending:?} unreachable",
                            self.failed_step_detail(failed)
                        ),
                    })
                }
            }
            DagOutcome::Cancelled { reason } => {
                Some(OrchestratorError::Cancelled(reason.clone()))
            }
        }
    }

    /// Human-readable failure reason, if the execution did not succeed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        self.as_error().map(|e| e.reason())
    }

    fn failed_step_detail(&self, failed: &[String]) -> String {
        failed
            .iter()
            .map(|id| {
                let msg = self
                    .steps
                    .get(id)
                    .and_then(|r| r.error.clone())
                    .unwrap_or_default();
                format!("'{id}': {msg}")
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Executes step plans with bounded concurrency.
pub struct DagScheduler {
    max_concurrency: usize,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for DagScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagScheduler")
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl DagScheduler {
    /// Creates a scheduler with the given concurrency bound (min 1).
    #[must_use]
    pub fn new(max_concurrency: usize, sink: Arc<dyn EventSink>) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            sink,
        }
    }

    /// Runs the plan to termination.
    ///
    /// An empty plan succeeds trivially. Cancellation is checked before
    /// each scheduling tick; once observed, no further steps start and
    /// in-flight steps are drained to completion.
    pub async fn execute(&self, plan: &StepPlan, ctx: &StepContext) -> DagExecutionResult {
        let start = Instant::now();

        let mut statuses: HashMap<String, StepStatus> = plan
            .steps()
            .iter()
            .map(|s| (s.id.clone(), StepStatus::Pending))
            .collect();
        let mut results: HashMap<String, StepResult> = HashMap::new();
        let mut in_flight: FuturesUnordered<_> = FuturesUnordered::new();
        let mut running = 0usize;

        loop {
            if ctx.is_cancelled() {
                let reason = ctx
                    .cancel
                    .reason()
                    .unwrap_or_else(|| "cancellation requested".to_string());
                warn!(build_id = %ctx.build_id, reason = %reason, "cancellation observed; draining in-flight steps");

                // Already-running steps are allowed to finish; nothing
                // new starts.
                while let Some(finished) = in_flight.next().await {
                    self.settle(finished, &mut statuses, &mut results);
                }
                return self.finish(
                    start,
                    plan,
                    statuses,
                    results,
                    Some(DagOutcome::Cancelled { reason }),
                );
            }

            // Ready: pending with every dependency completed. Heavier
            // steps first to pack the concurrency window.
            let mut ready: Vec<&StepSpec> = plan
                .steps()
                .iter()
                .filter(|s| statuses.get(&s.id) == Some(&StepStatus::Pending))
                .filter(|s| {
                    s.dependencies
                        .iter()
                        .all(|d| statuses.get(d) == Some(&StepStatus::Completed))
                })
                .collect();
            ready.sort_by(|a, b| b.weight.cmp(&a.weight));

            let capacity = self.max_concurrency.saturating_sub(running);
            for spec in ready.into_iter().take(capacity) {
                statuses.insert(spec.id.clone(), StepStatus::Running);
                running += 1;
                in_flight.push(self.launch(spec, ctx));
            }

            if running == 0 {
                // Either everything terminated, or the remaining pending
                // steps can never become ready (cycle or stranded behind
                // a failure). `finish` reads the statuses and reports
                // which.
                return self.finish(start, plan, statuses, results, None);
            }

            if let Some(finished) = in_flight.next().await {
                running -= 1;
                self.settle(finished, &mut statuses, &mut results);
            }
        }
    }

    /// Spawns one step as an independent task.
    fn launch(
        &self,
        spec: &StepSpec,
        ctx: &StepContext,
    ) -> impl std::future::Future<Output = (InFlightDone, DateTime<Utc>)> {
        let id = spec.id.clone();
        let runner = Arc::clone(&spec.runner);
        let step_ctx = ctx.clone();
        let started_at = Utc::now();

        debug!(build_id = %ctx.build_id, step = %id, weight = spec.weight, "step started");
        self.sink
            .try_emit("step.started", Some(serde_json::json!({ "step": &id })));

        let handle = tokio::spawn(async move {
            let step_start = Instant::now();
            let outcome = runner.execute(&step_ctx).await;
            (outcome, step_start.elapsed())
        });

        async move {
            let done = match handle.await {
                Ok((outcome, duration)) => InFlightDone {
                    id,
                    outcome,
                    duration,
                },
                Err(join_err) => InFlightDone {
                    id,
                    outcome: Err(crate::errors::StepError::new(format!(
                        "step task panicked: {join_err}"
                    ))),
                    duration: Duration::ZERO,
                },
            };
            (done, started_at)
        }
    }

    fn settle(
        &self,
        (done, started_at): (InFlightDone, DateTime<Utc>),
        statuses: &mut HashMap<String, StepStatus>,
        results: &mut HashMap<String, StepResult>,
    ) {
        let (status, error) = match done.outcome {
            Ok(()) => (StepStatus::Completed, None),
            Err(e) => (StepStatus::Failed, Some(e.message)),
        };

        match status {
            StepStatus::Completed => {
                debug!(step = %done.id, duration_ms = done.duration.as_millis() as u64, "step completed");
                self.sink.try_emit(
                    "step.completed",
                    Some(serde_json::json!({
                        "step": done.id,
                        "durationMs": done.duration.as_millis() as u64,
                    })),
                );
            }
            _ => {
                warn!(step = %done.id, error = ?error, "step failed");
                self.sink.try_emit(
                    "step.failed",
                    Some(serde_json::json!({ "step": done.id, "error": error })),
                );
            }
        }

        statuses.insert(done.id.clone(), status);
        results.insert(
            done.id.clone(),
            StepResult {
                id: done.id,
                status,
                started_at: Some(started_at),
                duration: Some(done.duration),
                error,
            },
        );
    }

    /// Assembles the final result once the tick loop stops.
    fn finish(
        &self,
        start: Instant,
        plan: &StepPlan,
        statuses: HashMap<String, StepStatus>,
        mut results: HashMap<String, StepResult>,
        forced: Option<DagOutcome>,
    ) -> DagExecutionResult {
        for spec in plan.steps() {
            results
                .entry(spec.id.clone())
                .or_insert_with(|| StepResult::pending(&spec.id));
        }

        let mut failed: Vec<String> = plan
            .steps()
            .iter()
            .filter(|s| statuses.get(&s.id) == Some(&StepStatus::Failed))
            .map(|s| s.id.clone())
            .collect();
        failed.sort();
        let mut pending: Vec<String> = plan
            .steps()
            .iter()
            .filter(|s| statuses.get(&s.id) == Some(&StepStatus::Pending))
            .map(|s| s.id.clone())
            .collect();
        pending.sort();

        let outcome = forced.unwrap_or_else(|| {
            if !pending.is_empty() {
                error!(pending = ?pending, failed = ?failed, "step graph deadlocked");
                self.sink.try_emit(
                    "scheduler.deadlock",
                    Some(serde_json::json!({ "pending": pending, "failed": failed })),
                );
                DagOutcome::Deadlocked {
                    pending: pending.clone(),
                    failed: failed.clone(),
                }
            } else if failed.is_empty() {
                DagOutcome::Completed
            } else {
                DagOutcome::StepsFailed {
                    failed: failed.clone(),
                }
            }
        });

        DagExecutionResult {
            success: outcome == DagOutcome::Completed,
            total_duration: start.elapsed(),
            steps: results,
            outcome,
        }
    }
}

struct InFlightDone {
    id: String,
    outcome: Result<(), crate::errors::StepError>,
    duration: Duration,
}
