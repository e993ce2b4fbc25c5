//! Priority job queue with tiered admission, retry, and dead-lettering.

use parking_lot::Mutex;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::job::{Job, JobState, JobStatus};
use super::rate_limit::DequeueRateLimiter;
use crate::config::RetryConfig;
use crate::errors::OrchestratorError;
use crate::events::EventSink;
use crate::ports::Persistence;

/// Heap entry ordering dequeues: lowest priority value first, FIFO within
/// a priority via the monotonic sequence number.
#[derive(Debug, PartialEq, Eq)]
struct QueuedEntry {
    priority: u8,
    seq: u64,
    job_id: String,
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest
        // (priority, seq) pair surfaces first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedEntry>,
    jobs: HashMap<String, Job>,
    next_seq: u64,
}

/// The job queue: admits, prioritizes, dispatches, retries, and
/// dead-letters build jobs.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    limiter: DequeueRateLimiter,
    tenant_quota: usize,
    retry: RetryConfig,
    sink: Arc<dyn EventSink>,
    persistence: Arc<dyn Persistence>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("JobQueue")
            .field("queued", &inner.heap.len())
            .field("known_jobs", &inner.jobs.len())
            .field("tenant_quota", &self.tenant_quota)
            .finish()
    }
}

impl JobQueue {
    /// Creates a queue with the given admission and retry policy.
    #[must_use]
    pub fn new(
        tenant_quota: usize,
        dequeues_per_minute: u32,
        retry: RetryConfig,
        sink: Arc<dyn EventSink>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            limiter: DequeueRateLimiter::new(dequeues_per_minute),
            tenant_quota,
            retry,
            sink,
            persistence,
        }
    }

    /// Admits a job, or rejects it when the tenant is over quota.
    ///
    /// Quota is counted against live queue state at submission time:
    /// the tenant's jobs in `Queued` or `Active`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::QuotaExceeded`] when admission fails.
    pub fn submit(&self, job: Job) -> Result<(), OrchestratorError> {
        // The persistence write happens after the lock is released; the
        // backend must never stall dequeue or result reporting.
        let snapshot = {
            let mut inner = self.inner.lock();

            if let Some(tenant) = &job.tenant_key {
                let in_flight = inner
                    .jobs
                    .values()
                    .filter(|j| j.tenant_key.as_deref() == Some(tenant))
                    .filter(|j| matches!(j.state, JobState::Queued | JobState::Active))
                    .count();
                if in_flight >= self.tenant_quota {
                    return Err(OrchestratorError::QuotaExceeded {
                        tenant: tenant.clone(),
                        limit: self.tenant_quota,
                    });
                }
            }

            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(QueuedEntry {
                priority: job.priority,
                seq,
                job_id: job.id.clone(),
            });

            let snapshot = job.clone();
            inner.jobs.insert(job.id.clone(), job);
            snapshot
        };

        info!(job_id = %snapshot.id, tier = %snapshot.tier, priority = snapshot.priority, "job admitted");
        self.save_job_state(&snapshot);
        self.sink.try_emit("job.submitted", None);
        self.notify.notify_one();
        Ok(())
    }

    /// Pulls the highest-priority ready job, blocking while the queue is
    /// empty. Dispatch is throttled by the queue-wide rate limiter.
    pub async fn dequeue(&self) -> Job {
        loop {
            let notified = self.notify.notified();

            if self.has_queued() {
                self.limiter.acquire().await;
                if let Some(job) = self.try_activate_next() {
                    return job;
                }
                // Another worker activated the candidate first; hand the
                // permit back so the lost race does not count against the
                // dispatch rate.
                self.limiter.release();
                continue;
            }

            notified.await;
        }
    }

    /// Records a worker's terminal report for a job.
    ///
    /// Success completes the job. Failure either schedules a retry after
    /// exponential backoff (on a spawned timer, never a worker slot) or
    /// dead-letters the job once attempts are exhausted.
    pub fn report_result(self: &Arc<Self>, job_id: &str, result: Result<(), String>) {
        let mut inner = self.inner.lock();
        let Some(job) = inner.jobs.get_mut(job_id) else {
            warn!(job_id, "result reported for unknown job");
            return;
        };

        match result {
            Ok(()) => {
                job.state = JobState::Completed;
                job.last_error = None;
                job.finished_at = Some(chrono::Utc::now());
                info!(job_id, "job completed");
                let snapshot = job.clone();
                drop(inner);
                self.save_job_state(&snapshot);
                self.sink.try_emit("job.completed", None);
            }
            Err(reason) => {
                job.attempts += 1;
                job.last_error = Some(reason.clone());

                if job.is_exhausted() {
                    job.state = JobState::DeadLettered;
                    job.finished_at = Some(chrono::Utc::now());
                    warn!(job_id, attempts = job.attempts, reason = %reason, "job dead-lettered");
                    let snapshot = job.clone();
                    drop(inner);
                    self.save_job_state(&snapshot);
                    self.sink.try_emit(
                        "job.dead_lettered",
                        Some(serde_json::json!({ "jobId": job_id, "reason": reason })),
                    );
                } else {
                    job.state = JobState::Failed;
                    let attempts = job.attempts;
                    let backoff = self.retry.backoff_for_attempt(attempts);
                    let snapshot = job.clone();
                    drop(inner);
                    self.save_job_state(&snapshot);

                    debug!(job_id, attempts, backoff_ms = backoff.as_millis() as u64, "retry scheduled");
                    self.sink.try_emit(
                        "job.retry_scheduled",
                        Some(serde_json::json!({
                            "jobId": job_id,
                            "attempts": attempts,
                            "backoffMs": backoff.as_millis() as u64,
                        })),
                    );

                    let queue = Arc::clone(self);
                    let job_id = job_id.to_string();
                    tokio::spawn(async move {
                        tokio::time::sleep(backoff).await;
                        queue.requeue(&job_id);
                    });
                }
            }
        }
    }

    /// Current state and attempt count for a job.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::JobNotFound`] for unknown ids.
    pub fn get_status(&self, job_id: &str) -> Result<JobStatus, OrchestratorError> {
        let inner = self.inner.lock();
        inner
            .jobs
            .get(job_id)
            .map(|job| JobStatus {
                state: job.state,
                attempts: job.attempts,
                last_error: job.last_error.clone(),
            })
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// A snapshot of a known job.
    #[must_use]
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.inner.lock().jobs.get(job_id).cloned()
    }

    /// All jobs currently dead-lettered, for inspection.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<Job> {
        self.inner
            .lock()
            .jobs
            .values()
            .filter(|j| j.state == JobState::DeadLettered)
            .cloned()
            .collect()
    }

    /// Manually resubmits a dead-lettered job with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::JobNotFound`] when the id is unknown
    /// or the job is not dead-lettered, and
    /// [`OrchestratorError::QuotaExceeded`] when the tenant is over quota.
    pub fn resubmit_dead_letter(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let mut job = self
            .get_job(job_id)
            .filter(|j| j.state == JobState::DeadLettered)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        job.attempts = 0;
        job.state = JobState::Queued;
        job.finished_at = None;
        self.inner.lock().jobs.remove(job_id);
        self.submit(job)
    }

    /// Drops terminal jobs (completed or dead-lettered) that finished at
    /// least `older_than` ago, returning the removed jobs so callers can
    /// release any per-build bookkeeping.
    pub fn purge_terminal(&self, older_than: Duration) -> Vec<Job> {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age))
        else {
            return Vec::new();
        };
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .jobs
            .values()
            .filter(|j| j.state.is_terminal())
            .filter(|j| j.finished_at.is_some_and(|at| at <= cutoff))
            .map(|j| j.id.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(job) = inner.jobs.remove(&id) {
                removed.push(job);
            }
        }
        drop(inner);

        if !removed.is_empty() {
            info!(purged = removed.len(), "terminal jobs purged");
        }
        removed
    }

    /// Number of jobs waiting in the queue.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::Queued)
            .count()
    }

    fn has_queued(&self) -> bool {
        self.queued_len() > 0
    }

    /// Pops heap entries until one still refers to a queued job, and
    /// activates it. Stale entries (retried jobs re-pushed with a new
    /// sequence number) are discarded.
    fn try_activate_next(&self) -> Option<Job> {
        let mut inner = self.inner.lock();

        while let Some(entry) = inner.heap.pop() {
            let activated = match inner.jobs.get_mut(&entry.job_id) {
                Some(job) if job.state == JobState::Queued => {
                    job.state = JobState::Active;
                    Some(job.clone())
                }
                _ => None,
            };

            if let Some(job) = activated {
                if !inner.heap.is_empty() {
                    self.notify.notify_one();
                }
                drop(inner);
                debug!(job_id = %job.id, "job dispatched");
                self.save_job_state(&job);
                return Some(job);
            }
        }

        None
    }

    /// Returns a failed job to the queue after its backoff elapsed.
    fn requeue(&self, job_id: &str) {
        {
            let mut inner = self.inner.lock();
            let Some(job) = inner.jobs.get_mut(job_id) else {
                return;
            };
            if job.state != JobState::Failed {
                return;
            }
            job.state = JobState::Queued;
            let priority = job.priority;
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(QueuedEntry {
                priority,
                seq,
                job_id: job_id.to_string(),
            });
        }

        debug!(job_id, "job requeued after backoff");
        self.notify.notify_one();
    }

    /// Persistence writes are surfaced but never fatal to queue state.
    fn save_job_state(&self, job: &Job) {
        if let Err(e) = self.persistence.save_job_state(job) {
            warn!(job_id = %job.id, error = %e, "failed to persist job state");
        }
    }
}
