//! Fixed-size worker pool wiring the job queue to the lifecycle machine.
//!
//! Each worker pulls one job, runs its build to completion, and always
//! reports a terminal result back to the queue. A build that panics still
//! reports failure; a job is never left perpetually active.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::errors::OrchestratorError;
use crate::lifecycle::LifecycleMachine;
use crate::queue::{Job, JobQueue};

/// A pool of workers draining the job queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawns `count` workers over the shared queue and machine.
    #[must_use]
    pub fn spawn(count: usize, queue: Arc<JobQueue>, machine: Arc<LifecycleMachine>) -> Self {
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let shutdown_notify = Arc::new(Notify::new());

        let handles = (0..count.max(1))
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let machine = Arc::clone(&machine);
                let flag = Arc::clone(&shutdown_flag);
                let notify = Arc::clone(&shutdown_notify);

                tokio::spawn(async move {
                    debug!(worker_id, "worker started");
                    while !flag.load(Ordering::SeqCst) {
                        tokio::select! {
                            biased;
                            () = notify.notified() => break,
                            job = queue.dequeue() => {
                                Self::run_one(worker_id, &queue, &machine, job).await;
                            }
                        }
                    }
                    debug!(worker_id, "worker stopped");
                })
            })
            .collect();

        Self {
            handles,
            shutdown_flag,
            shutdown_notify,
        }
    }

    /// Runs one job and reports its terminal result. The lifecycle run is
    /// its own task so a panicking step implementation surfaces as a job
    /// failure instead of killing the worker.
    async fn run_one(
        worker_id: usize,
        queue: &Arc<JobQueue>,
        machine: &Arc<LifecycleMachine>,
        job: Job,
    ) {
        debug!(worker_id, job_id = %job.id, build_id = %job.build_id, "worker picked up job");

        let run = {
            let machine = Arc::clone(machine);
            let job = job.clone();
            tokio::spawn(async move { machine.run(&job).await })
        };

        let result = match run.await {
            Ok(outcome) => outcome.as_queue_result(),
            Err(join_err) => {
                error!(worker_id, job_id = %job.id, error = %join_err, "build task aborted");
                Err(OrchestratorError::Internal(format!("build task aborted: {join_err}")).reason())
            }
        };

        queue.report_result(&job.id, result);
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stops all workers. Idle workers exit immediately; a worker running
    /// a build finishes and reports it first.
    pub async fn shutdown(self) {
        info!(workers = self.handles.len(), "worker pool shutting down");
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();

        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
