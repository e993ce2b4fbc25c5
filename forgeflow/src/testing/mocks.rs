//! Mock steps and collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ArtifactRef;
use crate::errors::StepError;
use crate::lifecycle::BuildPhase;
use crate::ports::{Persistence, PersistenceError};
use crate::queue::Job;
use crate::scheduler::{BuildStep, FnStep, StepContext};

/// A step that succeeds immediately.
#[must_use]
pub fn noop_step() -> Arc<dyn BuildStep> {
    Arc::new(FnStep::new("noop", |_ctx| async { Ok(()) }))
}

/// A step that fails with the given message.
#[must_use]
pub fn failing_step(message: &str) -> Arc<dyn BuildStep> {
    let message = message.to_string();
    Arc::new(FnStep::new("failing", move |_ctx| {
        let message = message.clone();
        async move { Err(StepError::new(message)) }
    }))
}

/// A step that sleeps before succeeding.
#[must_use]
pub fn slow_step(delay: Duration) -> Arc<dyn BuildStep> {
    Arc::new(FnStep::new("slow", move |_ctx| async move {
        tokio::time::sleep(delay).await;
        Ok(())
    }))
}

/// A step that records an artifact of the given type.
#[must_use]
pub fn artifact_step(file_type: &str, file_name: &str) -> Arc<dyn BuildStep> {
    let file_type = file_type.to_string();
    let file_name = file_name.to_string();
    Arc::new(FnStep::new("artifact", move |ctx: StepContext| {
        let artifact = ArtifactRef::new(
            file_type.clone(),
            file_name.clone(),
            format!("file:///artifacts/{file_name}"),
        );
        async move {
            ctx.record_artifact(artifact);
            Ok(())
        }
    }))
}

/// A step counting its executions.
#[derive(Debug, Default)]
pub struct CountingStep {
    count: AtomicUsize,
}

impl CountingStep {
    /// Creates a step with a zeroed counter.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of times the step ran.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildStep for CountingStep {
    async fn execute(&self, _ctx: &StepContext) -> Result<(), StepError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Persistence that can be switched into a failing mode, for verifying
/// that write failures never abort the state machine.
#[derive(Debug, Default)]
pub struct FlakyPersistence {
    failing: AtomicBool,
    phases: Mutex<Vec<(String, BuildPhase)>>,
}

impl FlakyPersistence {
    /// Creates a backend in working mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail.
    pub fn start_failing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Phase transitions recorded while in working mode.
    #[must_use]
    pub fn recorded_phases(&self) -> Vec<(String, BuildPhase)> {
        self.phases.lock().clone()
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PersistenceError::new("backend unavailable"))
        } else {
            Ok(())
        }
    }
}

impl Persistence for FlakyPersistence {
    fn save_build_phase(&self, build_id: &str, phase: BuildPhase) -> Result<(), PersistenceError> {
        self.check()?;
        self.phases.lock().push((build_id.to_string(), phase));
        Ok(())
    }

    fn append_log(&self, _build_id: &str, _message: &str) -> Result<(), PersistenceError> {
        self.check()
    }

    fn load_job(&self, _job_id: &str) -> Result<Option<Job>, PersistenceError> {
        self.check()?;
        Ok(None)
    }

    fn save_job_state(&self, _job: &Job) -> Result<(), PersistenceError> {
        self.check()
    }
}
