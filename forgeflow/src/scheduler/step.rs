//! Step model: nodes in a build's execution DAG.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ArtifactRef;
use crate::cancellation::CancelHandle;
use crate::errors::{OrchestratorError, StepError};
use crate::spec::BuildSpec;

/// Execution status of a step.
///
/// A step never re-enters `Pending` after leaving it; retry happens at the
/// job level, not within one DAG execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for dependencies.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal record for one step within a DAG execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step id.
    pub id: String,
    /// Final status.
    pub status: StepStatus,
    /// When the step began running, if it ran.
    pub started_at: Option<DateTime<Utc>>,
    /// How long the step ran, if it ran.
    pub duration: Option<Duration>,
    /// Failure message; present iff the step failed.
    pub error: Option<String>,
}

impl StepResult {
    /// A result for a step that never left pending.
    #[must_use]
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::Pending,
            started_at: None,
            duration: None,
            error: None,
        }
    }
}

/// Execution context handed to step implementations.
///
/// Carries the cancellation handle so a step driving a subprocess can kill
/// it on cancellation; the scheduler itself never force-kills a step.
#[derive(Clone)]
pub struct StepContext {
    /// Build this step belongs to.
    pub build_id: String,
    /// The spec being built.
    pub spec: Arc<BuildSpec>,
    /// Cooperative cancellation latch.
    pub cancel: Arc<CancelHandle>,
    /// Wall-clock budget hint for the whole build, by tier.
    pub timeout_hint: Duration,
    artifacts: Arc<Mutex<Vec<ArtifactRef>>>,
}

impl Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("build_id", &self.build_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl StepContext {
    /// Creates a context for one build.
    #[must_use]
    pub fn new(
        build_id: impl Into<String>,
        spec: Arc<BuildSpec>,
        cancel: Arc<CancelHandle>,
        timeout_hint: Duration,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            spec,
            cancel,
            timeout_hint,
            artifacts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns true if the build has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Records an artifact produced by this step.
    pub fn record_artifact(&self, artifact: ArtifactRef) {
        self.artifacts.lock().push(artifact);
    }

    /// Artifacts recorded so far across all steps sharing this context.
    #[must_use]
    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        self.artifacts.lock().clone()
    }
}

/// A concrete unit of build work (package resolution, Dockerfile
/// generation, ISO assembly, ...).
///
/// The scheduler only inspects success or failure and duration, never the
/// step's internal behavior.
#[async_trait]
pub trait BuildStep: Send + Sync + Debug {
    /// Executes the step.
    async fn execute(&self, ctx: &StepContext) -> Result<(), StepError>;
}

/// An async-closure-backed step, convenient for wiring and tests.
pub struct FnStep<F> {
    name: String,
    func: F,
}

impl<F, Fut> FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StepError>> + Send,
{
    /// Creates a step from an async closure.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStep<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> BuildStep for FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StepError>> + Send,
{
    async fn execute(&self, ctx: &StepContext) -> Result<(), StepError> {
        (self.func)(ctx.clone()).await
    }
}

/// Declaration of one step in a plan: id, dependencies, weight, runner.
#[derive(Clone)]
pub struct StepSpec {
    /// Unique id within the plan.
    pub id: String,
    /// Ids of steps that must complete first.
    pub dependencies: Vec<String>,
    /// Scheduling hint; heavier steps launch first within a tick.
    pub weight: u32,
    /// The implementation to run.
    pub runner: Arc<dyn BuildStep>,
}

impl Debug for StepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSpec")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("weight", &self.weight)
            .finish()
    }
}

impl StepSpec {
    /// Creates a step spec with no dependencies and weight 1.
    #[must_use]
    pub fn new(id: impl Into<String>, runner: Arc<dyn BuildStep>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            weight: 1,
            runner,
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Sets the scheduling weight (min 1).
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }
}

/// A validated set of steps ready for execution.
///
/// Validation covers structure only: unique ids and dependencies that
/// reference declared steps. Cycles are not rejected here; they surface at
/// runtime as a deadlock diagnostic.
#[derive(Debug, Clone, Default)]
pub struct StepPlan {
    steps: Vec<StepSpec>,
}

impl StepPlan {
    /// Builds a plan from step specs.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidPlan`] on duplicate ids or
    /// dependencies naming unknown steps.
    pub fn new(steps: Vec<StepSpec>) -> Result<Self, OrchestratorError> {
        let mut ids = HashSet::new();
        for step in &steps {
            if !ids.insert(step.id.as_str()) {
                return Err(OrchestratorError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }
        for step in &steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(OrchestratorError::InvalidPlan(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.id
                    )));
                }
            }
        }

        Ok(Self { steps })
    }

    /// An empty plan; executes trivially.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The declared steps.
    #[must_use]
    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// Number of steps in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
