//! Error types for the forgeflow orchestration engine.
//!
//! Callers outside the crate observe job states plus these human-readable
//! reasons; internal collaborator errors are wrapped, never leaked raw.

use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The submitting tenant already has too many jobs in flight.
    #[error("tenant '{tenant}' exceeded quota of {limit} queued-or-active jobs")]
    QuotaExceeded {
        /// The tenant that was over quota.
        tenant: String,
        /// The configured quota.
        limit: usize,
    },

    /// The submitted build spec failed admission validation.
    #[error("invalid build spec: {0}")]
    InvalidSpec(String),

    /// A step implementation reported failure.
    #[error("step '{step}' failed: {message}")]
    StepFailed {
        /// Id of the failing step.
        step: String,
        /// Reason reported by the step implementation.
        message: String,
    },

    /// The step graph can make no further progress.
    ///
    /// Distinct from a step failure: this indicates a cyclic or otherwise
    /// unsatisfiable dependency graph, i.e. a construction defect.
    #[error("step graph deadlocked; steps that can never become ready: {pending:?}")]
    Deadlock {
        /// Ids of the steps stuck in pending.
        pending: Vec<String>,
    },

    /// The build was cancelled by request.
    #[error("build cancelled: {0}")]
    Cancelled(String),

    /// No job with the given id is known to the queue.
    #[error("job '{0}' not found")]
    JobNotFound(String),

    /// No build with the given id is known.
    #[error("build '{0}' not found")]
    BuildNotFound(String),

    /// A step graph was constructed incorrectly.
    #[error("invalid step plan: {0}")]
    InvalidPlan(String),

    /// A persistence write failed. Surfaced but never fatal to the
    /// in-memory state machine.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Returns true if this error represents a user-initiated cancellation
    /// rather than a defect.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// A short human-readable reason, preserved through retry and
    /// dead-letter records.
    #[must_use]
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Error reported by a concrete step implementation.
///
/// Step internals (toolchain invocations, subprocess exit codes) are opaque
/// to the scheduler; only the message crosses the boundary.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepError {
    /// Human-readable failure description.
    pub message: String,
}

impl StepError {
    /// Creates a new step error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
