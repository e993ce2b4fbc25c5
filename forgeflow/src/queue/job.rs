//! Job model: the unit admitted to the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::spec::BuildSpec;

/// A tenant's service class, determining queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Free tier, lowest priority.
    Free,
    /// Standard tier.
    Standard,
    /// Premium tier, highest priority.
    Premium,
}

impl Default for Tier {
    fn default() -> Self {
        Self::Free
    }
}

impl Tier {
    /// Queue priority for this tier. Lower values dequeue first.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Premium => 1,
            Self::Standard => 5,
            Self::Free => 10,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Standard => write!(f, "standard"),
            Self::Premium => write!(f, "premium"),
        }
    }
}

/// Queue-visible state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue.
    Queued,
    /// Picked up by a worker.
    Active,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed; may still be retried.
    Failed,
    /// Retry budget exhausted. Terminal; manual resubmission only.
    DeadLettered,
}

impl JobState {
    /// Returns true for states the queue never moves a job out of on its
    /// own: `Completed` and `DeadLettered`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// Unit of work admitted to the queue.
///
/// Mutated only by the queue and its workers. The spec is immutable once
/// admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique job id.
    pub id: String,
    /// Id of the build this job will drive.
    pub build_id: String,
    /// Validated build specification.
    pub spec: BuildSpec,
    /// Tenant key for quota and priority accounting.
    pub tenant_key: Option<String>,
    /// Service tier.
    pub tier: Tier,
    /// Priority derived from tier; lower is more urgent.
    pub priority: u8,
    /// Completed attempts so far.
    pub attempts: u32,
    /// Attempts allowed before dead-lettering.
    pub max_attempts: u32,
    /// Current queue state.
    pub state: JobState,
    /// Submission timestamp; FIFO tie-break within a priority.
    pub submitted_at: DateTime<Utc>,
    /// When the job reached a terminal state. Drives retention purging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Reason for the most recent failure, preserved into the
    /// dead-letter record.
    pub last_error: Option<String>,
}

impl Job {
    /// Creates a freshly queued job from a validated spec.
    #[must_use]
    pub fn new(spec: BuildSpec, tenant_key: Option<String>, tier: Tier, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            build_id: Uuid::new_v4().to_string(),
            spec,
            tenant_key,
            tier,
            priority: tier.priority(),
            attempts: 0,
            max_attempts,
            state: JobState::Queued,
            submitted_at: Utc::now(),
            finished_at: None,
            last_error: None,
        }
    }

    /// Returns true if the job has exhausted its retry budget.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Status snapshot returned by queue queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Current queue state.
    pub state: JobState,
    /// Completed attempts so far.
    pub attempts: u32,
    /// Most recent failure reason, if any.
    pub last_error: Option<String>,
}
