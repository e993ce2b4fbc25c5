//! Ordered build phases and the per-build record.

use serde::{Deserialize, Serialize};

use crate::cache::ArtifactRef;

/// The named phases a build moves through, in order.
///
/// `Failed` is reachable from any non-terminal phase; `Complete` and
/// `Failed` are terminal. The phase never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildPhase {
    /// Accepted, not yet started.
    Pending,
    /// Parsing the submitted spec.
    Parsing,
    /// Validating spec semantics.
    Validating,
    /// Resolving packages against the target distribution.
    Resolving,
    /// Generating build inputs (Dockerfile, profiles).
    Generating,
    /// Running the image build.
    Building,
    /// Producing final artifacts (ISO assembly).
    ArtifactGenerating,
    /// Publishing artifacts.
    Uploading,
    /// Finished successfully. Terminal.
    Complete,
    /// Finished unsuccessfully. Terminal.
    Failed,
}

impl BuildPhase {
    /// Ordinal position in the declared order. Used to enforce
    /// forward-only transitions.
    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            Self::Pending => 0,
            Self::Parsing => 1,
            Self::Validating => 2,
            Self::Resolving => 3,
            Self::Generating => 4,
            Self::Building => 5,
            Self::ArtifactGenerating => 6,
            Self::Uploading => 7,
            Self::Complete => 8,
            Self::Failed => 9,
        }
    }

    /// The phases that carry a unit of work, in execution order.
    #[must_use]
    pub fn work_sequence() -> &'static [Self] {
        &[
            Self::Parsing,
            Self::Validating,
            Self::Resolving,
            Self::Generating,
            Self::Building,
            Self::ArtifactGenerating,
            Self::Uploading,
        ]
    }

    /// Returns true for `Complete` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Returns true if moving to `next` is a legal transition: strictly
    /// forward in the declared order, or a jump to `Failed` from any
    /// non-terminal phase.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        next.ordinal() > self.ordinal() && next != Self::Failed
    }
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Parsing => "parsing",
            Self::Validating => "validating",
            Self::Resolving => "resolving",
            Self::Generating => "generating",
            Self::Building => "building",
            Self::ArtifactGenerating => "artifact-generating",
            Self::Uploading => "uploading",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle record for one accepted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    /// The build id.
    pub build_id: String,
    /// Current phase.
    pub phase: BuildPhase,
    /// Whether cancellation has been requested.
    pub cancel_requested: bool,
    /// Artifacts produced so far.
    pub artifacts: Vec<ArtifactRef>,
}

impl BuildRecord {
    /// Creates a fresh record in `Pending`.
    #[must_use]
    pub fn new(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            phase: BuildPhase::Pending,
            cancel_requested: false,
            artifacts: Vec::new(),
        }
    }
}
