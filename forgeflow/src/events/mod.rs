//! Build event emission.
//!
//! Terminal build notifications and progress events flow through an
//! [`EventSink`] injected into the queue, scheduler, and lifecycle machine.
//! There is deliberately no global sink; every component receives its
//! handle explicitly.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::{Deserialize, Serialize};

use crate::cache::ArtifactRef;

/// Terminal state of a finished build, as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// The build reached the complete phase.
    Success,
    /// The build failed (step error, deadlock, or internal fault).
    Failed,
    /// The build was cancelled by request.
    Cancelled,
}

/// Notification emitted when a build reaches a terminal state.
///
/// Consumable by log-streaming, webhook, or chat-ops integrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildNotification {
    /// The build that finished.
    pub build_id: String,
    /// Terminal status.
    pub status: BuildStatus,
    /// Artifacts produced, when successful.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRef>,
    /// Human-readable reason for failure or cancellation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BuildNotification {
    /// Notification for a successful build.
    #[must_use]
    pub fn success(build_id: impl Into<String>, artifacts: Vec<ArtifactRef>) -> Self {
        Self {
            build_id: build_id.into(),
            status: BuildStatus::Success,
            artifacts,
            reason: None,
        }
    }

    /// Notification for a failed build.
    #[must_use]
    pub fn failed(build_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            status: BuildStatus::Failed,
            artifacts: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    /// Notification for a cancelled build.
    #[must_use]
    pub fn cancelled(build_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            status: BuildStatus::Cancelled,
            artifacts: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_serializes_camel_case() {
        let note = BuildNotification::success("b1", vec![]);
        let json = serde_json::to_value(&note).unwrap();

        assert_eq!(json["buildId"], "b1");
        assert_eq!(json["status"], "success");
    }

    #[test]
    fn test_failure_carries_reason() {
        let note = BuildNotification::failed("b1", "step 'iso' failed");
        assert_eq!(note.status, BuildStatus::Failed);
        assert_eq!(note.reason.as_deref(), Some("step 'iso' failed"));
    }
}
