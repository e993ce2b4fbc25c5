//! Injected contracts with external collaborators.
//!
//! The core calls persistence synchronously at phase and job transitions.
//! A persistence failure is surfaced to the caller's log but never allowed
//! to abandon an otherwise healthy in-memory state machine.

use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

use crate::lifecycle::BuildPhase;
use crate::queue::Job;

/// Error from the persistence backend.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PersistenceError(pub String);

impl PersistenceError {
    /// Creates a new persistence error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<PersistenceError> for crate::errors::OrchestratorError {
    fn from(err: PersistenceError) -> Self {
        Self::Persistence(err.0)
    }
}

/// Persistence contract for build and job records.
#[cfg_attr(test, mockall::automock)]
pub trait Persistence: Send + Sync {
    /// Records a build's phase transition.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the write fails.
    fn save_build_phase(&self, build_id: &str, phase: BuildPhase) -> Result<(), PersistenceError>;

    /// Appends a log line to a build's log stream.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the write fails.
    fn append_log(&self, build_id: &str, message: &str) -> Result<(), PersistenceError>;

    /// Loads a job record.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the read fails.
    fn load_job(&self, job_id: &str) -> Result<Option<Job>, PersistenceError>;

    /// Saves a job's queue state.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the write fails.
    fn save_job_state(&self, job: &Job) -> Result<(), PersistenceError>;
}

/// In-memory persistence, used in tests and as the default backend.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    phases: Mutex<HashMap<String, Vec<BuildPhase>>>,
    logs: Mutex<HashMap<String, Vec<String>>>,
    jobs: Mutex<HashMap<String, Job>>,
}

impl InMemoryPersistence {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full phase history recorded for a build.
    #[must_use]
    pub fn phase_history(&self, build_id: &str) -> Vec<BuildPhase> {
        self.phases
            .lock()
            .get(build_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Log lines recorded for a build.
    #[must_use]
    pub fn logs_for(&self, build_id: &str) -> Vec<String> {
        self.logs.lock().get(build_id).cloned().unwrap_or_default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_build_phase(&self, build_id: &str, phase: BuildPhase) -> Result<(), PersistenceError> {
        self.phases
            .lock()
            .entry(build_id.to_string())
            .or_default()
            .push(phase);
        Ok(())
    }

    fn append_log(&self, build_id: &str, message: &str) -> Result<(), PersistenceError> {
        self.logs
            .lock()
            .entry(build_id.to_string())
            .or_default()
            .push(message.to_string());
        Ok(())
    }

    fn load_job(&self, job_id: &str) -> Result<Option<Job>, PersistenceError> {
        Ok(self.jobs.lock().get(job_id).cloned())
    }

    fn save_job_state(&self, job: &Job) -> Result<(), PersistenceError> {
        self.jobs.lock().insert(job.id.clone(), job.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_phase_history_in_order() {
        let store = InMemoryPersistence::new();

        store.save_build_phase("b1", BuildPhase::Parsing).unwrap();
        store
            .save_build_phase("b1", BuildPhase::Validating)
            .unwrap();

        assert_eq!(
            store.phase_history("b1"),
            vec![BuildPhase::Parsing, BuildPhase::Validating]
        );
        assert!(store.phase_history("b2").is_empty());
    }

    #[test]
    fn test_append_log() {
        let store = InMemoryPersistence::new();
        store.append_log("b1", "resolving packages").unwrap();

        assert_eq!(store.logs_for("b1"), vec!["resolving packages"]);
    }

    #[test]
    fn test_load_unknown_job() {
        let store = InMemoryPersistence::new();
        assert!(store.load_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_mocked_backend_surfaces_failure() {
        let mut mock = MockPersistence::new();
        mock.expect_save_build_phase()
            .returning(|_, _| Err(PersistenceError::new("backend down")));

        let err = mock
            .save_build_phase("b1", BuildPhase::Parsing)
            .unwrap_err();
        assert_eq!(err.to_string(), "backend down");
    }
}
