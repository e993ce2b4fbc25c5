//! Cooperative cancellation for running builds.
//!
//! Cancellation is a one-way latch: once requested for a build id it is
//! never unset. The scheduler and lifecycle machine poll the flag at safe
//! points and stop starting new work; in-flight steps are left to finish
//! (or to kill their own subprocess, via the handle passed into the step
//! context).

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation latch for one build.
#[derive(Debug, Default)]
pub struct CancelHandle {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl CancelHandle {
    /// Creates a fresh, uncancelled handle.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Requests cancellation. Idempotent; the first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            *self.reason.lock() = Some(reason.into());
        }
    }
}

/// Process-wide registry mapping build ids to cancellation latches.
///
/// An injected handle, not a global: the orchestrator owns one and passes
/// it to the queue workers, the lifecycle machine, and the query surface.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    flags: DashMap<String, Arc<CancelHandle>>,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for a build, creating it on first use.
    #[must_use]
    pub fn handle(&self, build_id: &str) -> Arc<CancelHandle> {
        self.flags
            .entry(build_id.to_string())
            .or_insert_with(CancelHandle::new)
            .clone()
    }

    /// Requests cancellation of a build. Sets the flag exactly once;
    /// repeated requests are no-ops.
    pub fn request(&self, build_id: &str, reason: impl Into<String>) {
        self.handle(build_id).cancel(reason);
    }

    /// Pure read of a build's cancellation state. Unknown builds read as
    /// not cancelled.
    #[must_use]
    pub fn is_cancelled(&self, build_id: &str) -> bool {
        self.flags
            .get(build_id)
            .map(|h| h.is_cancelled())
            .unwrap_or(false)
    }

    /// Drops the latch for a finished build.
    pub fn remove(&self, build_id: &str) {
        self.flags.remove(build_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_build_not_cancelled() {
        let registry = CancellationRegistry::new();
        assert!(!registry.is_cancelled("nope"));
    }

    #[test]
    fn test_request_sets_flag() {
        let registry = CancellationRegistry::new();
        registry.request("b1", "user requested");

        assert!(registry.is_cancelled("b1"));
        assert!(!registry.is_cancelled("b2"));
    }

    #[test]
    fn test_request_idempotent_first_reason_wins() {
        let registry = CancellationRegistry::new();
        let handle = registry.handle("b1");

        registry.request("b1", "first");
        registry.request("b1", "second");

        assert_eq!(handle.reason(), Some("first".to_string()));
    }

    #[test]
    fn test_handle_shared_across_lookups() {
        let registry = CancellationRegistry::new();
        let a = registry.handle("b1");
        let b = registry.handle("b1");

        a.cancel("stop");
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_concurrent_reads_and_request() {
        let registry = Arc::new(CancellationRegistry::new());
        let handle = registry.handle("b1");

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let h = handle.clone();
                std::thread::spawn(move || {
                    while !h.is_cancelled() {
                        std::hint::spin_loop();
                    }
                })
            })
            .collect();

        registry.request("b1", "shutdown");
        for t in readers {
            t.join().unwrap();
        }
    }
}
