//! # Forgeflow
//!
//! A build orchestration engine for OS image builds.
//!
//! Forgeflow takes validated build specifications and drives them through
//! a fixed lifecycle, with:
//!
//! - **Tiered admission**: A priority queue with per-tenant quotas and
//!   rate-limited dispatch
//! - **Retry with dead-lettering**: Exponential backoff and a dead-letter
//!   set for jobs that exhaust their attempts
//! - **Dependency-aware scheduling**: Each phase runs a step DAG under
//!   bounded concurrency with deadlock detection
//! - **Cancellation handling**: Idempotent cancellation that stops work at
//!   the next phase boundary
//! - **Artifact caching**: Identical specs reuse previously built artifacts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use forgeflow::prelude::*;
//!
//! // Describe how each phase turns into steps
//! let planner = StaticPlanner::new()
//!     .with_phase(BuildPhase::Building, build_plan);
//!
//! // Start the engine
//! let orch = Orchestrator::builder(OrchestratorConfig::default())
//!     .with_planner(Arc::new(planner))
//!     .build();
//!
//! // Admit a spec and follow the build
//! let receipt = orch.submit(&raw_spec, Some("tenant".into()), Tier::Standard)?;
//! let phase = orch.get_build_phase(&receipt.build_id)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod ports;
pub mod queue;
pub mod scheduler;
pub mod spec;
pub mod testing;
pub mod worker;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{ArtifactCache, ArtifactRef, CacheEntry, InMemoryArtifactCache};
    pub use crate::cancellation::{CancelHandle, CancellationRegistry};
    pub use crate::config::{OrchestratorConfig, RetryConfig};
    pub use crate::errors::{OrchestratorError, StepError};
    pub use crate::events::{
        BuildNotification, BuildStatus, CollectingEventSink, EventSink, LoggingEventSink,
        NoOpEventSink,
    };
    pub use crate::lifecycle::{
        BuildOutcome, BuildPhase, BuildRecord, BuildTable, LifecycleMachine, PhasePlanner,
        StaticPlanner,
    };
    pub use crate::orchestrator::{Orchestrator, OrchestratorBuilder, SubmitReceipt};
    pub use crate::ports::{InMemoryPersistence, Persistence, PersistenceError};
    pub use crate::queue::{Job, JobQueue, JobState, JobStatus, Tier};
    pub use crate::scheduler::{
        BuildStep, DagExecutionResult, DagOutcome, DagScheduler, FnStep, StepContext, StepPlan,
        StepResult, StepSpec, StepStatus,
    };
    pub use crate::spec::BuildSpec;
    pub use crate::worker::WorkerPool;
}
