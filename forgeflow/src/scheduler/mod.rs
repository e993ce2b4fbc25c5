//! DAG step scheduling.
//!
//! This module provides:
//! - The step model ([`StepSpec`], [`StepPlan`], [`StepResult`])
//! - The step implementation interface ([`BuildStep`])
//! - The bounded-concurrency DAG executor ([`DagScheduler`])

mod dag;
mod step;

pub use dag::{DagExecutionResult, DagOutcome, DagScheduler};
pub use step::{BuildStep, FnStep, StepContext, StepPlan, StepResult, StepSpec, StepStatus};
