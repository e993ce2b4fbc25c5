//! Phase-to-step planning.
//!
//! Concrete step implementations (Dockerfile generation, package
//! resolution, ISO assembly) live outside the core; a [`PhasePlanner`]
//! supplies them as a [`StepPlan`] for each phase the lifecycle machine
//! enters. A phase with an empty plan completes immediately.

use std::collections::HashMap;

use super::phase::BuildPhase;
use crate::errors::OrchestratorError;
use crate::scheduler::StepPlan;
use crate::spec::BuildSpec;

/// Supplies the unit of work for each build phase.
pub trait PhasePlanner: Send + Sync {
    /// Builds the step plan for a phase.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidPlan`] when a plan cannot be
    /// constructed for the given spec.
    fn plan(&self, phase: BuildPhase, spec: &BuildSpec) -> Result<StepPlan, OrchestratorError>;
}

/// A planner backed by a fixed phase-to-plan table.
///
/// Phases without an entry get an empty plan. Suitable for wiring and
/// tests; production planners derive plans from the spec.
#[derive(Default)]
pub struct StaticPlanner {
    plans: HashMap<BuildPhase, StepPlan>,
}

impl std::fmt::Debug for StaticPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticPlanner")
            .field("phases", &self.plans.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StaticPlanner {
    /// Creates a planner with no work in any phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a plan to a phase.
    #[must_use]
    pub fn with_phase(mut self, phase: BuildPhase, plan: StepPlan) -> Self {
        self.plans.insert(phase, plan);
        self
    }
}

impl PhasePlanner for StaticPlanner {
    fn plan(&self, phase: BuildPhase, _spec: &BuildSpec) -> Result<StepPlan, OrchestratorError> {
        Ok(self.plans.get(&phase).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::StepSpec;
    use crate::testing::{minimal_spec, noop_step};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unplanned_phase_is_empty() {
        let planner = StaticPlanner::new();
        let plan = planner
            .plan(BuildPhase::Parsing, &minimal_spec())
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_assigned_plan_returned() {
        let plan = StepPlan::new(vec![StepSpec::new("resolve", noop_step())]).unwrap();
        let planner = StaticPlanner::new().with_phase(BuildPhase::Resolving, plan);

        let got = planner
            .plan(BuildPhase::Resolving, &minimal_spec())
            .unwrap();
        assert_eq!(got.len(), 1);
    }
}
