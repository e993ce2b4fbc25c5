//! Build lifecycle: ordered phases, the state machine, and phase planning.

mod integration_tests;
mod machine;
mod phase;
mod planner;

pub use machine::{BuildOutcome, BuildTable, LifecycleMachine};
pub use phase::{BuildPhase, BuildRecord};
pub use planner::{PhasePlanner, StaticPlanner};
