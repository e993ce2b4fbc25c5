//! Testing utilities for the orchestration engine.
//!
//! This module provides:
//! - Spec fixtures
//! - Mock steps with controllable outcomes
//! - A persistence backend that fails on demand

mod fixtures;
mod mocks;

pub use fixtures::{minimal_spec, minimal_spec_json, spec_with_kernel};
pub use mocks::{
    artifact_step, failing_step, noop_step, slow_step, CountingStep, FlakyPersistence,
};
