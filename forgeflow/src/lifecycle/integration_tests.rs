//! End-to-end tests of the lifecycle machine over in-memory collaborators.

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    use crate::cache::{ArtifactCache, InMemoryArtifactCache};
    use crate::cancellation::CancellationRegistry;
    use crate::config::OrchestratorConfig;
    use crate::events::{BuildStatus, CollectingEventSink};
    use crate::lifecycle::{
        BuildPhase, BuildTable, LifecycleMachine, PhasePlanner, StaticPlanner,
    };
    use crate::ports::{InMemoryPersistence, Persistence};
    use crate::queue::{Job, Tier};
    use crate::scheduler::{FnStep, StepPlan, StepSpec};
    use crate::testing::{
        artifact_step, failing_step, minimal_spec, noop_step, CountingStep, FlakyPersistence,
    };

    struct Harness {
        machine: LifecycleMachine,
        persistence: Arc<InMemoryPersistence>,
        cache: Arc<InMemoryArtifactCache>,
        registry: Arc<CancellationRegistry>,
        sink: Arc<CollectingEventSink>,
        builds: Arc<BuildTable>,
    }

    fn harness(planner: impl PhasePlanner + 'static) -> Harness {
        harness_with_persistence(planner, Arc::new(InMemoryPersistence::new()))
    }

    fn harness_with_persistence(
        planner: impl PhasePlanner + 'static,
        persistence: Arc<InMemoryPersistence>,
    ) -> Harness {
        let cache = Arc::new(InMemoryArtifactCache::new());
        let registry = Arc::new(CancellationRegistry::new());
        let sink = Arc::new(CollectingEventSink::new());
        let builds = Arc::new(BuildTable::new());

        let machine = LifecycleMachine::new(
            OrchestratorConfig::default(),
            Arc::new(planner),
            persistence.clone() as Arc<dyn Persistence>,
            cache.clone() as Arc<dyn ArtifactCache>,
            registry.clone(),
            sink.clone(),
            builds.clone(),
        );

        Harness {
            machine,
            persistence,
            cache,
            registry,
            sink,
            builds,
        }
    }

    fn test_job() -> Job {
        Job::new(minimal_spec(), None, Tier::Standard, 3)
    }

    #[tokio::test]
    async fn test_phases_advance_in_declared_order() {
        let h = harness(StaticPlanner::new());
        let job = test_job();

        let outcome = h.machine.run(&job).await;

        assert_eq!(outcome.status, BuildStatus::Success);
        assert_eq!(
            h.persistence.phase_history(&job.build_id),
            vec![
                BuildPhase::Pending,
                BuildPhase::Parsing,
                BuildPhase::Validating,
                BuildPhase::Resolving,
                BuildPhase::Generating,
                BuildPhase::Building,
                BuildPhase::ArtifactGenerating,
                BuildPhase::Uploading,
                BuildPhase::Complete,
            ]
        );
        assert_eq!(h.builds.phase(&job.build_id), Some(BuildPhase::Complete));
        assert_eq!(h.sink.events_of_type("build.completed").len(), 1);
    }

    #[tokio::test]
    async fn test_building_phase_runs_dag_in_dependency_order() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let record = |name: &'static str, log: Arc<Mutex<Vec<&'static str>>>| {
            Arc::new(FnStep::new(name, move |_ctx| {
                let log = log.clone();
                async move {
                    log.lock().push(name);
                    Ok(())
                }
            }))
        };

        let plan = StepPlan::new(vec![
            StepSpec::new("validate", record("validate", log.clone())),
            StepSpec::new("resolve", record("resolve", log.clone())).with_dependency("validate"),
            StepSpec::new("build", record("build", log.clone())).with_dependency("resolve"),
        ])
        .unwrap();
        let planner = StaticPlanner::new().with_phase(BuildPhase::Building, plan);

        let h = harness(planner);
        let outcome = h.machine.run(&test_job()).await;

        assert_eq!(outcome.status, BuildStatus::Success);
        assert_eq!(*log.lock(), vec!["validate", "resolve", "build"]);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_building_phases() {
        let build_plan =
            StepPlan::new(vec![StepSpec::new("image", artifact_step("docker-image", "steelos"))])
                .unwrap();
        let iso_plan =
            StepPlan::new(vec![StepSpec::new("iso", artifact_step("iso", "steelos.iso"))]).unwrap();
        let planner = StaticPlanner::new()
            .with_phase(BuildPhase::Building, build_plan)
            .with_phase(BuildPhase::ArtifactGenerating, iso_plan);

        let h = harness(planner);

        let first = test_job();
        let first_outcome = h.machine.run(&first).await;
        assert_eq!(first_outcome.status, BuildStatus::Success);
        assert_eq!(first_outcome.artifacts.len(), 2);
        assert_eq!(h.cache.len(), 1);

        // Same spec again: build-heavy phases are skipped, artifacts reused.
        let second = test_job();
        let second_outcome = h.machine.run(&second).await;
        assert_eq!(second_outcome.status, BuildStatus::Success);
        assert_eq!(second_outcome.artifacts, first_outcome.artifacts);

        let history = h.persistence.phase_history(&second.build_id);
        assert!(!history.contains(&BuildPhase::Building));
        assert!(!history.contains(&BuildPhase::ArtifactGenerating));
        assert!(history.contains(&BuildPhase::Uploading));
        assert_eq!(history.last(), Some(&BuildPhase::Complete));
    }

    #[tokio::test]
    async fn test_cancellation_before_start_runs_no_steps() {
        let counter = CountingStep::new();
        let plan = StepPlan::new(vec![StepSpec::new("work", counter.clone())]).unwrap();
        let planner = StaticPlanner::new().with_phase(BuildPhase::Parsing, plan);

        let h = harness(planner);
        let job = test_job();
        h.registry.request(&job.build_id, "user requested");

        let outcome = h.machine.run(&job).await;

        assert_eq!(outcome.status, BuildStatus::Cancelled);
        assert_eq!(counter.count(), 0);
        assert_eq!(h.builds.phase(&job.build_id), Some(BuildPhase::Failed));
        assert_eq!(h.sink.events_of_type("build.cancelled").len(), 1);
        assert!(h
            .builds
            .record(&job.build_id)
            .is_some_and(|r| r.cancel_requested));
    }

    #[tokio::test]
    async fn test_step_failure_fails_the_build() {
        let plan =
            StepPlan::new(vec![StepSpec::new("resolve", failing_step("mirror unreachable"))])
                .unwrap();
        let planner = StaticPlanner::new().with_phase(BuildPhase::Resolving, plan);

        let h = harness(planner);
        let job = test_job();
        let outcome = h.machine.run(&job).await;

        assert_eq!(outcome.status, BuildStatus::Failed);
        assert!(outcome.reason.as_deref().unwrap().contains("mirror unreachable"));
        assert_eq!(
            h.persistence.phase_history(&job.build_id).last(),
            Some(&BuildPhase::Failed)
        );
        // Later phases never ran.
        assert!(!h
            .persistence
            .phase_history(&job.build_id)
            .contains(&BuildPhase::Building));
        assert_eq!(h.sink.events_of_type("build.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_dag_deadlock_fails_the_build_distinctly() {
        let plan = StepPlan::new(vec![
            StepSpec::new("a", noop_step()).with_dependency("b"),
            StepSpec::new("b", noop_step()).with_dependency("a"),
        ])
        .unwrap();
        let planner = StaticPlanner::new().with_phase(BuildPhase::Generating, plan);

        let h = harness(planner);
        let outcome = h.machine.run(&test_job()).await;

        assert_eq!(outcome.status, BuildStatus::Failed);
        assert!(outcome.reason.as_deref().unwrap().contains("deadlock"));
        assert_eq!(h.sink.events_of_type("scheduler.deadlock").len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_fatal() {
        let flaky = Arc::new(FlakyPersistence::new());
        flaky.start_failing();

        let cache = Arc::new(InMemoryArtifactCache::new());
        let registry = Arc::new(CancellationRegistry::new());
        let sink = Arc::new(CollectingEventSink::new());
        let builds = Arc::new(BuildTable::new());

        let machine = LifecycleMachine::new(
            OrchestratorConfig::default(),
            Arc::new(StaticPlanner::new()),
            flaky.clone() as Arc<dyn Persistence>,
            cache as Arc<dyn ArtifactCache>,
            registry,
            sink,
            builds.clone(),
        );

        let job = test_job();
        let outcome = machine.run(&job).await;

        // Every phase write failed, but the build itself succeeded.
        assert_eq!(outcome.status, BuildStatus::Success);
        assert!(flaky.recorded_phases().is_empty());
        assert_eq!(builds.phase(&job.build_id), Some(BuildPhase::Complete));
    }

    #[tokio::test]
    async fn test_expired_cache_entry_rebuilds() {
        let counter = CountingStep::new();
        let plan = StepPlan::new(vec![
            StepSpec::new("image", counter.clone()),
            StepSpec::new("record", artifact_step("docker-image", "steelos")),
        ])
        .unwrap();
        let planner = StaticPlanner::new().with_phase(BuildPhase::Building, plan);

        // Zero TTL: whatever gets stored is immediately stale.
        let machine = LifecycleMachine::new(
            OrchestratorConfig::default().with_cache_ttl_seconds(0),
            Arc::new(planner),
            Arc::new(InMemoryPersistence::new()) as Arc<dyn Persistence>,
            Arc::new(InMemoryArtifactCache::new()) as Arc<dyn ArtifactCache>,
            Arc::new(CancellationRegistry::new()),
            Arc::new(CollectingEventSink::new()),
            Arc::new(BuildTable::new()),
        );

        machine.run(&test_job()).await;
        machine.run(&test_job()).await;

        // No fast path: the build step ran both times.
        assert_eq!(counter.count(), 2);
    }
}
