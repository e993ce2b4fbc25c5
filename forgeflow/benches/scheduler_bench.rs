//! Benchmarks for DAG step scheduling.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use forgeflow::cancellation::CancelHandle;
use forgeflow::events::NoOpEventSink;
use forgeflow::scheduler::{DagScheduler, StepContext, StepPlan, StepSpec};
use forgeflow::testing::{minimal_spec, noop_step};

fn diamond_plan() -> StepPlan {
    StepPlan::new(vec![
        StepSpec::new("fetch", noop_step()),
        StepSpec::new("left", noop_step()).with_dependency("fetch"),
        StepSpec::new("right", noop_step()).with_dependency("fetch"),
        StepSpec::new("join", noop_step())
            .with_dependency("left")
            .with_dependency("right"),
    ])
    .unwrap()
}

fn scheduler_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let scheduler = DagScheduler::new(4, Arc::new(NoOpEventSink));
    let spec = Arc::new(minimal_spec());

    c.bench_function("diamond_dag", |b| {
        b.iter(|| {
            let ctx = StepContext::new(
                "bench",
                Arc::clone(&spec),
                CancelHandle::new(),
                Duration::from_secs(60),
            );
            let result = runtime.block_on(scheduler.execute(&diamond_plan(), &ctx));
            black_box(result)
        });
    });
}

criterion_group!(benches, scheduler_benchmark);
criterion_main!(benches);
