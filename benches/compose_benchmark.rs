use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use taskloom::activity::{ActivityDef, DepRef};
use taskloom::pipeline::{Pipeline, Step};
use taskloom::task::{TaskRegistry, TaskSpec};
use taskloom::types::TypeTag;

fn fixture_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register("emit", vec![], Some(TypeTag::named("Frame")), |_, _| {
        Ok(json!([1, 2, 3]))
    });
    registry.register(
        "pass",
        vec![TypeTag::named("Frame")],
        Some(TypeTag::named("Frame")),
        |inputs, _| Ok(inputs.first().cloned().unwrap_or(json!(null))),
    );
    registry
}

/// Build a linear chain of steps: step0 -> step1 -> step2 -> ...
/// Maximum depth, no parallelism; the worst case for the resolver.
fn linear_chain(registry: &TaskRegistry, count: usize) -> Vec<Step> {
    let mut steps = Vec::with_capacity(count);
    let mut previous: Option<TaskSpec> = None;

    for i in 0..count {
        let symbol = if i == 0 { "emit" } else { "pass" };
        let spec = TaskSpec::new(registry, symbol).unwrap();
        let mut def = ActivityDef::new(spec.clone()).named(format!("step{}", i));
        if let Some(prev) = &previous {
            def = def.depends_on([DepRef::task(prev)]);
        }
        steps.push(def.into());
        previous = Some(spec);
    }

    steps
}

/// Build a wide fan-in: N independent sources all feeding one sink.
fn fan_in(registry: &TaskRegistry, width: usize) -> Vec<Step> {
    let mut steps = Vec::with_capacity(width + 1);
    let mut sources = Vec::with_capacity(width);

    for i in 0..width {
        let spec = TaskSpec::new(registry, "emit").unwrap();
        steps.push(
            ActivityDef::new(spec.clone())
                .named(format!("source{}", i))
                .into(),
        );
        sources.push(spec);
    }

    let sink = TaskSpec::new(registry, "pass").unwrap();
    steps.push(
        ActivityDef::new(sink)
            .named("sink")
            .depends_on(sources.iter().map(DepRef::task))
            .into(),
    );

    steps
}

fn bench_compose(c: &mut Criterion) {
    let registry = fixture_registry();
    let mut group = c.benchmark_group("compose");

    for count in [10, 100, 500] {
        group.bench_with_input(
            BenchmarkId::new("linear_chain", count),
            &count,
            |b, &count| {
                b.iter(|| {
                    let mut pipeline = Pipeline::sequential(linear_chain(&registry, count));
                    pipeline.compose().unwrap();
                    black_box(pipeline.dag().node_count())
                });
            },
        );
    }

    for width in [10, 100] {
        group.bench_with_input(BenchmarkId::new("fan_in", width), &width, |b, &width| {
            b.iter(|| {
                let mut pipeline = Pipeline::sequential(fan_in(&registry, width));
                pipeline.compose().unwrap();
                black_box(pipeline.dag().edges().len())
            });
        });
    }

    group.finish();
}

fn bench_topological_sort(c: &mut Criterion) {
    let registry = fixture_registry();
    let mut pipeline = Pipeline::sequential(linear_chain(&registry, 500));
    pipeline.compose().unwrap();

    c.bench_function("topological_sort_500", |b| {
        b.iter(|| black_box(pipeline.dag().topological_sort().unwrap()))
    });
}

criterion_group!(benches, bench_compose, bench_topological_sort);
criterion_main!(benches);
