//! Benchmarks for field evaluation, layout and CPU frames.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;

use blobfield::prelude::*;

fn engine_with(count: usize) -> Engine {
    let mut engine = Engine::new(EngineConfig::default());
    let root = engine.tree().root();
    let mut parents = vec![root];
    for i in 0..count {
        let parent = parents[i / 3];
        if let Ok(id) = engine.fork(parent) {
            parents.push(id);
        }
    }
    engine
}

fn bench_field_samples(c: &mut Criterion) {
    let mut group = c.benchmark_group("field_sample");

    for count in [8, 32, 96] {
        let engine = engine_with(count);
        for model in [FieldModel::KernelSum, FieldModel::SmoothUnion] {
            let field = FieldEvaluator::new(
                FieldConfig::new().with_model(model),
                engine.snapshot().field_sources(0.0),
            );
            group.bench_with_input(BenchmarkId::new(format!("{model:?}"), count), &field, |b, field| {
                b.iter(|| {
                    let mut acc = 0.0;
                    for i in 0..64 {
                        let p = Vec3::new(i as f32 / 32.0 - 1.0, 0.25, 0.0);
                        acc += field.signed_distance(black_box(p));
                    }
                    acc
                })
            });
        }
    }

    group.finish();
}

fn bench_relayout(c: &mut Criterion) {
    let mut group = c.benchmark_group("relayout");

    for count in [8, 32, 96] {
        let engine = engine_with(count);
        let layout = LayoutEngine::new(LayoutConfig::default());
        group.bench_with_input(BenchmarkId::new("sources", count), engine.tree(), |b, tree| {
            b.iter(|| black_box(layout.relayout(tree)))
        });
    }

    group.finish();
}

fn bench_cpu_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_frame");
    group.sample_size(10);

    let engine = engine_with(12);
    let snapshot = engine.snapshot().clone();
    let ctx = FrameContext::new(&snapshot, Camera::default(), 0.0, 0);

    group.bench_function("screen_160x120", |b| {
        let mut backend = ScreenSpaceBackend::new(RenderConfig::default(), FieldConfig::default());
        backend.resize(160, 120);
        backend.upload_sources(&snapshot);
        b.iter(|| backend.draw_frame(black_box(&ctx)))
    });

    for mode in [TraceMode::Surface, TraceMode::Volume] {
        group.bench_function(format!("trace_{mode:?}_160x120"), |b| {
            let render = RenderConfig::default().with_trace_mode(mode);
            let mut backend = SphereTraceBackend::new(render, FieldConfig::default());
            backend.resize(160, 120);
            backend.upload_sources(&snapshot);
            b.iter(|| backend.draw_frame(black_box(&ctx)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_field_samples, bench_relayout, bench_cpu_frames);
criterion_main!(benches);
