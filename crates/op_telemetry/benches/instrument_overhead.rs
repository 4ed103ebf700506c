//! Cost of instrumentation on the caller's path.
//!
//! Export happens on the pipeline worker, so these numbers cover only the
//! counter update, span bookkeeping and batch append.
//!
//! Run with: cargo bench -p op_telemetry --bench instrument_overhead

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use op_telemetry::{attributes, Attributes, ExporterConfig, NullExporter, TelemetryContext};
use std::sync::Arc;
use std::time::Duration;

const OPS_PER_ITER: u64 = 1_000;

fn bench_config() -> ExporterConfig {
    ExporterConfig::default()
        .with_service_name("bench")
        .with_flush_interval(Duration::from_millis(50))
        .with_max_batch_size(4096)
        .with_queue_capacity(1024)
}

fn bench_counter_add(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let ctx = runtime.block_on(async {
        TelemetryContext::start_with_exporter(bench_config(), Arc::new(NullExporter::new())).unwrap()
    });
    let counter = ctx.metrics().counter("bench_events", "", "1").unwrap();

    let mut group = c.benchmark_group("metrics");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    group.bench_function("counter_add", |b| {
        b.iter(|| {
            for _ in 0..OPS_PER_ITER {
                counter.add(black_box(1.0), Attributes::new()).unwrap();
            }
        });
    });

    group.bench_function("counter_add_with_attributes", |b| {
        b.iter(|| {
            for _ in 0..OPS_PER_ITER {
                counter
                    .add(black_box(1.0), attributes! { "route" => "/users/", "method" => "GET" })
                    .unwrap();
            }
        });
    });

    group.finish();
    runtime.block_on(ctx.shutdown());
}

fn bench_wrap(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let ctx = runtime.block_on(async {
        TelemetryContext::start_with_exporter(bench_config(), Arc::new(NullExporter::new())).unwrap()
    });
    let instrumentation = ctx.instrumentation().clone();

    let mut group = c.benchmark_group("operations");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    group.bench_function("wrap_success", |b| {
        b.iter(|| {
            for i in 0..OPS_PER_ITER {
                let out = instrumentation
                    .wrap("bench_op", Attributes::new(), None, |_| Ok::<_, String>(i))
                    .unwrap();
                black_box(out);
            }
        });
    });

    group.bench_function("wrap_async_success", |b| {
        b.to_async(&runtime).iter(|| async {
            for i in 0..OPS_PER_ITER {
                let out = instrumentation
                    .wrap_async("bench_op", Attributes::new(), None, |_| async move {
                        Ok::<_, String>(i)
                    })
                    .await
                    .unwrap();
                black_box(out);
            }
        });
    });

    group.finish();
    runtime.block_on(ctx.shutdown());
}

criterion_group!(benches, bench_counter_add, bench_wrap);
criterion_main!(benches);
