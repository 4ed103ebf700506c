//! # Operation Telemetry Demo
//!
//! Runs instrumented operations from many concurrent tasks against a
//! simulated, unreliable collector and prints what the pipeline did with the
//! resulting metrics, spans and logs.
//!
//! ## Features Demonstrated
//!
//! ### 1. Custom exporter
//! - `SimulatedBackendExporter` implements `TelemetryExporter` with native
//!   async fn in traits, a configurable failure rate and latency
//!
//! ### 2. Instrumented operations
//! - `wrap_async` around a simulated data-access call with nested child spans
//! - 10% business failures carrying an `error.kind`
//! - Business counters and an up-down counter next to the built-in request metrics
//!
//! ### 3. Retry, batching and bounded shutdown
//! - Transient export failures retried with jittered exponential backoff
//! - Final drain bounded by the shutdown grace period
//!
//! ## Running
//!
//! ```bash
//! cargo run -p op_telemetry --bin demo --release -- --quick
//! cargo run -p op_telemetry --bin demo --release -- --verbose
//! ```

use op_telemetry::{
    attributes, ExportError, ExporterConfig, Instrumentation, MetricHandle, RetryPolicy,
    SpanKind, StatsSnapshot, TelemetryBatch, TelemetryContext, TelemetryExporter,
};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set and valid, else `debug` with `--verbose` and `warn` otherwise.
fn log_filter(rust_log: Option<&str>, verbose: bool) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "warn" }))
}

// =============================================================================
// SIMULATED COLLECTOR
// =============================================================================

/// A collector that is slow and sometimes unavailable.
struct SimulatedBackendExporter {
    failure_rate: f64,
    latency: Duration,
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl SimulatedBackendExporter {
    fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate,
            latency,
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

impl TelemetryExporter for SimulatedBackendExporter {
    fn export(&self, batch: TelemetryBatch) -> impl Future<Output = Result<(), ExportError>> + Send {
        let records = batch.len();
        let latency = self.latency;
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let fail = rand::thread_rng().gen_bool(self.failure_rate);
        if fail {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        async move {
            tokio::time::sleep(latency).await;
            if fail {
                Err(ExportError::Transport(format!(
                    "collector unavailable ({records} records)"
                )))
            } else {
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "simulated-collector"
    }
}

// =============================================================================
// SIMULATED WORKLOAD
// =============================================================================

#[derive(Debug)]
struct LookupError;

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("record not found")
    }
}

impl op_telemetry::ErrorKind for LookupError {
    fn error_kind(&self) -> std::borrow::Cow<'static, str> {
        "not_found".into()
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    succeeded: u64,
    failed: u64,
}

async fn run_worker(
    worker_id: usize,
    operations: usize,
    instrumentation: Instrumentation,
    created: MetricHandle,
    active: MetricHandle,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    for i in 0..operations {
        let result = instrumentation
            .wrap_async(
                "load_record",
                attributes! { "worker.id" => worker_id },
                None,
                |ctx| {
                    let tracer = instrumentation.tracer().clone();
                    async move {
                        let mut query = tracer.start_span_with_kind(
                            "db.select",
                            SpanKind::Client,
                            attributes! { "db.table" => "records" },
                            Some(&ctx),
                        );
                        let latency = rand::thread_rng().gen_range(1..4);
                        tokio::time::sleep(Duration::from_millis(latency)).await;
                        query.end();

                        if rand::thread_rng().gen_bool(0.1) {
                            Err(LookupError)
                        } else {
                            Ok(i)
                        }
                    }
                },
            )
            .await;

        match result {
            Ok(_) => {
                stats.succeeded += 1;
                let _ = created.add(1.0, attributes! { "worker.id" => worker_id });
                let _ = active.add(1.0, attributes! {});
            }
            Err(_) => stats.failed += 1,
        }
    }

    stats
}

// =============================================================================
// MAIN APPLICATION
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose");
    let quick = args.iter().any(|a| a == "--quick");

    // Pipeline diagnostics (failed attempts, drops) go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref(), verbose))
        .init();

    let (num_workers, ops_per_worker) = if quick { (4, 25) } else { (8, 200) };

    println!("Operation telemetry demo");
    println!("   Mode: {}", if quick { "quick" } else { "full" });
    println!("   Workers: {num_workers}");
    println!("   Operations per worker: {ops_per_worker}");
    println!();

    // =========================================================================
    // PHASE 1: Telemetry context over an unreliable collector
    // =========================================================================

    let backend = Arc::new(SimulatedBackendExporter::new(0.2, Duration::from_millis(5)));
    let retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
        multiplier: 2.0,
    };
    let config = ExporterConfig::default()
        .with_service_name("telemetry-demo")
        .with_flush_interval(Duration::from_millis(200))
        .with_max_batch_size(256)
        .with_retry(retry.clone())
        .with_shutdown_grace(Duration::from_secs(2));

    println!("Phase 1: pipeline");
    println!("   Flush interval: {:?}", config.flush_interval);
    println!("   Max batch size: {}", config.max_batch_size);
    println!(
        "   Retry: {} attempts, {}ms initial backoff, {}x multiplier",
        retry.max_attempts,
        retry.initial_backoff.as_millis(),
        retry.multiplier
    );
    println!();

    let ctx = TelemetryContext::start_with_exporter(config, backend.clone())?;
    let created = ctx.metrics().counter("record_loaded_count", "Records loaded", "1")?;
    let active = ctx
        .metrics()
        .up_down_counter("active_records", "Records currently held", "1")?;

    // =========================================================================
    // PHASE 2: Concurrent instrumented work
    // =========================================================================

    println!("Phase 2: running {num_workers} workers");
    let start = Instant::now();

    let mut handles = Vec::new();
    for worker_id in 0..num_workers {
        handles.push(tokio::spawn(run_worker(
            worker_id,
            ops_per_worker,
            ctx.instrumentation().clone(),
            created.clone(),
            active.clone(),
        )));
    }

    let mut succeeded = 0;
    let mut failed = 0;
    for (id, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(stats) => {
                if verbose {
                    println!("   Worker {id} completed: {stats:?}");
                }
                succeeded += stats.succeeded;
                failed += stats.failed;
            }
            Err(e) => eprintln!("   Worker {id} panicked: {e}"),
        }
    }
    let work_time = start.elapsed();
    println!("   Done in {work_time:?}");
    println!();

    // =========================================================================
    // PHASE 3: Shutdown and results
    // =========================================================================

    println!("Phase 3: shutdown");
    let open_spans = ctx.tracer().open_spans();
    let spans_ended = ctx.tracer().spans_ended();
    let snapshot = ctx.shutdown().await;
    println!();

    print_results(
        succeeded,
        failed,
        open_spans,
        spans_ended,
        &snapshot,
        backend.attempts.load(Ordering::Relaxed),
        backend.failures.load(Ordering::Relaxed),
        start.elapsed(),
    );

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn print_results(
    succeeded: u64,
    failed: u64,
    open_spans: u64,
    spans_ended: u64,
    snapshot: &StatsSnapshot,
    attempts: u64,
    backend_failures: u64,
    total_time: Duration,
) {
    println!("┌─────────────────────────────────────────────────────┐");
    println!("│            OPERATION TELEMETRY RESULTS              │");
    println!("├─────────────────────────────────────────────────────┤");
    println!("│ Total Execution Time:      {:>12.2?}             │", total_time);
    println!("├─────────────────────────────────────────────────────┤");
    println!("│ OPERATIONS                                          │");
    println!("│   Succeeded:               {:>12}             │", succeeded);
    println!("│   Failed:                  {:>12}             │", failed);
    println!("│   Spans Ended:             {:>12}             │", spans_ended);
    println!("│   Spans Still Open:        {:>12}             │", open_spans);
    println!("├─────────────────────────────────────────────────────┤");
    println!("│ EXPORT PIPELINE                                     │");
    println!("│   Batches Exported:        {:>12}             │", snapshot.batches_exported);
    println!("│   Records Exported:        {:>12}             │", snapshot.records_exported);
    println!("│   Collector Attempts:      {:>12}             │", attempts);
    println!("│   Collector Failures:      {:>12}             │", backend_failures);
    println!("│   Retries:                 {:>12}             │", snapshot.retries);
    println!("│   Dropped Batches:         {:>12}             │", snapshot.dropped_batches);
    println!("│   Dropped Records:         {:>12}             │", snapshot.dropped_records);
    println!("│   Misuse Errors:           {:>12}             │", snapshot.misuse_errors);
    println!("└─────────────────────────────────────────────────────┘");
}
