//! Batching export pipeline.
//!
//! Producers (metric handles, spans, the log emitter) append records to one of
//! three lock-protected batches through a [`PipelineHandle`]. A single
//! background worker owns every network call:
//!
//! - on each `flush_interval` tick it swaps out the non-empty batches and sends them;
//! - a producer whose append fills a batch to `max_batch_size` seals it and
//!   hands it over a bounded queue with `try_send`; when that queue is full
//!   the batch is dropped and counted;
//! - [`ExportPipeline::force_flush`] sends everything pending and waits;
//! - [`ExportPipeline::shutdown`] stops intake, drains, and gives up on what is
//!   still unsent once `shutdown_grace` has passed.
//!
//! Producers never wait for delivery.

use crate::batch::{Batch, BatchBuffer, Push, TelemetryBatch};
use crate::config::ExporterConfig;
use crate::error::{PipelineError, TelemetryError};
use crate::exporter::{ExportError, TelemetryExporter, TelemetryExporterBoxed};
use crate::logs::LogRecord;
use crate::metrics::MetricPoint;
use crate::retry::RetryingExporter;
use crate::span::Span;
use crate::stats::{PipelineStats, StatsSnapshot};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};

const COMMAND_CAPACITY: usize = 16;

/// Extra time granted to the worker past the grace deadline before it is aborted.
const ABORT_SLACK: Duration = Duration::from_millis(100);

/// Why a record was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    /// The pipeline is shutting down or gone
    #[error("export pipeline is closed")]
    Closed,
    /// The sealed-batch queue was full and the batch was dropped
    #[error("export queue is full, batch dropped")]
    QueueFull,
}

enum Command {
    Flush(oneshot::Sender<()>),
    Shutdown { deadline: Instant },
}

// ============================================================================
// Shared producer state
// ============================================================================

#[derive(Debug)]
struct Shared {
    metrics: BatchBuffer<MetricPoint>,
    spans: BatchBuffer<Span>,
    logs: BatchBuffer<LogRecord>,
    accepting: AtomicBool,
    sealed_tx: mpsc::Sender<TelemetryBatch>,
    /// Batches taken out of a buffer and not yet exported or dropped
    outstanding_batches: AtomicU64,
    outstanding_records: AtomicU64,
    stats: Arc<PipelineStats>,
}

impl Shared {
    fn dispatch<T>(
        &self,
        push: Push<T>,
        wrap: fn(Batch<T>) -> TelemetryBatch,
    ) -> Result<(), PushError> {
        match push {
            Push::Buffered => Ok(()),
            Push::Rejected => {
                self.stats.record_dropped(0, 1);
                Err(PushError::Closed)
            }
            Push::Sealed(batch) => {
                let records = batch.len();
                self.claim(records);
                match self.sealed_tx.try_send(wrap(batch)) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) => {
                        self.settle(records);
                        self.stats.record_dropped(1, records);
                        tracing::warn!(records, "export queue full, dropping batch");
                        Err(PushError::QueueFull)
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.settle(records);
                        self.stats.record_dropped(1, records);
                        Err(PushError::Closed)
                    }
                }
            }
        }
    }

    fn claim(&self, records: usize) {
        self.outstanding_batches.fetch_add(1, Ordering::Relaxed);
        self.outstanding_records
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    fn settle(&self, records: usize) {
        self.outstanding_batches.fetch_sub(1, Ordering::Relaxed);
        self.outstanding_records
            .fetch_sub(records as u64, Ordering::Relaxed);
    }

    /// Swaps out every non-empty batch.
    fn take_all(&self) -> Vec<TelemetryBatch> {
        let taken = [
            self.metrics.take().map(TelemetryBatch::Metrics),
            self.spans.take().map(TelemetryBatch::Spans),
            self.logs.take().map(TelemetryBatch::Logs),
        ];
        taken
            .into_iter()
            .flatten()
            .inspect(|batch| self.claim(batch.len()))
            .collect()
    }

    fn buffered_records(&self) -> usize {
        self.metrics.len() + self.spans.len() + self.logs.len()
    }

    /// Counts everything not yet delivered as lost. Used when the worker had
    /// to be aborted.
    fn abandon(&self) -> (u64, u64) {
        self.accepting.store(false, Ordering::Release);
        drop(self.take_all());
        let batches = self.outstanding_batches.swap(0, Ordering::Relaxed);
        let records = self.outstanding_records.swap(0, Ordering::Relaxed);
        self.stats
            .record_dropped(batches as usize, records as usize);
        (batches, records)
    }
}

/// Cheap, clonable producer side of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    pub fn push_metric(&self, point: MetricPoint) -> Result<(), PushError> {
        let push = self.shared.metrics.push(point, &self.shared.accepting);
        self.shared.dispatch(push, TelemetryBatch::Metrics)
    }

    pub fn push_span(&self, span: Span) -> Result<(), PushError> {
        let push = self.shared.spans.push(span, &self.shared.accepting);
        self.shared.dispatch(push, TelemetryBatch::Spans)
    }

    pub fn push_log(&self, record: LogRecord) -> Result<(), PushError> {
        let push = self.shared.logs.push(record, &self.shared.accepting);
        self.shared.dispatch(push, TelemetryBatch::Logs)
    }

    /// False once shutdown has begun.
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Records waiting in the three open batches.
    pub fn buffered_records(&self) -> usize {
        self.shared.buffered_records()
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.shared.stats
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Owner of the background export worker.
///
/// Dropping the pipeline without calling [`shutdown`](Self::shutdown) closes
/// the command channel, which makes the worker drain within the grace period
/// on its own.
pub struct ExportPipeline {
    handle: PipelineHandle,
    command_tx: mpsc::Sender<Command>,
    worker: JoinHandle<()>,
    exporter: Arc<dyn TelemetryExporterBoxed>,
    shutdown_grace: Duration,
}

impl ExportPipeline {
    /// Spawns the worker on the current Tokio runtime. Fails on an invalid
    /// `config` or outside a runtime.
    pub fn start(
        config: &ExporterConfig,
        exporter: Arc<dyn TelemetryExporterBoxed>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, TelemetryError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;

        let (sealed_tx, sealed_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        let shared = Arc::new(Shared {
            metrics: BatchBuffer::new(config.max_batch_size),
            spans: BatchBuffer::new(config.max_batch_size),
            logs: BatchBuffer::new(config.max_batch_size),
            accepting: AtomicBool::new(true),
            sealed_tx,
            outstanding_batches: AtomicU64::new(0),
            outstanding_records: AtomicU64::new(0),
            stats: Arc::clone(&stats),
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            exporter: RetryingExporter::new(
                Arc::clone(&exporter),
                config.retry.clone(),
                config.export_timeout,
                stats,
            ),
            sealed_rx,
            command_rx,
            flush_interval: config.flush_interval,
            shutdown_grace: config.shutdown_grace,
        };

        tracing::debug!(
            exporter = TelemetryExporterBoxed::name(&*exporter),
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            max_batch_size = config.max_batch_size,
            "starting export pipeline"
        );

        Ok(Self {
            handle: PipelineHandle { shared },
            command_tx,
            worker: runtime.spawn(worker.run()),
            exporter,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Returns a producer handle.
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Sends everything pending and waits until the sends are finished.
    pub async fn force_flush(&self) -> Result<(), PipelineError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| PipelineError::Closed)?;
        done_rx.await.map_err(|_| PipelineError::Closed)
    }

    /// Records buffered, queued or in flight.
    pub fn pending_records(&self) -> usize {
        let shared = &self.handle.shared;
        shared.buffered_records() + shared.outstanding_records.load(Ordering::Relaxed) as usize
    }

    /// Current counters, including records the exporter skipped.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            skipped_records: TelemetryExporterBoxed::skipped_records(&*self.exporter),
            ..self.handle.shared.stats.snapshot()
        }
    }

    /// Stops intake, drains pending batches within the grace period and
    /// returns the final counters.
    pub async fn shutdown(self) -> StatsSnapshot {
        let Self {
            handle,
            command_tx,
            mut worker,
            exporter,
            shutdown_grace,
        } = self;
        let deadline = Instant::now() + shutdown_grace;

        // A full command queue means the worker is stuck; the abort below covers it.
        let _ = timeout_at(deadline, command_tx.send(Command::Shutdown { deadline })).await;

        match timeout_at(deadline + ABORT_SLACK, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "export worker failed"),
            Err(_) => {
                worker.abort();
                let (batches, records) = handle.shared.abandon();
                tracing::warn!(batches, records, "export worker did not stop in time, telemetry lost");
            }
        }

        StatsSnapshot {
            skipped_records: TelemetryExporterBoxed::skipped_records(&*exporter),
            ..handle.shared.stats.snapshot()
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    shared: Arc<Shared>,
    exporter: RetryingExporter<Arc<dyn TelemetryExporterBoxed>>,
    sealed_rx: mpsc::Receiver<TelemetryBatch>,
    command_rx: mpsc::Receiver<Command>,
    flush_interval: Duration,
    shutdown_grace: Duration,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(batch) = self.sealed_rx.recv() => {
                    self.send(batch, None).await;
                }

                _ = ticker.tick() => {
                    for batch in self.shared.take_all() {
                        self.send(batch, None).await;
                    }
                }

                command = self.command_rx.recv() => match command {
                    Some(Command::Flush(done)) => {
                        self.flush().await;
                        let _ = done.send(());
                    }
                    Some(Command::Shutdown { deadline }) => {
                        self.drain(deadline).await;
                        return;
                    }
                    None => {
                        let deadline = Instant::now() + self.shutdown_grace;
                        self.drain(deadline).await;
                        return;
                    }
                },
            }
        }
    }

    /// Sends queued sealed batches, then the open ones.
    async fn flush(&mut self) {
        while let Ok(batch) = self.sealed_rx.try_recv() {
            self.send(batch, None).await;
        }
        for batch in self.shared.take_all() {
            self.send(batch, None).await;
        }
    }

    async fn drain(&mut self, deadline: Instant) {
        self.shared.accepting.store(false, Ordering::Release);
        self.sealed_rx.close();

        let mut pending = Vec::new();
        while let Some(batch) = self.sealed_rx.recv().await {
            pending.push(batch);
        }
        pending.extend(self.shared.take_all());

        let before = self.shared.stats.snapshot();
        for batch in pending {
            self.send(batch, Some(deadline)).await;
        }
        let after = self.shared.stats.snapshot();
        tracing::debug!(
            exported = after.records_exported - before.records_exported,
            dropped = after.dropped_records - before.dropped_records,
            "export pipeline drained"
        );
    }

    /// Delivers one batch (which must have been claimed) and settles it.
    async fn send(&self, batch: TelemetryBatch, deadline: Option<Instant>) {
        let records = batch.len();
        let signal = batch.signal();
        let result = match deadline {
            Some(deadline) => timeout_at(deadline, self.exporter.export(batch))
                .await
                .unwrap_or(Err(ExportError::Timeout)),
            None => self.exporter.export(batch).await,
        };

        match result {
            Ok(()) => self.shared.stats.record_export(records),
            Err(e) => {
                self.shared.stats.record_dropped(1, records);
                tracing::warn!(
                    signal = signal.as_str(),
                    records,
                    error = %e,
                    "dropping telemetry batch"
                );
            }
        }
        self.shared.settle(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::ConfigError;
    use crate::exporter::InMemoryExporter;
    use crate::span::SpanKind;

    fn span(i: u64) -> Span {
        let mut span = Span::new(u128::from(i), i, None, format!("span-{i}"), SpanKind::Internal);
        span.finish();
        span
    }

    fn test_config() -> ExporterConfig {
        ExporterConfig::default()
            .with_flush_interval(Duration::from_secs(3600))
            .with_max_batch_size(10)
            .with_retry(RetryPolicy::no_retry())
    }

    /// Blocks every export until released.
    struct GatedExporter {
        gate: Arc<tokio::sync::Semaphore>,
    }

    impl TelemetryExporter for GatedExporter {
        async fn export(&self, _batch: TelemetryBatch) -> Result<(), ExportError> {
            let _permit = self.gate.acquire().await.map_err(|e| ExportError::Transport(e.to_string()))?;
            Ok(())
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_force_flush_delivers_partial_batches() {
        let exporter = InMemoryExporter::new();
        let pipeline = ExportPipeline::start(
            &test_config(),
            Arc::new(exporter.clone()),
            Arc::new(PipelineStats::new()),
        )
        .unwrap();
        let handle = pipeline.handle();

        for i in 1..=3 {
            handle.push_span(span(i)).unwrap();
        }
        assert!(exporter.spans().is_empty());
        assert_eq!(handle.buffered_records(), 3);

        pipeline.force_flush().await.unwrap();
        assert_eq!(exporter.spans().len(), 3);
        assert_eq!(pipeline.stats().records_exported, 3);
    }

    #[tokio::test]
    async fn test_full_batch_is_sent_without_flush() {
        let exporter = InMemoryExporter::new();
        let pipeline = ExportPipeline::start(
            &test_config(),
            Arc::new(exporter.clone()),
            Arc::new(PipelineStats::new()),
        )
        .unwrap();
        let handle = pipeline.handle();

        for i in 1..=10 {
            handle.push_span(span(i)).unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while exporter.spans().len() < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(exporter.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_timer_flush() {
        let exporter = InMemoryExporter::new();
        let config = test_config().with_flush_interval(Duration::from_millis(20));
        let pipeline =
            ExportPipeline::start(&config, Arc::new(exporter.clone()), Arc::new(PipelineStats::new()))
                .unwrap();

        pipeline.handle().push_span(span(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(exporter.spans().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_full_drops_batches() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let config = test_config().with_max_batch_size(1).with_queue_capacity(1);
        let pipeline = ExportPipeline::start(
            &config,
            Arc::new(GatedExporter { gate: Arc::clone(&gate) }),
            Arc::new(PipelineStats::new()),
        )
        .unwrap();
        let handle = pipeline.handle();

        let mut full = 0;
        for i in 1..=20 {
            if handle.push_span(span(i)) == Err(PushError::QueueFull) {
                full += 1;
            }
        }
        // At most one batch in flight plus one queued
        assert!(full >= 18, "only {full} pushes were refused");
        assert_eq!(pipeline.stats().dropped_batches, full);

        gate.add_permits(100);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_refuses_new_records() {
        let exporter = InMemoryExporter::new();
        let stats = Arc::new(PipelineStats::new());
        let pipeline =
            ExportPipeline::start(&test_config(), Arc::new(exporter.clone()), Arc::clone(&stats))
                .unwrap();
        let handle = pipeline.handle();

        for i in 1..=5 {
            handle.push_span(span(i)).unwrap();
        }
        let snapshot = pipeline.shutdown().await;
        assert_eq!(snapshot.records_exported, 5);
        assert_eq!(exporter.spans().len(), 5);

        assert!(!handle.is_accepting());
        assert_eq!(handle.push_span(span(6)), Err(PushError::Closed));
        assert_eq!(stats.dropped_records(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_bounded_with_hanging_exporter() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let config = test_config().with_shutdown_grace(Duration::from_millis(100));
        let pipeline = ExportPipeline::start(
            &config,
            Arc::new(GatedExporter { gate }),
            Arc::new(PipelineStats::new()),
        )
        .unwrap();
        let handle = pipeline.handle();
        for i in 1..=3 {
            handle.push_span(span(i)).unwrap();
        }

        let started = std::time::Instant::now();
        let snapshot = pipeline.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(snapshot.records_exported, 0);
        assert_eq!(snapshot.dropped_records, 3);
    }

    #[test]
    fn test_start_requires_runtime() {
        let result = ExportPipeline::start(
            &test_config(),
            Arc::new(InMemoryExporter::new()),
            Arc::new(PipelineStats::new()),
        );
        assert!(matches!(
            result,
            Err(TelemetryError::Pipeline(PipelineError::NoRuntime))
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let result = ExportPipeline::start(
            &test_config().with_flush_interval(Duration::ZERO),
            Arc::new(InMemoryExporter::new()),
            Arc::new(PipelineStats::new()),
        );
        assert!(matches!(
            result,
            Err(TelemetryError::Config(ConfigError::InvalidValue {
                field: "flush_interval",
                ..
            }))
        ));
    }
}
