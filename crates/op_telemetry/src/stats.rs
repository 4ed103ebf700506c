use std::sync::atomic::{AtomicU64, Ordering};

/// Self-observability counters for the telemetry layer.
///
/// All methods use `Ordering::Relaxed`: these are statistical counters, no
/// control flow depends on them and slightly stale reads are fine.
#[derive(Debug, Default)]
pub struct PipelineStats {
    batches_exported: AtomicU64,
    records_exported: AtomicU64,
    failed_attempts: AtomicU64,
    retries: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_records: AtomicU64,
    misuse_errors: AtomicU64,
    log_emit_failures: AtomicU64,
}

/// Plain copy of [`PipelineStats`] at one point in time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Batches delivered to the collector
    pub batches_exported: u64,
    /// Records inside delivered batches
    pub records_exported: u64,
    /// Delivery attempts that failed (each retry counts)
    pub failed_attempts: u64,
    /// Retries performed after a failed attempt
    pub retries: u64,
    /// Batches discarded (retries exhausted, rejected, queue full, shutdown)
    pub dropped_batches: u64,
    /// Records discarded, including single records refused after shutdown
    pub dropped_records: u64,
    /// Records the exporter skipped because they could not be serialized
    pub skipped_records: u64,
    /// Instrumentation API misuse (duplicate metric, closed span, ...)
    pub misuse_errors: u64,
    /// Log records the emitter could not hand to the pipeline
    pub log_emit_failures: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::Relaxed)
    }

    pub fn dropped_records(&self) -> u64 {
        self.dropped_records.load(Ordering::Relaxed)
    }

    pub fn misuse_errors(&self) -> u64 {
        self.misuse_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_exported: self.batches_exported.load(Ordering::Relaxed),
            records_exported: self.records_exported.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
            skipped_records: 0,
            misuse_errors: self.misuse_errors.load(Ordering::Relaxed),
            log_emit_failures: self.log_emit_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_export(&self, records: usize) {
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
        self.records_exported
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_attempt(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, batches: usize, records: usize) {
        self.dropped_batches
            .fetch_add(batches as u64, Ordering::Relaxed);
        self.dropped_records
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_misuse(&self) {
        self.misuse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_log_emit_failure(&self) {
        self.log_emit_failures.fetch_add(1, Ordering::Relaxed);
    }
}
