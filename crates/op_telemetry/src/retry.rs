//! Retry wrapper for exporters.
//!
//! [`RetryingExporter`] bounds every attempt by a timeout and retries
//! transient failures with capped exponential backoff plus jitter.
//! Non-transient errors (rejections, serialization) are returned at once.

use crate::config::RetryPolicy;
use crate::batch::TelemetryBatch;
use crate::exporter::{ExportError, TelemetryExporter};
use crate::stats::PipelineStats;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// An exporter wrapper that retries failed exports with exponential backoff.
pub struct RetryingExporter<E: TelemetryExporter> {
    inner: E,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    jitter: bool,
    stats: Arc<PipelineStats>,
    /// Retry attempts made
    total_retries: AtomicU64,
    /// Exports that succeeded after at least one retry
    recovered_exports: AtomicU64,
}

impl<E: TelemetryExporter> RetryingExporter<E> {
    pub fn new(
        inner: E,
        policy: RetryPolicy,
        attempt_timeout: Duration,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            inner,
            policy,
            attempt_timeout,
            jitter: true,
            stats,
            total_retries: AtomicU64::new(0),
            recovered_exports: AtomicU64::new(0),
        }
    }

    /// Disables the random 0-10% added to each backoff delay.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn recovered_exports(&self) -> u64 {
        self.recovered_exports.load(Ordering::Relaxed)
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.policy.backoff_for(attempt);
        if !self.jitter {
            return delay;
        }
        let jitter_range = delay.as_millis() as u64 / 10;
        if jitter_range == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..jitter_range);
        delay + Duration::from_millis(jitter)
    }
}

impl<E: TelemetryExporter> TelemetryExporter for RetryingExporter<E> {
    async fn export(&self, batch: TelemetryBatch) -> Result<(), ExportError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let batch = self.inner.prepare(batch);

        for attempt in 0..max_attempts {
            let delay = self.delay_for_attempt(attempt);
            if !delay.is_zero() {
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                self.stats.record_retry();
                sleep(delay).await;
            }

            let outcome = tokio::time::timeout(self.attempt_timeout, self.inner.export(batch.clone()))
                .await
                .unwrap_or(Err(ExportError::Timeout));

            match outcome {
                Ok(()) => {
                    if attempt > 0 {
                        self.recovered_exports.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(());
                }
                Err(e) => {
                    self.stats.record_failed_attempt();
                    if !e.is_transient() {
                        return Err(e);
                    }
                    tracing::debug!(
                        exporter = self.inner.name(),
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "export attempt failed"
                    );
                }
            }
        }

        Err(ExportError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn prepare(&self, batch: TelemetryBatch) -> TelemetryBatch {
        self.inner.prepare(batch)
    }

    fn skipped_records(&self) -> u64 {
        self.inner.skipped_records()
    }
}
