//! Named metric instruments.
//!
//! A [`MetricRegistry`] owns counters, up-down counters and histograms keyed
//! by name. Every accepted observation updates an in-process running value
//! and queues one [`MetricPoint`] on the export pipeline; nothing here waits
//! on the network.

use crate::attribute::Attributes;
use crate::error::InstrumentationError;
use crate::pipeline::PipelineHandle;
use crate::span::unix_nanos;
use crate::stats::PipelineStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Instrument kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Monotonic sum of non-negative deltas
    Counter,
    /// Sum of signed deltas
    UpDownCounter,
    /// Distribution of recorded samples
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Counter => "counter",
            Self::UpDownCounter => "up-down counter",
            Self::Histogram => "histogram",
        })
    }
}

/// One observation queued for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: Arc<str>,
    pub kind: MetricKind,
    pub unit: Arc<str>,
    pub description: Arc<str>,
    pub value: f64,
    pub attributes: Attributes,
    /// Unix nanoseconds
    pub timestamp: u64,
}

/// Registration data of an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: Arc<str>,
    pub kind: MetricKind,
    pub description: Arc<str>,
    pub unit: Arc<str>,
}

#[derive(Debug)]
struct Instrument {
    descriptor: MetricDescriptor,
    /// f64 bits of the running sum
    value: AtomicU64,
    /// Accepted observations
    count: AtomicU64,
}

impl Instrument {
    fn accumulate(&self, delta: f64) {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct RegistryInner {
    instruments: RwLock<HashMap<Arc<str>, Arc<Instrument>>>,
    pipeline: PipelineHandle,
    stats: Arc<PipelineStats>,
}

/// Creates and holds named instruments. Clones share the same instruments.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    inner: Arc<RegistryInner>,
}

impl MetricRegistry {
    pub fn new(pipeline: PipelineHandle) -> Self {
        let stats = Arc::clone(pipeline.stats());
        Self {
            inner: Arc::new(RegistryInner {
                instruments: RwLock::new(HashMap::new()),
                pipeline,
                stats,
            }),
        }
    }

    /// Registers an instrument, or returns the existing one when `name` is
    /// already registered with the same kind.
    pub fn register(
        &self,
        name: &str,
        kind: MetricKind,
        description: &str,
        unit: &str,
    ) -> Result<MetricHandle, InstrumentationError> {
        self.try_register(name, kind, description, unit)
            .inspect_err(|_| self.inner.stats.record_misuse())
    }

    fn try_register(
        &self,
        name: &str,
        kind: MetricKind,
        description: &str,
        unit: &str,
    ) -> Result<MetricHandle, InstrumentationError> {
        if name.trim().is_empty() {
            return Err(InstrumentationError::InvalidName);
        }

        if let Some(existing) = self.lookup(name) {
            return self.handle_for(existing, kind);
        }

        let mut instruments = self
            .inner
            .instruments
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Another caller may have registered it between the read and the write lock
        let instrument = instruments
            .entry(Arc::from(name))
            .or_insert_with(|| {
                Arc::new(Instrument {
                    descriptor: MetricDescriptor {
                        name: Arc::from(name),
                        kind,
                        description: Arc::from(description),
                        unit: Arc::from(unit),
                    },
                    value: AtomicU64::new(0.0_f64.to_bits()),
                    count: AtomicU64::new(0),
                })
            })
            .clone();
        drop(instruments);
        self.handle_for(instrument, kind)
    }

    fn lookup(&self, name: &str) -> Option<Arc<Instrument>> {
        self.inner
            .instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn handle_for(
        &self,
        instrument: Arc<Instrument>,
        kind: MetricKind,
    ) -> Result<MetricHandle, InstrumentationError> {
        if instrument.descriptor.kind != kind {
            return Err(InstrumentationError::DuplicateMetric {
                name: instrument.descriptor.name.to_string(),
                existing: instrument.descriptor.kind,
                requested: kind,
            });
        }
        Ok(MetricHandle {
            instrument,
            registry: Arc::clone(&self.inner),
        })
    }

    pub fn counter(
        &self,
        name: &str,
        description: &str,
        unit: &str,
    ) -> Result<MetricHandle, InstrumentationError> {
        self.register(name, MetricKind::Counter, description, unit)
    }

    pub fn up_down_counter(
        &self,
        name: &str,
        description: &str,
        unit: &str,
    ) -> Result<MetricHandle, InstrumentationError> {
        self.register(name, MetricKind::UpDownCounter, description, unit)
    }

    pub fn histogram(
        &self,
        name: &str,
        description: &str,
        unit: &str,
    ) -> Result<MetricHandle, InstrumentationError> {
        self.register(name, MetricKind::Histogram, description, unit)
    }

    /// Registered instruments, sorted by name.
    pub fn instruments(&self) -> Vec<MetricDescriptor> {
        let mut descriptors: Vec<_> = self
            .inner
            .instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|i| i.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }
}

/// Handle to one registered instrument. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    instrument: Arc<Instrument>,
    registry: Arc<RegistryInner>,
}

impl MetricHandle {
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.instrument.descriptor
    }

    /// Adds `delta` to a counter or up-down counter.
    ///
    /// Counters reject negative and non-finite deltas and stay unchanged.
    pub fn add(&self, delta: f64, attributes: Attributes) -> Result<(), InstrumentationError> {
        let descriptor = &self.instrument.descriptor;
        let checked = match descriptor.kind {
            MetricKind::Histogram => Err(InstrumentationError::KindMismatch {
                name: descriptor.name.to_string(),
                kind: descriptor.kind,
                operation: "add",
            }),
            MetricKind::Counter if !delta.is_finite() || delta < 0.0 => {
                Err(InstrumentationError::InvalidDelta {
                    name: descriptor.name.to_string(),
                    delta,
                })
            }
            MetricKind::UpDownCounter if !delta.is_finite() => {
                Err(InstrumentationError::InvalidDelta {
                    name: descriptor.name.to_string(),
                    delta,
                })
            }
            MetricKind::Counter | MetricKind::UpDownCounter => Ok(()),
        };
        checked.inspect_err(|_| self.registry.stats.record_misuse())?;
        self.observe(delta, attributes);
        Ok(())
    }

    /// Records one histogram sample.
    ///
    /// Non-finite samples are accepted here; the OTLP encoder skips them.
    pub fn record(&self, value: f64, attributes: Attributes) -> Result<(), InstrumentationError> {
        let descriptor = &self.instrument.descriptor;
        if descriptor.kind != MetricKind::Histogram {
            self.registry.stats.record_misuse();
            return Err(InstrumentationError::KindMismatch {
                name: descriptor.name.to_string(),
                kind: descriptor.kind,
                operation: "record",
            });
        }
        self.observe(value, attributes);
        Ok(())
    }

    /// Running total of accepted deltas (sum of samples for histograms).
    pub fn value(&self) -> f64 {
        f64::from_bits(self.instrument.value.load(Ordering::Relaxed))
    }

    /// Number of accepted observations.
    pub fn count(&self) -> u64 {
        self.instrument.count.load(Ordering::Relaxed)
    }

    fn observe(&self, value: f64, attributes: Attributes) {
        self.instrument.accumulate(value);
        let descriptor = &self.instrument.descriptor;
        let point = MetricPoint {
            name: Arc::clone(&descriptor.name),
            kind: descriptor.kind,
            unit: Arc::clone(&descriptor.unit),
            description: Arc::clone(&descriptor.description),
            value,
            attributes,
            timestamp: unix_nanos(),
        };
        // Refusals are already counted as dropped by the pipeline
        let _ = self.registry.pipeline.push_metric(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes;
    use crate::config::ExporterConfig;
    use crate::exporter::InMemoryExporter;
    use crate::pipeline::ExportPipeline;
    use std::time::Duration;

    fn setup() -> (ExportPipeline, MetricRegistry, InMemoryExporter) {
        let exporter = InMemoryExporter::new();
        let config = ExporterConfig::default().with_flush_interval(Duration::from_secs(3600));
        let pipeline = ExportPipeline::start(
            &config,
            Arc::new(exporter.clone()),
            Arc::new(PipelineStats::new()),
        )
        .unwrap();
        let registry = MetricRegistry::new(pipeline.handle());
        (pipeline, registry, exporter)
    }

    #[tokio::test]
    async fn test_counter_accumulates_and_exports() {
        let (pipeline, registry, exporter) = setup();
        let counter = registry.counter("requests", "Total requests", "1").unwrap();

        counter.add(1.0, attributes! { "route" => "/users" }).unwrap();
        counter.add(2.0, attributes! { "route" => "/users" }).unwrap();
        assert_eq!(counter.value(), 3.0);
        assert_eq!(counter.count(), 2);

        pipeline.force_flush().await.unwrap();
        assert_eq!(exporter.metric_points().len(), 2);
        assert_eq!(exporter.metric_total("requests", &[("route", "/users".into())]), 3.0);
    }

    #[tokio::test]
    async fn test_negative_counter_delta_rejected() {
        let (pipeline, registry, exporter) = setup();
        let counter = registry.counter("requests", "", "1").unwrap();
        counter.add(5.0, Attributes::new()).unwrap();

        let err = counter.add(-1.0, Attributes::new()).unwrap_err();
        assert!(matches!(err, InstrumentationError::InvalidDelta { .. }));
        assert!(counter.add(f64::NAN, Attributes::new()).is_err());
        assert_eq!(counter.value(), 5.0);
        assert_eq!(pipeline.stats().misuse_errors, 2);

        pipeline.force_flush().await.unwrap();
        assert_eq!(exporter.metric_total("requests", &[]), 5.0);
    }

    #[tokio::test]
    async fn test_up_down_counter_accepts_negative() {
        let (_pipeline, registry, _exporter) = setup();
        let active = registry.up_down_counter("active_users", "", "1").unwrap();
        active.add(3.0, Attributes::new()).unwrap();
        active.add(-1.0, Attributes::new()).unwrap();
        assert_eq!(active.value(), 2.0);
    }

    #[tokio::test]
    async fn test_duplicate_name_with_other_kind() {
        let (_pipeline, registry, _exporter) = setup();
        let first = registry.counter("latency", "", "ms").unwrap();
        let again = registry.counter("latency", "", "ms").unwrap();
        first.add(1.0, Attributes::new()).unwrap();
        assert_eq!(again.value(), 1.0);

        let err = registry.histogram("latency", "", "ms").unwrap_err();
        assert_eq!(
            err,
            InstrumentationError::DuplicateMetric {
                name: "latency".into(),
                existing: MetricKind::Counter,
                requested: MetricKind::Histogram,
            }
        );
        assert_eq!(registry.instruments().len(), 1);
    }

    #[tokio::test]
    async fn test_kind_mismatch_and_invalid_name() {
        let (_pipeline, registry, _exporter) = setup();
        let hist = registry.histogram("duration", "", "ms").unwrap();
        let counter = registry.counter("requests", "", "1").unwrap();

        assert!(matches!(
            hist.add(1.0, Attributes::new()),
            Err(InstrumentationError::KindMismatch { operation: "add", .. })
        ));
        assert!(matches!(
            counter.record(1.0, Attributes::new()),
            Err(InstrumentationError::KindMismatch { operation: "record", .. })
        ));
        assert_eq!(registry.counter("  ", "", "1").unwrap_err(), InstrumentationError::InvalidName);

        hist.record(12.5, Attributes::new()).unwrap();
        assert_eq!(hist.count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_are_exact() {
        let (pipeline, registry, exporter) = setup();
        let counter = registry.counter("hits", "", "1").unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..250 {
                    counter.add(f64::from(i % 3), Attributes::new()).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let expected = 8.0 * (0..250).map(|i| f64::from(i % 3)).sum::<f64>();
        assert_eq!(counter.value(), expected);

        pipeline.force_flush().await.unwrap();
        assert_eq!(exporter.metric_total("hits", &[]), expected);
        assert_eq!(pipeline.stats().dropped_records, 0);
    }
}
