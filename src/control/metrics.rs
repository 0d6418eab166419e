//! Per-source telemetry ingestion, windowed query, and staleness detection.
//!
//! Ingest may run concurrently with ticks from other producers (§5); storage
//! is a `parking_lot::Mutex`-guarded per-source append-only `Vec`, in the
//! spirit of a simple rolling sample buffer, generalized from a
//! fixed-capacity ring to an unbounded per-source log so it supports
//! arbitrary out-of-order windowed queries rather than a fixed-size rolling
//! estimator.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::control::model::{MetricSample, SourceHealth};

/// Ingests timestamped samples per source and answers windowed queries.
///
/// No deduplication, no reordering: out-of-order `ingest` is permitted and
/// queries still return every sample whose timestamp falls in the requested
/// window.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    samples: HashMap<String, Vec<MetricSample>>,
    last_seen: HashMap<String, i64>,
}

impl MetricsCollector {
    /// An empty collector with no known sources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample for `source_id`, updating `last_seen` to the sample's
    /// own timestamp (not wall-clock-of-ingest — out-of-order ingest must not
    /// corrupt staleness accounting with receipt time).
    pub fn ingest(&self, source_id: &str, sample: MetricSample) {
        let mut inner = self.inner.lock();
        inner
            .samples
            .entry(source_id.to_string())
            .or_default()
            .push(sample);
        let last_seen = inner.last_seen.entry(source_id.to_string()).or_insert(sample.timestamp_ms);
        if sample.timestamp_ms > *last_seen {
            *last_seen = sample.timestamp_ms;
        }
    }

    /// Samples for one source with `window_start_ms <= ts <= window_end_ms`,
    /// inclusive on both ends, in ingestion order.
    #[must_use]
    pub fn get_samples(
        &self,
        source_id: &str,
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> Vec<MetricSample> {
        let inner = self.inner.lock();
        inner
            .samples
            .get(source_id)
            .map(|samples| in_window(samples, window_start_ms, window_end_ms))
            .unwrap_or_default()
    }

    /// Union of in-window samples across every known source.
    #[must_use]
    pub fn get_all_samples(&self, window_start_ms: i64, window_end_ms: i64) -> Vec<MetricSample> {
        let inner = self.inner.lock();
        inner
            .samples
            .values()
            .flat_map(|samples| in_window(samples, window_start_ms, window_end_ms))
            .collect()
    }

    /// Per-source staleness as of `now_ms`. A source with no samples at all
    /// is stale by definition.
    #[must_use]
    pub fn check_health(&self, now_ms: i64, stale_threshold_ms: i64) -> Vec<SourceHealth> {
        let inner = self.inner.lock();
        inner
            .samples
            .keys()
            .map(|source_id| {
                let last_sample_ms = inner.last_seen.get(source_id).copied();
                let is_stale = last_sample_ms
                    .is_none_or(|last| now_ms - last > stale_threshold_ms);
                SourceHealth {
                    source_id: source_id.clone(),
                    last_sample_ms,
                    is_stale,
                }
            })
            .collect()
    }

    /// Every known source id, for callers building a synthetic health vector
    /// when no samples have arrived yet at all.
    #[must_use]
    pub fn known_sources(&self) -> Vec<String> {
        self.inner.lock().samples.keys().cloned().collect()
    }
}

fn in_window(samples: &[MetricSample], window_start_ms: i64, window_end_ms: i64) -> Vec<MetricSample> {
    samples
        .iter()
        .copied()
        .filter(|s| s.timestamp_ms >= window_start_ms && s.timestamp_ms <= window_end_ms)
        .collect()
}
