//! Telemetry sufficiency gate: sample count, time-bucket coverage, and
//! source staleness, combined into one pass/fail predicate with a
//! human-readable `reason`.

use crate::control::model::{MetricSample, SourceHealth};

/// Number of equal-width time buckets the window is partitioned into for the
/// coverage check. The bucket count is left unspecified ("partition
/// samples into N time buckets"); ten buckets gives a 10% coverage
/// granularity, matching the `min_bucket_coverage_pct` default of 80%
/// resolving to a clean "at least 8 of 10 buckets populated" rule. See
/// DESIGN.md for the open-question resolution.
pub const BUCKET_COUNT: usize = 10;

/// Result of a sufficiency evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct SufficiencyResult {
    /// Whether every configured condition passed.
    pub is_sufficient: bool,
    /// Number of samples seen in the window.
    pub sample_count: usize,
    /// Minimum required by configuration.
    pub required_samples: usize,
    /// Percentage of time buckets with at least one sample.
    pub bucket_coverage_pct: f64,
    /// Source ids currently reported as stale.
    pub stale_sources: Vec<String>,
    /// Every failed condition, joined by `"; "`. Empty when sufficient.
    pub reason: String,
}

/// Pure sufficiency predicate over a sample list and source-health vector.
#[derive(Debug, Clone)]
pub struct SufficiencyChecker {
    min_samples: usize,
    min_bucket_coverage_pct: f64,
    check_source_stale: bool,
}

impl SufficiencyChecker {
    /// Build a checker from the derived minimum sample count and configured
    /// bucket-coverage floor.
    #[must_use]
    pub fn new(min_samples: usize, min_bucket_coverage_pct: f64, check_source_stale: bool) -> Self {
        Self {
            min_samples,
            min_bucket_coverage_pct,
            check_source_stale,
        }
    }

    /// Evaluate sufficiency for a window `[window_start_ms, window_end_ms]`.
    #[must_use]
    pub fn check(
        &self,
        samples: &[MetricSample],
        health: &[SourceHealth],
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> SufficiencyResult {
        let sample_count = samples.len();
        let mut failures = Vec::new();

        if sample_count < self.min_samples {
            failures.push(format!(
                "sample_count {sample_count} below required {}",
                self.min_samples
            ));
        }

        let bucket_coverage_pct = bucket_coverage(samples, window_start_ms, window_end_ms);
        if bucket_coverage_pct < self.min_bucket_coverage_pct {
            failures.push(format!(
                "bucket_coverage_pct {bucket_coverage_pct:.1} below required {:.1}",
                self.min_bucket_coverage_pct
            ));
        }

        let stale_sources: Vec<String> = health
            .iter()
            .filter(|h| h.is_stale)
            .map(|h| h.source_id.clone())
            .collect();
        if self.check_source_stale && !stale_sources.is_empty() {
            failures.push(format!("stale sources: {}", stale_sources.join(", ")));
        }

        SufficiencyResult {
            is_sufficient: failures.is_empty(),
            sample_count,
            required_samples: self.min_samples,
            bucket_coverage_pct,
            stale_sources,
            reason: failures.join("; "),
        }
    }
}

fn bucket_coverage(samples: &[MetricSample], window_start_ms: i64, window_end_ms: i64) -> f64 {
    let span = window_end_ms - window_start_ms;
    if span <= 0 {
        return if samples.is_empty() { 0.0 } else { 100.0 };
    }
    let bucket_width = (span as f64 / BUCKET_COUNT as f64).max(1.0);
    let mut occupied = vec![false; BUCKET_COUNT];
    for sample in samples {
        if sample.timestamp_ms < window_start_ms || sample.timestamp_ms > window_end_ms {
            continue;
        }
        let offset = (sample.timestamp_ms - window_start_ms) as f64;
        let bucket = ((offset / bucket_width) as usize).min(BUCKET_COUNT - 1);
        occupied[bucket] = true;
    }
    let distinct_buckets = occupied.iter().filter(|b| **b).count();
    (distinct_buckets as f64 / BUCKET_COUNT as f64) * 100.0
}
