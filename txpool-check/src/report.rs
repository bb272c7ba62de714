// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Percentile reporting for latency samples. Diagnostic only.

use std::fmt::Write;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Trackable range in microseconds: 1 µs to 60 s.
pub const LOWEST_TRACKABLE_MICROS: u64 = 1;
pub const HIGHEST_TRACKABLE_MICROS: u64 = 60_000_000;
pub const SIGNIFICANT_FIGURES: u8 = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub min: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub p999: Duration,
    pub max: Duration,
    pub mean: Duration,
}

pub struct LatencyRecorder {
    histogram: Histogram<u64>,
    skipped: u64,
}

impl LatencyRecorder {
    pub fn new() -> Result<Self, hdrhistogram::CreationError> {
        Ok(Self {
            histogram: Histogram::new_with_bounds(
                LOWEST_TRACKABLE_MICROS,
                HIGHEST_TRACKABLE_MICROS,
                SIGNIFICANT_FIGURES,
            )?,
            skipped: 0,
        })
    }

    pub fn record(&mut self, latency: Duration) {
        let micros = i64::try_from(latency.as_micros()).unwrap_or(i64::MAX);
        self.record_micros(micros);
    }

    /// Negative samples are skipped; samples above the range are clamped.
    pub fn record_micros(&mut self, micros: i64) {
        match u64::try_from(micros) {
            Ok(value) => self.histogram.saturating_record(value),
            Err(_) => self.skipped += 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn stats(&self) -> Option<LatencyStats> {
        if self.histogram.is_empty() {
            return None;
        }
        let at = |quantile: f64| Duration::from_micros(self.histogram.value_at_quantile(quantile));
        Some(LatencyStats {
            count: self.histogram.len(),
            min: Duration::from_micros(self.histogram.min()),
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            p999: at(0.999),
            max: Duration::from_micros(self.histogram.max()),
            mean: Duration::from_secs_f64(self.histogram.mean() / 1_000_000.0),
        })
    }

    /// Percentile distribution in the classic HdrHistogram text layout,
    /// values in milliseconds.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>12} {:>14} {:>10} {:>14}\n",
            "Value", "Percentile", "TotalCount", "1/(1-Percentile)"
        );
        let mut total = 0_u64;
        for step in self.histogram.iter_quantiles(1) {
            total += step.count_since_last_iteration();
            let quantile = step.quantile_iterated_to();
            let value_ms = step.value_iterated_to() as f64 / 1_000.0;
            if quantile < 1.0 {
                let _ = writeln!(
                    out,
                    "{value_ms:>12.3} {quantile:>14.12} {total:>10} {:>14.2}",
                    1.0 / (1.0 - quantile)
                );
            } else {
                let _ = writeln!(out, "{value_ms:>12.3} {quantile:>14.12} {total:>10}");
            }
        }
        let _ = writeln!(
            out,
            "#[Mean    = {:>12.3}, StdDeviation   = {:>12.3}]",
            self.histogram.mean() / 1_000.0,
            self.histogram.stdev() / 1_000.0
        );
        let _ = writeln!(
            out,
            "#[Max     = {:>12.3}, Total count    = {:>12}]",
            self.histogram.max() as f64 / 1_000.0,
            self.histogram.len()
        );
        out
    }
}

fn format_ms(value: Duration) -> String {
    format!("{:.3} ms", value.as_secs_f64() * 1000.0)
}

/// One-line summary for logs.
pub fn format_stats(stats: &LatencyStats) -> String {
    format!(
        "count={} min={} p50={} p95={} p99={} p99.9={} max={} mean={}",
        stats.count,
        format_ms(stats.min),
        format_ms(stats.p50),
        format_ms(stats.p95),
        format_ms(stats.p99),
        format_ms(stats.p999),
        format_ms(stats.max),
        format_ms(stats.mean)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_follow_recorded_samples() {
        let mut recorder = LatencyRecorder::new().expect("histogram");
        for millis in 1_u64..=1_000 {
            recorder.record(Duration::from_millis(millis));
        }
        let stats = recorder.stats().expect("stats");
        assert_eq!(stats.count, 1_000);
        assert_eq!(stats.min, Duration::from_millis(1));
        assert!(stats.p50 >= Duration::from_millis(499) && stats.p50 <= Duration::from_millis(501));
        assert!(stats.p999 >= stats.p99);
        assert!(stats.p999 <= stats.max);
    }

    #[test]
    fn negative_samples_are_skipped() {
        let mut recorder = LatencyRecorder::new().expect("histogram");
        recorder.record_micros(-5);
        recorder.record_micros(2_500);
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.skipped(), 1);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let mut recorder = LatencyRecorder::new().expect("histogram");
        recorder.record(Duration::from_secs(120));
        let stats = recorder.stats().expect("stats");
        assert!(stats.max <= Duration::from_secs(61));
    }

    #[test]
    fn render_has_header_rows_and_footer() {
        let mut recorder = LatencyRecorder::new().expect("histogram");
        for micros in [1_000_i64, 2_000, 3_000, 4_000] {
            recorder.record_micros(micros);
        }
        let table = recorder.render();
        assert!(table.starts_with(&format!("{:>12}", "Value")));
        assert!(table.contains("TotalCount"));
        assert!(table.contains("Total count    ="));
        assert!(table.lines().filter(|line| !line.starts_with('#')).count() > 3);
    }

    #[test]
    fn empty_recorder_has_no_stats() {
        let recorder = LatencyRecorder::new().expect("histogram");
        assert!(recorder.is_empty());
        assert!(recorder.stats().is_none());
    }
}
