//! Periodic throughput reporting for the ingest loop.

use std::time::Duration;

use observability_deps::tracing::info;
use tokio::time::Instant;

/// Default time between two throughput reports
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// A point-in-time throughput observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    /// Rows persisted per second since the previous report
    pub rows_per_sec: f64,
    /// Rows in the batch that triggered the report
    pub batch_size: usize,
    /// Time taken by that batch's insert
    pub insert_time: Duration,
    /// Rows persisted since the loop started
    pub total_processed: u64,
}

/// Tracks persisted rows and emits a report at most once per interval
#[derive(Debug, Clone, Copy)]
pub struct MetricsReporter {
    interval: Duration,
    total_processed: u64,
    processed_at_last_report: u64,
    last_report: Instant,
}

impl MetricsReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            total_processed: 0,
            processed_at_last_report: 0,
            last_report: Instant::now(),
        }
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed
    }

    /// Account for a persisted batch, logging a report if the interval has elapsed
    pub fn record_flush(
        &mut self,
        batch_size: usize,
        insert_time: Duration,
        now: Instant,
    ) -> Option<ThroughputReport> {
        self.total_processed += batch_size as u64;

        let elapsed = now.saturating_duration_since(self.last_report);
        if elapsed < self.interval {
            return None;
        }

        let rows = self.total_processed - self.processed_at_last_report;
        let secs = elapsed.as_secs_f64();
        let rows_per_sec = if secs > 0.0 { rows as f64 / secs } else { 0.0 };
        let report = ThroughputReport {
            rows_per_sec,
            batch_size,
            insert_time,
            total_processed: self.total_processed,
        };

        info!(
            rows_per_sec = format_args!("{rows_per_sec:.0}"),
            batch_size,
            insert_ms = insert_time.as_millis() as u64,
            total = self.total_processed,
            "ingest throughput"
        );

        self.last_report = now;
        self.processed_at_last_report = self.total_processed;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test(tokio::test(start_paused = true))]
    async fn reports_once_per_interval() {
        let mut reporter = MetricsReporter::new(Duration::from_secs(5));
        let insert = Duration::from_millis(12);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(reporter.record_flush(1000, insert, Instant::now()), None);

        tokio::time::advance(Duration::from_secs(3)).await;
        let report = reporter.record_flush(1000, insert, Instant::now()).unwrap();
        assert_eq!(
            report,
            ThroughputReport {
                rows_per_sec: 400.0,
                batch_size: 1000,
                insert_time: insert,
                total_processed: 2000,
            }
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(reporter.record_flush(500, insert, Instant::now()), None);
        assert_eq!(reporter.total_processed(), 2500);

        // the rate only counts rows since the previous report
        tokio::time::advance(Duration::from_secs(4)).await;
        let report = reporter.record_flush(500, insert, Instant::now()).unwrap();
        assert_eq!(report.rows_per_sec, 200.0);
        assert_eq!(report.total_processed, 3000);
    }
}
