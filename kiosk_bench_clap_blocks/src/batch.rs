//! Batching and reporting config for the ingest loop.
use std::time::Duration;

use kiosk_bench_ingest::{
    BatchConfig, BatchConfigError, IngestConfig, persister::MAX_ROWS_PER_STATEMENT,
    record::DEFAULT_ORIGIN_TAG,
};

/// CLI config for batching.
#[derive(Debug, Clone, clap::Parser)]
pub struct BatchingConfig {
    /// Number of buffered rows that triggers a flush.
    #[clap(
        long = "batch-size",
        env = "KIOSK_BENCH_BATCH_SIZE",
        default_value = "1000",
        value_parser = clap::value_parser!(u16).range(1..=MAX_ROWS_PER_STATEMENT as i64),
    )]
    pub batch_size: u16,

    /// Time since the last flush after which any buffered rows are flushed.
    #[clap(
        long = "batch-time",
        env = "KIOSK_BENCH_BATCH_TIME",
        default_value = "1s",
        value_parser = humantime::parse_duration,
    )]
    pub batch_time: Duration,

    /// Prefix added to every stored `event_type`, identifying this consumer.
    #[clap(
        long = "origin-tag",
        env = "KIOSK_BENCH_ORIGIN_TAG",
        default_value = DEFAULT_ORIGIN_TAG,
        action
    )]
    pub origin_tag: String,

    /// Minimum time between two throughput reports.
    #[clap(
        long = "report-interval",
        env = "KIOSK_BENCH_REPORT_INTERVAL",
        default_value = "5s",
        value_parser = humantime::parse_duration,
    )]
    pub report_interval: Duration,
}

impl BatchingConfig {
    pub fn ingest_config(&self, poll_timeout: Duration) -> Result<IngestConfig, BatchConfigError> {
        Ok(IngestConfig {
            poll_timeout,
            batch: BatchConfig::new(self.batch_size as usize, self.batch_time)?,
            report_interval: self.report_interval,
        })
    }
}
