//! The single-task ingest loop tying the pieces together.
//!
//! Each iteration does one bounded poll, decodes at most one message into the batch and then
//! evaluates the flush trigger. The shutdown flag is checked once per iteration; after it is set
//! the loop performs one forced flush of whatever is buffered and releases the transport and the
//! database connection. Releasing happens on every exit path, including errors.

use std::time::Duration;

use kiosk_bench_shutdown::ShutdownController;
use observability_deps::tracing::{error, info, warn};
use thiserror::Error;
use tokio::time::Instant;

use crate::{
    accumulator::{BatchAccumulator, BatchConfig, FlushTrigger},
    metrics::MetricsReporter,
    persister::{BulkPersister, PersistError, StatementSink},
    record::RecordDecoder,
    transport::{InboundTransport, PollError},
};

/// Default bound on a single poll
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("consuming messages failed: {0}")]
    Poll(#[from] PollError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    pub poll_timeout: Duration,
    pub batch: BatchConfig,
    pub report_interval: Duration,
}

/// What a finished loop did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub total_processed: u64,
    pub size_flushes: u64,
    pub time_flushes: u64,
    pub shutdown_flushes: u64,
    pub decode_errors: u64,
    pub transient_errors: u64,
}

impl IngestSummary {
    pub fn flushes(&self) -> u64 {
        self.size_flushes + self.time_flushes + self.shutdown_flushes
    }

    fn count_flush(&mut self, trigger: FlushTrigger) {
        match trigger {
            FlushTrigger::Size => self.size_flushes += 1,
            FlushTrigger::Time => self.time_flushes += 1,
            FlushTrigger::Shutdown => self.shutdown_flushes += 1,
        }
    }
}

#[derive(Debug)]
pub struct IngestLoop<I, S> {
    transport: I,
    decoder: RecordDecoder,
    persister: BulkPersister<S>,
    accumulator: BatchAccumulator,
    metrics: MetricsReporter,
    shutdown: ShutdownController,
    poll_timeout: Duration,
    summary: IngestSummary,
}

impl<I, S> IngestLoop<I, S>
where
    I: InboundTransport,
    S: StatementSink,
{
    pub fn new(
        transport: I,
        decoder: RecordDecoder,
        persister: BulkPersister<S>,
        config: IngestConfig,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            transport,
            decoder,
            persister,
            accumulator: BatchAccumulator::new(config.batch),
            metrics: MetricsReporter::new(config.report_interval),
            shutdown,
            poll_timeout: config.poll_timeout,
            summary: IngestSummary::default(),
        }
    }

    /// Run until shutdown is requested or an unrecoverable error occurs
    ///
    /// A failed bulk insert or a fatal transport error ends the loop without a final flush. The
    /// transport and the sink are released either way.
    pub async fn run(mut self) -> Result<IngestSummary, IngestError> {
        info!(
            table = self.persister.table(),
            origin = self.decoder.origin_tag(),
            "ingest loop started"
        );

        let result = self.drive().await;
        if let Err(e) = &result {
            error!(%e, buffered = self.accumulator.len(), "ingest loop aborted");
        }

        self.release().await;

        let summary = IngestSummary {
            total_processed: self.metrics.total_processed(),
            ..self.summary
        };
        info!(
            total_processed = summary.total_processed,
            flushes = summary.flushes(),
            decode_errors = summary.decode_errors,
            "final stats"
        );
        result.map(|()| summary)
    }

    async fn drive(&mut self) -> Result<(), IngestError> {
        while !self.shutdown.is_shutdown_requested() {
            self.step().await?;
        }

        info!(buffered = self.accumulator.len(), "shutdown requested");
        if !self.accumulator.is_empty() {
            self.flush(FlushTrigger::Shutdown).await?;
        }
        Ok(())
    }

    async fn step(&mut self) -> Result<(), IngestError> {
        match self.transport.poll(self.poll_timeout).await {
            Ok(Some(message)) => match self.decoder.decode(message.payload.as_deref()) {
                Ok(row) => self.accumulator.push(row),
                Err(e) => {
                    self.summary.decode_errors += 1;
                    let key = message.key.as_deref().map(String::from_utf8_lossy);
                    error!(
                        %e,
                        key = key.as_deref(),
                        partition = message.partition,
                        offset = message.offset,
                        "dropping undecodable message"
                    );
                }
            },
            Ok(None) => {}
            Err(PollError::Transient(e)) => {
                self.summary.transient_errors += 1;
                warn!(%e, "consumer error, continuing");
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(trigger) = self.accumulator.should_flush(Instant::now()) {
            self.flush(trigger).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, trigger: FlushTrigger) -> Result<(), IngestError> {
        let batch = self.accumulator.take_batch();
        let started = Instant::now();
        self.persister.persist(&batch).await?;

        let now = Instant::now();
        self.metrics
            .record_flush(batch.len(), now.saturating_duration_since(started), now);
        self.accumulator.mark_flushed(now);
        self.summary.count_flush(trigger);
        Ok(())
    }

    async fn release(&mut self) {
        if let Err(e) = self.transport.close().await {
            warn!(%e, "error closing consumer");
        }
        if let Err(e) = self.persister.close().await {
            warn!(%e, "error closing database connection");
        }
        info!("ingest loop stopped");
    }
}
