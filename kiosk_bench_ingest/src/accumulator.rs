//! Size-or-time batching of decoded rows.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::{persister::MAX_ROWS_PER_STATEMENT, record::RowRecord};

#[derive(Debug, Clone, Copy, Error)]
pub enum BatchConfigError {
    #[error("batch size threshold must be between 1 and {max}, got {size}")]
    SizeOutOfRange { size: usize, max: usize },
}

/// When a batch is flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    size_threshold: usize,
    time_threshold: Duration,
}

impl BatchConfig {
    /// Flush once `size_threshold` rows are buffered, or once `time_threshold` has passed since
    /// the last flush with at least one row buffered.
    ///
    /// The size threshold is bounded so that one batch always fits in a single statement.
    pub fn new(size_threshold: usize, time_threshold: Duration) -> Result<Self, BatchConfigError> {
        if size_threshold == 0 || size_threshold > MAX_ROWS_PER_STATEMENT {
            return Err(BatchConfigError::SizeOutOfRange {
                size: size_threshold,
                max: MAX_ROWS_PER_STATEMENT,
            });
        }
        Ok(Self {
            size_threshold,
            time_threshold,
        })
    }

    pub fn size_threshold(&self) -> usize {
        self.size_threshold
    }

    pub fn time_threshold(&self) -> Duration {
        self.time_threshold
    }
}

/// The reason a batch was flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The buffer reached the size threshold
    Size,
    /// The time threshold elapsed with rows buffered
    Time,
    /// The loop is stopping
    Shutdown,
}

/// Buffers rows between flushes
///
/// Owned by the single ingest loop. The timer measures time since the previous flush completed
/// (or since creation), not since the first buffered row.
#[derive(Debug)]
pub struct BatchAccumulator {
    config: BatchConfig,
    buffer: Vec<RowRecord>,
    last_flush: Instant,
}

impl BatchAccumulator {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            buffer: Vec::with_capacity(config.size_threshold),
            last_flush: Instant::now(),
        }
    }

    pub fn push(&mut self, row: RowRecord) {
        self.buffer.push(row);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Evaluate the flush trigger at `now`
    ///
    /// The size trigger wins when both are satisfied; an empty buffer never triggers.
    pub fn should_flush(&self, now: Instant) -> Option<FlushTrigger> {
        if self.buffer.len() >= self.config.size_threshold {
            Some(FlushTrigger::Size)
        } else if !self.buffer.is_empty()
            && now.saturating_duration_since(self.last_flush) >= self.config.time_threshold
        {
            Some(FlushTrigger::Time)
        } else {
            None
        }
    }

    /// Take the buffered rows, in arrival order, leaving an empty buffer behind
    pub fn take_batch(&mut self) -> Vec<RowRecord> {
        std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.config.size_threshold),
        )
    }

    /// Restart the flush timer
    pub fn mark_flushed(&mut self, now: Instant) {
        self.last_flush = now;
    }
}
