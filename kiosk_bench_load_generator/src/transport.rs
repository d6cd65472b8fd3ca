//! The outbound side of the message stream.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::WireRecord;

pub mod kafka;
pub mod mock;

#[derive(Debug, Error)]
pub enum PublishError {
    /// The transport's local buffer is saturated; the record was not accepted
    #[error("local producer queue is full")]
    QueueFull,

    #[error("failed to publish record: {0}")]
    Fatal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("outstanding records were not delivered within {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("failed to flush outstanding records: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A message stream that accepts keyed records
///
/// [`publish`][Self::publish] only enqueues: delivery happens in the background and its outcome
/// is reported by the implementation itself (logged), never to the caller. Use
/// [`flush`][Self::flush] to wait for everything enqueued so far.
#[async_trait]
pub trait OutboundTransport: std::fmt::Debug + Send + Sync + 'static {
    /// Enqueue `record` for delivery to `topic` without blocking
    fn publish(&self, topic: &str, record: &WireRecord) -> Result<(), PublishError>;

    /// Wait until all enqueued records are acknowledged, or `timeout` elapses
    async fn flush(&self, timeout: Duration) -> Result<(), FlushError>;
}
