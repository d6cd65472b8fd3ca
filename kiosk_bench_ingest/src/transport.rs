//! The inbound side: a bounded poll returning at most one raw message.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub mod kafka;
pub mod mock;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum PollError {
    /// The loop logs these and polls again
    #[error("transient consumer error: {0}")]
    Transient(#[source] BoxedError),

    #[error("fatal consumer error: {0}")]
    Fatal(#[source] BoxedError),
}

/// A message as handed over by the transport, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub payload: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

impl RawMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(payload.into()),
            key: None,
            partition: 0,
            offset: 0,
        }
    }
}

/// A subscribed source of messages
///
/// Offsets are acknowledged by the transport itself on its own schedule; callers never commit.
#[async_trait]
pub trait InboundTransport: Debug + Send + 'static {
    /// Wait at most `timeout` for the next message; `Ok(None)` when nothing arrived in time
    async fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>, PollError>;

    /// Leave the subscription and release the handle
    async fn close(&mut self) -> Result<(), PollError>;
}
