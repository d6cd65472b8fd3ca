//! An in-memory [`OutboundTransport`] with scriptable rejections, used in tests.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{FlushError, OutboundTransport, PublishError};
use crate::event::WireRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    QueueFull,
    Fatal,
}

#[derive(Debug, Default)]
struct State {
    attempts: u64,
    rejections: BTreeMap<u64, Rejection>,
    retain: bool,
    delivered: Vec<(String, WireRecord)>,
    delivered_count: usize,
    last_delivered: Option<WireRecord>,
    flush_delay: Duration,
    flushes: Vec<Instant>,
}

/// Records every accepted record; clones share the same state.
#[derive(Debug, Clone)]
pub struct MockOutbound {
    state: Arc<Mutex<State>>,
}

impl Default for MockOutbound {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOutbound {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                retain: true,
                ..Default::default()
            })),
        }
    }

    /// A transport that only counts accepted records instead of keeping them, for large runs
    pub fn counting() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Reject the `attempt`-th call to `publish` (counting from 1) as if the local queue were full
    pub fn queue_full_on_attempt(&self, attempt: u64) -> &Self {
        self.state
            .lock()
            .rejections
            .insert(attempt, Rejection::QueueFull);
        self
    }

    /// Fail the `attempt`-th call to `publish` (counting from 1) with a fatal error
    pub fn fatal_on_attempt(&self, attempt: u64) -> &Self {
        self.state.lock().rejections.insert(attempt, Rejection::Fatal);
        self
    }

    /// Make every flush take `delay` of (virtual) time to complete
    pub fn set_flush_delay(&self, delay: Duration) -> &Self {
        self.state.lock().flush_delay = delay;
        self
    }

    /// Number of calls made to `publish`, accepted or not
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }

    /// All records accepted so far, in order; empty for a [`counting`][Self::counting] transport
    pub fn delivered(&self) -> Vec<WireRecord> {
        self.state
            .lock()
            .delivered
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn delivered_count(&self) -> usize {
        self.state.lock().delivered_count
    }

    pub fn last_delivered(&self) -> Option<WireRecord> {
        self.state.lock().last_delivered.clone()
    }

    /// Topics of all accepted records, in order
    pub fn topics(&self) -> Vec<String> {
        self.state
            .lock()
            .delivered
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// The instant each flush was started at
    pub fn flushes(&self) -> Vec<Instant> {
        self.state.lock().flushes.clone()
    }
}

#[async_trait]
impl OutboundTransport for MockOutbound {
    fn publish(&self, topic: &str, record: &WireRecord) -> Result<(), PublishError> {
        let mut state = self.state.lock();
        state.attempts += 1;
        let attempt = state.attempts;
        match state.rejections.remove(&attempt) {
            Some(Rejection::QueueFull) => Err(PublishError::QueueFull),
            Some(Rejection::Fatal) => Err(PublishError::Fatal("broker went away".into())),
            None => {
                state.delivered_count += 1;
                state.last_delivered = Some(record.clone());
                if state.retain {
                    state.delivered.push((topic.to_string(), record.clone()));
                }
                Ok(())
            }
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), FlushError> {
        let delay = {
            let mut state = self.state.lock();
            state.flushes.push(Instant::now());
            state.flush_delay
        };
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(FlushError::TimedOut { timeout });
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }
}
