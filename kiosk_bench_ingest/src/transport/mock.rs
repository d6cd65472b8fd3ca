//! A scripted [`InboundTransport`] used in tests.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use kiosk_bench_shutdown::ShutdownController;
use parking_lot::Mutex;

use super::{InboundTransport, PollError, RawMessage};

#[derive(Debug)]
enum Step {
    Message(RawMessage),
    Idle,
    Transient,
    Fatal,
}

#[derive(Debug, Default)]
struct State {
    script: VecDeque<Step>,
    polls: usize,
    idle_polls_after_script: usize,
    shutdown: Option<(ShutdownController, usize)>,
    close_calls: usize,
    fail_close: bool,
}

/// Plays back a script of poll results; once it runs dry every poll idles for the full timeout.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MockInbound {
    state: Arc<Mutex<State>>,
}

impl MockInbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that hands out one message per payload, in order
    pub fn with_payloads<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        let mock = Self::new();
        for (offset, payload) in payloads.into_iter().enumerate() {
            let mut message = RawMessage::new(payload);
            message.offset = offset as i64;
            mock.push_message(message);
        }
        mock
    }

    pub fn push_message(&self, message: RawMessage) -> &Self {
        self.state.lock().script.push_back(Step::Message(message));
        self
    }

    /// A poll that waits out its timeout without a message
    pub fn push_idle(&self) -> &Self {
        self.state.lock().script.push_back(Step::Idle);
        self
    }

    pub fn push_transient_error(&self) -> &Self {
        self.state.lock().script.push_back(Step::Transient);
        self
    }

    pub fn push_fatal_error(&self) -> &Self {
        self.state.lock().script.push_back(Step::Fatal);
        self
    }

    /// Request shutdown on `controller` after `n` idle polls past the end of the script
    pub fn shutdown_after_idle_polls(&self, controller: ShutdownController, n: usize) -> &Self {
        self.state.lock().shutdown = Some((controller, n));
        self
    }

    pub fn fail_close(&self) -> &Self {
        self.state.lock().fail_close = true;
        self
    }

    pub fn polls(&self) -> usize {
        self.state.lock().polls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}

#[async_trait]
impl InboundTransport for MockInbound {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>, PollError> {
        let step = {
            let mut state = self.state.lock();
            state.polls += 1;
            match state.script.pop_front() {
                Some(step) => step,
                None => {
                    state.idle_polls_after_script += 1;
                    let idle = state.idle_polls_after_script;
                    if let Some((controller, n)) = &state.shutdown {
                        if idle >= *n {
                            controller.request_shutdown();
                        }
                    }
                    Step::Idle
                }
            }
        };

        match step {
            Step::Message(message) => Ok(Some(message)),
            Step::Idle => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
            Step::Transient => Err(PollError::Transient("broker transport failure".into())),
            Step::Fatal => Err(PollError::Fatal("group authorization failed".into())),
        }
    }

    async fn close(&mut self) -> Result<(), PollError> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        if state.fail_close {
            return Err(PollError::Fatal("close failed".into()));
        }
        Ok(())
    }
}
