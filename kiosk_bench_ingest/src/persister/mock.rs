//! An in-memory [`StatementSink`] used in tests.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{COLUMNS, InsertStatement, SinkError, StatementSink};

#[derive(Debug, Default)]
struct State {
    executed: usize,
    failing: BTreeSet<usize>,
    statements: Vec<InsertStatement>,
    closed: bool,
}

/// Records every successful statement; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<State>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the `n`-th statement (counting from 1)
    pub fn fail_on_statement(&self, n: usize) -> &Self {
        self.state.lock().failing.insert(n);
        self
    }

    /// Successful statements, in execution order
    pub fn statements(&self) -> Vec<InsertStatement> {
        self.state.lock().statements.clone()
    }

    /// Row count of each successful statement, in execution order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state
            .lock()
            .statements
            .iter()
            .map(|s| s.params.len() / COLUMNS.len())
            .collect()
    }

    pub fn inserted_rows(&self) -> usize {
        self.batch_sizes().into_iter().sum()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl StatementSink for MockSink {
    async fn execute(&mut self, statement: &InsertStatement) -> Result<u64, SinkError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SinkError::Closed);
        }
        state.executed += 1;
        let n = state.executed;
        if state.failing.remove(&n) {
            return Err(SinkError::Rejected(format!("statement {n} refused")));
        }
        state.statements.push(statement.clone());
        Ok((statement.params.len() / COLUMNS.len()) as u64)
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.state.lock().closed = true;
        Ok(())
    }
}
