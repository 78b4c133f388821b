//! Scriptable in-memory driver for exercising the session's resource discipline.
//!
//! [`FakeSource`] counts every acquire/release, statement, cursor, and transaction verb, and
//! can be told to fail any of them. Responses are scripted by exact SQL text; unscripted SQL
//! succeeds with no rows and zero affected rows. A statement's parameter count is the number
//! of `?` characters in its text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::driver::{
    BufferedStatement, ConnectionSource, DriverConnection, DriverCursor, DriverStatement,
};
use crate::error::SqlSessionError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Call counts observed by a [`FakeSource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FakeCounters {
    pub acquired: usize,
    pub released: usize,
    pub statements_opened: usize,
    pub statements_closed: usize,
    pub cursors_opened: usize,
    pub cursors_closed: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

impl FakeCounters {
    #[must_use]
    pub fn open_connections(&self) -> isize {
        count_diff(self.acquired, self.released)
    }

    #[must_use]
    pub fn open_statements(&self) -> isize {
        count_diff(self.statements_opened, self.statements_closed)
    }

    #[must_use]
    pub fn open_cursors(&self) -> isize {
        count_diff(self.cursors_opened, self.cursors_closed)
    }

    /// Nothing acquired or opened is still outstanding.
    #[must_use]
    pub fn balanced(&self) -> bool {
        self.open_connections() == 0 && self.open_statements() == 0 && self.open_cursors() == 0
    }
}

fn count_diff(opened: usize, closed: usize) -> isize {
    isize::try_from(opened).unwrap_or(isize::MAX) - isize::try_from(closed).unwrap_or(isize::MAX)
}

#[derive(Debug, Clone)]
enum Scripted {
    Rows(ResultSet),
    Affected(usize),
    Fail(String),
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeFailure {
    Acquire,
    Begin,
    Commit,
    Rollback,
    StatementClose,
    CursorClose,
    ConnectionClose,
}

#[derive(Debug, Default)]
struct FakeState {
    counters: FakeCounters,
    scripts: HashMap<String, Scripted>,
    failures: HashMap<FakeFailure, String>,
    executed: Vec<(String, Vec<RowValues>)>,
}

impl FakeState {
    fn check(&self, op: FakeFailure) -> Result<(), SqlSessionError> {
        match self.failures.get(&op) {
            Some(message) => Err(SqlSessionError::DriverError(message.clone())),
            None => Ok(()),
        }
    }
}

type Shared = Arc<Mutex<FakeState>>;

fn lock(state: &Shared) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection source backed by scripted results. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeSource {
    state: Shared,
}

impl FakeSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `rows` under `columns`.
    ///
    /// # Panics
    /// Panics if a row's width does not match `columns`.
    pub fn script_rows(&self, sql: &str, columns: &[&str], rows: Vec<Vec<RowValues>>) -> &Self {
        let result = match ResultSet::from_rows(columns, rows) {
            Ok(result) => result,
            Err(err) => panic!("bad scripted rows for `{sql}`: {err}"),
        };
        lock(&self.state)
            .scripts
            .insert(sql.to_string(), Scripted::Rows(result));
        self
    }

    /// Answer `sql` with an update count.
    pub fn script_affected(&self, sql: &str, affected: usize) -> &Self {
        lock(&self.state)
            .scripts
            .insert(sql.to_string(), Scripted::Affected(affected));
        self
    }

    /// Make executing `sql` fail with a driver error carrying `message`.
    pub fn script_failure(&self, sql: &str, message: &str) -> &Self {
        lock(&self.state)
            .scripts
            .insert(sql.to_string(), Scripted::Fail(message.to_string()));
        self
    }

    /// Make every later `op` fail with a driver error carrying `message`.
    pub fn fail(&self, op: FakeFailure, message: &str) -> &Self {
        lock(&self.state).failures.insert(op, message.to_string());
        self
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: FakeFailure) -> &Self {
        lock(&self.state).failures.remove(&op);
        self
    }

    #[must_use]
    pub fn counters(&self) -> FakeCounters {
        lock(&self.state).counters
    }

    /// SQL text of every statement the driver was asked to execute, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state)
            .executed
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// Statements with the arguments they were bound to.
    #[must_use]
    pub fn executed_with_params(&self) -> Vec<(String, Vec<RowValues>)> {
        lock(&self.state).executed.clone()
    }
}

impl ConnectionSource for FakeSource {
    fn acquire(&self) -> Result<Box<dyn DriverConnection>, SqlSessionError> {
        let mut state = lock(&self.state);
        state.check(FakeFailure::Acquire)?;
        state.counters.acquired += 1;
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeConnection {
    state: Shared,
}

impl DriverConnection for FakeConnection {
    fn parameter_count(&mut self, sql: &str) -> Result<usize, SqlSessionError> {
        Ok(sql.matches('?').count())
    }

    fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Box<dyn DriverStatement>, SqlSessionError> {
        let mut state = lock(&self.state);
        state.executed.push((sql.to_string(), params.to_vec()));
        let result = match state.scripts.get(sql) {
            Some(Scripted::Fail(message)) => {
                return Err(SqlSessionError::DriverError(message.clone()));
            }
            Some(Scripted::Rows(result)) => result.clone(),
            Some(Scripted::Affected(n)) => ResultSet::affected(*n),
            None => ResultSet::affected(0),
        };
        state.counters.statements_opened += 1;
        Ok(Box::new(FakeStatement {
            inner: BufferedStatement::new(result),
            state: Arc::clone(&self.state),
        }))
    }

    fn begin(&mut self) -> Result<(), SqlSessionError> {
        let mut state = lock(&self.state);
        state.check(FakeFailure::Begin)?;
        state.counters.begins += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SqlSessionError> {
        let mut state = lock(&self.state);
        state.check(FakeFailure::Commit)?;
        state.counters.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqlSessionError> {
        let mut state = lock(&self.state);
        state.check(FakeFailure::Rollback)?;
        state.counters.rollbacks += 1;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), SqlSessionError> {
        let mut state = lock(&self.state);
        // the connection is gone even when closing reports a failure
        state.counters.released += 1;
        state.check(FakeFailure::ConnectionClose)
    }
}

struct FakeStatement {
    inner: BufferedStatement,
    state: Shared,
}

impl DriverStatement for FakeStatement {
    fn rows_affected(&self) -> usize {
        self.inner.rows_affected()
    }

    fn open_cursor(&mut self) -> Result<Box<dyn DriverCursor>, SqlSessionError> {
        let cursor = self.inner.open_cursor()?;
        lock(&self.state).counters.cursors_opened += 1;
        Ok(Box::new(FakeCursor {
            inner: cursor,
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&mut self) -> Result<(), SqlSessionError> {
        self.inner.close()?;
        let mut state = lock(&self.state);
        state.counters.statements_closed += 1;
        state.check(FakeFailure::StatementClose)
    }
}

struct FakeCursor {
    inner: Box<dyn DriverCursor>,
    state: Shared,
}

impl DriverCursor for FakeCursor {
    fn column_names(&self) -> Arc<Vec<String>> {
        self.inner.column_names()
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, SqlSessionError> {
        self.inner.next_row()
    }

    fn close(&mut self) -> Result<(), SqlSessionError> {
        self.inner.close()?;
        let mut state = lock(&self.state);
        state.counters.cursors_closed += 1;
        state.check(FakeFailure::CursorClose)
    }
}
