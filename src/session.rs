use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::context::ExecutionContext;
use crate::driver::{ConnectionSource, DriverConnection};
use crate::error::SqlSessionError;
use crate::handle::{ExecutionHandle, HandleSlot};
use crate::mapper;
use crate::mapping::Mappable;
use crate::paging::{LimitOffsetPaging, Page, PagingStrategy};
use crate::results::{KeyedRows, RowMap};
use crate::types::RowValues;

/// Whether the session is running statements one by one or inside an explicit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Each call borrows a connection and releases it, with its handle, before returning.
    Autocommit,
    /// One connection is pinned to the session until `commit` or `rollback`.
    InTransaction,
}

/// Per-session behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Run `count()` before each paged query to fill in [`Page::total`].
    pub count_page_totals: bool,
    /// Log a warning when `count()` receives SQL that subquery wrapping is known to break.
    pub warn_on_fragile_count: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            count_page_totals: true,
            warn_on_fragile_count: true,
        }
    }
}

enum Guard {
    Autocommit,
    InTransaction {
        connection: Box<dyn DriverConnection>,
        /// Last handle opened in the transaction, whether kept by the session or given to the
        /// caller; closed when the next statement starts or when the transaction ends.
        retained: Option<HandleSlot>,
    },
}

/// Patterns for `count()` input that subquery wrapping is known to break.
struct FragileCountPatterns {
    terminator: Regex,
    order_by: Regex,
    window: Regex,
}

static FRAGILE_COUNT: LazyLock<FragileCountPatterns> = LazyLock::new(|| FragileCountPatterns {
    terminator: Regex::new(r";\s*$").expect("terminator pattern"),
    order_by: Regex::new(r"(?i)\border\s+by\b").expect("order by pattern"),
    window: Regex::new(r"(?i)\b(limit|fetch|top)\b").expect("row window pattern"),
});

/// Blocking SQL session: runs statements, maps their results, and decides when execution
/// handles and connections are released.
///
/// Outside a transaction every call borrows a connection from the source and gives it back,
/// together with the statement and cursor, before returning, whether mapping succeeded or not.
/// Between [`begin_transaction`](Self::begin_transaction) and
/// [`commit`](Self::commit)/[`rollback`](Self::rollback) all calls share one pinned connection.
///
/// A session serves one caller at a time; use one session per thread.
pub struct SqlSession {
    source: Box<dyn ConnectionSource>,
    paging: Box<dyn PagingStrategy>,
    options: SessionOptions,
    guard: Guard,
}

impl SqlSession {
    #[must_use]
    pub fn new(source: impl ConnectionSource + 'static) -> Self {
        Self::with_options(source, SessionOptions::default())
    }

    #[must_use]
    pub fn with_options(source: impl ConnectionSource + 'static, options: SessionOptions) -> Self {
        Self {
            source: Box::new(source),
            paging: Box::new(LimitOffsetPaging),
            options,
            guard: Guard::Autocommit,
        }
    }

    /// Replace the paging dialect.
    #[must_use]
    pub fn with_paging(mut self, paging: impl PagingStrategy + 'static) -> Self {
        self.paging = Box::new(paging);
        self
    }

    #[must_use]
    pub fn options(&self) -> SessionOptions {
        self.options
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        match self.guard {
            Guard::Autocommit => TransactionState::Autocommit,
            Guard::InTransaction { .. } => TransactionState::InTransaction,
        }
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        matches!(self.guard, Guard::InTransaction { .. })
    }

    /// Run a statement and hand its handle to the caller.
    ///
    /// The caller owns the handle: read it through [`ExecutionHandle::cursor`] and release it
    /// with [`ExecutionHandle::close`]. Outside a transaction the handle carries the borrowed
    /// connection and closing it releases that too. Inside a transaction the session also keeps
    /// track of the handle and closes it when the next statement starts or the transaction ends.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ExecutionError` if the argument count does not match the
    /// statement's placeholders or the driver fails.
    pub fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecutionHandle, SqlSessionError> {
        self.open_handle(ExecutionContext::from_slice(sql, params))
    }

    /// Run a DML statement and return the number of affected rows.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if execution or releasing the handle fails.
    pub fn update(&mut self, sql: &str, params: &[RowValues]) -> Result<usize, SqlSessionError> {
        self.run(ExecutionContext::from_slice(sql, params), |handle| {
            Ok(handle.rows_affected())
        })
    }

    /// [`update`](Self::update) followed by [`commit`](Self::commit).
    ///
    /// If the update fails its error is returned and no commit is attempted.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if the update or the commit fails.
    pub fn update_and_commit(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<usize, SqlSessionError> {
        let affected = self.update(sql, params)?;
        self.commit()?;
        Ok(affected)
    }

    /// First column of the first row; `None` when the query returns no rows.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if execution, reading, or releasing fails.
    pub fn scalar(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Option<RowValues>, SqlSessionError> {
        self.run(ExecutionContext::from_slice(sql, params), |handle| {
            mapper::scalar_of(handle.cursor()?)
        })
    }

    /// [`scalar`](Self::scalar) coerced to an integer.
    ///
    /// # Errors
    /// Returns `SqlSessionError::MappingError` if there is no row, the value is NULL, or it is
    /// not an integer.
    pub fn scalar_as_int(&mut self, sql: &str, params: &[RowValues]) -> Result<i64, SqlSessionError> {
        self.record::<Option<i64>>(sql, params)?
            .flatten()
            .ok_or_else(|| {
                SqlSessionError::MappingError(format!("`{sql}` returned no integer value"))
            })
    }

    /// Number of rows `sql` would return.
    ///
    /// The statement is wrapped as `select count(*) from (<sql>) as T`. That only works for a
    /// plain `SELECT` with no trailing `;`, and dialects that reject `ORDER BY` inside a
    /// derived table without `LIMIT` will reject such input. The text is passed through
    /// unchanged; a warning is logged when it looks affected.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if the wrapped statement fails.
    pub fn count(&mut self, sql: &str, params: &[RowValues]) -> Result<i64, SqlSessionError> {
        if self.options.warn_on_fragile_count && is_fragile_count_input(sql) {
            warn!(sql, "count() input may not survive subquery wrapping");
        }
        self.scalar_as_int(&format!("select count(*) from ({sql}) as T"), params)
    }

    /// First row mapped into `T`; `None` when the query returns no rows.
    ///
    /// # Errors
    /// Returns `SqlSessionError::MappingError` if the row cannot be coerced into `T`.
    pub fn record<T: Mappable>(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Option<T>, SqlSessionError> {
        self.run(ExecutionContext::from_slice(sql, params), |handle| {
            mapper::record_of::<T>(handle.cursor()?)
        })
    }

    /// Every row mapped into `T`.
    ///
    /// # Errors
    /// Returns `SqlSessionError::MappingError` if any row cannot be coerced into `T`.
    pub fn list<T: Mappable>(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Vec<T>, SqlSessionError> {
        self.list_ctx(ExecutionContext::from_slice(sql, params))
    }

    fn list_ctx<T: Mappable>(&mut self, ctx: ExecutionContext) -> Result<Vec<T>, SqlSessionError> {
        self.run(ctx, |handle| mapper::list_of::<T>(handle.cursor()?))
    }

    /// First row as an ordered column map, empty when the query returns no rows.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if execution, reading, or releasing fails.
    pub fn row(&mut self, sql: &str, params: &[RowValues]) -> Result<RowMap, SqlSessionError> {
        self.run(ExecutionContext::from_slice(sql, params), |handle| {
            mapper::row_as_map(handle.cursor()?)
        })
    }

    /// Every row as an ordered column map.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if execution, reading, or releasing fails.
    pub fn rows(&mut self, sql: &str, params: &[RowValues]) -> Result<Vec<RowMap>, SqlSessionError> {
        self.rows_ctx(ExecutionContext::from_slice(sql, params))
    }

    fn rows_ctx(&mut self, ctx: ExecutionContext) -> Result<Vec<RowMap>, SqlSessionError> {
        self.run(ctx, |handle| mapper::rows_as_map_list(handle.cursor()?))
    }

    /// Rows keyed by the value of `key_column`, or of the first column when `None`.
    ///
    /// Rows sharing a key collapse to the last one read.
    ///
    /// # Errors
    /// Returns `SqlSessionError::MappingError` if `key_column` is not in the result.
    pub fn rows_keyed_by(
        &mut self,
        key_column: Option<&str>,
        sql: &str,
        params: &[RowValues],
    ) -> Result<KeyedRows, SqlSessionError> {
        self.run(ExecutionContext::from_slice(sql, params), |handle| {
            mapper::rows_keyed_by(handle.cursor()?, key_column)
        })
    }

    /// One page of `sql` mapped into `T`. Fills in `page.total` unless disabled in
    /// [`SessionOptions`].
    ///
    /// # Errors
    /// Returns `SqlSessionError` if counting, paging, or mapping fails.
    pub fn list_page<T: Mappable>(
        &mut self,
        page: &mut Page,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Vec<T>, SqlSessionError> {
        self.list_page_ctx(page, &ExecutionContext::from_slice(sql, params))
    }

    /// [`list_page`](Self::list_page) for a prebuilt [`ExecutionContext`].
    ///
    /// # Errors
    /// Returns `SqlSessionError` if counting, paging, or mapping fails.
    pub fn list_page_ctx<T: Mappable>(
        &mut self,
        page: &mut Page,
        ctx: &ExecutionContext,
    ) -> Result<Vec<T>, SqlSessionError> {
        let windowed = self.prepare_page(page, ctx)?;
        self.list_ctx(windowed)
    }

    /// One page of `sql` as ordered column maps.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if counting, paging, or reading fails.
    pub fn rows_page(
        &mut self,
        page: &mut Page,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Vec<RowMap>, SqlSessionError> {
        self.rows_page_ctx(page, &ExecutionContext::from_slice(sql, params))
    }

    /// [`rows_page`](Self::rows_page) for a prebuilt [`ExecutionContext`].
    ///
    /// # Errors
    /// Returns `SqlSessionError` if counting, paging, or reading fails.
    pub fn rows_page_ctx(
        &mut self,
        page: &mut Page,
        ctx: &ExecutionContext,
    ) -> Result<Vec<RowMap>, SqlSessionError> {
        let windowed = self.prepare_page(page, ctx)?;
        self.rows_ctx(windowed)
    }

    fn prepare_page(
        &mut self,
        page: &mut Page,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionContext, SqlSessionError> {
        let windowed = self.paging.page_window(ctx, page)?;
        if self.options.count_page_totals {
            let total = self.count(ctx.sql(), ctx.params())?;
            page.total = Some(usize::try_from(total).unwrap_or(0));
        }
        Ok(windowed)
    }

    /// Pin a connection and open a database transaction.
    ///
    /// # Errors
    /// Returns `SqlSessionError::IllegalState` if a transaction is already open, or the
    /// driver's error if no connection is available or `BEGIN` fails.
    pub fn begin_transaction(&mut self) -> Result<&mut Self, SqlSessionError> {
        if self.in_transaction() {
            return Err(SqlSessionError::IllegalState(
                "transaction already in progress".into(),
            ));
        }
        let mut connection = self.source.acquire()?;
        trace!("connection acquired for transaction");
        if let Err(err) = connection.begin() {
            let released = connection
                .close()
                .map_err(|e| SqlSessionError::release("connection", e));
            return SqlSessionError::merge(Err(SqlSessionError::execution("BEGIN", err)), released);
        }
        self.guard = Guard::InTransaction {
            connection,
            retained: None,
        };
        debug!("transaction started");
        Ok(self)
    }

    /// Commit the open transaction, close any open handle, and release the pinned connection.
    ///
    /// Outside a transaction there is nothing to flush and this does nothing.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ExecutionError` if the commit fails, or a release error.
    /// The session is back in autocommit either way.
    pub fn commit(&mut self) -> Result<(), SqlSessionError> {
        self.finish_transaction("COMMIT", |conn| conn.commit())
    }

    /// Roll back the open transaction, close any open handle, and release the pinned
    /// connection.
    ///
    /// Outside a transaction this does nothing.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ExecutionError` if the rollback fails, or a release error.
    /// The session is back in autocommit either way.
    pub fn rollback(&mut self) -> Result<(), SqlSessionError> {
        self.finish_transaction("ROLLBACK", |conn| conn.rollback())
    }

    fn finish_transaction(
        &mut self,
        verb: &'static str,
        flush: impl FnOnce(&mut dyn DriverConnection) -> Result<(), SqlSessionError>,
    ) -> Result<(), SqlSessionError> {
        let Guard::InTransaction {
            mut connection,
            retained,
        } = std::mem::replace(&mut self.guard, Guard::Autocommit)
        else {
            debug!(verb, "no transaction in progress; nothing to do");
            return Ok(());
        };

        let flushed =
            flush(connection.as_mut()).map_err(|e| SqlSessionError::execution(verb, e));
        let handle_closed = match retained {
            Some(slot) => slot.close(),
            None => Ok(()),
        };
        let released = connection
            .close()
            .map_err(|e| SqlSessionError::release("connection", e));
        trace!("transaction connection released");
        debug!(verb, ok = flushed.is_ok(), "transaction finished");

        let cleanup = match (handle_closed, released) {
            (Err(first), Err(second)) => {
                warn!(error = %second, "connection release failure suppressed");
                Err(first)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        };
        SqlSessionError::merge(flushed, cleanup)
    }

    fn open_handle(&mut self, ctx: ExecutionContext) -> Result<ExecutionHandle, SqlSessionError> {
        match &mut self.guard {
            Guard::Autocommit => {
                let connection = self
                    .source
                    .acquire()
                    .map_err(|e| SqlSessionError::execution(ctx.sql(), e))?;
                trace!("connection acquired");
                ExecutionHandle::open_owned(connection, ctx)
            }
            Guard::InTransaction {
                connection,
                retained,
            } => {
                if let Some(previous) = retained.take() {
                    previous
                        .close()
                        .map_err(|e| SqlSessionError::execution(ctx.sql(), e))?;
                }
                let handle = ExecutionHandle::open(connection.as_mut(), ctx)?;
                *retained = Some(handle.slot());
                Ok(handle)
            }
        }
    }

    /// Open a handle, let `consume` read it, then close or retain it according to the
    /// transaction state.
    fn run<R>(
        &mut self,
        ctx: ExecutionContext,
        consume: impl FnOnce(&mut ExecutionHandle) -> Result<R, SqlSessionError>,
    ) -> Result<R, SqlSessionError> {
        let mut handle = self.open_handle(ctx)?;
        let outcome = consume(&mut handle);
        match &mut self.guard {
            Guard::Autocommit => SqlSessionError::merge(outcome, handle.close()),
            Guard::InTransaction { retained, .. } => {
                *retained = Some(handle.into_slot());
                outcome
            }
        }
    }
}

impl Drop for SqlSession {
    fn drop(&mut self) {
        if self.in_transaction() {
            warn!("session dropped with an open transaction; rolling back");
            if let Err(err) = self.rollback() {
                warn!(error = %err, "rollback on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for SqlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlSession")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Trailing terminator, or a final `ORDER BY` with no `LIMIT`/`FETCH`/`TOP` after it.
fn is_fragile_count_input(sql: &str) -> bool {
    let patterns = &*FRAGILE_COUNT;
    if patterns.terminator.is_match(sql) {
        return true;
    }
    patterns
        .order_by
        .find_iter(sql)
        .last()
        .is_some_and(|m| !patterns.window.is_match(&sql[m.end()..]))
}
