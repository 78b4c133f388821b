use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::context::ExecutionContext;
use crate::driver::{DriverConnection, DriverCursor, DriverStatement};
use crate::error::SqlSessionError;
use crate::types::RowValues;

/// Resources behind one [`ExecutionHandle`], shared with the session while a transaction
/// keeps the handle on its books.
struct Resources {
    statement: Option<Box<dyn DriverStatement>>,
    cursor: Option<Box<dyn DriverCursor>>,
    connection: Option<Box<dyn DriverConnection>>,
    closed: bool,
}

type SharedResources = Arc<Mutex<Resources>>;

fn lock(resources: &SharedResources) -> MutexGuard<'_, Resources> {
    resources.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Resources {
    /// Release the cursor, the statement, and an owned connection, in that order.
    fn close(&mut self) -> Result<(), SqlSessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_failure: Option<SqlSessionError> = None;
        let mut record = |resource: &'static str, outcome: Result<(), SqlSessionError>| {
            if let Err(err) = outcome {
                let err = SqlSessionError::release(resource, err);
                if first_failure.is_none() {
                    first_failure = Some(err);
                } else {
                    warn!(error = %err, "additional release failure suppressed");
                }
            }
        };

        if let Some(mut cursor) = self.cursor.take() {
            record("cursor", cursor.close());
        }
        if let Some(mut statement) = self.statement.take() {
            record("statement", statement.close());
        }
        if let Some(connection) = self.connection.take() {
            record("connection", connection.close());
            trace!("connection released");
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The session's reference to a handle opened inside a transaction.
///
/// Closing the slot closes the handle; the caller's own `close` then does nothing.
pub(crate) struct HandleSlot(SharedResources);

impl HandleSlot {
    pub(crate) fn close(&self) -> Result<(), SqlSessionError> {
        lock(&self.0).close()
    }
}

/// One bound, executed statement plus the cursor over its rows.
///
/// Outside a transaction the handle also owns the connection it ran on, and closing the handle
/// gives that connection back. Inside a transaction the connection stays pinned to the session,
/// and the session closes the handle when the next statement starts or the transaction ends.
///
/// Close it with [`ExecutionHandle::close`]; dropping an open handle closes it too, but any
/// release failure can then only be logged.
pub struct ExecutionHandle {
    ctx: ExecutionContext,
    resources: SharedResources,
    owns_connection: bool,
    rows_affected: usize,
    cursor_taken: bool,
    /// Set once the session has taken over closing this handle.
    handed_to_session: bool,
}

impl ExecutionHandle {
    /// Bind and run `ctx` on `conn` without taking ownership of the connection.
    pub(crate) fn open(
        conn: &mut dyn DriverConnection,
        ctx: ExecutionContext,
    ) -> Result<Self, SqlSessionError> {
        let statement = bind_and_execute(conn, &ctx)?;
        Ok(Self::from_statement(ctx, statement, None))
    }

    /// Bind and run `ctx`, handing the borrowed connection to the handle.
    ///
    /// If execution fails the connection is released before the error is returned.
    pub(crate) fn open_owned(
        mut conn: Box<dyn DriverConnection>,
        ctx: ExecutionContext,
    ) -> Result<Self, SqlSessionError> {
        match bind_and_execute(conn.as_mut(), &ctx) {
            Ok(statement) => Ok(Self::from_statement(ctx, statement, Some(conn))),
            Err(err) => {
                let released = conn
                    .close()
                    .map_err(|e| SqlSessionError::release("connection", e));
                trace!("connection released after failed execution");
                SqlSessionError::merge(Err(err), released)
            }
        }
    }

    fn from_statement(
        ctx: ExecutionContext,
        statement: Box<dyn DriverStatement>,
        connection: Option<Box<dyn DriverConnection>>,
    ) -> Self {
        Self {
            rows_affected: statement.rows_affected(),
            owns_connection: connection.is_some(),
            ctx,
            resources: Arc::new(Mutex::new(Resources {
                statement: Some(statement),
                cursor: None,
                connection,
                closed: false,
            })),
            cursor_taken: false,
            handed_to_session: false,
        }
    }

    /// A slot through which the session can close this handle while the caller holds it.
    pub(crate) fn slot(&self) -> HandleSlot {
        HandleSlot(Arc::clone(&self.resources))
    }

    /// Give the handle to the session without closing it.
    pub(crate) fn into_slot(mut self) -> HandleSlot {
        self.handed_to_session = true;
        self.slot()
    }

    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        self.ctx.sql()
    }

    #[must_use]
    pub fn rows_affected(&self) -> usize {
        self.rows_affected
    }

    /// Whether the handle has been closed, by its owner or by the session.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.resources).closed
    }

    /// Whether this handle will release a connection when closed.
    #[must_use]
    pub fn owns_connection(&self) -> bool {
        self.owns_connection
    }

    /// Open the row cursor. A handle's rows can be read only once.
    ///
    /// # Errors
    /// Returns `SqlSessionError::IllegalState` if the cursor was already taken or the handle is
    /// closed, or `SqlSessionError::ExecutionError` if the driver cannot open the cursor.
    pub fn cursor(&mut self) -> Result<RowCursor<'_>, SqlSessionError> {
        if self.cursor_taken {
            return Err(SqlSessionError::IllegalState(format!(
                "rows of `{}` were already read",
                self.ctx.sql()
            )));
        }
        let columns = {
            let mut resources = lock(&self.resources);
            let statement = resources.statement.as_mut().ok_or_else(|| {
                SqlSessionError::IllegalState("execution handle already closed".into())
            })?;
            let cursor = statement
                .open_cursor()
                .map_err(|e| SqlSessionError::execution(self.ctx.sql(), e))?;
            resources.cursor.insert(cursor).column_names()
        };
        self.cursor_taken = true;
        Ok(RowCursor::shared(Arc::clone(&self.resources), columns))
    }

    /// Release the cursor, the statement, and an owned connection, in that order.
    ///
    /// Each resource is released exactly once; later calls are no-ops, including after the
    /// session already closed the handle. Every step is attempted even if an earlier one fails,
    /// and the first failure is returned.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ResourceReleaseError` naming the resource that failed first.
    pub fn close(&mut self) -> Result<(), SqlSessionError> {
        lock(&self.resources).close()
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        if self.handed_to_session {
            return;
        }
        let mut resources = lock(&self.resources);
        if !resources.closed {
            debug!(sql = %self.ctx.sql(), "execution handle dropped while open; closing");
            if let Err(err) = resources.close() {
                warn!(error = %err, "closing dropped execution handle failed");
            }
        }
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("sql", &self.ctx.sql())
            .field("rows_affected", &self.rows_affected)
            .field("owns_connection", &self.owns_connection)
            .field("cursor_taken", &self.cursor_taken)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Check the argument count against the statement's placeholders, then execute.
fn bind_and_execute(
    conn: &mut dyn DriverConnection,
    ctx: &ExecutionContext,
) -> Result<Box<dyn DriverStatement>, SqlSessionError> {
    let expected = conn
        .parameter_count(ctx.sql())
        .map_err(|e| SqlSessionError::execution(ctx.sql(), e))?;
    let supplied = ctx.params().len();
    if expected != supplied {
        return Err(SqlSessionError::execution(
            ctx.sql(),
            SqlSessionError::ParameterError(format!(
                "statement expects {expected} positional parameters, {supplied} supplied"
            )),
        ));
    }
    debug!(sql = %ctx.sql(), params = supplied, "executing statement");
    conn.execute(ctx.sql(), ctx.params())
        .map_err(|e| SqlSessionError::execution(ctx.sql(), e))
}

/// Read-once, forward-only access to the rows of an [`ExecutionHandle`].
///
/// The cursor is consumed by the mapping functions in [`crate::mapper`]. Reading from a cursor
/// whose handle the session has since closed is an `IllegalState` error.
pub struct RowCursor<'h> {
    resources: SharedResources,
    columns: Arc<Vec<String>>,
    exhausted: bool,
    _handle: PhantomData<&'h mut ExecutionHandle>,
}

impl RowCursor<'_> {
    fn shared(resources: SharedResources, columns: Arc<Vec<String>>) -> Self {
        Self {
            resources,
            columns,
            exhausted: false,
            _handle: PhantomData,
        }
    }

    /// Cursor over a driver cursor that belongs to no handle.
    #[cfg(test)]
    pub(crate) fn detached(cursor: Box<dyn DriverCursor>) -> Self {
        let columns = cursor.column_names();
        let resources = Arc::new(Mutex::new(Resources {
            statement: None,
            cursor: Some(cursor),
            connection: None,
            closed: false,
        }));
        Self::shared(resources, columns)
    }

    #[must_use]
    pub fn column_names(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.columns)
    }

    /// Next row, or `None` once the cursor is exhausted.
    ///
    /// # Errors
    /// Returns `SqlSessionError::IllegalState` if the handle was closed, or the driver's error
    /// if reading fails.
    pub fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, SqlSessionError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut resources = lock(&self.resources);
        if resources.closed {
            return Err(SqlSessionError::IllegalState(
                "execution handle was closed before its rows were read".into(),
            ));
        }
        let cursor = resources
            .cursor
            .as_mut()
            .ok_or_else(|| SqlSessionError::IllegalState("cursor is not open".into()))?;
        let row = cursor.next_row()?;
        if row.is_none() {
            self.exhausted = true;
        }
        Ok(row)
    }
}
