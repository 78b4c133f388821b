//! The slice of a database driver the session depends on.
//!
//! A backend supplies a [`ConnectionSource`] handing out [`DriverConnection`]s; executing a
//! statement yields a [`DriverStatement`], which opens at most one [`DriverCursor`]. Every
//! object here is released through an explicit `close` so failures can be reported instead of
//! vanishing in a destructor.

use std::sync::Arc;

use crate::error::SqlSessionError;
use crate::types::RowValues;

mod buffered;

pub use buffered::{BufferedStatement, ResultSetCursor};

/// Hands out connections, typically from a pool.
pub trait ConnectionSource: Send + Sync {
    /// Borrow a connection. It is given back through [`DriverConnection::close`].
    ///
    /// # Errors
    /// Returns `SqlSessionError` if no connection can be obtained.
    fn acquire(&self) -> Result<Box<dyn DriverConnection>, SqlSessionError>;
}

impl<S: ConnectionSource + ?Sized> ConnectionSource for Arc<S> {
    fn acquire(&self) -> Result<Box<dyn DriverConnection>, SqlSessionError> {
        (**self).acquire()
    }
}

/// One live database connection.
pub trait DriverConnection: Send {
    /// Number of positional placeholders the driver sees in `sql`.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if the statement cannot be prepared.
    fn parameter_count(&mut self, sql: &str) -> Result<usize, SqlSessionError>;

    /// Bind `params` positionally and run `sql`.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if preparing, binding, or executing fails.
    fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Box<dyn DriverStatement>, SqlSessionError>;

    /// Leave autocommit and open a database transaction.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if the driver refuses.
    fn begin(&mut self) -> Result<(), SqlSessionError>;

    /// # Errors
    /// Returns `SqlSessionError` if the commit fails.
    fn commit(&mut self) -> Result<(), SqlSessionError>;

    /// # Errors
    /// Returns `SqlSessionError` if the rollback fails.
    fn rollback(&mut self) -> Result<(), SqlSessionError>;

    /// Release the connection back to where it came from.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if releasing fails; the connection is gone either way.
    fn close(self: Box<Self>) -> Result<(), SqlSessionError>;
}

/// A bound, executed statement.
pub trait DriverStatement: Send {
    /// Rows changed by a DML statement, or rows produced by a query.
    fn rows_affected(&self) -> usize;

    /// Open the forward-only cursor over the statement's rows.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if the cursor was already opened or the driver fails.
    fn open_cursor(&mut self) -> Result<Box<dyn DriverCursor>, SqlSessionError>;

    /// # Errors
    /// Returns `SqlSessionError` if the driver fails to release the statement.
    fn close(&mut self) -> Result<(), SqlSessionError>;
}

/// Forward-only view over a statement's rows.
pub trait DriverCursor: Send {
    /// Column names in declaration order.
    fn column_names(&self) -> Arc<Vec<String>>;

    /// Advance to the next row, returning its values in column order.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if reading the row fails.
    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, SqlSessionError>;

    /// # Errors
    /// Returns `SqlSessionError` if the driver fails to release the cursor.
    fn close(&mut self) -> Result<(), SqlSessionError>;
}
