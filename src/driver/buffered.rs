use std::sync::Arc;

use crate::error::SqlSessionError;
use crate::results::ResultSet;
use crate::types::RowValues;

use super::{DriverCursor, DriverStatement};

/// Statement whose rows were read eagerly into a [`ResultSet`].
#[derive(Debug)]
pub struct BufferedStatement {
    result: Option<ResultSet>,
    rows_affected: usize,
    closed: bool,
}

impl BufferedStatement {
    #[must_use]
    pub fn new(result: ResultSet) -> Self {
        Self {
            rows_affected: result.rows_affected,
            result: Some(result),
            closed: false,
        }
    }
}

impl DriverStatement for BufferedStatement {
    fn rows_affected(&self) -> usize {
        self.rows_affected
    }

    fn open_cursor(&mut self) -> Result<Box<dyn DriverCursor>, SqlSessionError> {
        if self.closed {
            return Err(SqlSessionError::DriverError("statement already closed".into()));
        }
        let result = self.result.take().ok_or_else(|| {
            SqlSessionError::DriverError("cursor already opened for this statement".into())
        })?;
        Ok(Box::new(ResultSetCursor::new(result)))
    }

    fn close(&mut self) -> Result<(), SqlSessionError> {
        self.closed = true;
        self.result = None;
        Ok(())
    }
}

/// Cursor over a buffered [`ResultSet`].
#[derive(Debug)]
pub struct ResultSetCursor {
    column_names: Arc<Vec<String>>,
    rows: std::vec::IntoIter<Vec<RowValues>>,
    closed: bool,
}

impl ResultSetCursor {
    #[must_use]
    pub fn new(result: ResultSet) -> Self {
        let (column_names, rows) = result.into_rows();
        Self {
            column_names,
            rows: rows.into_iter(),
            closed: false,
        }
    }
}

impl DriverCursor for ResultSetCursor {
    fn column_names(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.column_names)
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, SqlSessionError> {
        if self.closed {
            return Err(SqlSessionError::DriverError("cursor already closed".into()));
        }
        Ok(self.rows.next())
    }

    fn close(&mut self) -> Result<(), SqlSessionError> {
        self.closed = true;
        Ok(())
    }
}
