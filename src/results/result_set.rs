use std::sync::Arc;

use crate::error::SqlSessionError;
use crate::types::RowValues;

/// A fully buffered result from a database statement.
///
/// Drivers that read their rows eagerly (`SQLite`, the fake test driver) hand one of these to
/// [`crate::driver::BufferedStatement`], which exposes it through the cursor traits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names shared by all rows (to avoid duplicating in each row)
    column_names: Arc<Vec<String>>,
    /// The rows returned by the query
    rows: Vec<Vec<RowValues>>,
    /// The number of rows affected (for DML statements)
    pub rows_affected: usize,
}

impl ResultSet {
    /// Create an empty result set with the given columns and a known row capacity.
    #[must_use]
    pub fn with_capacity(column_names: Arc<Vec<String>>, capacity: usize) -> ResultSet {
        ResultSet {
            column_names,
            rows: Vec::with_capacity(capacity),
            rows_affected: 0,
        }
    }

    /// Build a result set from literal columns and rows.
    ///
    /// # Errors
    /// Returns `SqlSessionError::DriverError` if a row's width differs from the column count.
    pub fn from_rows(
        columns: &[&str],
        rows: Vec<Vec<RowValues>>,
    ) -> Result<ResultSet, SqlSessionError> {
        let names = Arc::new(columns.iter().map(|c| (*c).to_owned()).collect::<Vec<_>>());
        let mut result_set = ResultSet::with_capacity(names, rows.len());
        for row in rows {
            result_set.add_row_values(row)?;
        }
        Ok(result_set)
    }

    /// Result of a statement that produced no rows, only an affected-row count.
    #[must_use]
    pub fn affected(rows_affected: usize) -> ResultSet {
        ResultSet {
            rows_affected,
            ..ResultSet::default()
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &Arc<Vec<String>> {
        &self.column_names
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<RowValues>] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Add a row to the result set
    ///
    /// # Errors
    /// Returns `SqlSessionError::DriverError` if the row's width differs from the column count.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) -> Result<(), SqlSessionError> {
        if row_values.len() != self.column_names.len() {
            return Err(SqlSessionError::DriverError(format!(
                "row has {} values but the result declares {} columns",
                row_values.len(),
                self.column_names.len()
            )));
        }
        self.rows.push(row_values);
        self.rows_affected += 1;
        Ok(())
    }

    pub(crate) fn into_rows(self) -> (Arc<Vec<String>>, Vec<Vec<RowValues>>) {
        (self.column_names, self.rows)
    }
}
