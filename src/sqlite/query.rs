use std::sync::Arc;

use r2d2_sqlite::rusqlite;
use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::SqlSessionError;
use crate::results::ResultSet;
use crate::types::RowValues;

use super::params::Params;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `SqlSessionError` if the value cannot be read.
pub fn sqlite_extract_value_sync(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<RowValues, SqlSessionError> {
    let value: Value = row.get(idx)?;
    match value {
        Value::Null => Ok(RowValues::Null),
        Value::Integer(i) => Ok(RowValues::Int(i)),
        Value::Real(f) => Ok(RowValues::Float(f)),
        Value::Text(s) => Ok(RowValues::Text(s)),
        Value::Blob(b) => Ok(RowValues::Blob(b)),
    }
}

/// Run a prepared query and read every row into a `ResultSet`.
///
/// # Errors
/// Returns `SqlSessionError` if query execution or reading a row fails.
pub fn build_result_set(
    stmt: &mut Statement<'_>,
    params: &Params,
) -> Result<ResultSet, SqlSessionError> {
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    // Store column names once in the result set
    let mut result_set = ResultSet::with_capacity(Arc::new(column_names), 10);

    let param_refs = params.as_refs();
    let mut rows_iter = stmt.query(&param_refs[..])?;
    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value_sync(row, i)?);
        }
        result_set.add_row_values(row_values)?;
    }

    Ok(result_set)
}
