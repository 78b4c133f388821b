//! Result mapping over a [`RowCursor`].
//!
//! Each function consumes the cursor it is given. Zero rows give `None` for the single-value
//! shapes (`scalar_of`, `record_of`) but an empty collection for the collection shapes and
//! for `row_as_map`, which returns an empty map rather than `None`.

use std::sync::Arc;

use crate::error::SqlSessionError;
use crate::handle::RowCursor;
use crate::mapping::{BoundRow, Mappable, TargetShape};
use crate::results::{KeyedRows, RowKey, RowMap};
use crate::types::RowValues;

/// Column binding for one target type against one result's columns.
struct Binder {
    slots: Vec<Option<usize>>,
    fields: &'static [&'static str],
}

impl Binder {
    fn for_target<T: Mappable>(columns: &[String]) -> Self {
        match T::shape() {
            TargetShape::Scalar => Self {
                slots: Vec::new(),
                fields: &[],
            },
            TargetShape::Record(schema) => Self {
                slots: schema.bind(columns),
                fields: schema.fields(),
            },
        }
    }

    fn map<T: Mappable>(&self, row: &[RowValues]) -> Result<T, SqlSessionError> {
        T::map_row(&BoundRow::new(row, &self.slots, self.fields))
    }
}

fn zip_row(columns: &Arc<Vec<String>>, row: Vec<RowValues>) -> RowMap {
    columns.iter().cloned().zip(row).collect()
}

/// First column of the first row; `None` when there are no rows.
///
/// # Errors
/// Returns `SqlSessionError` if reading fails or the result has no columns.
pub fn scalar_of(mut cursor: RowCursor<'_>) -> Result<Option<RowValues>, SqlSessionError> {
    match cursor.next_row()? {
        Some(row) => row
            .into_iter()
            .next()
            .map(Some)
            .ok_or_else(|| SqlSessionError::MappingError("result has no columns".into())),
        None => Ok(None),
    }
}

/// First row mapped into `T`; `None` when there are no rows.
///
/// # Errors
/// Returns `SqlSessionError::MappingError` if the row cannot be coerced into `T`.
pub fn record_of<T: Mappable>(mut cursor: RowCursor<'_>) -> Result<Option<T>, SqlSessionError> {
    let columns = cursor.column_names();
    let binder = Binder::for_target::<T>(&columns);
    match cursor.next_row()? {
        Some(row) => binder.map(&row).map(Some),
        None => Ok(None),
    }
}

/// Every row mapped into `T`, in result order.
///
/// # Errors
/// Returns `SqlSessionError::MappingError` on the first row that cannot be coerced.
pub fn list_of<T: Mappable>(mut cursor: RowCursor<'_>) -> Result<Vec<T>, SqlSessionError> {
    let columns = cursor.column_names();
    let binder = Binder::for_target::<T>(&columns);
    let mut out = Vec::new();
    while let Some(row) = cursor.next_row()? {
        out.push(binder.map(&row)?);
    }
    Ok(out)
}

/// First row as an ordered column map; empty (not `None`) when there are no rows.
///
/// # Errors
/// Returns `SqlSessionError` if reading fails.
pub fn row_as_map(mut cursor: RowCursor<'_>) -> Result<RowMap, SqlSessionError> {
    let columns = cursor.column_names();
    Ok(cursor
        .next_row()?
        .map(|row| zip_row(&columns, row))
        .unwrap_or_default())
}

/// Every row as an ordered column map.
///
/// # Errors
/// Returns `SqlSessionError` if reading fails.
pub fn rows_as_map_list(mut cursor: RowCursor<'_>) -> Result<Vec<RowMap>, SqlSessionError> {
    let columns = cursor.column_names();
    let mut out = Vec::new();
    while let Some(row) = cursor.next_row()? {
        out.push(zip_row(&columns, row));
    }
    Ok(out)
}

/// Rows keyed by the value of `key_column` (first column when `None`).
///
/// A later row whose key equals an earlier one replaces it; the entry keeps the position where
/// the key first appeared.
///
/// # Errors
/// Returns `SqlSessionError::MappingError` if `key_column` names no column of the result.
pub fn rows_keyed_by(
    mut cursor: RowCursor<'_>,
    key_column: Option<&str>,
) -> Result<KeyedRows, SqlSessionError> {
    let columns = cursor.column_names();
    let key_index = match key_column {
        Some(name) => columns
            .iter()
            .position(|col| col.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                SqlSessionError::MappingError(format!("key column `{name}` not in result"))
            })?,
        None => 0,
    };

    let mut keyed = KeyedRows::new();
    while let Some(row) = cursor.next_row()? {
        let key = row.get(key_index).cloned().ok_or_else(|| {
            SqlSessionError::MappingError("result has no columns to key by".into())
        })?;
        keyed.insert(RowKey(key), zip_row(&columns, row));
    }
    Ok(keyed)
}
