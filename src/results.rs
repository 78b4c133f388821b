//! Materialized result sets and the ordered row shapes produced by the mapper.

mod result_set;
mod row;

pub use result_set::ResultSet;
pub use row::{KeyedRows, RowKey, RowMap};
