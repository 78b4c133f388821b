//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and macros
//! to make it easier to get started with the library.

pub use crate::context::ExecutionContext;
pub use crate::error::SqlSessionError;
pub use crate::handle::ExecutionHandle;
pub use crate::mapping::{FromValue, Mappable};
pub use crate::paging::{Page, PagingStrategy};
pub use crate::results::{KeyedRows, RowKey, RowMap};
pub use crate::session::{SessionOptions, SqlSession, TransactionState};
pub use crate::types::RowValues;
pub use crate::{impl_mappable, params};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteOptions, SqliteOptionsBuilder, SqliteSource};
