//! Blocking convenience layer over a SQL driver.
//!
//! A [`SqlSession`] runs statements with positional arguments, maps their rows into scalars,
//! records, ordered column maps, or keyed maps, pages them, and decides when statements,
//! cursors, and connections are released. Outside a transaction every call borrows a
//! connection and gives it back before returning; inside one, all calls share a pinned
//! connection until `commit` or `rollback`.
//!
//! ```rust,no_run
//! use sql_session::prelude::*;
//!
//! # fn main() -> Result<(), SqlSessionError> {
//! let source = SqliteOptionsBuilder::new("app.db").build()?;
//! let mut session = SqlSession::new(source);
//!
//! session.begin_transaction()?;
//! session.update("insert into users (name) values (?)", &params!["alice"])?;
//! session.commit()?;
//!
//! let n = session.count("select * from users", &[])?;
//! # let _ = n;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod driver;
pub mod error;
pub mod handle;
pub mod mapper;
pub mod mapping;
pub mod paging;
pub mod prelude;
pub mod results;
pub mod session;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use context::ExecutionContext;
pub use error::SqlSessionError;
pub use handle::{ExecutionHandle, RowCursor};
pub use mapping::{FromValue, Mappable};
pub use paging::{LimitOffsetPaging, Page, PagingStrategy};
pub use results::{KeyedRows, ResultSet, RowKey, RowMap};
pub use session::{SessionOptions, SqlSession, TransactionState};
pub use types::RowValues;

#[cfg(feature = "sqlite")]
pub use r2d2_sqlite::rusqlite;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteOptions, SqliteOptionsBuilder, SqliteSource};
