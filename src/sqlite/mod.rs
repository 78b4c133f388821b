// SQLite module - blocking SQLite backend for the session driver traits
//
// - config: connection options and pool setup
// - params: parameter conversion between session and SQLite types
// - query: result extraction and building
// - source: pooled connections implementing the driver traits

pub mod config;
pub mod params;
pub mod query;
pub mod source;

pub use config::{SqliteOptions, SqliteOptionsBuilder};
pub use source::{SqliteDriverConnection, SqliteSource};
pub use params::Params as SqliteParams;
pub use query::build_result_set;
