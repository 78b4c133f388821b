use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SqlSessionError;

use super::source::SqliteSource;

const MEMORY_PATH: &str = ":memory:";

/// Options for configuring a `SQLite` pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    pub db_path: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    pub wal: bool,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            db_path: MEMORY_PATH.to_string(),
            max_connections: 4,
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Parse options from JSON; absent keys take their defaults.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConfigError` if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, SqlSessionError> {
        serde_json::from_str(json)
            .map_err(|e| SqlSessionError::ConfigError(format!("invalid SQLite options: {e}")))
    }

    fn is_memory(&self) -> bool {
        self.db_path == MEMORY_PATH
    }

    /// Create the pool and check one connection out of it.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConfigError` for unusable options, or a pool/driver error if
    /// the smoke test fails.
    pub fn build(self) -> Result<SqliteSource, SqlSessionError> {
        if self.max_connections == 0 {
            return Err(SqlSessionError::ConfigError(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.db_path.is_empty() {
            return Err(SqlSessionError::ConfigError("db_path must not be empty".into()));
        }

        let busy_timeout = Duration::from_millis(self.busy_timeout_ms);
        let wal = self.wal && !self.is_memory();
        let manager = if self.is_memory() {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&self.db_path)
        }
        .with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            Ok(())
        });

        // every in-memory connection is its own database, so share a single one and never
        // let the pool retire it
        let mut builder = r2d2::Pool::builder();
        if self.is_memory() {
            builder = builder.max_size(1).idle_timeout(None).max_lifetime(None);
        } else {
            builder = builder.max_size(self.max_connections);
        }
        let pool = builder.build(manager)?;

        {
            let conn = pool.get()?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        }
        debug!(db_path = %self.db_path, max_size = pool.max_size(), wal, "SQLite pool ready");

        Ok(SqliteSource::new(pool))
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.opts.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.opts.busy_timeout_ms = busy_timeout_ms;
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build a pooled [`SqliteSource`].
    ///
    /// # Errors
    ///
    /// Returns `SqlSessionError` if pool creation or the initial smoke test fails.
    pub fn build(self) -> Result<SqliteSource, SqlSessionError> {
        self.finish().build()
    }
}
