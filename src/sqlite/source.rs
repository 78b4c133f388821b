use std::thread;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use r2d2_sqlite::rusqlite;
use tracing::{debug, warn};

use crate::driver::{BufferedStatement, ConnectionSource, DriverConnection, DriverStatement};
use crate::error::SqlSessionError;
use crate::results::ResultSet;
use crate::types::RowValues;

use super::params::Params;
use super::query::build_result_set;

const ROLLBACK_BUSY_RETRIES: &[Duration] =
    &[Duration::from_millis(10), Duration::from_millis(25), Duration::from_millis(50)];

/// Pooled `SQLite` connections handed to a [`crate::SqlSession`].
#[derive(Clone)]
pub struct SqliteSource {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteSource {
    #[must_use]
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &Pool<SqliteConnectionManager> {
        &self.pool
    }

    /// Connections currently checked out of the pool.
    #[must_use]
    pub fn connections_in_use(&self) -> u32 {
        let state = self.pool.state();
        state.connections - state.idle_connections
    }
}

impl std::fmt::Debug for SqliteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.pool.state();
        f.debug_struct("SqliteSource")
            .field("connections", &state.connections)
            .field("idle_connections", &state.idle_connections)
            .finish()
    }
}

impl ConnectionSource for SqliteSource {
    fn acquire(&self) -> Result<Box<dyn DriverConnection>, SqlSessionError> {
        let conn = self.pool.get()?;
        Ok(Box::new(SqliteDriverConnection { conn }))
    }
}

/// One pooled `SQLite` connection. Statements are prepared through the connection's
/// statement cache and their rows are read eagerly.
pub struct SqliteDriverConnection {
    conn: PooledConnection<SqliteConnectionManager>,
}

impl SqliteDriverConnection {
    fn rollback_with_busy_retries(&mut self) -> Result<(), SqlSessionError> {
        for (idx, delay) in ROLLBACK_BUSY_RETRIES.iter().copied().enumerate() {
            match self.conn.execute_batch("ROLLBACK") {
                Ok(()) => return Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::DatabaseBusy
                        && idx + 1 < ROLLBACK_BUSY_RETRIES.len() =>
                {
                    debug!(attempt = idx + 1, "rollback hit SQLITE_BUSY; retrying");
                    thread::sleep(delay);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(SqlSessionError::DriverError(
            "rollback retries exhausted".into(),
        ))
    }
}

impl DriverConnection for SqliteDriverConnection {
    fn parameter_count(&mut self, sql: &str) -> Result<usize, SqlSessionError> {
        Ok(self.conn.prepare_cached(sql)?.parameter_count())
    }

    fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Box<dyn DriverStatement>, SqlSessionError> {
        let params = Params::convert(params);
        let mut stmt = self.conn.prepare_cached(sql)?;
        let result = if stmt.column_count() > 0 {
            build_result_set(&mut stmt, &params)?
        } else {
            let changed = stmt.execute(&params.as_refs()[..])?;
            ResultSet::affected(changed)
        };
        Ok(Box::new(BufferedStatement::new(result)))
    }

    fn begin(&mut self) -> Result<(), SqlSessionError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SqlSessionError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqlSessionError> {
        self.rollback_with_busy_retries()
    }

    fn close(mut self: Box<Self>) -> Result<(), SqlSessionError> {
        // never hand an open transaction back to the pool
        if !self.conn.is_autocommit() {
            warn!("connection returned to pool inside a transaction; rolling back");
            self.rollback_with_busy_retries()?;
        }
        Ok(())
    }
}
