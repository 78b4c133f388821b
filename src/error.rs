use thiserror::Error;

#[cfg(feature = "sqlite")]
use r2d2_sqlite::rusqlite;

#[derive(Debug, Error)]
pub enum SqlSessionError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    PoolError(#[from] r2d2::Error),

    #[error("Driver error: {0}")]
    DriverError(String),

    /// Statement preparation, binding, or execution failed.
    #[error("SQL execution error for `{sql}`: {source}")]
    ExecutionError {
        sql: String,
        #[source]
        source: Box<SqlSessionError>,
    },

    #[error("Parameter error: {0}")]
    ParameterError(String),

    /// A column could not be coerced into the requested target.
    #[error("Mapping error: {0}")]
    MappingError(String),

    /// Closing a cursor, statement, or connection failed.
    #[error("Failed to release {resource}: {source}")]
    ResourceReleaseError {
        resource: &'static str,
        #[source]
        source: Box<SqlSessionError>,
    },

    /// The operation failed and so did the cleanup that followed it.
    ///
    /// `primary` is the original failure; use [`SqlSessionError::primary`] to assert on it.
    #[error("{primary}; cleanup also failed: {cleanup}")]
    CleanupFailed {
        primary: Box<SqlSessionError>,
        cleanup: Box<SqlSessionError>,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SqlSessionError {
    pub(crate) fn execution(sql: &str, cause: SqlSessionError) -> Self {
        SqlSessionError::ExecutionError {
            sql: sql.to_owned(),
            source: Box::new(cause),
        }
    }

    pub(crate) fn release(resource: &'static str, cause: SqlSessionError) -> Self {
        match cause {
            already @ SqlSessionError::ResourceReleaseError { .. } => already,
            other => SqlSessionError::ResourceReleaseError {
                resource,
                source: Box::new(other),
            },
        }
    }

    /// Fold an operation outcome and its cleanup outcome into one result.
    ///
    /// A cleanup failure never replaces the operation's own failure: when both fail the
    /// result is [`SqlSessionError::CleanupFailed`] carrying both.
    pub(crate) fn merge<T>(
        outcome: Result<T, SqlSessionError>,
        cleanup: Result<(), SqlSessionError>,
    ) -> Result<T, SqlSessionError> {
        match (outcome, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup)) => Err(cleanup),
            (Err(primary), Ok(())) => Err(primary),
            (Err(primary), Err(cleanup)) => Err(SqlSessionError::CleanupFailed {
                primary: Box::new(primary),
                cleanup: Box::new(cleanup),
            }),
        }
    }

    /// The original failure, looking through [`SqlSessionError::CleanupFailed`].
    #[must_use]
    pub fn primary(&self) -> &SqlSessionError {
        match self {
            SqlSessionError::CleanupFailed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// The cleanup failure that accompanied the primary one, if any.
    #[must_use]
    pub fn cleanup_error(&self) -> Option<&SqlSessionError> {
        match self {
            SqlSessionError::CleanupFailed { cleanup, .. } => Some(cleanup),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_execution_error(&self) -> bool {
        matches!(self.primary(), SqlSessionError::ExecutionError { .. })
    }

    #[must_use]
    pub fn is_mapping_error(&self) -> bool {
        matches!(self.primary(), SqlSessionError::MappingError(_))
    }

    #[must_use]
    pub fn is_release_error(&self) -> bool {
        matches!(self.primary(), SqlSessionError::ResourceReleaseError { .. })
    }

    #[must_use]
    pub fn is_illegal_state(&self) -> bool {
        matches!(self.primary(), SqlSessionError::IllegalState(_))
    }

    /// SQL text attached to an execution failure.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self.primary() {
            SqlSessionError::ExecutionError { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Machine-readable code for the error kind.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            SqlSessionError::SqliteError(_) => "SQLITE_ERROR",
            #[cfg(feature = "sqlite")]
            SqlSessionError::PoolError(_) => "POOL_ERROR",
            SqlSessionError::DriverError(_) => "DRIVER_ERROR",
            SqlSessionError::ExecutionError { .. } => "EXECUTION_ERROR",
            SqlSessionError::ParameterError(_) => "PARAMETER_ERROR",
            SqlSessionError::MappingError(_) => "MAPPING_ERROR",
            SqlSessionError::ResourceReleaseError { .. } => "RESOURCE_RELEASE_ERROR",
            SqlSessionError::CleanupFailed { .. } => "CLEANUP_FAILED",
            SqlSessionError::IllegalState(_) => "ILLEGAL_STATE",
            SqlSessionError::ConfigError(_) => "CONFIG_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_carries_sql_and_cause() {
        let err = SqlSessionError::execution(
            "select * from missing",
            SqlSessionError::DriverError("no such table: missing".into()),
        );
        assert!(err.is_execution_error());
        assert_eq!(err.sql(), Some("select * from missing"));
        assert!(err.to_string().contains("no such table"));
        assert_eq!(err.error_code(), "EXECUTION_ERROR");
    }

    #[test]
    fn merge_keeps_primary_when_cleanup_also_fails() {
        let outcome: Result<(), _> = Err(SqlSessionError::MappingError("bad int".into()));
        let cleanup = Err(SqlSessionError::release(
            "statement",
            SqlSessionError::DriverError("close failed".into()),
        ));
        let err = SqlSessionError::merge(outcome, cleanup).unwrap_err();
        assert_eq!(err.error_code(), "CLEANUP_FAILED");
        assert!(err.is_mapping_error());
        assert!(err.cleanup_error().is_some_and(SqlSessionError::is_release_error));
        assert!(err.to_string().contains("bad int"));
        assert!(err.to_string().contains("close failed"));
    }

    #[test]
    fn merge_surfaces_cleanup_failure_on_success_path() {
        let outcome = Ok(7);
        let cleanup = Err(SqlSessionError::release(
            "connection",
            SqlSessionError::DriverError("socket gone".into()),
        ));
        let err = SqlSessionError::merge(outcome, cleanup).unwrap_err();
        assert!(err.is_release_error());
        assert!(err.cleanup_error().is_none());
    }

    #[test]
    fn release_does_not_double_wrap() {
        let inner = SqlSessionError::release("cursor", SqlSessionError::DriverError("x".into()));
        let outer = SqlSessionError::release("statement", inner);
        match outer {
            SqlSessionError::ResourceReleaseError { resource, .. } => assert_eq!(resource, "cursor"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
