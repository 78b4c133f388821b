use crate::types::RowValues;

/// SQL text and its positional arguments for a single call.
///
/// Every operation receives its own context, so nothing about a previous statement lingers on
/// the session. Contexts can also be built up piece by piece when a query is assembled from
/// optional filters:
/// ```rust
/// use sql_session::prelude::*;
///
/// let name: Option<&str> = Some("alice");
/// let mut ctx = ExecutionContext::new("select * from users where 1 = 1");
/// if let Some(name) = name {
///     ctx = ctx.push(" and name = ?", name);
/// }
/// ctx = ctx.push_sql(" order by id");
/// assert_eq!(ctx.sql(), "select * from users where 1 = 1 and name = ? order by id");
/// assert_eq!(ctx.params().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    sql: String,
    params: Vec<RowValues>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_params(sql: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub(crate) fn from_slice(sql: &str, params: &[RowValues]) -> Self {
        Self::with_params(sql, params.to_vec())
    }

    /// Append one positional argument.
    #[must_use]
    pub fn bind(mut self, value: impl Into<RowValues>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Append SQL text without arguments.
    #[must_use]
    pub fn push_sql(mut self, fragment: &str) -> Self {
        self.sql.push_str(fragment);
        self
    }

    /// Append SQL text together with the argument for its placeholder.
    #[must_use]
    pub fn push(self, fragment: &str, value: impl Into<RowValues>) -> Self {
        self.push_sql(fragment).bind(value)
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn params(&self) -> &[RowValues] {
        &self.params
    }

    #[must_use]
    pub fn into_parts(self) -> (String, Vec<RowValues>) {
        (self.sql, self.params)
    }
}

impl From<&str> for ExecutionContext {
    fn from(sql: &str) -> Self {
        ExecutionContext::new(sql)
    }
}

impl From<(&str, Vec<RowValues>)> for ExecutionContext {
    fn from((sql, params): (&str, Vec<RowValues>)) -> Self {
        ExecutionContext::with_params(sql, params)
    }
}
