use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::error::SqlSessionError;
use crate::types::RowValues;

/// A bounded window over a result set.
///
/// `index` is zero-based; the window starts at `index * size`. `total` is filled in by the
/// session's paging operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    pub size: usize,
    #[serde(default)]
    pub total: Option<usize>,
}

impl Page {
    #[must_use]
    pub fn new(index: usize, size: usize) -> Self {
        Self {
            index,
            size,
            total: None,
        }
    }

    /// Number of rows skipped before this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.index.saturating_mul(self.size)
    }

    /// Number of pages needed for `total` rows, once `total` is known.
    #[must_use]
    pub fn page_count(&self) -> Option<usize> {
        match (self.total, self.size) {
            (_, 0) | (None, _) => None,
            (Some(total), size) => Some(total.div_ceil(size)),
        }
    }

    #[must_use]
    pub fn has_next(&self) -> Option<bool> {
        self.page_count().map(|count| self.index + 1 < count)
    }
}

/// Rewrites a statement so it returns only the rows of one page.
///
/// Implementations own the dialect; the session runs the rewritten statement through the same
/// execution and mapping path as any other query, on the pinned connection when a transaction
/// is open.
pub trait PagingStrategy: Send + Sync {
    /// # Errors
    /// Returns `SqlSessionError` if the page cannot be expressed for this dialect.
    fn page_window(
        &self,
        ctx: &ExecutionContext,
        page: &Page,
    ) -> Result<ExecutionContext, SqlSessionError>;
}

/// `LIMIT ? OFFSET ?` appended to the statement, as understood by `SQLite`, `PostgreSQL`,
/// and `MySQL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitOffsetPaging;

impl PagingStrategy for LimitOffsetPaging {
    fn page_window(
        &self,
        ctx: &ExecutionContext,
        page: &Page,
    ) -> Result<ExecutionContext, SqlSessionError> {
        if page.size == 0 {
            return Err(SqlSessionError::ParameterError(
                "page size must be at least 1".into(),
            ));
        }
        let limit = i64::try_from(page.size)
            .map_err(|_| SqlSessionError::ParameterError("page size too large".into()))?;
        let offset = i64::try_from(page.offset())
            .map_err(|_| SqlSessionError::ParameterError("page offset too large".into()))?;
        Ok(ctx
            .clone()
            .push_sql(" limit ? offset ?")
            .bind(RowValues::Int(limit))
            .bind(RowValues::Int(offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_offset_appends_window_arguments() {
        let ctx = ExecutionContext::new("select * from t where a = ?").bind(5);
        let windowed = LimitOffsetPaging
            .page_window(&ctx, &Page::new(2, 10))
            .unwrap();
        assert_eq!(windowed.sql(), "select * from t where a = ? limit ? offset ?");
        assert_eq!(
            windowed.params(),
            &[RowValues::Int(5), RowValues::Int(10), RowValues::Int(20)]
        );
    }

    #[test]
    fn zero_sized_page_is_rejected() {
        let ctx = ExecutionContext::new("select 1");
        assert!(LimitOffsetPaging.page_window(&ctx, &Page::new(0, 0)).is_err());
    }

    #[test]
    fn page_count_rounds_up() {
        let mut page = Page::new(0, 10);
        assert_eq!(page.page_count(), None);
        page.total = Some(21);
        assert_eq!(page.page_count(), Some(3));
        assert_eq!(page.has_next(), Some(true));
        page.index = 2;
        assert_eq!(page.has_next(), Some(false));
    }

    #[test]
    fn page_deserializes_without_total() {
        let page: Page = serde_json::from_str(r#"{"index": 1, "size": 25}"#).unwrap();
        assert_eq!(page, Page::new(1, 25));
    }
}
