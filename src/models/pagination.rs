//! Page selection shared by list endpoints.

use serde::{Deserialize, Serialize};

/// Pagination query parameters (`page`, `per_page` or `page_size`).
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct Pagination {
    pub page: Option<i64>,
    #[serde(alias = "page_size")]
    pub per_page: Option<i64>,
}

impl Pagination {
    const MAX_PER_PAGE: i64 = 100;
    const DEFAULT_PER_PAGE: i64 = 50;

    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.current_page() - 1) * self.limit()
    }

    pub fn current_page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }
}

/// One page of results plus totals.
#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T: Serialize> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let per_page = pagination.limit();
        Self {
            items,
            total,
            page: pagination.current_page(),
            per_page,
            total_pages: (total + per_page - 1) / per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_first_page_of_fifty() {
        let p = Pagination::default();
        assert_eq!(p.limit(), 50);
        assert_eq!(p.offset(), 0);
        assert_eq!(p.current_page(), 1);
    }

    #[test]
    fn page_size_alias_and_clamp() {
        let p: Pagination = serde_json::from_str(r#"{"page":2,"page_size":500}"#).unwrap();
        assert_eq!(p.limit(), 100);
        assert_eq!(p.offset(), 100);
    }

    #[test]
    fn non_positive_page_is_first_page() {
        let p = Pagination::new(-3, 10);
        assert_eq!(p.current_page(), 1);
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn empty_result_has_zero_pages() {
        let result = PagedResult::<i32>::new(vec![], 0, &Pagination::new(1, 10));
        assert_eq!(result.total_pages, 0);
        let result = PagedResult::new(vec![1, 2, 3], 21, &Pagination::new(3, 10));
        assert_eq!(result.total_pages, 3);
        assert_eq!(result.page, 3);
    }
}
