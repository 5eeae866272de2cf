//! Page-number pagination for list endpoints.

use serde::{Deserialize, Serialize};

/// Page size used when none, or an out-of-range one, is requested.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Maximum number of items that can be requested per page.
pub const MAX_PAGE_SIZE: i64 = 100;

/// `?page=1&page_size=20`.
///
/// Pages start at 1; anything lower reads as page 1. A `page_size` outside `1..=100` falls
/// back to the default rather than being clamped.
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl Pagination {
    #[inline]
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    #[inline]
    pub fn page_size(&self) -> i64 {
        match self.page_size {
            Some(size) if (1..=MAX_PAGE_SIZE).contains(&size) => size,
            _ => DEFAULT_PAGE_SIZE,
        }
    }

    /// `(skip, limit)` for the repository query.
    #[inline]
    pub fn params(&self) -> (i64, i64) {
        let size = self.page_size();
        ((self.page() - 1).saturating_mul(size), size)
    }
}

/// A page of items together with the unpaginated count.
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub total: i64,
    pub items: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pagination(page: Option<i64>, page_size: Option<i64>) -> Pagination {
        Pagination { page, page_size }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Pagination::default().params(), (0, DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn test_page_below_one_reads_as_first_page() {
        assert_eq!(pagination(Some(0), Some(10)).params(), (0, 10));
        assert_eq!(pagination(Some(-3), Some(10)).params(), (0, 10));
    }

    #[test]
    fn test_out_of_range_page_size_falls_back() {
        assert_eq!(pagination(Some(2), Some(0)).params(), (20, 20));
        assert_eq!(pagination(Some(2), Some(101)).params(), (20, 20));
        assert_eq!(pagination(Some(3), Some(100)).params(), (200, 100));
    }
}
