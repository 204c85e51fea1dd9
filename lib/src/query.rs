//! Pagination over in-memory result sets.
//!
//! Collections are filtered and sorted by the caller, this module only cuts
//! the requested window and computes the metadata shown by the dashboard.

use std::str::FromStr;

use crate::{ErrorKind, Result};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

/// Query string accepted by the list endpoints.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub is_test_email: Option<bool>,
}

impl ListQuery {
    /// Requested page, starting at 1.
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Parses the status filter into the entity's status type. Blank values
    /// and `all` mean no filtering.
    pub fn status<S: FromStr>(&self) -> Result<Option<S>> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => Ok(None),
            Some(s) => S::from_str(s)
                .map(Some)
                .map_err(|_| ErrorKind::BadInput(format!("unknown status: {s}")).into()),
        }
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Pagination {
    pub current: usize,
    pub pages: usize,
    pub total: usize,
    pub limit: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Cuts the `page`-th window of `limit` items out of an already sorted list.
pub fn paginate<T>(items: Vec<T>, page: usize, limit: usize) -> Page<T> {
    let limit = limit.max(1);
    let page = page.max(1);
    let total = items.len();
    let pages = total.div_ceil(limit);
    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();
    Page {
        items,
        pagination: Pagination {
            current: page,
            pages,
            total,
            limit,
        },
    }
}
