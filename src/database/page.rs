use crate::database::record::Record;
use crate::error::RustyTableError;
use serde::Serialize;

/// What a caller asks for when browsing a table.
#[derive(Clone, Debug, PartialEq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: u64,
    /// Records per page, `None` for the configured default
    pub per_page: Option<u64>,
    /// Substring filter over the whole serialized row
    pub search: Option<String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            page: 1,
            per_page: None,
            search: None,
        }
    }
}

impl PageRequest {
    pub fn new(page: u64, per_page: u64) -> Self {
        PageRequest {
            page,
            per_page: Some(per_page),
            search: None,
        }
    }

    pub fn with_search(mut self, search: &str) -> Self {
        self.search = Some(search.to_owned());
        self
    }

    /// Search term to apply; an empty term filters nothing.
    pub(crate) fn search_term(&self) -> Option<&str> {
        self.search.as_deref().filter(|term| !term.is_empty())
    }

    /// Validates the request and returns `(limit, offset)` for the store.
    pub(crate) fn window(&self, default_per_page: u64) -> Result<(u64, u64), RustyTableError> {
        let per_page = self.per_page.unwrap_or(default_per_page);
        if self.page == 0 {
            Err(RustyTableError::InvalidParameter {
                name: "page".to_owned(),
                message: "pages are numbered from 1".to_owned(),
            })?
        }
        if per_page == 0 {
            Err(RustyTableError::InvalidParameter {
                name: "per_page".to_owned(),
                message: "must be greater than zero".to_owned(),
            })?
        }
        let offset = (self.page - 1).saturating_mul(per_page);
        Ok((per_page, offset))
    }
}

/// One page of a table, rendered with the descriptor's column order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Page {
    pub table_name: String,
    pub columns: Vec<String>,
    pub records: Vec<Record>,
    /// Records matching the search (all records without one)
    pub total: u64,
    pub pages: u64,
    pub current_page: u64,
}

/// Number of pages needed for `total` records, zero for an empty result.
pub(crate) fn total_pages(total: u64, per_page: u64) -> u64 {
    total.div_ceil(per_page)
}
