use serde::{Deserialize, Serialize};

use crate::constants::system::{DEFAULT_PAGE, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// Page request, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }.normalized()
    }

    /// Clamp to a usable window: page >= 1, 1 <= limit <= MAX_PAGE_LIMIT
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// Paging metadata returned alongside a page of items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total_items: u64,
    pub item_count: u64,
    pub items_per_page: u32,
    pub total_pages: u64,
    pub current_page: u32,
}

/// One page of items, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination<T> {
    pub items: Vec<T>,
    pub meta: PaginationMeta,
}

impl<T> Pagination<T> {
    pub fn new(items: Vec<T>, total_items: u64, request: PageRequest) -> Self {
        let request = request.normalized();
        let per_page = u64::from(request.limit);
        let total_pages = total_items.div_ceil(per_page);
        Self {
            meta: PaginationMeta {
                total_items,
                item_count: items.len() as u64,
                items_per_page: request.limit,
                total_pages,
                current_page: request.page,
            },
            items,
        }
    }
}
