//! Offset pagination for segment member listings

use crate::ApiError;
use serde::Deserialize;

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;

/// `?limit=&offset=` query parameters
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// One page of `total` items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
    /// Exclusive end index into the full list
    pub end: usize,
    pub has_more: bool,
}

impl PageQuery {
    pub fn validate(&self) -> Result<(), ApiError> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }
        Ok(())
    }

    /// Window into a list of `total` items; an offset past the end is empty
    pub fn page(&self, total: usize) -> Page {
        let offset = self.offset.min(total);
        let end = offset.saturating_add(self.limit).min(total);
        Page {
            limit: self.limit,
            offset: self.offset,
            end,
            has_more: end < total,
        }
    }
}
