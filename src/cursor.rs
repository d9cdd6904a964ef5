//! Paging progress through the node table.
//!
//! The cursor accepts a page only when its start offset equals `next_offset`.
//! Anything else is a response to a request that has already been superseded
//! (a duplicate, a late reply, or a reply from before a reset) and is dropped
//! without touching the table.

use crate::backend::NodeDetail;
use crate::table::NodeTable;

/// Range requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Start offset did not match; nothing changed.
    Stale,
    Merged { accepted: usize, complete: bool },
}

#[derive(Debug, Clone)]
pub struct HydrationCursor {
    next_offset: usize,
    total: Option<usize>,
    complete: bool,
    page_size: usize,
}

impl HydrationCursor {
    #[must_use]
    pub fn new(page_size: usize, total: Option<usize>) -> Self {
        Self {
            next_offset: 0,
            total,
            complete: total == Some(0),
            page_size: page_size.max(1),
        }
    }

    /// Next range to ask for, or `None` once hydration is complete.
    #[must_use]
    pub const fn request_next_page(&self) -> Option<PageRequest> {
        if self.complete {
            return None;
        }
        Some(PageRequest {
            offset: self.next_offset,
            limit: self.page_size,
        })
    }

    /// Merge a page that starts at `start_offset`.
    pub fn accept_page(
        &mut self,
        table: &mut NodeTable,
        start_offset: usize,
        records: Vec<NodeDetail>,
    ) -> PageOutcome {
        if start_offset != self.next_offset || self.complete {
            return PageOutcome::Stale;
        }

        let accepted = records.len();
        for (position, detail) in (start_offset..).zip(records) {
            table.fill(position, detail);
        }
        self.next_offset += accepted;

        if accepted < self.page_size || self.total.is_some_and(|t| self.next_offset >= t) {
            self.complete = true;
        }

        PageOutcome::Merged {
            accepted,
            complete: self.complete,
        }
    }

    #[must_use]
    pub const fn next_offset(&self) -> usize {
        self.next_offset
    }

    #[must_use]
    pub const fn total(&self) -> Option<usize> {
        self.total
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }
}
