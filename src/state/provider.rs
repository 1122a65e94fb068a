//! PagedDataProvider Trait
//!
//! Abstraction a table or list view renders from: it asks for ranges as they
//! scroll into view and draws whatever is cached.

use std::ops::Range;

use crate::domain::record::RecordRef;
use crate::state::result_set::ResultSet;

/// Paged data provider for lazy loading
pub trait PagedDataProvider: Send + Sync + 'static {
    type Row: Clone + Send + Sync + 'static;

    /// Get the total number of rows (may be estimated)
    fn len(&self) -> usize;

    /// Check if empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a cached row by index (returns None if not yet loaded)
    fn cached_row(&self, index: usize) -> Option<Self::Row>;

    /// Request a range of rows to be loaded
    fn request_range(&self, range: Range<usize>);

    /// Check if a range is loaded
    fn is_range_loaded(&self, range: Range<usize>) -> bool;
}

impl PagedDataProvider for ResultSet {
    type Row = RecordRef;

    fn len(&self) -> usize {
        self.length()
    }

    fn cached_row(&self, index: usize) -> Option<RecordRef> {
        self.cached(index)
    }

    fn request_range(&self, range: Range<usize>) {
        self.get_range(range.start, range.end);
    }

    fn is_range_loaded(&self, range: Range<usize>) -> bool {
        self.range_is_loaded(range.start, range.end)
    }
}
