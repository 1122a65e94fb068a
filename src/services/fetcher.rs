//! Fetcher Contract
//!
//! The only asynchronous collaborator of the result set. Implementors own the
//! transport; the result set only sees row ranges.

use std::future::Future;
use std::ops::Range;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::domain::criteria::Criteria;
use crate::domain::record::Record;
use crate::domain::sort::SortSpecifier;
use crate::error::Result;

/// A request for a row range under the given criteria and sort
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchRequest {
    pub criteria: Criteria,
    /// Always-on constraints, cumulative with `criteria`
    pub implicit_criteria: Criteria,
    pub sort: Vec<SortSpecifier>,
    /// First row, inclusive
    pub start_row: usize,
    /// Last row, exclusive; `None` asks for every remaining row
    pub end_row: Option<usize>,
    /// Ask the source to advertise a total one page past the rows it returns
    /// instead of counting the whole data set
    pub progressive_loading: Option<bool>,
}

impl FetchRequest {
    /// Requested range, if bounded
    pub fn range(&self) -> Option<Range<usize>> {
        self.end_row.map(|end| self.start_row..end)
    }

    /// Requested row count, if bounded
    pub fn row_count(&self) -> Option<usize> {
        self.end_row.map(|end| end.saturating_sub(self.start_row))
    }

    pub fn is_progressive(&self) -> bool {
        self.progressive_loading == Some(true)
    }
}

/// Rows delivered for a request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    pub rows: Vec<Record>,
    pub start_row: usize,
    pub end_row: usize,
    /// Total rows matching the criteria, when the source knows it
    pub total_rows: Option<usize>,
    /// Source detected concurrent modification; drop everything cached first
    pub invalidate_cache: bool,
}

impl FetchResponse {
    /// Response covering `rows` from `start_row`, total unknown
    pub fn new(start_row: usize, rows: Vec<Record>) -> Self {
        let end_row = start_row + rows.len();
        Self {
            rows,
            start_row,
            end_row,
            total_rows: None,
            invalidate_cache: false,
        }
    }

    pub fn with_total(mut self, total_rows: usize) -> Self {
        self.total_rows = Some(total_rows);
        self
    }

    pub fn with_invalidation(mut self) -> Self {
        self.invalidate_cache = true;
        self
    }
}

/// Asynchronous row source
///
/// Must tolerate overlapping or adjacent ranges and may return more rows than
/// asked for. Timeouts are the implementor's concern.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse>>;
}

impl<F, Fut> Fetcher for F
where
    F: Fn(FetchRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FetchResponse>> + Send + 'static,
{
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse>> {
        self(request).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closures_are_fetchers() {
        let fetcher = |request: FetchRequest| async move {
            let rows = (request.start_row..request.end_row.unwrap_or(3))
                .map(|i| Record::new().with("id", i as u64))
                .collect();
            Ok::<_, crate::error::Error>(FetchResponse::new(request.start_row, rows).with_total(3))
        };

        let response = fetcher
            .fetch(FetchRequest {
                start_row: 1,
                ..FetchRequest::default()
            })
            .await
            .expect("fetch");

        assert_eq!(response.start_row, 1);
        assert_eq!(response.end_row, 3);
        assert_eq!(response.total_rows, Some(3));
    }

    #[test]
    fn unbounded_request_has_no_range() {
        let request = FetchRequest::default();
        assert_eq!(request.range(), None);
        assert_eq!(request.row_count(), None);
        assert!(!request.is_progressive());
    }
}
