//! In-Memory Fetcher
//!
//! Serves row ranges out of a shared `Vec<Record>`, applying the same local
//! filter and sort chain the result set uses. Mutations are published to an
//! optional change notifier so attached result sets stay in sync.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::domain::criteria::{CriteriaFilter, RecordFilter};
use crate::domain::record::{Record, RecordKey};
use crate::domain::sort::SortChain;
use crate::error::Result;
use crate::services::fetcher::{FetchRequest, FetchResponse, Fetcher};
use crate::services::notifier::{ChangeEvent, ChangeNotifier};

/// Fetcher backed by an in-memory record list
#[derive(Clone)]
pub struct MemoryFetcher {
    rows: Arc<RwLock<Vec<Record>>>,
    filter: Arc<dyn RecordFilter>,
    primary_keys: Vec<String>,
    report_totals: bool,
    notifier: Option<ChangeNotifier>,
}

impl MemoryFetcher {
    /// Create a new fetcher over `rows`, keyed by `id`
    pub fn new(rows: Vec<Record>) -> Self {
        Self::from_arc(Arc::new(RwLock::new(rows)))
    }

    /// Create from a shared list
    pub fn from_arc(rows: Arc<RwLock<Vec<Record>>>) -> Self {
        Self {
            rows,
            filter: Arc::new(CriteriaFilter::default()),
            primary_keys: vec![crate::constants::DEFAULT_PRIMARY_KEY.to_string()],
            report_totals: true,
            notifier: None,
        }
    }

    /// Use a custom filter
    pub fn with_filter(mut self, filter: impl RecordFilter) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Use custom primary key fields for mutations
    pub fn with_primary_keys(mut self, primary_keys: Vec<String>) -> Self {
        self.primary_keys = primary_keys;
        self
    }

    /// Leave `total_rows` unset in responses (progressive loading)
    pub fn without_totals(mut self) -> Self {
        self.report_totals = false;
        self
    }

    /// Publish mutations to this notifier
    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Snapshot of all rows
    pub fn all(&self) -> Vec<Record> {
        self.rows.read().clone()
    }

    /// Append a record and publish an add
    pub fn insert(&self, record: Record) {
        self.rows.write().push(record.clone());
        self.publish(ChangeEvent::add(record));
    }

    /// Replace the record with the same key and publish an update
    pub fn update(&self, record: Record) -> bool {
        let replaced = {
            let mut rows = self.rows.write();
            match rows
                .iter_mut()
                .find(|row| row.same_identity(&record, &self.primary_keys))
            {
                Some(row) => {
                    *row = record.clone();
                    true
                }
                None => false,
            }
        };
        if replaced {
            self.publish(ChangeEvent::update(record));
        }
        replaced
    }

    /// Remove the record with this key and publish a removal
    pub fn remove(&self, key: &RecordKey) -> Option<Record> {
        let removed = {
            let mut rows = self.rows.write();
            let index = rows
                .iter()
                .position(|row| key.matches(row, &self.primary_keys))?;
            rows.remove(index)
        };
        self.publish(ChangeEvent::remove(removed.clone()));
        Some(removed)
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(event);
        }
    }

    fn respond(&self, request: &FetchRequest) -> FetchResponse {
        let rows = self.rows.read();
        let mut matching: Vec<&Record> = rows
            .iter()
            .filter(|row| {
                self.filter.matches(row, &request.implicit_criteria)
                    && self.filter.matches(row, &request.criteria)
            })
            .collect();
        SortChain(&request.sort).sort(&mut matching);

        let total = matching.len();
        let start = request.start_row.min(total);
        let end = request.end_row.unwrap_or(total).clamp(start, total);
        let page: Vec<Record> = matching[start..end].iter().map(|row| (*row).clone()).collect();

        let response = FetchResponse::new(start, page);
        if !self.report_totals {
            return response;
        }
        if request.is_progressive() {
            // One page past the last returned row
            let page_size = request.row_count().unwrap_or(end - start);
            return response.with_total(end.saturating_add(page_size).min(total));
        }
        response.with_total(total)
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse>> {
        let response = self.respond(&request);
        tracing::trace!(
            start = response.start_row,
            end = response.end_row,
            total = ?response.total_rows,
            "Memory fetch served"
        );
        futures::future::ready(Ok(response)).boxed()
    }
}

impl std::fmt::Debug for MemoryFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFetcher")
            .field("rows", &self.len())
            .field("report_totals", &self.report_totals)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::criteria::{Criteria, Criterion};
    use crate::domain::sort::SortSpecifier;
    use serde_json::json;

    fn people() -> Vec<Record> {
        (0..10)
            .map(|i| Record::new().with("id", i).with("age", 50 - i * 3))
            .collect()
    }

    fn request(criteria: Criteria, start: usize, end: Option<usize>) -> FetchRequest {
        FetchRequest {
            criteria,
            sort: vec![SortSpecifier::ascending("age")],
            start_row: start,
            end_row: end,
            ..FetchRequest::default()
        }
    }

    #[tokio::test]
    async fn serves_filtered_sorted_page() {
        let fetcher = MemoryFetcher::new(people());
        let criteria = Criteria::new().with("age", Criterion::LessThan(json!(40)));
        let response = fetcher.fetch(request(criteria, 1, Some(3))).await.expect("fetch");

        // ages below 40: ids 4..=9 -> ages 38,35,32,29,26,23; ascending: 23,26,29,...
        let ids: Vec<_> = response.rows.iter().map(|r| r.value("id").clone()).collect();
        assert_eq!(ids, vec![json!(8), json!(7)]);
        assert_eq!(response.total_rows, Some(6));
        assert_eq!((response.start_row, response.end_row), (1, 3));
    }

    #[tokio::test]
    async fn clamps_past_end_and_hides_totals() {
        let fetcher = MemoryFetcher::new(people()).without_totals();
        let response = fetcher
            .fetch(request(Criteria::new(), 8, Some(20)))
            .await
            .expect("fetch");
        assert_eq!(response.rows.len(), 2);
        assert_eq!(response.total_rows, None);
    }

    #[tokio::test]
    async fn implicit_criteria_always_apply() {
        let fetcher = MemoryFetcher::new(people());
        let request = FetchRequest {
            implicit_criteria: Criteria::new().with("id", Criterion::LessThan(json!(5))),
            ..request(Criteria::new().with("age", Criterion::LessThan(json!(45))), 0, None)
        };
        let response = fetcher.fetch(request).await.expect("fetch");

        // ids 2..=4 have ages 44, 41, 38
        assert_eq!(response.total_rows, Some(3));
        assert!(response.rows.iter().all(|r| r.value("id").as_i64() < Some(5)));
    }

    #[tokio::test]
    async fn progressive_requests_advertise_one_more_page() {
        let fetcher = MemoryFetcher::new(people());
        let progressive = |start, end| FetchRequest {
            progressive_loading: Some(true),
            ..request(Criteria::new(), start, Some(end))
        };

        let response = fetcher.fetch(progressive(0, 3)).await.expect("fetch");
        assert_eq!(response.total_rows, Some(6));

        let response = fetcher.fetch(progressive(6, 9)).await.expect("fetch");
        assert_eq!(response.total_rows, Some(10));
    }

    #[test]
    fn mutations_publish_changes() {
        let notifier = ChangeNotifier::new();
        let rx = notifier.subscribe();
        let fetcher = MemoryFetcher::new(people()).with_notifier(notifier);

        assert!(fetcher.update(Record::new().with("id", 3).with("age", 1)));
        assert!(fetcher.remove(&RecordKey::single(4)).is_some());
        assert!(fetcher.remove(&RecordKey::single(42)).is_none());

        let kinds: Vec<_> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                crate::services::notifier::ChangeKind::Update,
                crate::services::notifier::ChangeKind::Remove
            ]
        );
        assert_eq!(fetcher.len(), 9);
    }
}
