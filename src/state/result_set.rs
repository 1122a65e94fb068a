//! ResultSet - Shared Handle Over the Cache State
//!
//! Cheap to clone. Every public operation takes the lock once, lets
//! [`CacheState`] decide, releases the lock and then starts whatever fetch or
//! timer was requested on the tokio runtime. Completions re-enter through a
//! weak reference, so a dropped result set simply ignores late responses.

use std::sync::{Arc, Weak};

use ahash::AHashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::domain::config::ResultSetConfig;
use crate::domain::criteria::{Criteria, CriteriaComparison, CriteriaFilter, RecordFilter};
use crate::domain::record::{Record, RecordKey, RecordRef};
use crate::domain::sort::SortSpecifier;
use crate::error::Result;
use crate::services::{
    ChangeEvent, ChangeKind, ChangeNotifier, EventHub, FetchResponse, Fetcher, ResultSetEvent,
    spawn_named_in_tokio,
};
use crate::state::cache_state::{Action, CacheState, FetchTicket};
use crate::state::history::FetchRecord;
use crate::state::row_cache::Row;

struct Shared {
    state: Mutex<CacheState>,
    fetcher: Arc<dyn Fetcher>,
    events: EventHub,
}

/// Lazily populated, ordered view over the records matching the current
/// criteria and sort
#[derive(Clone)]
pub struct ResultSet {
    shared: Arc<Shared>,
}

/// Builder for [`ResultSet`]
#[derive(Default)]
pub struct ResultSetBuilder {
    config: ResultSetConfig,
    filter: Option<Arc<dyn RecordFilter>>,
    criteria: Criteria,
    sort: Vec<SortSpecifier>,
    initial_data: Option<(Vec<Record>, Option<usize>)>,
    all_rows: Option<Vec<Record>>,
}

impl ResultSetBuilder {
    pub fn config(mut self, config: ResultSetConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default criteria filter
    pub fn filter(mut self, filter: impl RecordFilter) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn sort(mut self, sort: Vec<SortSpecifier>) -> Self {
        self.sort = sort;
        self
    }

    /// Seed with rows already fetched for the initial criteria.
    ///
    /// Without `initial_length` they are every matching row; with it they
    /// are the first rows of a result of that length.
    pub fn initial_data(mut self, rows: Vec<Record>, initial_length: Option<usize>) -> Self {
        self.initial_data = Some((rows, initial_length));
        self
    }

    /// Seed with the complete, unfiltered data set; criteria apply locally
    pub fn all_rows(mut self, rows: Vec<Record>) -> Self {
        self.all_rows = Some(rows);
        self
    }

    pub fn build(self, fetcher: impl Fetcher) -> Result<ResultSet> {
        self.config.validate()?;

        let events = EventHub::new();
        let filter = self
            .filter
            .unwrap_or_else(|| Arc::new(CriteriaFilter::new(self.config.text_match_style)));
        let mut state =
            CacheState::new(self.config, filter, self.criteria, self.sort, events.clone());
        if let Some(rows) = self.all_rows {
            state.seed_all_rows(rows);
        } else if let Some((rows, initial_length)) = self.initial_data {
            state.seed_initial(rows, initial_length);
        }

        tracing::debug!(
            mode = ?state.config().fetch_mode,
            result_size = state.config().result_size,
            seeded = state.length(),
            "Result set created"
        );

        Ok(ResultSet {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                fetcher: Arc::new(fetcher),
                events,
            }),
        })
    }
}

impl ResultSet {
    pub fn builder() -> ResultSetBuilder {
        ResultSetBuilder::default()
    }

    /// Result set with default configuration over `fetcher`
    pub fn new(fetcher: impl Fetcher) -> Result<Self> {
        Self::builder().build(fetcher)
    }

    /// Subscribe to this result set's events.
    ///
    /// Every call returns a fresh receiver that sees each event emitted from
    /// then on; dropping it unsubscribes.
    pub fn events(&self) -> flume::Receiver<ResultSetEvent> {
        self.shared.events.subscribe()
    }

    // ==================== Async plumbing ====================

    fn dispatch(&self, action: Action) {
        match action {
            Action::Idle => {}
            Action::Fetch(ticket) => {
                let future = self.shared.fetcher.fetch(ticket.request.clone());
                let weak = Arc::downgrade(&self.shared);
                spawn_named_in_tokio("resultset-fetch", async move {
                    let result = future.await;
                    if let Some(set) = Self::upgrade(&weak) {
                        set.complete(&ticket, result);
                    }
                });
            }
            Action::Debounce(delay) => {
                let weak = Arc::downgrade(&self.shared);
                spawn_named_in_tokio("resultset-debounce", async move {
                    tokio::time::sleep(delay).await;
                    if let Some(set) = Self::upgrade(&weak) {
                        let action = set.shared.state.lock().fire_debounce();
                        set.dispatch(action);
                    }
                });
            }
        }
    }

    fn upgrade(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    fn complete(&self, ticket: &FetchTicket, result: Result<FetchResponse>) {
        let action = self.shared.state.lock().complete(ticket, result);
        self.dispatch(action);
    }

    /// Run `op` under the lock, then start any fetch it asked for
    fn with_state<T>(&self, op: impl FnOnce(&mut CacheState) -> (T, Action)) -> T {
        let (value, action) = op(&mut *self.shared.state.lock());
        self.dispatch(action);
        value
    }

    fn read<T>(&self, op: impl FnOnce(&CacheState) -> T) -> T {
        op(&*self.shared.state.lock())
    }

    // ==================== Rows ====================

    /// Row at `index`.
    ///
    /// `Row::Loading` (and a fetch) when not cached, `None` past a known end.
    pub fn get(&self, index: usize) -> Option<Row> {
        self.with_state(|state| state.get(index))
    }

    /// Rows `start..end`, clipped to a known length, fetching any gaps
    pub fn get_range(&self, start: usize, end: usize) -> Vec<Row> {
        self.with_state(|state| state.get_range(start, end))
    }

    /// Cached record at `index`; never fetches
    pub fn cached(&self, index: usize) -> Option<RecordRef> {
        self.read(|state| state.cached(index))
    }

    pub fn length(&self) -> usize {
        self.read(CacheState::length)
    }

    pub fn length_is_known(&self) -> bool {
        self.read(CacheState::length_is_known)
    }

    pub fn row_is_loaded(&self, index: usize) -> bool {
        self.read(|state| state.row_is_loaded(index))
    }

    pub fn range_is_loaded(&self, start: usize, end: usize) -> bool {
        self.read(|state| state.range_is_loaded(start, end))
    }

    // ==================== Criteria & sort ====================

    /// Switch criteria; returns whether a fetch was needed
    pub fn set_criteria(&self, criteria: Criteria) -> bool {
        self.with_state(|state| state.set_criteria(criteria))
    }

    pub fn criteria(&self) -> Criteria {
        self.read(|state| state.criteria().clone())
    }

    /// Whether `set_criteria(criteria)` would go to the fetcher
    pub fn will_fetch_data(&self, criteria: &Criteria) -> bool {
        self.read(|state| state.will_fetch_data(criteria))
    }

    pub fn compare_criteria(&self, new: &Criteria, old: &Criteria) -> CriteriaComparison {
        self.read(|state| state.compare_criteria(new, old))
    }

    pub fn set_sort(&self, sort: Vec<SortSpecifier>) {
        self.with_state(|state| ((), state.set_sort(sort)));
    }

    /// Sort by a single field
    pub fn sort_by_field(&self, field: impl Into<String>, ascending: bool) {
        let spec = if ascending {
            SortSpecifier::ascending(field)
        } else {
            SortSpecifier::descending(field)
        };
        self.set_sort(vec![spec]);
    }

    pub fn sort_specifiers(&self) -> Vec<SortSpecifier> {
        self.read(|state| state.sort_specifiers().to_vec())
    }

    /// Apply the current sort again
    pub fn resort(&self) {
        self.with_state(|state| ((), state.resort()));
    }

    /// Re-derive visible rows from the full cache; false without one
    pub fn filter_local_data(&self) -> bool {
        self.with_state(|state| (state.filter_local_data(), Action::Idle))
    }

    // ==================== Cache maintenance ====================

    /// Drop every cached row; the next read fetches again
    pub fn invalidate_cache(&self) {
        self.shared.state.lock().invalidate_cache();
    }

    /// Apply an out-of-band change; returns whether cached rows changed
    pub fn apply_change(&self, kind: ChangeKind, record: Record, matches: Option<bool>) -> bool {
        self.shared.state.lock().apply_change(kind, record, matches)
    }

    /// Apply every change published by `notifier` for as long as both live
    pub fn attach(&self, notifier: &ChangeNotifier) {
        let changes = notifier.subscribe();
        let weak = Arc::downgrade(&self.shared);
        spawn_named_in_tokio("resultset-sync", async move {
            while let Ok(ChangeEvent {
                kind,
                record,
                matches_criteria,
            }) = changes.recv_async().await
            {
                let Some(set) = Self::upgrade(&weak) else {
                    break;
                };
                set.apply_change(kind, record, matches_criteria);
            }
            tracing::debug!("Change subscription closed");
        });
    }

    pub fn set_row(&self, index: usize, record: Record) -> Result<Option<RecordRef>> {
        self.shared.state.lock().set_row(index, record)
    }

    pub fn insert_at(&self, index: usize, record: Record) -> Result<()> {
        self.shared.state.lock().insert_at(index, record)
    }

    pub fn remove_at(&self, index: usize) -> Option<RecordRef> {
        self.shared.state.lock().remove_at(index)
    }

    // ==================== Queries ====================

    pub fn all_matching_rows_cached(&self) -> bool {
        self.read(CacheState::all_matching_rows_cached)
    }

    pub fn all_rows_cached(&self) -> bool {
        self.read(CacheState::all_rows_cached)
    }

    pub fn all_cached_rows(&self) -> Vec<RecordRef> {
        self.read(CacheState::all_cached_rows)
    }

    /// Every row matching the current criteria; `None` while the length is unknown
    pub fn all_visible_rows(&self) -> Option<Vec<RecordRef>> {
        self.read(CacheState::all_visible_rows)
    }

    /// Whether the visible rows are a locally filtered subset of the cache
    pub fn using_filtered_data(&self) -> bool {
        self.read(CacheState::using_filtered_data)
    }

    pub fn find_by_key(&self, key: &RecordKey) -> Option<RecordRef> {
        self.read(|state| state.find_by_key(key))
    }

    pub fn find(&self, field: &str, value: &Value) -> Option<RecordRef> {
        self.read(|state| state.find(field, value))
    }

    pub fn find_all(&self, field: &str, value: &Value) -> Vec<RecordRef> {
        self.read(|state| state.find_all(field, value))
    }

    pub fn find_index(&self, field: &str, value: &Value) -> Option<usize> {
        self.read(|state| state.find_index(field, value))
    }

    pub fn index_of(&self, record: &Record) -> Option<usize> {
        self.read(|state| state.index_of(record))
    }

    pub fn value_map(&self, id_field: &str, display_field: &str) -> AHashMap<String, Value> {
        self.read(|state| state.value_map(id_field, display_field))
    }

    /// Last total row count reported by the fetcher
    pub fn last_total_rows(&self) -> Option<usize> {
        self.read(CacheState::last_total_rows)
    }

    pub fn fetch_history(&self) -> Vec<FetchRecord> {
        self.read(|state| state.history().to_vec())
    }

    pub fn config(&self) -> ResultSetConfig {
        self.read(|state| state.config().clone())
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ResultSet")
            .field("length", &state.length())
            .field("length_known", &state.length_is_known())
            .field("criteria", state.criteria())
            .finish()
    }
}
