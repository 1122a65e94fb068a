//! Cache State - Synchronous Core of the Result Set
//!
//! Every decision (what to fetch, what to keep, which events to emit) is made
//! here while the caller holds the result set lock. The async shell only gets
//! back an [`Action`] describing the fetch or debounce timer to start, so the
//! lock is never held across the fetcher call.
//!
//! ```text
//! get_range(start, end)
//!       │
//!       ▼
//! request_view ── fetch_delay > 0 ──> Action::Debounce ──> fire_debounce
//!       │                                                       │
//!       ▼                                                       │
//! plan_fetch <──────────────────────────────────────────────────┘
//!       │  in flight? ──> deferred view (latest wins) ──┐
//!       │  dirty? ──> drop_cache (generation + 1)       │
//!       ▼                                               │
//! Action::Fetch(ticket) ──> complete(ticket, result)    │
//!                               │ stale generation ──> discarded
//!                               ▼                       │
//!                           integrate ──> plan_fetch(deferred)
//! ```

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use serde_json::Value;

use crate::domain::config::{CriteriaPolicy, FetchMode, ResultSetConfig, StaleTotalsPolicy};
use crate::domain::criteria::{Criteria, CriteriaComparison, RecordFilter};
use crate::domain::record::{Record, RecordKey, RecordRef};
use crate::domain::sort::{SortChain, SortSpecifier};
use crate::domain::value::{text_of, values_equal};
use crate::error::{Error, Result};
use crate::services::{EventHub, FetchRequest, FetchResponse, ResultSetEvent};
use crate::state::fetch_plan;
use crate::state::history::{FetchHistory, FetchOutcome};
use crate::state::row_cache::{Row, RowCache};

/// Work the async shell must start after the lock is released
#[derive(Debug)]
pub(crate) enum Action {
    Idle,
    Fetch(FetchTicket),
    /// Start a timer, then call [`CacheState::fire_debounce`]
    Debounce(Duration),
}

/// An issued fetch, tagged with the generation it belongs to
#[derive(Debug, Clone)]
pub(crate) struct FetchTicket {
    pub id: u64,
    pub generation: u64,
    pub request: FetchRequest,
}

/// Every row matching `criteria`, kept in the current sort order
#[derive(Debug)]
pub(super) struct AllRows {
    pub criteria: Criteria,
    pub rows: Vec<RecordRef>,
}

#[derive(Debug, Default)]
struct Debounce {
    pending: Option<Range<usize>>,
    armed: bool,
}

pub(crate) struct CacheState {
    pub(super) config: ResultSetConfig,
    pub(super) filter: Arc<dyn RecordFilter>,
    pub(super) criteria: Criteria,
    pub(super) sort: Vec<SortSpecifier>,
    pub(super) cache: RowCache,
    /// Present while the full cache is valid
    pub(super) all_rows: Option<AllRows>,
    pub(super) generation: u64,
    next_fetch_id: u64,
    pub(super) in_flight: Option<u64>,
    deferred: Option<Range<usize>>,
    /// Partial cache was modified; the next fetch drops everything first
    pub(super) dirty: bool,
    pub(super) last_fetched: Option<Range<usize>>,
    last_view: Range<usize>,
    last_total_rows: Option<usize>,
    reported_length: (usize, bool),
    debounce: Debounce,
    history: FetchHistory,
    events: EventHub,
}

impl CacheState {
    pub fn new(
        config: ResultSetConfig,
        filter: Arc<dyn RecordFilter>,
        criteria: Criteria,
        sort: Vec<SortSpecifier>,
        events: EventHub,
    ) -> Self {
        Self {
            config,
            filter,
            criteria,
            sort,
            cache: RowCache::default(),
            all_rows: None,
            generation: 0,
            next_fetch_id: 1,
            in_flight: None,
            deferred: None,
            dirty: false,
            last_fetched: None,
            last_view: 0..0,
            last_total_rows: None,
            reported_length: (0, false),
            debounce: Debounce::default(),
            history: FetchHistory::default(),
            events,
        }
    }

    // ==================== Seeding ====================

    /// Seed with rows as if returned by the first fetch.
    ///
    /// Without `initial_length` the rows are taken as every match for the
    /// current criteria; with it they are the head of a partial result.
    pub fn seed_initial(&mut self, rows: Vec<Record>, initial_length: Option<usize>) {
        let rows: Vec<RecordRef> = rows.into_iter().map(Arc::new).collect();
        match initial_length {
            Some(length) => {
                let end = self.cache.write(0, rows);
                self.cache.set_length(length.max(end), true);
                self.last_fetched = Some(0..end);
            }
            None => {
                self.all_rows = Some(AllRows {
                    criteria: self.criteria.clone(),
                    rows: rows.clone(),
                });
                self.last_fetched = Some(0..rows.len());
                self.cache.fill(rows);
            }
        }
        self.last_total_rows = Some(self.cache.length());
        self.reported_length = (self.cache.length(), self.cache.length_known());
    }

    /// Seed with the complete, unfiltered data set
    pub fn seed_all_rows(&mut self, rows: Vec<Record>) {
        let implicit = &self.config.implicit_criteria;
        let mut rows: Vec<RecordRef> = rows
            .into_iter()
            .filter(|record| self.filter.matches(record, implicit))
            .map(Arc::new)
            .collect();
        SortChain(&self.sort).sort(&mut rows);
        self.last_total_rows = Some(rows.len());
        self.all_rows = Some(AllRows {
            criteria: Criteria::new(),
            rows,
        });
        self.rebuild_from_all_rows();
        self.last_fetched = Some(0..self.cache.length());
        self.reported_length = (self.cache.length(), self.cache.length_known());
    }

    // ==================== Reads ====================

    pub fn get(&mut self, index: usize) -> (Option<Row>, Action) {
        if let Some(record) = self.cache.row(index) {
            return (Some(Row::Record(record.clone())), Action::Idle);
        }
        if self.cache.length_known() && index >= self.cache.length() {
            return (None, Action::Idle);
        }
        // A row at usize::MAX could never fit under a usize length
        let Some(end) = index.checked_add(1) else {
            return (None, Action::Idle);
        };
        let action = self.request_view(index..end);
        (Some(self.row_at(index)), action)
    }

    pub fn get_range(&mut self, start: usize, end: usize) -> (Vec<Row>, Action) {
        let action = self.request_view(start..end);
        let end = if self.cache.length_known() {
            end.min(self.cache.length())
        } else {
            end
        };
        let rows = (start..end.max(start)).map(|index| self.row_at(index)).collect();
        (rows, action)
    }

    fn row_at(&self, index: usize) -> Row {
        self.cache
            .row(index)
            .map(|record| Row::Record(record.clone()))
            .unwrap_or(Row::Loading)
    }

    fn clip(&self, view: Range<usize>) -> Range<usize> {
        let end = view.end.max(view.start);
        if self.cache.length_known() {
            let length = self.cache.length();
            view.start.min(length)..end.min(length)
        } else {
            view.start..end
        }
    }

    // ==================== Fetch planning ====================

    fn request_view(&mut self, view: Range<usize>) -> Action {
        self.last_view = view.clone();
        let clipped = self.clip(view.clone());
        if clipped.is_empty() || self.cache.gaps(clipped).is_empty() {
            return Action::Idle;
        }

        let delay = self.config.fetch_delay();
        if !delay.is_zero() {
            self.debounce.pending = Some(view);
            if self.debounce.armed {
                return Action::Idle;
            }
            self.debounce.armed = true;
            return Action::Debounce(delay);
        }

        self.plan_fetch(view)
    }

    /// Debounce timer elapsed: fetch for the most recent view only
    pub fn fire_debounce(&mut self) -> Action {
        self.debounce.armed = false;
        match self.debounce.pending.take() {
            Some(view) => self.plan_fetch(view),
            None => Action::Idle,
        }
    }

    /// Every path to a new fetch ends here, after any debounce or deferral
    fn plan_fetch(&mut self, view: Range<usize>) -> Action {
        if self.in_flight.is_some() {
            self.deferred = Some(view);
            return Action::Idle;
        }
        if self.dirty {
            tracing::debug!("Dropping modified partial cache before fetching");
            self.drop_cache();
            self.emit(ResultSetEvent::DataChanged);
            self.announce_length();
        }
        let clipped = self.clip(view.clone());
        if clipped.is_empty() {
            return Action::Idle;
        }

        let visible_only = self.config.always_request_visible_rows;
        match self.config.fetch_mode {
            FetchMode::Paged if visible_only => self.plan_pages(view, clipped, 0),
            FetchMode::Paged => {
                let window = self.config.result_size.max(1);
                self.plan_pages(view, clipped, window)
            }
            FetchMode::Basic if visible_only => self.plan_pages(view, clipped, 0),
            FetchMode::Basic | FetchMode::Local => {
                if self.all_rows.is_some() || self.cache.gaps(clipped).is_empty() {
                    return Action::Idle;
                }
                self.issue(0, None)
            }
        }
    }

    /// Fetch the first missing range of `clipped`, widened by `window`
    fn plan_pages(&mut self, view: Range<usize>, clipped: Range<usize>, window: usize) -> Action {
        let limit = self.cache.length_known().then(|| self.cache.length());
        let expanded = self
            .cache
            .gaps(clipped)
            .into_iter()
            .map(|gap| self.cache.trim(fetch_plan::expand(gap, window, limit)))
            .collect();
        let mut ranges = fetch_plan::coalesce(expanded);
        if ranges.is_empty() {
            return Action::Idle;
        }
        if ranges.len() > 1 {
            self.deferred = Some(view);
        }
        let range = ranges.remove(0);
        self.issue(range.start, Some(range.end))
    }

    fn issue(&mut self, start: usize, end: Option<usize>) -> Action {
        let id = self.next_fetch_id;
        self.next_fetch_id += 1;

        let (criteria, sort) = match self.config.fetch_mode {
            FetchMode::Paged | FetchMode::Basic => (self.criteria.clone(), self.sort.clone()),
            FetchMode::Local => (Criteria::new(), Vec::new()),
        };
        let request = FetchRequest {
            criteria,
            implicit_criteria: self.config.implicit_criteria.clone(),
            sort,
            start_row: start,
            end_row: end,
            progressive_loading: self.config.progressive_loading,
        };

        let loading = match end {
            Some(end) => start..end,
            None => self.clip(self.last_view.clone()),
        };
        self.cache.mark_loading(loading);
        self.history.issued(id, self.generation, start, end);
        self.in_flight = Some(id);

        tracing::debug!(
            id,
            generation = self.generation,
            start,
            end = ?end,
            "Fetch issued"
        );
        Action::Fetch(FetchTicket {
            id,
            generation: self.generation,
            request,
        })
    }

    // ==================== Fetch completion ====================

    pub fn complete(&mut self, ticket: &FetchTicket, result: Result<FetchResponse>) -> Action {
        if self.in_flight == Some(ticket.id) {
            self.in_flight = None;
        }

        if ticket.generation != self.generation {
            tracing::debug!(
                id = ticket.id,
                generation = ticket.generation,
                current = self.generation,
                "Discarding response for superseded criteria or sort"
            );
            self.history.finish(ticket.id, FetchOutcome::Discarded);
            if let Ok(response) = &result {
                self.record_stale_total(response.total_rows);
            }
            return Action::Idle;
        }

        match result {
            Ok(response) => {
                self.history.finish(
                    ticket.id,
                    FetchOutcome::Completed {
                        rows: response.rows.len(),
                    },
                );
                if response.invalidate_cache {
                    tracing::debug!(id = ticket.id, "Source requested cache invalidation");
                    self.drop_cache();
                    self.emit(ResultSetEvent::DataChanged);
                }
                self.integrate(&ticket.request, response);
                match self.deferred.take() {
                    Some(view) => self.plan_fetch(view),
                    None => Action::Idle,
                }
            }
            Err(error) => {
                let request = &ticket.request;
                let error = match error {
                    failed @ Error::FetchFailed { .. } => failed,
                    other => Error::fetch_failed(
                        request.start_row,
                        request.end_row.unwrap_or(request.start_row),
                        other,
                    ),
                };
                tracing::warn!(id = ticket.id, "{}", error);
                self.history.finish(
                    ticket.id,
                    FetchOutcome::Failed {
                        message: error.to_string(),
                    },
                );
                self.cache.reset_loading();
                self.deferred = None;
                self.emit(ResultSetEvent::FetchError {
                    request: request.clone(),
                    error: Arc::new(error),
                });
                Action::Idle
            }
        }
    }

    fn record_stale_total(&mut self, total: Option<usize>) {
        let (StaleTotalsPolicy::Record, Some(total)) = (self.config.stale_totals, total) else {
            return;
        };
        self.last_total_rows = Some(total);
        if !self.cache.length_known() {
            let estimate = self.cache.length().max(total);
            self.cache.set_length(estimate, false);
            self.announce_length();
        }
    }

    fn integrate(&mut self, request: &FetchRequest, response: FetchResponse) {
        let FetchResponse {
            rows,
            start_row,
            total_rows,
            ..
        } = response;
        let rows: Vec<RecordRef> = rows.into_iter().map(Arc::new).collect();

        self.cache.reset_loading();
        match request.end_row {
            Some(_) => self.integrate_page(request, start_row, rows, total_rows),
            None => self.integrate_all(rows, total_rows),
        }
        self.announce_length();
    }

    fn integrate_page(
        &mut self,
        request: &FetchRequest,
        start: usize,
        rows: Vec<RecordRef>,
        total: Option<usize>,
    ) {
        let end = self.cache.write(start, rows);
        let short = end < request.end_row.unwrap_or(end);
        match total {
            Some(total) if request.is_progressive() && !short => {
                // Advertised total is only a lower bound
                let estimate = self.cache.length().max(total);
                self.cache.set_length(estimate, false);
                self.last_total_rows = Some(total);
            }
            Some(total) => {
                self.cache.set_length(total, true);
                self.last_total_rows = Some(total);
            }
            None if self.cache.length_known() => {}
            None if short => {
                // Short page: the data set ends here
                self.cache.set_length(end, true);
                self.last_total_rows = Some(end);
            }
            None => {
                let estimate = self.cache.length().max(end + self.config.result_size);
                self.cache.set_length(estimate, false);
            }
        }

        let end = end.min(self.cache.length());
        let start = start.min(end);
        self.last_fetched = Some(start..end);
        self.emit(ResultSetEvent::DataArrived { start, end });

        if !self.dirty && self.all_rows.is_none() && self.cache.is_complete() {
            tracing::debug!(rows = self.cache.length(), "All matching rows cached");
            self.all_rows = Some(AllRows {
                criteria: self.criteria.clone(),
                rows: self.cache.records(),
            });
        }
    }

    fn integrate_all(&mut self, mut rows: Vec<RecordRef>, total: Option<usize>) {
        let criteria = match self.config.fetch_mode {
            FetchMode::Local => Criteria::new(),
            _ => self.criteria.clone(),
        };
        SortChain(&self.sort).sort(&mut rows);
        self.last_total_rows = Some(total.unwrap_or(rows.len()));
        self.all_rows = Some(AllRows { criteria, rows });
        self.rebuild_from_all_rows();

        let length = self.cache.length();
        self.last_fetched = Some(0..length);
        self.emit(ResultSetEvent::DataArrived { start: 0, end: length });
    }

    // ==================== Criteria & sort ====================

    /// Returns whether a fetch was scheduled
    pub fn set_criteria(&mut self, criteria: Criteria) -> (bool, Action) {
        if criteria == self.criteria {
            return (false, Action::Idle);
        }

        if self.retains_cache_for(&criteria) {
            tracing::debug!("Criteria narrowed, filtering cached rows locally");
            self.criteria = criteria;
            self.rebuild_from_all_rows();
            self.emit(ResultSetEvent::DataChanged);
            self.announce_length();
            return (false, Action::Idle);
        }

        self.criteria = criteria;
        self.drop_cache();
        self.emit(ResultSetEvent::DataChanged);
        self.announce_length();

        let view = if self.last_view.is_empty() {
            0..1
        } else {
            self.last_view.clone()
        };
        (true, self.request_view(view))
    }

    /// Whether the cached rows can serve `criteria` without a fetch
    pub fn retains_cache_for(&self, criteria: &Criteria) -> bool {
        let Some(all) = &self.all_rows else {
            return false;
        };
        if self.config.fetch_mode == FetchMode::Local {
            return true;
        }
        if !self.config.use_client_filtering {
            return false;
        }

        let comparison = self.filter.compare(criteria, &all.criteria);
        if let Err(e) = comparison.clone().into_result() {
            tracing::debug!("{}; cached rows will be dropped", e);
        }
        match self.config.criteria_policy {
            CriteriaPolicy::DropOnShortening => comparison.is_retainable(),
            CriteriaPolicy::DropOnChange => comparison == CriteriaComparison::Equivalent,
        }
    }

    pub fn will_fetch_data(&self, criteria: &Criteria) -> bool {
        *criteria != self.criteria && !self.retains_cache_for(criteria)
    }

    pub fn compare_criteria(&self, new: &Criteria, old: &Criteria) -> CriteriaComparison {
        self.filter.compare(new, old)
    }

    pub fn set_sort(&mut self, sort: Vec<SortSpecifier>) -> Action {
        if sort == self.sort {
            return Action::Idle;
        }
        self.sort = sort;
        self.resort()
    }

    /// Apply the current sort again, locally when every matching row is cached
    pub fn resort(&mut self) -> Action {
        let local = self.all_rows.is_some()
            && (self.config.use_client_sorting || self.config.fetch_mode != FetchMode::Paged);
        if local {
            let chain = SortChain(&self.sort);
            if let Some(all) = self.all_rows.as_mut() {
                chain.sort(&mut all.rows);
            }
            let mut rows = self.cache.records();
            chain.sort(&mut rows);
            self.cache.fill(rows);
            self.emit(ResultSetEvent::DataChanged);
            return Action::Idle;
        }

        tracing::debug!("Sort changed on a partial cache, refetching from row 0");
        self.drop_cache();
        self.emit(ResultSetEvent::DataChanged);
        self.announce_length();
        let rows = self.last_view.len().max(1);
        self.request_view(0..rows)
    }

    /// Re-derive the visible rows from the full cache
    pub fn filter_local_data(&mut self) -> bool {
        if self.all_rows.is_none() {
            return false;
        }
        self.rebuild_from_all_rows();
        self.emit(ResultSetEvent::DataChanged);
        self.announce_length();
        true
    }

    pub(super) fn rebuild_from_all_rows(&mut self) {
        let Some(all) = &self.all_rows else {
            return;
        };
        let rows = if all.criteria == self.criteria {
            all.rows.clone()
        } else {
            all.rows
                .iter()
                .filter(|record| self.matches_current(record))
                .cloned()
                .collect()
        };
        self.cache.fill(rows);
    }

    // ==================== Invalidation ====================

    pub fn invalidate_cache(&mut self) {
        tracing::debug!(generation = self.generation, "Cache invalidated");
        self.drop_cache();
        self.debounce.pending = None;
        self.emit(ResultSetEvent::DataChanged);
        self.announce_length();
    }

    /// Forget every cached row and abandon in-flight fetches
    pub(super) fn drop_cache(&mut self) {
        self.cache.clear();
        self.all_rows = None;
        self.generation += 1;
        self.in_flight = None;
        self.deferred = None;
        self.dirty = false;
        self.last_fetched = None;
    }

    // ==================== Local mutation ====================

    pub fn set_row(&mut self, index: usize, record: Record) -> Result<Option<RecordRef>> {
        self.check_index(index, false)?;
        let record = Arc::new(record);
        let previous = self.cache.replace(index, record.clone());
        self.replace_in_all_rows(previous.as_ref(), &record);
        self.emit(ResultSetEvent::DataChanged);
        self.announce_length();
        Ok(previous)
    }

    pub fn insert_at(&mut self, index: usize, record: Record) -> Result<()> {
        self.check_index(index, true)?;
        let record = Arc::new(record);
        self.cache.insert(index, record.clone());
        self.replace_in_all_rows(None, &record);
        self.emit(ResultSetEvent::DataChanged);
        self.announce_length();
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Option<RecordRef> {
        self.cache.row(index)?;
        let removed = self.cache.remove(index)?;
        let primary_keys = &self.config.primary_keys;
        if let Some(all) = self.all_rows.as_mut() {
            all.rows
                .retain(|row| !row.same_identity(&removed, primary_keys));
        }
        self.emit(ResultSetEvent::DataChanged);
        self.announce_length();
        Some(removed)
    }

    fn check_index(&self, index: usize, inclusive: bool) -> Result<()> {
        let length = self.cache.length();
        let out_of_range = self.cache.length_known()
            && if inclusive { index > length } else { index >= length };
        if out_of_range {
            return Err(Error::Invalid {
                message: format!("Row index {index} is out of range for length {length}"),
            });
        }
        Ok(())
    }

    fn replace_in_all_rows(&mut self, previous: Option<&RecordRef>, record: &RecordRef) {
        let primary_keys = &self.config.primary_keys;
        let Some(all) = self.all_rows.as_mut() else {
            return;
        };
        all.rows.retain(|row| {
            !row.same_identity(record, primary_keys)
                && previous.is_none_or(|previous| !row.same_identity(previous, primary_keys))
        });
        let index = SortChain(&self.sort).insertion_point(&all.rows, record);
        all.rows.insert(index, record.clone());
    }

    // ==================== Queries ====================

    pub fn length(&self) -> usize {
        self.cache.length()
    }

    pub fn length_is_known(&self) -> bool {
        self.cache.length_known()
    }

    pub fn cached(&self, index: usize) -> Option<RecordRef> {
        self.cache.row(index).cloned()
    }

    pub fn row_is_loaded(&self, index: usize) -> bool {
        self.cache.is_loaded(index)
    }

    pub fn range_is_loaded(&self, start: usize, end: usize) -> bool {
        self.cache.range_is_loaded(start..end)
    }

    pub fn all_matching_rows_cached(&self) -> bool {
        self.all_rows.is_some() || self.cache.is_complete()
    }

    /// Every row of the source is cached, regardless of criteria
    pub fn all_rows_cached(&self) -> bool {
        self.all_rows
            .as_ref()
            .is_some_and(|all| all.criteria.is_empty())
    }

    pub fn all_cached_rows(&self) -> Vec<RecordRef> {
        self.cache.records()
    }

    /// Every row matching the current criteria, or `None` while the length
    /// is unknown. Never fetches.
    pub fn all_visible_rows(&self) -> Option<Vec<RecordRef>> {
        self.cache.length_known().then(|| self.cache.records())
    }

    /// Visible rows are a locally filtered, proper subset of the full cache
    pub fn using_filtered_data(&self) -> bool {
        self.all_rows.as_ref().is_some_and(|all| {
            all.criteria != self.criteria && self.cache.length() < all.rows.len()
        })
    }

    /// Whether `record` passes both the implicit and the current criteria
    pub(super) fn matches_current(&self, record: &Record) -> bool {
        self.filter.matches(record, &self.config.implicit_criteria)
            && self.filter.matches(record, &self.criteria)
    }

    pub fn find_by_key(&self, key: &RecordKey) -> Option<RecordRef> {
        let primary_keys = &self.config.primary_keys;
        self.cache
            .loaded()
            .find(|(_, record)| key.matches(record, primary_keys))
            .map(|(_, record)| record.clone())
    }

    pub fn find(&self, field: &str, value: &Value) -> Option<RecordRef> {
        self.cache
            .loaded()
            .find(|(_, record)| values_equal(record.value(field), value))
            .map(|(_, record)| record.clone())
    }

    pub fn find_all(&self, field: &str, value: &Value) -> Vec<RecordRef> {
        self.cache
            .loaded()
            .filter(|(_, record)| values_equal(record.value(field), value))
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn find_index(&self, field: &str, value: &Value) -> Option<usize> {
        self.cache.position(|record| values_equal(record.value(field), value))
    }

    /// Index of the cached record sharing `record`'s identity
    pub fn index_of(&self, record: &Record) -> Option<usize> {
        let primary_keys = &self.config.primary_keys;
        self.cache
            .position(|cached| cached.same_identity(record, primary_keys))
    }

    /// `id_field` text -> `display_field` value over cached rows
    pub fn value_map(&self, id_field: &str, display_field: &str) -> AHashMap<String, Value> {
        self.cache
            .loaded()
            .filter_map(|(_, record)| {
                let id = text_of(record.value(id_field))?;
                Some((id.into_owned(), record.value(display_field).clone()))
            })
            .collect()
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn sort_specifiers(&self) -> &[SortSpecifier] {
        &self.sort
    }

    pub fn last_total_rows(&self) -> Option<usize> {
        self.last_total_rows
    }

    pub fn history(&self) -> &FetchHistory {
        &self.history
    }

    pub fn config(&self) -> &ResultSetConfig {
        &self.config
    }

    // ==================== Events ====================

    pub(super) fn emit(&self, event: ResultSetEvent) {
        if self.events.publish(event) == 0 {
            tracing::trace!("Result set event had no subscribers");
        }
    }

    pub(super) fn announce_length(&mut self) {
        let current = (self.cache.length(), self.cache.length_known());
        if current != self.reported_length {
            self.reported_length = current;
            self.emit(ResultSetEvent::LengthChanged {
                length: current.0,
                known: current.1,
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::criteria::{CriteriaFilter, Criterion};
    use crate::services::ChangeKind;
    use serde_json::json;

    pub(crate) fn state_with(
        config: ResultSetConfig,
    ) -> (CacheState, flume::Receiver<ResultSetEvent>) {
        let events = EventHub::new();
        let rx = events.subscribe();
        let filter = Arc::new(CriteriaFilter::new(config.text_match_style));
        let state = CacheState::new(config, filter, Criteria::new(), Vec::new(), events);
        (state, rx)
    }

    pub(crate) fn paged(result_size: usize) -> ResultSetConfig {
        ResultSetConfig {
            result_size,
            ..ResultSetConfig::default()
        }
    }

    pub(crate) fn ticket(action: Action) -> FetchTicket {
        match action {
            Action::Fetch(ticket) => ticket,
            other => panic!("expected a fetch, got {other:?}"),
        }
    }

    pub(crate) fn rec(id: i64) -> Record {
        Record::new().with("id", id).with("name", format!("row-{id}"))
    }

    fn id_of(row: &Row) -> Option<Value> {
        row.record().map(|record| record.value("id").clone())
    }

    fn range_of(ticket: &FetchTicket) -> (usize, Option<usize>) {
        (ticket.request.start_row, ticket.request.end_row)
    }

    #[test]
    fn read_ahead_then_clipped_second_fetch() {
        let (mut state, _rx) = state_with(paged(2));

        let (rows, action) = state.get_range(0, 1);
        assert_eq!(rows, vec![Row::Loading]);
        let first = ticket(action);
        assert_eq!(range_of(&first), (0, Some(2)));

        let response = FetchResponse::new(0, vec![rec(1), rec(2)]).with_total(5);
        assert!(matches!(state.complete(&first, Ok(response)), Action::Idle));

        let (row, action) = state.get(0);
        assert_eq!(row.as_ref().and_then(id_of), Some(json!(1)));
        assert!(matches!(action, Action::Idle));

        let (row, action) = state.get(4);
        assert_eq!(row, Some(Row::Loading));
        assert_eq!(range_of(&ticket(action)), (2, Some(5)));
    }

    #[test]
    fn index_past_known_length_is_none() {
        let (mut state, _rx) = state_with(paged(10));
        state.seed_initial(vec![rec(1), rec(2)], Some(2));

        let (row, action) = state.get(2);
        assert_eq!(row, None);
        assert!(matches!(action, Action::Idle));
        assert!(state.get_range(0, 10).0.iter().all(|row| !row.is_loading()));
    }

    #[test]
    fn arrival_fills_requested_range() {
        let (mut state, rx) = state_with(paged(3));
        let fetch = ticket(state.get_range(1, 3).1);
        assert_eq!(range_of(&fetch), (0, Some(4)));

        let rows = (0..4).map(rec).collect();
        state.complete(&fetch, Ok(FetchResponse::new(0, rows).with_total(9)));

        assert!(state.range_is_loaded(1, 3));
        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.iter().any(|e| e.arrived_range() == Some((0, 4))));
        assert!(events.iter().any(|e| matches!(
            e,
            ResultSetEvent::LengthChanged { length: 9, known: true }
        )));
    }

    #[test]
    fn one_fetch_in_flight_defers_latest_view() {
        let (mut state, _rx) = state_with(paged(2));
        let first = ticket(state.get_range(0, 1).1);

        assert!(matches!(state.get_range(10, 11).1, Action::Idle));
        assert!(matches!(state.get_range(20, 21).1, Action::Idle));

        let response = FetchResponse::new(0, vec![rec(0), rec(1)]).with_total(30);
        let next = ticket(state.complete(&first, Ok(response)));
        assert_eq!(range_of(&next), (18, Some(22)));
    }

    #[test]
    fn stale_response_is_discarded() {
        let (mut state, _rx) = state_with(paged(5));
        let old = ticket(state.get_range(0, 5).1);

        let (fetched, action) = state.set_criteria(Criteria::new().equals("name", "x"));
        assert!(fetched);
        let new = ticket(action);
        assert!(new.generation > old.generation);

        let stale = FetchResponse::new(0, (0..5).map(rec).collect()).with_total(50);
        assert!(matches!(state.complete(&old, Ok(stale)), Action::Idle));
        assert!(!state.row_is_loaded(0));
        assert_eq!(state.last_total_rows(), None);
        let outcome = state
            .history()
            .iter()
            .find(|entry| entry.id == old.id)
            .map(|entry| entry.outcome.clone());
        assert_eq!(outcome, Some(FetchOutcome::Discarded));
    }

    #[test]
    fn stale_total_recorded_when_configured() {
        let config = ResultSetConfig {
            stale_totals: StaleTotalsPolicy::Record,
            ..paged(5)
        };
        let (mut state, _rx) = state_with(config);
        let old = ticket(state.get_range(0, 5).1);
        let _ = state.set_criteria(Criteria::new().equals("name", "x"));

        let stale = FetchResponse::new(0, (0..5).map(rec).collect()).with_total(50);
        state.complete(&old, Ok(stale));
        assert!(!state.row_is_loaded(0));
        assert_eq!(state.last_total_rows(), Some(50));
        assert!(!state.length_is_known());
        assert_eq!(state.length(), 50);
    }

    #[test]
    fn fetch_error_resets_slots_and_retries() {
        let (mut state, rx) = state_with(paged(4));
        let failed = ticket(state.get_range(0, 2).1);

        let action = state.complete(&failed, Err(Error::Invalid { message: "boom".into() }));
        assert!(matches!(action, Action::Idle));

        let error = rx
            .try_iter()
            .find(ResultSetEvent::is_fetch_error)
            .expect("fetch error event");
        match error {
            ResultSetEvent::FetchError { request, error } => {
                assert_eq!(request.range(), Some(0..4));
                assert!(matches!(*error, Error::FetchFailed { start: 0, end: 4, .. }));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let retry = ticket(state.get_range(0, 2).1);
        assert_eq!(range_of(&retry), (0, Some(4)));
    }

    #[test]
    fn progressive_length_grows_until_short_page() {
        let (mut state, _rx) = state_with(paged(4));
        let first = ticket(state.get_range(0, 2).1);
        state.complete(&first, Ok(FetchResponse::new(0, (0..4).map(rec).collect())));
        assert_eq!((state.length(), state.length_is_known()), (8, false));

        let second = ticket(state.get_range(6, 8).1);
        assert_eq!(range_of(&second), (4, Some(10)));
        state.complete(&second, Ok(FetchResponse::new(4, (4..7).map(rec).collect())));
        assert_eq!((state.length(), state.length_is_known()), (7, true));
        assert!(state.all_matching_rows_cached());
    }

    #[test]
    fn far_indexes_never_panic() {
        let (mut state, _rx) = state_with(paged(4));

        let (row, action) = state.get(usize::MAX);
        assert_eq!(row, None);
        assert!(matches!(action, Action::Idle));

        let (row, action) = state.get(usize::MAX - 1);
        assert_eq!(row, Some(Row::Loading));
        assert_eq!(range_of(&ticket(action)), (usize::MAX - 5, Some(usize::MAX)));
    }

    #[test]
    fn progressive_loading_treats_totals_as_lower_bound() {
        let config = ResultSetConfig {
            progressive_loading: Some(true),
            ..paged(4)
        };
        let (mut state, _rx) = state_with(config);
        let first = ticket(state.get_range(0, 2).1);
        assert_eq!(first.request.progressive_loading, Some(true));

        let response = FetchResponse::new(0, (0..4).map(rec).collect()).with_total(8);
        state.complete(&first, Ok(response));
        assert_eq!((state.length(), state.length_is_known()), (8, false));
        assert_eq!(state.all_visible_rows(), None);

        let second = ticket(state.get_range(6, 8).1);
        let response = FetchResponse::new(4, (4..7).map(rec).collect()).with_total(7);
        state.complete(&second, Ok(response));
        assert_eq!((state.length(), state.length_is_known()), (7, true));
        assert_eq!(state.all_visible_rows().map(|rows| rows.len()), Some(7));
    }

    #[test]
    fn visible_rows_only_skips_read_ahead() {
        let config = ResultSetConfig {
            always_request_visible_rows: true,
            ..paged(10)
        };
        let (mut state, _rx) = state_with(config);
        assert_eq!(range_of(&ticket(state.get_range(5, 8).1)), (5, Some(8)));
    }

    #[test]
    fn basic_mode_pages_visible_rows_when_asked() {
        let config = ResultSetConfig {
            fetch_mode: FetchMode::Basic,
            always_request_visible_rows: true,
            ..paged(10)
        };
        let (mut state, _rx) = state_with(config);
        state.criteria = Criteria::new().equals("name", "x");

        let fetch = ticket(state.get_range(2, 4).1);
        assert_eq!(range_of(&fetch), (2, Some(4)));
        assert_eq!(fetch.request.criteria, state.criteria);

        let response = FetchResponse::new(2, vec![rec(2), rec(3)]).with_total(6);
        state.complete(&fetch, Ok(response));
        assert!(state.range_is_loaded(2, 4));
        assert_eq!(state.length(), 6);
        assert!(!state.all_matching_rows_cached());
    }

    #[test]
    fn implicit_criteria_apply_everywhere() {
        let implicit = Criteria::new().with("id", Criterion::LessThan(json!(5)));
        let config = ResultSetConfig {
            implicit_criteria: implicit.clone(),
            ..paged(4)
        };

        let (mut state, _rx) = state_with(config.clone());
        let fetch = ticket(state.get_range(0, 1).1);
        assert_eq!(fetch.request.implicit_criteria, implicit);
        assert!(fetch.request.criteria.is_empty());

        let (mut state, _rx) = state_with(config);
        state.seed_all_rows((0..10).map(rec).collect());
        assert_eq!(state.length(), 5);

        let (fetched, _) =
            state.set_criteria(Criteria::new().with("id", Criterion::GreaterOrEqual(json!(2))));
        assert!(!fetched);
        assert_eq!(state.length(), 3);
        assert_eq!(state.criteria().len(), 1);

        assert!(!state.apply_change(ChangeKind::Add, rec(7), None));
        assert!(state.apply_change(ChangeKind::Add, rec(-1), Some(true)));
        let _ = state.set_criteria(Criteria::new());
        assert_eq!(state.length(), 6);
    }

    #[test]
    fn filtered_data_is_a_proper_subset_of_the_full_cache() {
        let (mut state, _rx) = state_with(paged(4));
        assert_eq!(state.all_visible_rows(), None);
        assert!(!state.using_filtered_data());

        state.seed_all_rows((0..6).map(|i| rec(i).with("v", i)).collect());
        assert!(!state.using_filtered_data());

        let (fetched, _) =
            state.set_criteria(Criteria::new().with("v", Criterion::GreaterOrEqual(json!(3))));
        assert!(!fetched);
        assert!(state.using_filtered_data());
        assert_eq!(state.all_visible_rows().map(|rows| rows.len()), Some(3));

        let everything = Criteria::new().with("v", Criterion::GreaterOrEqual(json!(0)));
        let _ = state.set_criteria(everything);
        assert!(!state.using_filtered_data());
    }

    #[test]
    fn identical_criteria_is_a_no_op() {
        let (mut state, rx) = state_with(paged(5));
        state.seed_initial(vec![rec(1)], Some(10));
        let criteria = Criteria::new().equals("name", "row-1");

        let (fetched, _) = state.set_criteria(criteria.clone());
        assert!(fetched);
        let _ = rx.try_iter().count();

        let (fetched, action) = state.set_criteria(criteria);
        assert!(!fetched);
        assert!(matches!(action, Action::Idle));
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn narrowing_full_cache_filters_locally() {
        let (mut state, _rx) = state_with(paged(5));
        let rows = (0..10).map(|i| rec(i).with("age", i * 10)).collect();
        state.seed_initial(rows, None);
        assert!(state.all_matching_rows_cached());
        let adults = Criteria::new().with("age", Criterion::GreaterOrEqual(json!(20)));
        let _ = state.set_criteria(adults);
        let before = state.all_cached_rows().len();

        let narrower = Criteria::new().with("age", Criterion::GreaterOrEqual(json!(50)));
        assert!(!state.will_fetch_data(&narrower));
        let (fetched, action) = state.set_criteria(narrower);
        assert!(!fetched);
        assert!(matches!(action, Action::Idle));
        assert!(state.all_cached_rows().len() <= before);
        assert_eq!(state.length(), 5);
    }

    #[test]
    fn drop_on_change_refetches_narrower_criteria() {
        let config = ResultSetConfig {
            criteria_policy: CriteriaPolicy::DropOnChange,
            ..paged(5)
        };
        let (mut state, _rx) = state_with(config);
        state.seed_initial((0..3).map(rec).collect(), None);

        let (fetched, action) = state.set_criteria(Criteria::new().equals("id", 1));
        assert!(fetched);
        assert_eq!(range_of(&ticket(action)), (0, Some(5)));
    }

    #[test]
    fn full_cache_sorts_locally() {
        let (mut state, rx) = state_with(paged(5));
        state.seed_initial(
            vec![
                Record::new().with("id", 1).with("v", 5),
                Record::new().with("id", 2).with("v", 3),
            ],
            None,
        );

        let action = state.set_sort(vec![SortSpecifier::ascending("v")]);
        assert!(matches!(action, Action::Idle));
        let ids: Vec<_> = state.all_cached_rows().iter().map(|r| r.value("id").clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(1)]);
        assert!(rx.try_iter().any(|e| e.is_data_changed()));
        assert!(state.history().is_empty());
    }

    #[test]
    fn partial_cache_sort_refetches_from_start() {
        let (mut state, _rx) = state_with(paged(5));
        let first = ticket(state.get_range(20, 25).1);
        let response = FetchResponse::new(15, (15..25).map(rec).collect()).with_total(100);
        state.complete(&first, Ok(response));

        let refetch = ticket(state.set_sort(vec![SortSpecifier::descending("id")]));
        assert_eq!(range_of(&refetch), (0, Some(5)));
        assert_eq!(refetch.request.sort, vec![SortSpecifier::descending("id")]);
        assert!(!state.row_is_loaded(20));
    }

    #[test]
    fn invalidate_clears_without_fetching() {
        let (mut state, rx) = state_with(paged(5));
        state.seed_initial((0..3).map(rec).collect(), None);

        state.invalidate_cache();
        assert!(!state.all_matching_rows_cached());
        assert_eq!(state.length(), 0);
        assert!(state.history().is_empty());
        assert!(rx.try_iter().any(|e| e.is_data_changed()));
    }

    #[test]
    fn local_mode_filters_with_looser_criteria() {
        let config = ResultSetConfig {
            fetch_mode: FetchMode::Local,
            ..paged(5)
        };
        let (mut state, _rx) = state_with(config);
        let (fetched, action) =
            state.set_criteria(Criteria::new().with("id", Criterion::LessThan(json!(3))));
        assert!(fetched);

        let fetch = ticket(action);
        assert!(fetch.request.criteria.is_empty());
        assert_eq!(fetch.request.end_row, None);
        state.complete(&fetch, Ok(FetchResponse::new(0, (0..10).map(rec).collect())));
        assert_eq!(state.length(), 3);
        assert!(state.all_rows_cached());

        let (fetched, action) =
            state.set_criteria(Criteria::new().with("id", Criterion::LessThan(json!(6))));
        assert!(!fetched);
        assert!(matches!(action, Action::Idle));
        assert_eq!(state.length(), 6);
    }

    #[test]
    fn basic_mode_fetches_everything_once() {
        let config = ResultSetConfig {
            fetch_mode: FetchMode::Basic,
            ..paged(2)
        };
        let (mut state, _rx) = state_with(config);
        state.sort = vec![SortSpecifier::descending("id")];

        let fetch = ticket(state.get(0).1);
        assert_eq!(range_of(&fetch), (0, None));
        state.complete(&fetch, Ok(FetchResponse::new(0, (0..4).map(rec).collect())));

        let ids: Vec<_> = state.all_cached_rows().iter().map(|r| r.value("id").clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(2), json!(1), json!(0)]);
        assert!(matches!(state.get_range(0, 4).1, Action::Idle));
    }

    #[test]
    fn debounce_keeps_latest_view() {
        let config = ResultSetConfig {
            fetch_delay_ms: 20,
            ..paged(2)
        };
        let (mut state, _rx) = state_with(config);

        assert!(matches!(state.get_range(0, 2).1, Action::Debounce(_)));
        assert!(matches!(state.get_range(40, 42).1, Action::Idle));

        let fetch = ticket(state.fire_debounce());
        assert_eq!(range_of(&fetch), (38, Some(42)));
        assert!(matches!(state.fire_debounce(), Action::Idle));
    }

    #[test]
    fn invalidating_response_replaces_cache() {
        let (mut state, _rx) = state_with(paged(2));
        let first = ticket(state.get_range(0, 2).1);
        state.complete(&first, Ok(FetchResponse::new(0, vec![rec(0), rec(1)]).with_total(6)));

        let second = ticket(state.get_range(4, 6).1);
        let response = FetchResponse::new(2, (2..6).map(rec).collect())
            .with_total(6)
            .with_invalidation();
        state.complete(&second, Ok(response));

        assert!(!state.row_is_loaded(0));
        assert!(state.range_is_loaded(2, 6));
    }

    #[test]
    fn local_mutations_shift_rows() {
        let (mut state, _rx) = state_with(paged(5));
        state.seed_initial((0..3).map(rec).collect(), None);

        state.insert_at(1, rec(10)).expect("in range");
        assert_eq!(state.index_of(&rec(10)), Some(1));
        assert!(state.insert_at(9, rec(11)).is_err());

        let previous = state.set_row(0, rec(20)).expect("in range");
        assert_eq!(previous.map(|r| r.value("id").clone()), Some(json!(0)));

        let removed = state.remove_at(1).expect("loaded");
        assert_eq!(removed.value("id"), &json!(10));
        assert_eq!(state.length(), 3);
        assert!(state.find_by_key(&RecordKey::single(10)).is_none());
    }

    #[test]
    fn lookups_over_cached_rows() {
        let (mut state, _rx) = state_with(paged(5));
        state.seed_initial(
            vec![
                rec(1).with("team", "red"),
                rec(2).with("team", "blue"),
                rec(3).with("team", "red"),
            ],
            None,
        );

        assert_eq!(state.find_all("team", &json!("red")).len(), 2);
        assert_eq!(state.find_index("team", &json!("blue")), Some(1));
        assert_eq!(
            state.find("team", &json!("red")).map(|r| r.value("id").clone()),
            Some(json!(1))
        );
        let map = state.value_map("id", "team");
        assert_eq!(map.get("2"), Some(&json!("blue")));
        assert_eq!(
            state.compare_criteria(&Criteria::new().equals("team", "red"), &Criteria::new()),
            CriteriaComparison::MoreRestrictive
        );
    }
}
