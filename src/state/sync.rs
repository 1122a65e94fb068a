//! Cache Sync - Applying Out-of-Band Changes
//!
//! A full cache keeps rows in sort order, so updates are removed and
//! reinserted. A partial cache cannot trust its row numbering after a change:
//! rows are patched in place and the cache is marked dirty, which makes the
//! next fetch drop everything first.

use std::sync::Arc;

use crate::domain::record::{Record, RecordRef};
use crate::domain::sort::SortChain;
use crate::error::Error;
use crate::services::{ChangeKind, ResultSetEvent};
use crate::state::cache_state::CacheState;

enum Outcome {
    Unchanged,
    Changed,
    /// Cache was dropped; events already emitted
    Invalidated,
}

impl CacheState {
    /// Apply one change notification, returning whether cached rows changed.
    ///
    /// `matches` is the notifier's verdict on the current criteria; `None`
    /// evaluates the record with the local filter.
    pub(crate) fn apply_change(
        &mut self,
        kind: ChangeKind,
        record: Record,
        matches: Option<bool>,
    ) -> bool {
        if self.config.disable_cache_sync {
            tracing::trace!(?kind, "Cache sync disabled, change ignored");
            return false;
        }
        if self.config.drop_cache_on_update {
            self.invalidate_cache();
            return true;
        }

        let matches = matches.unwrap_or_else(|| self.matches_current(&record));
        let record = Arc::new(record);
        let full = self.all_rows.is_some();
        self.sync_all_rows(kind, &record, matches);

        let outcome = match kind {
            ChangeKind::Remove => self.sync_remove(&record),
            ChangeKind::Update => self.sync_update(record, matches, full),
            ChangeKind::Add => self.sync_add(record, matches, full),
        };
        tracing::debug!(?kind, matches, full, dirty = self.dirty, "Change applied");

        match outcome {
            Outcome::Unchanged => false,
            Outcome::Invalidated => true,
            Outcome::Changed => {
                self.emit(ResultSetEvent::DataChanged);
                self.announce_length();
                true
            }
        }
    }

    fn position_of(&self, record: &Record) -> Option<usize> {
        let primary_keys = &self.config.primary_keys;
        self.cache
            .position(|cached| cached.same_identity(record, primary_keys))
    }

    fn not_found(&self, record: &Record) -> Outcome {
        let error = Error::IdentityNotFound {
            key: record.key(&self.config.primary_keys).to_string(),
        };
        tracing::debug!("{}, change ignored", error);
        Outcome::Unchanged
    }

    fn sync_remove(&mut self, record: &RecordRef) -> Outcome {
        match self.position_of(record) {
            Some(index) => {
                self.cache.remove(index);
                if let Some(fetched) = self.last_fetched.as_mut() {
                    if index < fetched.end {
                        fetched.end -= 1;
                        fetched.start = fetched.start.min(fetched.end);
                    }
                }
                Outcome::Changed
            }
            None => self.not_found(record),
        }
    }

    fn sync_update(&mut self, record: RecordRef, matches: bool, full: bool) -> Outcome {
        let Some(index) = self.position_of(&record) else {
            if full && matches {
                self.insert_sorted(record);
                return Outcome::Changed;
            }
            return self.not_found(&record);
        };

        if !full && !self.config.update_partial_cache {
            self.invalidate_cache();
            return Outcome::Invalidated;
        }

        if !matches && !self.config.never_drop_updated_rows {
            self.cache.remove(index);
            if !full {
                self.dirty = true;
            }
            return Outcome::Changed;
        }

        if full && matches {
            self.cache.remove(index);
            self.insert_sorted(record);
        } else {
            self.cache.replace(index, record);
            if !full {
                self.dirty = true;
            }
        }
        Outcome::Changed
    }

    fn sync_add(&mut self, record: RecordRef, matches: bool, full: bool) -> Outcome {
        if !matches {
            return Outcome::Unchanged;
        }
        if self.position_of(&record).is_some() {
            return self.sync_update(record, true, full);
        }
        if full {
            self.insert_sorted(record);
            return Outcome::Changed;
        }
        if !self.cache.has_loaded() && self.in_flight.is_none() {
            return Outcome::Unchanged;
        }
        if !self.config.update_partial_cache {
            self.invalidate_cache();
            return Outcome::Invalidated;
        }

        self.dirty = true;
        let length = self.cache.length();
        let at_end = self.cache.length_known()
            && self
                .last_fetched
                .as_ref()
                .is_some_and(|fetched| fetched.end >= length);
        if !at_end {
            return Outcome::Unchanged;
        }
        self.cache.insert(length, record);
        if let Some(fetched) = self.last_fetched.as_mut() {
            fetched.end = length + 1;
        }
        Outcome::Changed
    }

    /// Insert into a complete cache at the position the current sort dictates
    fn insert_sorted(&mut self, record: RecordRef) {
        let rows = self.cache.records();
        let index = SortChain(&self.sort).insertion_point(&rows, &record);
        self.cache.insert(index, record);
    }

    /// Keep the full row set in step with the change
    fn sync_all_rows(&mut self, kind: ChangeKind, record: &RecordRef, matches: bool) {
        let primary_keys = &self.config.primary_keys;
        let Some(all) = self.all_rows.as_mut() else {
            return;
        };
        all.rows.retain(|row| !row.same_identity(record, primary_keys));
        if kind == ChangeKind::Remove {
            return;
        }

        let keep = if all.criteria == self.criteria {
            matches
        } else {
            self.filter.matches(record, &self.config.implicit_criteria)
                && self.filter.matches(record, &all.criteria)
        };
        if keep {
            let index = SortChain(&self.sort).insertion_point(&all.rows, record);
            all.rows.insert(index, record.clone());
        }
    }
}
