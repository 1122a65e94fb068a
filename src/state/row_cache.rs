//! Row Cache - Sparse Slot Storage
//!
//! Slots `0..length` are empty, loading or loaded. Only loading and loaded
//! slots are stored, keyed by row index, so a request far past the cached
//! rows allocates nothing for the indexes in between.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::domain::record::{Record, RecordRef};

/// An occupied cache slot
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Requested, response pending
    Loading,
    Loaded(RecordRef),
}

/// What a reader sees at an index
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Record(RecordRef),
    /// Not cached yet; a fetch has been (or will be) issued
    Loading,
}

impl Row {
    pub fn record(&self) -> Option<&RecordRef> {
        match self {
            Row::Record(record) => Some(record),
            Row::Loading => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Row::Loading)
    }
}

#[derive(Debug, Default)]
pub(crate) struct RowCache {
    /// A missing index is an empty slot: never requested, or reset after a
    /// failed fetch
    slots: BTreeMap<usize, Slot>,
    length: usize,
    length_known: bool,
}

impl RowCache {
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn length_known(&self) -> bool {
        self.length_known
    }

    /// Set the believed length; slots past a shorter length are dropped
    pub fn set_length(&mut self, length: usize, known: bool) {
        self.slots.retain(|&index, _| index < length);
        self.length = length;
        self.length_known = known;
    }

    pub fn row(&self, index: usize) -> Option<&RecordRef> {
        match self.slots.get(&index) {
            Some(Slot::Loaded(record)) => Some(record),
            _ => None,
        }
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        self.row(index).is_some()
    }

    pub fn range_is_loaded(&self, range: Range<usize>) -> bool {
        if range.is_empty() {
            return true;
        }
        let loaded = self
            .slots
            .range(range.clone())
            .filter(|(_, slot)| matches!(slot, Slot::Loaded(_)))
            .count();
        loaded == range.len()
    }

    pub fn has_loaded(&self) -> bool {
        self.slots.values().any(|slot| matches!(slot, Slot::Loaded(_)))
    }

    /// Every row up to a known length is loaded
    pub fn is_complete(&self) -> bool {
        self.length_known && self.range_is_loaded(0..self.length)
    }

    /// Store rows starting at `start`, growing the length if they run past it
    pub fn write(&mut self, start: usize, rows: impl IntoIterator<Item = RecordRef>) -> usize {
        let mut index = start;
        for record in rows {
            self.slots.insert(index, Slot::Loaded(record));
            index = index.saturating_add(1);
        }
        self.length = self.length.max(index);
        index
    }

    pub fn mark_loading(&mut self, range: Range<usize>) {
        for index in range {
            self.slots.entry(index).or_insert(Slot::Loading);
        }
    }

    /// Turn every loading marker back into an empty slot
    pub fn reset_loading(&mut self) {
        self.slots.retain(|_, slot| matches!(slot, Slot::Loaded(_)));
    }

    /// Maximal runs of empty slots inside `range` (loading slots are not gaps)
    pub fn gaps(&self, range: Range<usize>) -> Vec<Range<usize>> {
        let mut gaps = Vec::new();
        if range.is_empty() {
            return gaps;
        }
        let mut cursor = range.start;
        for &index in self.slots.range(range.clone()).map(|(index, _)| index) {
            if index > cursor {
                gaps.push(cursor..index);
            }
            cursor = index + 1;
        }
        if cursor < range.end {
            gaps.push(cursor..range.end);
        }
        gaps
    }

    /// Shrink `range` from both ends past loaded or loading slots
    pub fn trim(&self, range: Range<usize>) -> Range<usize> {
        let occupied = |index: usize| self.slots.contains_key(&index);
        let mut start = range.start;
        let mut end = range.end;
        while start < end && occupied(start) {
            start += 1;
        }
        while end > start && occupied(end - 1) {
            end -= 1;
        }
        start..end
    }

    /// Remove a slot, shifting later slots down and shrinking the length
    pub fn remove(&mut self, index: usize) -> Option<RecordRef> {
        if index >= self.length {
            return None;
        }
        let removed = match self.slots.remove(&index) {
            Some(Slot::Loaded(record)) => Some(record),
            _ => None,
        };
        let tail = self.slots.split_off(&index);
        self.slots
            .extend(tail.into_iter().map(|(later, slot)| (later - 1, slot)));
        self.length -= 1;
        removed
    }

    /// Insert a record, shifting later slots up and growing the length
    pub fn insert(&mut self, index: usize, record: RecordRef) {
        let tail = self.slots.split_off(&index);
        self.slots
            .extend(tail.into_iter().map(|(later, slot)| (later + 1, slot)));
        self.slots.insert(index, Slot::Loaded(record));
        self.length = (self.length + 1).max(index + 1);
    }

    /// Overwrite a slot in place
    pub fn replace(&mut self, index: usize, record: RecordRef) -> Option<RecordRef> {
        self.length = self.length.max(index + 1);
        match self.slots.insert(index, Slot::Loaded(record)) {
            Some(Slot::Loaded(previous)) => Some(previous),
            _ => None,
        }
    }

    /// Index of the first loaded record satisfying `predicate`
    pub fn position(&self, mut predicate: impl FnMut(&Record) -> bool) -> Option<usize> {
        self.loaded()
            .find(|(_, record)| predicate(record))
            .map(|(index, _)| index)
    }

    /// Loaded records with their indexes, in slot order
    pub fn loaded(&self) -> impl Iterator<Item = (usize, &RecordRef)> {
        self.slots.iter().filter_map(|(&index, slot)| match slot {
            Slot::Loaded(record) => Some((index, record)),
            Slot::Loading => None,
        })
    }

    /// Loaded records in slot order
    pub fn records(&self) -> Vec<RecordRef> {
        self.loaded().map(|(_, record)| record.clone()).collect()
    }

    /// Replace everything with a complete row list
    pub fn fill(&mut self, rows: Vec<RecordRef>) {
        self.length = rows.len();
        self.length_known = true;
        self.slots = rows.into_iter().map(Slot::Loaded).enumerate().collect();
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.length = 0;
        self.length_known = false;
    }
}
