//! Fetch History
//!
//! A fixed-capacity log of issued fetches and their outcomes, oldest evicted
//! first. Diagnostics only; the cache never reads it back.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a fetch ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum FetchOutcome {
    Pending,
    Completed { rows: usize },
    /// Arrived after the criteria or sort it was issued for were superseded
    Discarded,
    Failed { message: String },
}

/// One issued fetch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRecord {
    pub id: u64,
    pub generation: u64,
    pub start: usize,
    pub end: Option<usize>,
    pub issued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: FetchOutcome,
}

#[derive(Debug, Clone)]
pub struct FetchHistory {
    cap: usize,
    entries: VecDeque<FetchRecord>,
}

impl FetchHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    pub(crate) fn issued(&mut self, id: u64, generation: u64, start: usize, end: Option<usize>) {
        if self.cap == 0 {
            return;
        }
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(FetchRecord {
            id,
            generation,
            start,
            end,
            issued_at: Utc::now(),
            finished_at: None,
            outcome: FetchOutcome::Pending,
        });
    }

    pub(crate) fn finish(&mut self, id: u64, outcome: FetchOutcome) {
        if let Some(entry) = self.entries.iter_mut().rev().find(|entry| entry.id == id) {
            entry.finished_at = Some(Utc::now());
            entry.outcome = outcome;
        }
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &FetchRecord> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&FetchRecord> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetches issued so far that are still pending
    pub fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome == FetchOutcome::Pending)
            .count()
    }

    pub fn to_vec(&self) -> Vec<FetchRecord> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for FetchHistory {
    fn default() -> Self {
        Self::new(crate::constants::FETCH_HISTORY_CAPACITY)
    }
}
