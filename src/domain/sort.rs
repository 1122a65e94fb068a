//! Sort - Sort Specifiers and the Record Comparator Chain

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::record::Record;
use crate::domain::value::compare_values;

/// Maps a record's field to the value it should sort by
pub trait SortNormalizer: Send + Sync + 'static {
    fn normalize(&self, record: &Record, field: &str) -> Value;
}

impl<F> SortNormalizer for F
where
    F: Fn(&Record, &str) -> Value + Send + Sync + 'static,
{
    fn normalize(&self, record: &Record, field: &str) -> Value {
        self(record, field)
    }
}

/// A single sort key
#[derive(Clone, Serialize, Deserialize)]
pub struct SortSpecifier {
    /// Field to sort by
    pub field: String,
    /// Ascending when true
    pub ascending: bool,
    /// Optional value normalizer (local sorting only, never sent to the fetcher)
    #[serde(skip)]
    pub normalizer: Option<Arc<dyn SortNormalizer>>,
}

impl SortSpecifier {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
            normalizer: None,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
            normalizer: None,
        }
    }

    /// Attach a normalizer
    pub fn normalized_by(mut self, normalizer: impl SortNormalizer) -> Self {
        self.normalizer = Some(Arc::new(normalizer));
        self
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ord = match &self.normalizer {
            Some(normalizer) => compare_values(
                &normalizer.normalize(a, &self.field),
                &normalizer.normalize(b, &self.field),
            ),
            None => compare_values(a.value(&self.field), b.value(&self.field)),
        };
        if self.ascending { ord } else { ord.reverse() }
    }
}

impl PartialEq for SortSpecifier {
    fn eq(&self, other: &Self) -> bool {
        let same_normalizer = match (&self.normalizer, &other.normalizer) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.field == other.field && self.ascending == other.ascending && same_normalizer
    }
}

impl fmt::Debug for SortSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortSpecifier")
            .field("field", &self.field)
            .field("ascending", &self.ascending)
            .field("normalized", &self.normalizer.is_some())
            .finish()
    }
}

/// Pluggable record ordering
pub trait RecordComparator {
    fn compare(&self, a: &Record, b: &Record) -> Ordering;
}

/// Lexicographic comparator over a list of specifiers
#[derive(Debug, Clone, Copy)]
pub struct SortChain<'a>(pub &'a [SortSpecifier]);

impl RecordComparator for SortChain<'_> {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.0
            .iter()
            .map(|spec| spec.compare(a, b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl SortChain<'_> {
    /// Stable sort of shared records
    pub fn sort<R: AsRef<Record>>(&self, rows: &mut [R]) {
        if self.0.is_empty() {
            return;
        }
        rows.sort_by(|a, b| self.compare(a.as_ref(), b.as_ref()));
    }

    /// Position at which `record` keeps `rows` sorted (after equal keys)
    pub fn insertion_point<R: AsRef<Record>>(&self, rows: &[R], record: &Record) -> usize {
        if self.0.is_empty() {
            return rows.len();
        }
        rows.partition_point(|row| self.compare(row.as_ref(), record) != Ordering::Greater)
    }
}
