//! Criteria - Filter Model, Local Matching and Restrictiveness Comparison
//!
//! Criteria are sent to the fetcher as-is and evaluated locally whenever the
//! cache can answer without a round trip. `compare` decides whether rows cached
//! for one set of criteria are guaranteed to be a superset of the rows matching
//! another.

use std::cmp::Ordering;

use hashlink::LinkedHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::record::Record;
use crate::domain::value::{compare_values, text_of, values_equal};
use crate::error::Error;

/// How string `Equals` criteria are matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextMatchStyle {
    /// Case-insensitive exact match
    #[default]
    Exact,
    /// Case-sensitive exact match
    ExactCase,
    /// Case-insensitive substring match
    Substring,
    /// Case-insensitive prefix match
    StartsWith,
}

/// A single field constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", content = "value", rename_all = "camelCase")]
pub enum Criterion {
    /// Required value (string values follow the text match style)
    Equals(Value),
    NotEqual(Value),
    GreaterThan(Value),
    GreaterOrEqual(Value),
    LessThan(Value),
    LessOrEqual(Value),
    /// Inclusive range
    Between(Value, Value),
    InSet(Vec<Value>),
    /// Case-insensitive substring
    Contains(String),
    /// Case-insensitive prefix
    StartsWith(String),
    IsNull,
    NotNull,
}

/// Lower/upper bound view of range operators
struct Bounds<'a> {
    lower: Option<(&'a Value, bool)>,
    upper: Option<(&'a Value, bool)>,
}

impl Criterion {
    /// Whether a field value satisfies this criterion
    pub fn accepts(&self, value: &Value, style: TextMatchStyle) -> bool {
        match self {
            Criterion::Equals(expected) => equals_with_style(value, expected, style),
            Criterion::NotEqual(expected) => {
                !equals_with_style(value, expected, TextMatchStyle::Exact)
            }
            Criterion::InSet(values) => values.iter().any(|v| values_equal(value, v)),
            Criterion::Contains(needle) => text_of(value)
                .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase())),
            Criterion::StartsWith(prefix) => text_of(value)
                .is_some_and(|text| text.to_lowercase().starts_with(&prefix.to_lowercase())),
            Criterion::IsNull => value.is_null(),
            Criterion::NotNull => !value.is_null(),
            _ => match self.bounds() {
                Some(bounds) if !value.is_null() => bounds.contains(value),
                _ => false,
            },
        }
    }

    fn bounds(&self) -> Option<Bounds<'_>> {
        let (lower, upper) = match self {
            Criterion::GreaterThan(v) => (Some((v, false)), None),
            Criterion::GreaterOrEqual(v) => (Some((v, true)), None),
            Criterion::LessThan(v) => (None, Some((v, false))),
            Criterion::LessOrEqual(v) => (None, Some((v, true))),
            Criterion::Between(lo, hi) => (Some((lo, true)), Some((hi, true))),
            _ => return None,
        };
        Some(Bounds { lower, upper })
    }

    /// Whether every value accepted by `self` is also accepted by `old`
    fn narrows(&self, old: &Criterion, style: TextMatchStyle) -> bool {
        if self == old {
            return true;
        }

        let fuzzy_text = matches!(style, TextMatchStyle::Substring | TextMatchStyle::StartsWith);
        match (self, old) {
            (Criterion::Equals(Value::String(new)), Criterion::Equals(Value::String(old)))
                if fuzzy_text =>
            {
                let (new, old) = (new.to_lowercase(), old.to_lowercase());
                match style {
                    TextMatchStyle::Substring => new.contains(&old),
                    _ => new.starts_with(&old),
                }
            }
            (Criterion::Equals(Value::String(_)), _) if fuzzy_text => false,
            (Criterion::Contains(new), Criterion::Contains(old))
            | (Criterion::StartsWith(new), Criterion::Contains(old)) => {
                new.to_lowercase().contains(&old.to_lowercase())
            }
            (Criterion::StartsWith(new), Criterion::StartsWith(old)) => {
                new.to_lowercase().starts_with(&old.to_lowercase())
            }
            (Criterion::Equals(value), _) => old.accepts(value, style),
            (Criterion::InSet(values), _) => values.iter().all(|v| old.accepts(v, style)),
            (Criterion::IsNull, _) => old.accepts(&Value::Null, style),
            (
                Criterion::Contains(_)
                | Criterion::StartsWith(_)
                | Criterion::GreaterThan(_)
                | Criterion::GreaterOrEqual(_)
                | Criterion::LessThan(_)
                | Criterion::LessOrEqual(_)
                | Criterion::Between(..),
                Criterion::NotNull,
            ) => true,
            _ => match (self.bounds(), old.bounds()) {
                (Some(new), Some(old)) => new.within(&old),
                _ => false,
            },
        }
    }
}

impl Bounds<'_> {
    fn contains(&self, value: &Value) -> bool {
        let above = self.lower.is_none_or(|(lo, inclusive)| match compare_values(value, lo) {
            Ordering::Greater => true,
            Ordering::Equal => inclusive,
            Ordering::Less => false,
        });
        let below = self.upper.is_none_or(|(hi, inclusive)| match compare_values(value, hi) {
            Ordering::Less => true,
            Ordering::Equal => inclusive,
            Ordering::Greater => false,
        });
        above && below
    }

    /// Whether this range is inside `outer`
    fn within(&self, outer: &Bounds<'_>) -> bool {
        let lower_ok = match (self.lower, outer.lower) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some((new, new_inc)), Some((old, old_inc))) => match compare_values(new, old) {
                Ordering::Greater => true,
                Ordering::Equal => old_inc || !new_inc,
                Ordering::Less => false,
            },
        };
        let upper_ok = match (self.upper, outer.upper) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some((new, new_inc)), Some((old, old_inc))) => match compare_values(new, old) {
                Ordering::Less => true,
                Ordering::Equal => old_inc || !new_inc,
                Ordering::Greater => false,
            },
        };
        lower_ok && upper_ok
    }
}

fn equals_with_style(value: &Value, expected: &Value, style: TextMatchStyle) -> bool {
    let Value::String(expected) = expected else {
        return values_equal(value, expected);
    };
    let Some(text) = text_of(value) else {
        return false;
    };
    match style {
        TextMatchStyle::ExactCase => text == expected.as_str(),
        TextMatchStyle::Exact => text.to_lowercase() == expected.to_lowercase(),
        TextMatchStyle::Substring => text.to_lowercase().contains(&expected.to_lowercase()),
        TextMatchStyle::StartsWith => text.to_lowercase().starts_with(&expected.to_lowercase()),
    }
}

/// Outcome of comparing new criteria against the criteria a cache was built for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriteriaComparison {
    /// New criteria select a subset of the old rows
    MoreRestrictive,
    /// Same rows
    Equivalent,
    /// No guarantee; `field` is the first constraint that could not be proven narrower
    Incomparable { field: String },
}

impl CriteriaComparison {
    /// Whether rows cached for the old criteria can serve the new ones
    pub fn is_retainable(&self) -> bool {
        !matches!(self, CriteriaComparison::Incomparable { .. })
    }

    /// Convert the incomparable case into its error
    pub fn into_result(self) -> Result<Self, Error> {
        match self {
            CriteriaComparison::Incomparable { field } => {
                Err(Error::CriteriaIncomparable { field })
            }
            other => Ok(other),
        }
    }
}

/// Filter criteria: field name -> constraint, all of which must hold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Criteria {
    fields: LinkedHashMap<String, Criterion>,
}

impl Criteria {
    /// Empty criteria (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style constraint setter
    pub fn with(mut self, field: impl Into<String>, criterion: Criterion) -> Self {
        self.set(field, criterion);
        self
    }

    /// Shorthand for a required value
    pub fn equals(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Criterion::Equals(value.into()))
    }

    /// Set or replace a constraint
    pub fn set(&mut self, field: impl Into<String>, criterion: Criterion) {
        let field = field.into();
        match self.fields.get_mut(&field) {
            Some(slot) => *slot = criterion,
            None => {
                self.fields.insert(field, criterion);
            }
        }
    }

    /// Remove a constraint
    pub fn remove(&mut self, field: &str) -> Option<Criterion> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&Criterion> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Criterion)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether a record satisfies every constraint
    pub fn matches(&self, record: &Record, style: TextMatchStyle) -> bool {
        self.fields
            .iter()
            .all(|(field, criterion)| criterion.accepts(record.value(field), style))
    }

    /// Compare `self` (new) against `old`
    pub fn compare(&self, old: &Criteria, style: TextMatchStyle) -> CriteriaComparison {
        if self == old {
            return CriteriaComparison::Equivalent;
        }
        for (field, old_criterion) in &old.fields {
            let narrower = self
                .fields
                .get(field)
                .is_some_and(|new_criterion| new_criterion.narrows(old_criterion, style));
            if !narrower {
                return CriteriaComparison::Incomparable {
                    field: field.clone(),
                };
            }
        }
        CriteriaComparison::MoreRestrictive
    }
}

impl PartialEq for Criteria {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(field, criterion)| other.fields.get(field) == Some(criterion))
    }
}

/// Pluggable predicate and restrictiveness test used for local filtering
pub trait RecordFilter: Send + Sync + 'static {
    /// Whether a record matches the criteria
    fn matches(&self, record: &Record, criteria: &Criteria) -> bool;

    /// Compare new criteria against the criteria of a cached row set
    fn compare(&self, new: &Criteria, old: &Criteria) -> CriteriaComparison;
}

/// Default filter: evaluates `Criteria` with a fixed text match style
#[derive(Debug, Clone, Copy, Default)]
pub struct CriteriaFilter {
    pub text_match_style: TextMatchStyle,
}

impl CriteriaFilter {
    pub fn new(text_match_style: TextMatchStyle) -> Self {
        Self { text_match_style }
    }
}

impl RecordFilter for CriteriaFilter {
    fn matches(&self, record: &Record, criteria: &Criteria) -> bool {
        criteria.matches(record, self.text_match_style)
    }

    fn compare(&self, new: &Criteria, old: &Criteria) -> CriteriaComparison {
        new.compare(old, self.text_match_style)
    }
}
