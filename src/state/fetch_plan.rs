//! Fetch planning: read-ahead expansion and range coalescing

use std::ops::Range;

/// Widen a missing range by the read-ahead window.
///
/// Reaches `window` rows behind the first missing row and at least `window`
/// rows past it, then clips to `limit` when the length is known.
pub(crate) fn expand(gap: Range<usize>, window: usize, limit: Option<usize>) -> Range<usize> {
    let start = gap.start.saturating_sub(window);
    let end = gap.end.max(gap.start.saturating_add(window));
    match limit {
        Some(limit) => start.min(limit)..end.min(limit),
        None => start..end,
    }
}

/// Merge overlapping or adjacent ranges, dropping empty ones
pub(crate) fn coalesce(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    ranges.retain(|range| !range.is_empty());
    ranges.sort_by_key(|range| range.start);

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}
