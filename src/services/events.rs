//! Result Set Events
//!
//! Notifications emitted to consumers (widgets, views). Every subscriber gets
//! its own copy of each event.

use std::sync::Arc;

use crate::error::Error;
use crate::services::broadcast::Broadcast;
use crate::services::fetcher::FetchRequest;

/// Fan-out hub a result set publishes its events on
pub type EventHub = Broadcast<ResultSetEvent>;

/// Events emitted by a result set
#[derive(Debug, Clone)]
pub enum ResultSetEvent {
    /// Rows `start..end` were integrated; `get_range(start, end)` now has no loading markers
    DataArrived { start: usize, end: usize },

    /// Cached rows changed in place, were re-filtered/re-sorted, or were dropped
    DataChanged,

    /// Believed length changed
    LengthChanged { length: usize, known: bool },

    /// A fetch failed; its rows stay unloaded and will be retried on next access
    FetchError {
        request: FetchRequest,
        error: Arc<Error>,
    },
}

impl ResultSetEvent {
    /// Range of a data arrival, if this is one
    pub fn arrived_range(&self) -> Option<(usize, usize)> {
        match self {
            ResultSetEvent::DataArrived { start, end } => Some((*start, *end)),
            _ => None,
        }
    }

    pub fn is_data_changed(&self) -> bool {
        matches!(self, ResultSetEvent::DataChanged)
    }

    pub fn is_fetch_error(&self) -> bool {
        matches!(self, ResultSetEvent::FetchError { .. })
    }
}
