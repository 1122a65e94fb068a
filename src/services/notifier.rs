//! Change Notifier
//!
//! Broadcasts add/update/remove notifications for records changed out of
//! band. Each subscriber gets its own unbounded channel; disconnected
//! subscribers are pruned on the next notification.

use crate::domain::record::Record;
use crate::services::broadcast::Broadcast;

/// Kind of out-of-band mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

/// A single mutation notification
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Full record after the change (key fields are enough for removals)
    pub record: Record,
    /// Whether the record matches the subscriber's criteria; `None` lets the
    /// subscriber decide with its local filter
    pub matches_criteria: Option<bool>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, record: Record) -> Self {
        Self {
            kind,
            record,
            matches_criteria: None,
        }
    }

    pub fn add(record: Record) -> Self {
        Self::new(ChangeKind::Add, record)
    }

    pub fn update(record: Record) -> Self {
        Self::new(ChangeKind::Update, record)
    }

    pub fn remove(record: Record) -> Self {
        Self::new(ChangeKind::Remove, record)
    }

    /// Attach an explicit match verdict
    pub fn matching(mut self, matches: bool) -> Self {
        self.matches_criteria = Some(matches);
        self
    }
}

/// Broadcast hub for change events
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    subscribers: Broadcast<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> flume::Receiver<ChangeEvent> {
        self.subscribers.subscribe()
    }

    /// Deliver an event to every live subscriber, returning how many received it
    pub fn notify(&self, event: ChangeEvent) -> usize {
        let kind = event.kind;
        let delivered = self.subscribers.publish(event);
        tracing::trace!(?kind, subscribers = delivered, "Change notification delivered");
        delivered
    }

    /// Number of live subscribers as of the last notification
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.subscriber_count()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
