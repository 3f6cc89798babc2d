//! Live mutation notifications.
//!
//! Every structural change that moves or removes a leaf entry is described by
//! an [`IndexEvent`]. Open scans register an [`IndexObserver`] with the index
//! and adjust their saved `(node, entry)` position when an event touches it.
//!
//! The registry only holds weak references: dropping the observer is enough
//! to unsubscribe, and a stale registration is pruned on the next dispatch.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::common::StreamId;

/// A change to leaf entry positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEvent {
    /// Entries `old_entry_min..=old_entry_max` of `old_node` now live in
    /// `new_node` at `entry + entry_delta`.
    ///
    /// The range may include the slot one past the node's last entry, which
    /// only a displaced position can reference.
    RowsMoved {
        old_node: StreamId,
        old_entry_min: usize,
        old_entry_max: usize,
        new_node: StreamId,
        entry_delta: i64,
    },
    /// The entry at `(node, entry)` was removed.
    RowDeleted { node: StreamId, entry: usize },
    /// Every entry was removed and every node released.
    Reset,
}

impl IndexEvent {
    /// Apply a `RowsMoved` event to a saved position.
    ///
    /// Returns the new position if the event covers it.
    pub fn moved_position(&self, node: StreamId, entry: usize) -> Option<(StreamId, usize)> {
        match *self {
            IndexEvent::RowsMoved {
                old_node,
                old_entry_min,
                old_entry_max,
                new_node,
                entry_delta,
            } if old_node == node && (old_entry_min..=old_entry_max).contains(&entry) => {
                let moved = entry as i64 + entry_delta;
                Some((new_node, usize::try_from(moved).unwrap_or(0)))
            }
            _ => None,
        }
    }
}

/// Receives index events.
///
/// Called synchronously, after the index has released its own latch and
/// before the mutating call returns. Observers must not mutate the index.
pub trait IndexObserver: Send + Sync {
    fn on_event(&self, event: &IndexEvent);
}

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Weak subscriber list owned by an index.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    slots: Vec<(ObserverId, Weak<dyn IndexObserver>)>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: &Arc<dyn IndexObserver>) -> ObserverId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ObserverId(inner.next_id);
        inner.slots.push((id, Arc::downgrade(observer)));
        id
    }

    pub fn unregister(&self, id: ObserverId) {
        self.inner.lock().slots.retain(|(slot, _)| *slot != id);
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `events` in order to every live observer.
    pub fn dispatch(&self, events: &[IndexEvent]) {
        if events.is_empty() {
            return;
        }
        let observers: Vec<Arc<dyn IndexObserver>> = {
            let mut inner = self.inner.lock();
            inner.slots.retain(|(_, weak)| weak.strong_count() > 0);
            inner.slots.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for event in events {
            tracing::trace!(?event, observers = observers.len(), "index event");
            for observer in &observers {
                observer.on_event(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<IndexEvent>>);

    impl IndexObserver for Recorder {
        fn on_event(&self, event: &IndexEvent) {
            self.0.lock().push(*event);
        }
    }

    #[test]
    fn test_dispatch_in_order() {
        let registry = ObserverRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let observer: Arc<dyn IndexObserver> = recorder.clone();
        registry.register(&observer);

        let events = [
            IndexEvent::RowDeleted { node: StreamId::new(1), entry: 0 },
            IndexEvent::Reset,
        ];
        registry.dispatch(&events);
        assert_eq!(*recorder.0.lock(), events.to_vec());
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let registry = ObserverRegistry::new();
        let observer: Arc<dyn IndexObserver> = Arc::new(Recorder::default());
        registry.register(&observer);
        assert_eq!(registry.len(), 1);

        drop(observer);
        registry.dispatch(&[IndexEvent::Reset]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister() {
        let registry = ObserverRegistry::new();
        let observer: Arc<dyn IndexObserver> = Arc::new(Recorder::default());
        let id = registry.register(&observer);
        registry.unregister(id);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_moved_position() {
        let event = IndexEvent::RowsMoved {
            old_node: StreamId::new(1),
            old_entry_min: 2,
            old_entry_max: 4,
            new_node: StreamId::new(7),
            entry_delta: -2,
        };
        assert_eq!(event.moved_position(StreamId::new(1), 3), Some((StreamId::new(7), 1)));
        assert_eq!(event.moved_position(StreamId::new(1), 1), None);
        assert_eq!(event.moved_position(StreamId::new(2), 3), None);
    }
}
