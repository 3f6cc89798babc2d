//! Stream manager statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracked by a stream manager.
///
/// All fields are atomic so that every index and cursor sharing the manager
/// can bump them through `&self`.
///
/// # Memory Ordering
/// `Ordering::Relaxed` throughout: counters are independent and only need
/// atomicity.
///
/// # Example
/// ```
/// use relcore::storage::StreamStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = StreamStats::new();
/// stats.allocations.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.live(), 1);
/// ```
#[derive(Debug, Default)]
pub struct StreamStats {
    /// Number of streams allocated.
    pub allocations: AtomicU64,

    /// Number of streams released.
    pub deallocations: AtomicU64,

    /// Number of shared opens.
    pub shared_opens: AtomicU64,

    /// Number of exclusive opens.
    pub exclusive_opens: AtomicU64,

    /// Number of streams written by checkpoint flushes.
    pub streams_flushed: AtomicU64,
}

impl StreamStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams allocated and not yet released.
    pub fn live(&self) -> u64 {
        let allocated = self.allocations.load(Ordering::Relaxed);
        let released = self.deallocations.load(Ordering::Relaxed);
        allocated.saturating_sub(released)
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            shared_opens: self.shared_opens.load(Ordering::Relaxed),
            exclusive_opens: self.exclusive_opens.load(Ordering::Relaxed),
            streams_flushed: self.streams_flushed.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.allocations.store(0, Ordering::Relaxed);
        self.deallocations.store(0, Ordering::Relaxed);
        self.shared_opens.store(0, Ordering::Relaxed);
        self.exclusive_opens.store(0, Ordering::Relaxed);
        self.streams_flushed.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of stream statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    pub allocations: u64,
    pub deallocations: u64,
    pub shared_opens: u64,
    pub exclusive_opens: u64,
    pub streams_flushed: u64,
}

impl StreamStatsSnapshot {
    /// Streams allocated and not yet released.
    pub fn live(&self) -> u64 {
        self.allocations.saturating_sub(self.deallocations)
    }
}

impl fmt::Display for StreamStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ live: {}, allocations: {}, deallocations: {}, opens: {}/{} }}",
            self.live(),
            self.allocations,
            self.deallocations,
            self.shared_opens,
            self.exclusive_opens
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = StreamStats::new();
        assert_eq!(stats.allocations.load(Ordering::Relaxed), 0);
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = StreamStats::new();
        stats.allocations.fetch_add(7, Ordering::Relaxed);
        stats.deallocations.fetch_add(3, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allocations, 7);
        assert_eq!(snapshot.deallocations, 3);
        assert_eq!(snapshot.live(), 4);
    }

    #[test]
    fn test_stats_reset() {
        let stats = StreamStats::new();
        stats.shared_opens.fetch_add(100, Ordering::Relaxed);

        stats.reset();

        assert_eq!(stats.shared_opens.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_stats_display() {
        let stats = StreamStats::new();
        stats.allocations.fetch_add(80, Ordering::Relaxed);
        stats.deallocations.fetch_add(20, Ordering::Relaxed);

        let display = format!("{}", stats.snapshot());

        assert!(display.contains("live: 60"));
        assert!(display.contains("allocations: 80"));
    }
}
