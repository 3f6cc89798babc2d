//! In-memory stream manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{Error, Result, StreamId};
use crate::storage::guard::{StreamCell, StreamGuard};
use crate::storage::stats::{StreamStats, StreamStatsSnapshot};
use crate::storage::stream::{LockMode, StreamManager};

/// Stream manager that keeps every stream in memory.
///
/// The stream table is guarded by a mutex that is only held while looking a
/// stream up; the per-stream lock is taken afterwards, so a guard on one
/// stream never blocks access to another.
#[derive(Debug)]
pub struct MemoryStreamManager {
    streams: Mutex<HashMap<StreamId, StreamCell>>,
    next_id: AtomicU64,
    stats: StreamStats,
}

impl MemoryStreamManager {
    /// Create an empty manager. The first allocated id is 1.
    pub fn new() -> Self {
        Self::with_next_id(1)
    }

    pub(crate) fn with_next_id(next_id: u64) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(next_id.max(1)),
            stats: StreamStats::new(),
        }
    }

    /// Number of live streams.
    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    /// Whether no streams are allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether a stream exists.
    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.lock().contains_key(&id)
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::Acquire)
    }

    pub(crate) fn stream_stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Insert a stream with a known id (used when reloading a checkpoint).
    pub(crate) fn restore(&self, id: StreamId, bytes: Vec<u8>) {
        self.streams.lock().insert(id, StreamCell::new(bytes, false));
    }

    /// Snapshot of every stream, sorted by id.
    pub(crate) fn cells(&self) -> Vec<(StreamId, StreamCell)> {
        let mut cells: Vec<_> = self
            .streams
            .lock()
            .iter()
            .map(|(id, cell)| (*id, cell.clone()))
            .collect();
        cells.sort_by_key(|(id, _)| *id);
        cells
    }

    fn cell(&self, id: StreamId) -> Result<StreamCell> {
        self.streams
            .lock()
            .get(&id)
            .cloned()
            .ok_or(Error::StreamNotFound(id))
    }
}

impl Default for MemoryStreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamManager for MemoryStreamManager {
    fn allocate(&self, size: usize) -> Result<StreamId> {
        let id = StreamId::new(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.streams
            .lock()
            .insert(id, StreamCell::new(vec![0; size], true));
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn deallocate(&self, id: StreamId) -> Result<()> {
        match self.streams.lock().remove(&id) {
            Some(_) => {
                self.stats.deallocations.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(Error::StreamNotFound(id)),
        }
    }

    fn open(&self, id: StreamId, mode: LockMode) -> Result<StreamGuard> {
        let cell = self.cell(id)?;
        let counter = match mode {
            LockMode::Shared => &self.stats.shared_opens,
            LockMode::Exclusive => &self.stats.exclusive_opens,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(cell.lock(id, mode))
    }

    fn stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_zeroed() {
        let streams = MemoryStreamManager::new();
        let id = streams.allocate(16).unwrap();

        assert_eq!(id, StreamId::new(1));
        assert_eq!(streams.read(id).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let streams = MemoryStreamManager::new();
        let a = streams.allocate(1).unwrap();
        streams.deallocate(a).unwrap();
        let b = streams.allocate(1).unwrap();

        assert_ne!(a, b);
        assert!(!streams.contains(a));
    }

    #[test]
    fn test_deallocate_missing_stream() {
        let streams = MemoryStreamManager::new();
        assert!(matches!(
            streams.deallocate(StreamId::new(5)),
            Err(Error::StreamNotFound(_))
        ));
        assert!(streams.open(StreamId::NIL, LockMode::Shared).is_err());
    }

    #[test]
    fn test_write_resizes_stream() {
        let streams = MemoryStreamManager::new();
        let id = streams.allocate(2).unwrap();
        streams.write(id, &[1, 2, 3, 4]).unwrap();
        assert_eq!(streams.read(id).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_stats_track_opens() {
        let streams = MemoryStreamManager::new();
        let id = streams.allocate_with(&[1]).unwrap();
        streams.read(id).unwrap();
        streams.deallocate(id).unwrap();

        let stats = streams.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.deallocations, 1);
        assert_eq!(stats.shared_opens, 1);
        assert_eq!(stats.exclusive_opens, 1);
        assert_eq!(stats.live(), 0);
        assert!(streams.is_empty());
    }
}
