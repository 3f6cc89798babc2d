//! The stream collaborator interface.
//!
//! A stream is an allocated, individually lockable byte range. Index nodes,
//! index headers and stored key/data records each live in their own stream.

use crate::common::{Result, StreamId};
use crate::storage::guard::StreamGuard;
use crate::storage::stats::StreamStatsSnapshot;

/// Lock mode requested when opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Read-only access; many shared guards may coexist.
    Shared,
    /// Read-write access; the stream is marked dirty when the guard drops.
    Exclusive,
}

/// Allocates, opens and releases streams.
///
/// Implementations must be shareable across every index and cursor of one
/// execution context, so the trait is object safe and `Send + Sync`.
///
/// Guards are scoped: callers open a stream, operate on it, and let the guard
/// drop on every path. Holding two guards on the same stream from the same
/// thread, one of them exclusive, deadlocks.
pub trait StreamManager: Send + Sync {
    /// Allocate a new zero-filled stream of `size` bytes.
    ///
    /// Identifiers are never reused by one manager instance.
    fn allocate(&self, size: usize) -> Result<StreamId>;

    /// Release a stream.
    ///
    /// # Errors
    /// Returns `Error::StreamNotFound` if the stream does not exist.
    fn deallocate(&self, id: StreamId) -> Result<()>;

    /// Open a stream under the given lock mode.
    ///
    /// # Errors
    /// Returns `Error::StreamNotFound` if the stream does not exist.
    fn open(&self, id: StreamId, mode: LockMode) -> Result<StreamGuard>;

    /// Point-in-time counters for this manager.
    fn stats(&self) -> StreamStatsSnapshot;

    /// Copy the full contents of a stream.
    fn read(&self, id: StreamId) -> Result<Vec<u8>> {
        let guard = self.open(id, LockMode::Shared)?;
        Ok(guard.to_vec())
    }

    /// Replace the full contents of a stream.
    fn write(&self, id: StreamId, bytes: &[u8]) -> Result<()> {
        let mut guard = self.open(id, LockMode::Exclusive)?;
        guard.replace(bytes)
    }

    /// Allocate a stream holding a copy of `bytes`.
    fn allocate_with(&self, bytes: &[u8]) -> Result<StreamId> {
        let id = self.allocate(bytes.len())?;
        if let Err(err) = self.write(id, bytes) {
            if let Err(cleanup) = self.deallocate(id) {
                tracing::warn!(stream = %id, error = %cleanup, "failed to release stream after write error");
            }
            return Err(err);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::storage::MemoryStreamManager;

    /// Refuses exclusive access to every stream.
    struct ReadOnlyStreams(MemoryStreamManager);

    impl StreamManager for ReadOnlyStreams {
        fn allocate(&self, size: usize) -> Result<StreamId> {
            self.0.allocate(size)
        }

        fn deallocate(&self, id: StreamId) -> Result<()> {
            self.0.deallocate(id)
        }

        fn open(&self, id: StreamId, mode: LockMode) -> Result<StreamGuard> {
            match mode {
                LockMode::Shared => self.0.open(id, mode),
                LockMode::Exclusive => Err(Error::StreamNotWritable(id)),
            }
        }

        fn stats(&self) -> StreamStatsSnapshot {
            self.0.stats()
        }
    }

    #[test]
    fn test_allocate_with_releases_stream_on_write_error() {
        let streams = ReadOnlyStreams(MemoryStreamManager::new());
        assert!(matches!(streams.allocate_with(b"abc"), Err(Error::StreamNotWritable(_))));
        assert!(streams.0.is_empty());
        assert_eq!(streams.stats().deallocations, 1);
    }

    #[test]
    fn test_allocate_with_copies_bytes() {
        let streams = MemoryStreamManager::new();
        let id = streams.allocate_with(b"abc").unwrap();
        assert_eq!(streams.read(id).unwrap(), b"abc".to_vec());
    }
}
