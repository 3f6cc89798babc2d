//! RAII guards for stream access.
//!
//! A [`StreamGuard`] holds the stream's lock for as long as it lives:
//! - `LockMode::Shared` - read access (multiple allowed)
//! - `LockMode::Exclusive` - write access (auto-marks dirty)
//!
//! The lock is released when the guard is dropped, on every path.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::common::{Error, Result, StreamId};
use crate::storage::stream::LockMode;

/// Shared backing of one stream: the bytes plus a dirty flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct StreamCell {
    pub(crate) bytes: Arc<RwLock<Vec<u8>>>,
    pub(crate) dirty: Arc<AtomicBool>,
}

impl StreamCell {
    pub(crate) fn new(bytes: Vec<u8>, dirty: bool) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
            dirty: Arc::new(AtomicBool::new(dirty)),
        }
    }

    /// Acquire the stream's lock in the requested mode.
    pub(crate) fn lock(&self, id: StreamId, mode: LockMode) -> StreamGuard {
        let access = match mode {
            LockMode::Shared => Access::Shared(self.bytes.read_arc()),
            LockMode::Exclusive => Access::Exclusive(self.bytes.write_arc()),
        };
        StreamGuard {
            id,
            access,
            dirty: Arc::clone(&self.dirty),
        }
    }
}

enum Access {
    Shared(ArcRwLockReadGuard<RawRwLock, Vec<u8>>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, Vec<u8>>),
}

/// Scoped access to one stream.
///
/// Derefs to the stream's bytes. Write access is only granted for guards
/// opened with `LockMode::Exclusive`.
///
/// # Example
/// ```
/// use relcore::storage::{LockMode, MemoryStreamManager, StreamManager};
///
/// let streams = MemoryStreamManager::new();
/// let id = streams.allocate(4).unwrap();
/// {
///     let mut guard = streams.open(id, LockMode::Exclusive).unwrap();
///     guard.as_mut_slice().unwrap()[0] = 0xFF;
/// } // lock released, stream marked dirty
/// assert_eq!(streams.read(id).unwrap(), vec![0xFF, 0, 0, 0]);
/// ```
pub struct StreamGuard {
    id: StreamId,
    access: Access,
    dirty: Arc<AtomicBool>,
}

impl StreamGuard {
    /// Get the stream ID.
    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get the lock mode this guard was opened with.
    #[inline]
    pub fn mode(&self) -> LockMode {
        match self.access {
            Access::Shared(_) => LockMode::Shared,
            Access::Exclusive(_) => LockMode::Exclusive,
        }
    }

    /// Read access to the stream's bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match &self.access {
            Access::Shared(guard) => guard.as_slice(),
            Access::Exclusive(guard) => guard.as_slice(),
        }
    }

    /// Write access to the stream's bytes.
    ///
    /// # Errors
    /// Returns `Error::StreamNotWritable` for a shared guard.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match &mut self.access {
            Access::Shared(_) => Err(Error::StreamNotWritable(self.id)),
            Access::Exclusive(guard) => Ok(guard.as_mut_slice()),
        }
    }

    /// Replace the stream's contents, resizing it to `bytes.len()`.
    ///
    /// # Errors
    /// Returns `Error::StreamNotWritable` for a shared guard.
    pub fn replace(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.access {
            Access::Shared(_) => Err(Error::StreamNotWritable(self.id)),
            Access::Exclusive(guard) => {
                guard.clear();
                guard.extend_from_slice(bytes);
                Ok(())
            }
        }
    }
}

impl Deref for StreamGuard {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        // Exclusive access: always dirty
        if let Access::Exclusive(_) = self.access {
            self.dirty.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_guard_rejects_writes() {
        let cell = StreamCell::new(vec![1, 2, 3], false);
        let mut guard = cell.lock(StreamId::new(9), LockMode::Shared);

        assert_eq!(guard.mode(), LockMode::Shared);
        assert_eq!(&*guard, &[1, 2, 3]);
        assert!(matches!(
            guard.as_mut_slice(),
            Err(Error::StreamNotWritable(id)) if id == StreamId::new(9)
        ));
        drop(guard);
        assert!(!cell.dirty.load(Ordering::Acquire));
    }

    #[test]
    fn test_exclusive_guard_marks_dirty() {
        let cell = StreamCell::new(vec![0; 2], false);
        {
            let mut guard = cell.lock(StreamId::new(1), LockMode::Exclusive);
            guard.replace(&[7, 8, 9]).unwrap();
        }
        assert!(cell.dirty.load(Ordering::Acquire));
        assert_eq!(*cell.bytes.read(), vec![7, 8, 9]);
    }

    #[test]
    fn test_multiple_shared_guards() {
        let cell = StreamCell::new(vec![5], false);
        let a = cell.lock(StreamId::new(1), LockMode::Shared);
        let b = cell.lock(StreamId::new(1), LockMode::Shared);
        assert_eq!(a[0], b[0]);
    }
}
