//! File-backed stream manager - memory-resident streams checkpointed to disk.
//!
//! The [`FileStreamManager`] serves every request from memory and writes a
//! full checkpoint of all live streams on [`FileStreamManager::flush`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use crate::common::{Error, Result, StreamId};
use crate::storage::guard::StreamGuard;
use crate::storage::memory::MemoryStreamManager;
use crate::storage::stats::StreamStatsSnapshot;
use crate::storage::stream::{LockMode, StreamManager};

const MAGIC: [u8; 4] = *b"RLCS";
const VERSION: u16 = 1;
const FILE_HEADER_SIZE: usize = 4 + 2 + 8 + 4;
const RECORD_HEADER_SIZE: usize = 8 + 4 + 4;

/// Stream manager persisted to a single checkpoint file.
///
/// # File Layout
/// ```text
/// ┌────────┬─────────┬─────────┬───────┬──────────┬─────┬──────────┐
/// │ magic  │ version │ next_id │ count │ record 0 │ ... │ record N │
/// │ 4B     │ 2B      │ 8B      │ 4B    │          │     │          │
/// └────────┴─────────┴─────────┴───────┴──────────┴─────┴──────────┘
///
/// record: [id:8][length:4][crc32:4][bytes:length]
/// ```
///
/// All integers are little-endian. `next_id` is persisted so that stream ids
/// stay unique across reopen.
///
/// # Durability
/// `flush()` rewrites the whole file and calls `fsync()`. Nothing is written
/// between flushes.
pub struct FileStreamManager {
    path: PathBuf,
    memory: MemoryStreamManager,
}

impl FileStreamManager {
    /// Create a new, empty checkpoint file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;

        let manager = Self {
            path: path.as_ref().to_path_buf(),
            memory: MemoryStreamManager::new(),
        };
        manager.flush()?;
        Ok(manager)
    }

    /// Open an existing checkpoint file and load every stream.
    ///
    /// # Errors
    /// Returns `Error::CorruptStreamFile` if the header is invalid, a record
    /// is truncated or a record's CRC32 does not match.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut bytes)?;

        if bytes.len() < FILE_HEADER_SIZE || bytes[0..4] != MAGIC {
            return Err(Error::CorruptStreamFile("bad magic".into()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(Error::CorruptStreamFile(format!(
                "unsupported version {version}"
            )));
        }
        let next_id = StreamId::from_bytes(&bytes[6..14]).0;
        let count = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);

        let memory = MemoryStreamManager::with_next_id(next_id);
        let mut offset = FILE_HEADER_SIZE;
        for _ in 0..count {
            if bytes.len() < offset + RECORD_HEADER_SIZE {
                return Err(Error::CorruptStreamFile("truncated record header".into()));
            }
            let id = StreamId::from_bytes(&bytes[offset..offset + 8]);
            let len = u32::from_le_bytes([
                bytes[offset + 8],
                bytes[offset + 9],
                bytes[offset + 10],
                bytes[offset + 11],
            ]) as usize;
            let crc = u32::from_le_bytes([
                bytes[offset + 12],
                bytes[offset + 13],
                bytes[offset + 14],
                bytes[offset + 15],
            ]);
            offset += RECORD_HEADER_SIZE;

            let end = offset + len;
            if bytes.len() < end {
                return Err(Error::CorruptStreamFile(format!("truncated {id}")));
            }
            let data = &bytes[offset..end];
            if crc32fast::hash(data) != crc {
                return Err(Error::CorruptStreamFile(format!("checksum mismatch in {id}")));
            }
            if id.0 >= next_id {
                return Err(Error::CorruptStreamFile(format!(
                    "{id} is beyond next id {next_id}"
                )));
            }
            memory.restore(id, data.to_vec());
            offset = end;
        }

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            memory,
        })
    }

    /// Open an existing checkpoint file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Write every live stream to the checkpoint file.
    ///
    /// Dirty flags are cleared once the file has been synced.
    pub fn flush(&self) -> Result<()> {
        let cells = self.memory.cells();

        let mut out = Vec::with_capacity(FILE_HEADER_SIZE);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.memory.next_id().to_le_bytes());
        out.extend_from_slice(&(cells.len() as u32).to_le_bytes());

        for (id, cell) in &cells {
            let bytes = cell.bytes.read();
            out.extend_from_slice(&id.to_bytes());
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&crc32fast::hash(&bytes).to_le_bytes());
            out.extend_from_slice(&bytes);
        }

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(&out)?;
        file.sync_all()?; // fsync for durability

        for (_, cell) in &cells {
            cell.dirty.store(false, Ordering::Release);
        }
        self.memory
            .stream_stats()
            .streams_flushed
            .fetch_add(cells.len() as u64, Ordering::Relaxed);
        tracing::debug!(streams = cells.len(), path = %self.path.display(), "checkpoint flushed");
        Ok(())
    }

    /// Number of streams modified since the last flush.
    pub fn dirty_count(&self) -> usize {
        self.memory
            .cells()
            .iter()
            .filter(|(_, cell)| cell.dirty.load(Ordering::Acquire))
            .count()
    }

    /// Number of live streams.
    #[inline]
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Whether no streams are allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Path of the checkpoint file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StreamManager for FileStreamManager {
    fn allocate(&self, size: usize) -> Result<StreamId> {
        self.memory.allocate(size)
    }

    fn deallocate(&self, id: StreamId) -> Result<()> {
        self.memory.deallocate(id)
    }

    fn open(&self, id: StreamId, mode: LockMode) -> Result<StreamGuard> {
        self.memory.open(id, mode)
    }

    fn stats(&self) -> StreamStatsSnapshot {
        self.memory.stats()
    }
}
