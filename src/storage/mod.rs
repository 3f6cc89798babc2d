//! Storage layer - the stream collaborator.
//!
//! This module provides the byte-range storage every index is built on:
//! - [`StreamManager`] - allocate/open/release interface
//! - [`StreamGuard`] - scoped shared/exclusive access
//! - [`MemoryStreamManager`] - in-memory streams
//! - [`FileStreamManager`] - in-memory streams with file checkpoints

mod file;
mod guard;
mod memory;
mod stats;
mod stream;

pub use file::FileStreamManager;
pub use guard::StreamGuard;
pub use memory::MemoryStreamManager;
pub use stats::{StreamStats, StreamStatsSnapshot};
pub use stream::{LockMode, StreamManager};
