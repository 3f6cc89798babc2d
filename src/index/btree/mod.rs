//! B+Tree index over fixed-length opaque entries.
//!
//! - [`node`]: on-stream node layout
//! - [`hooks`]: caller-supplied ordering and key/data lifecycle
//! - [`notify`]: mutation events delivered to open scans
//! - [`tree`]: search, insert/split, delete and root collapse

mod hooks;
mod node;
mod notify;
mod tree;

pub use hooks::{BytewiseHooks, IndexHooks, IntegerKeyHooks};
pub use node::{IndexNode, NodeHeader, NodeType};
pub use notify::{IndexEvent, IndexObserver, ObserverId, ObserverRegistry};
pub use tree::{BTreeIndex, EntryRef, FindResult, IndexHeader, PathStep};
