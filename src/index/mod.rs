//! Index structures.

pub mod btree;

pub use btree::{BTreeIndex, EntryRef, IndexEvent, IndexHooks, IndexObserver};
