//! Indexes built on a file-backed stream manager survive a reopen.

use std::sync::Arc;

use relcore::index::btree::{BTreeIndex, IntegerKeyHooks};
use relcore::storage::{FileStreamManager, StreamManager};
use relcore::IndexConfig;
use tempfile::tempdir;

fn keys(index: &BTreeIndex) -> Vec<i64> {
    let mut keys = Vec::new();
    let mut at = index.first_entry().unwrap();
    while let Some(entry) = at {
        keys.push(IntegerKeyHooks::decode(&index.entry(entry).unwrap().0).unwrap());
        at = index.next_entry(entry).unwrap();
    }
    keys
}

/// Build an index, checkpoint, and read it back in a second session.
#[test]
fn test_index_round_trips_through_checkpoint() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.db");

    // First session: build and flush
    let header_id = {
        let file = Arc::new(FileStreamManager::create(&path).unwrap());
        let streams: Arc<dyn StreamManager> = file.clone();
        let config = IndexConfig::new(3, 2).unwrap();
        let index = BTreeIndex::create(streams, Arc::new(IntegerKeyHooks), 8, 8, config).unwrap();
        for k in (0..40).rev() {
            index.insert(&IntegerKeyHooks::key(k), &IntegerKeyHooks::key(-k)).unwrap();
        }
        index.delete(&IntegerKeyHooks::key(17)).unwrap();
        file.flush().unwrap();
        index.header_id()
    };

    // Second session: reattach
    let file: Arc<dyn StreamManager> = Arc::new(FileStreamManager::open(&path).unwrap());
    let index = BTreeIndex::open(file, Arc::new(IntegerKeyHooks), header_id).unwrap();
    index.validate().unwrap();
    let expected: Vec<i64> = (0..40).filter(|k| *k != 17).collect();
    assert_eq!(keys(&index), expected);

    let found = index.find_key(&IntegerKeyHooks::key(39)).unwrap();
    assert!(found.found);
    let leaf = index.load_node(found.leaf()).unwrap();
    assert_eq!(IntegerKeyHooks::decode(leaf.data(found.entry)).unwrap(), -39);
}

/// Unflushed work is not visible after reopen.
#[test]
fn test_unflushed_streams_are_lost() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.db");
    {
        let file = FileStreamManager::create(&path).unwrap();
        file.allocate_with(b"kept").unwrap();
        file.flush().unwrap();
        file.allocate_with(b"lost").unwrap();
    }
    let file = FileStreamManager::open(&path).unwrap();
    assert_eq!(file.len(), 1);
}
