//! Index node layout.
//!
//! Every node lives in its own stream:
//! ```text
//! ┌──────────────────────────┬─────────┬─────────┬─────┬──────────────┐
//! │ NodeHeader (21 bytes)    │ entry 0 │ entry 1 │ ... │ entry cap-1  │
//! └──────────────────────────┴─────────┴─────────┴─────┴──────────────┘
//! entry: [key: key_length][data: data_length]
//! ```
//!
//! Routing-node data is the child's stream id; routing entry 0 carries a
//! zeroed sentinel key that is never compared. Data (leaf) nodes are linked
//! through `prior`/`next` into a doubly linked list.

use crate::common::config::{NODE_HEADER_SIZE, STREAM_ID_SIZE};
use crate::common::{Error, Result, StreamId};
use crate::storage::{LockMode, StreamManager};

/// Kind of index node.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Interior node; data is a child node id.
    Routing = 0,
    /// Leaf node; data is the caller's payload.
    Data = 1,
}

impl NodeType {
    /// Convert from u8, returning `None` for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(NodeType::Routing),
            1 => Some(NodeType::Data),
            _ => None,
        }
    }
}

/// Metadata stored at the beginning of every node.
///
/// # Layout (21 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       1     node_type (NodeType as u8)
/// 1       8     prior (StreamId, little-endian)
/// 9       8     next (StreamId, little-endian)
/// 17      4     entry_count (i32, little-endian)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub node_type: NodeType,
    pub prior: StreamId,
    pub next: StreamId,
    pub entry_count: i32,
}

impl NodeHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = NODE_HEADER_SIZE;

    pub const OFFSET_NODE_TYPE: usize = 0;
    pub const OFFSET_PRIOR: usize = 1;
    pub const OFFSET_NEXT: usize = 9;
    pub const OFFSET_ENTRY_COUNT: usize = 17;

    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            prior: StreamId::NIL,
            next: StreamId::NIL,
            entry_count: 0,
        }
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// Returns `None` if the slice is too short or the node type is unknown.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let node_type = NodeType::from_u8(data[Self::OFFSET_NODE_TYPE])?;
        let prior = StreamId::from_bytes(&data[Self::OFFSET_PRIOR..]);
        let next = StreamId::from_bytes(&data[Self::OFFSET_NEXT..]);
        let entry_count = i32::from_le_bytes([
            data[Self::OFFSET_ENTRY_COUNT],
            data[Self::OFFSET_ENTRY_COUNT + 1],
            data[Self::OFFSET_ENTRY_COUNT + 2],
            data[Self::OFFSET_ENTRY_COUNT + 3],
        ]);
        Some(Self {
            node_type,
            prior,
            next,
            entry_count,
        })
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < NodeHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for NodeHeader");
        data[Self::OFFSET_NODE_TYPE] = self.node_type as u8;
        data[Self::OFFSET_PRIOR..Self::OFFSET_NEXT].copy_from_slice(&self.prior.to_bytes());
        data[Self::OFFSET_NEXT..Self::OFFSET_ENTRY_COUNT].copy_from_slice(&self.next.to_bytes());
        data[Self::OFFSET_ENTRY_COUNT..Self::SIZE].copy_from_slice(&self.entry_count.to_le_bytes());
    }
}

/// Owned copy of one node.
///
/// Loaded under a shared stream guard and stored back under an exclusive
/// one; no stream lock is held while the copy is being worked on.
#[derive(Debug, Clone)]
pub struct IndexNode {
    id: StreamId,
    header: NodeHeader,
    key_length: usize,
    data_length: usize,
    max_entries: usize,
    bytes: Vec<u8>,
}

impl IndexNode {
    /// Stream size for a node holding up to `max_entries` entries.
    pub fn stream_size(key_length: usize, data_length: usize, max_entries: usize) -> usize {
        NODE_HEADER_SIZE + max_entries * (key_length + data_length)
    }

    /// An empty node. `data_length` is the leaf payload width; routing nodes
    /// always carry stream ids.
    pub(crate) fn new(
        id: StreamId,
        node_type: NodeType,
        key_length: usize,
        data_length: usize,
        max_entries: usize,
    ) -> Self {
        let data_length = match node_type {
            NodeType::Routing => STREAM_ID_SIZE,
            NodeType::Data => data_length,
        };
        Self {
            id,
            header: NodeHeader::new(node_type),
            key_length,
            data_length,
            max_entries,
            bytes: vec![0; Self::stream_size(key_length, data_length, max_entries)],
        }
    }

    /// Load a node from its stream.
    ///
    /// # Errors
    /// Returns `Error::CorruptIndexNode` if the header is invalid or the entry
    /// count does not fit the stream.
    pub(crate) fn load(
        streams: &dyn StreamManager,
        id: StreamId,
        key_length: usize,
        leaf_data_length: usize,
    ) -> Result<Self> {
        let bytes = {
            let guard = streams.open(id, LockMode::Shared)?;
            guard.to_vec()
        };
        let header = NodeHeader::from_bytes(&bytes)
            .ok_or_else(|| Error::CorruptIndexNode(id, "invalid header".into()))?;
        let data_length = match header.node_type {
            NodeType::Routing => STREAM_ID_SIZE,
            NodeType::Data => leaf_data_length,
        };
        let entry_size = key_length + data_length;
        let max_entries = if entry_size == 0 {
            0
        } else {
            (bytes.len() - NODE_HEADER_SIZE) / entry_size
        };
        let count = usize::try_from(header.entry_count)
            .map_err(|_| Error::CorruptIndexNode(id, "negative entry count".into()))?;
        if count > max_entries && entry_size > 0 {
            return Err(Error::CorruptIndexNode(
                id,
                format!("{count} entries exceed capacity {max_entries}"),
            ));
        }
        Ok(Self {
            id,
            header,
            key_length,
            data_length,
            max_entries,
            bytes,
        })
    }

    /// Write the node back to its stream.
    pub(crate) fn store(&mut self, streams: &dyn StreamManager) -> Result<()> {
        self.header.write_to(&mut self.bytes);
        let mut guard = streams.open(self.id, LockMode::Exclusive)?;
        guard.replace(&self.bytes)
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[inline]
    pub fn node_type(&self) -> NodeType {
        self.header.node_type
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.header.node_type == NodeType::Data
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.header.entry_count as usize
    }

    #[inline]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count() >= self.max_entries
    }

    #[inline]
    pub fn prior(&self) -> StreamId {
        self.header.prior
    }

    #[inline]
    pub fn next(&self) -> StreamId {
        self.header.next
    }

    pub(crate) fn set_prior(&mut self, id: StreamId) {
        self.header.prior = id;
    }

    pub(crate) fn set_next(&mut self, id: StreamId) {
        self.header.next = id;
    }

    #[inline]
    fn entry_size(&self) -> usize {
        self.key_length + self.data_length
    }

    #[inline]
    fn offset(&self, entry: usize) -> usize {
        NODE_HEADER_SIZE + entry * self.entry_size()
    }

    /// Key bytes of `entry`.
    pub fn key(&self, entry: usize) -> &[u8] {
        let start = self.offset(entry);
        &self.bytes[start..start + self.key_length]
    }

    /// Data bytes of `entry`.
    pub fn data(&self, entry: usize) -> &[u8] {
        let start = self.offset(entry) + self.key_length;
        &self.bytes[start..start + self.data_length]
    }

    /// Child id of a routing entry.
    pub fn child(&self, entry: usize) -> StreamId {
        StreamId::from_bytes(self.data(entry))
    }

    pub(crate) fn set_key(&mut self, entry: usize, key: &[u8]) {
        let start = self.offset(entry);
        let len = self.key_length;
        self.bytes[start..start + len].copy_from_slice(key);
    }

    pub(crate) fn set_data(&mut self, entry: usize, data: &[u8]) {
        let start = self.offset(entry) + self.key_length;
        let len = self.data_length;
        self.bytes[start..start + len].copy_from_slice(data);
    }

    /// Zero the key of `entry` (routing sentinel).
    pub(crate) fn clear_key(&mut self, entry: usize) {
        let start = self.offset(entry);
        let len = self.key_length;
        self.bytes[start..start + len].fill(0);
    }

    /// Insert an entry at `entry`, shifting later entries up by one.
    ///
    /// # Panics
    /// Panics if the node is full.
    pub(crate) fn insert_entry(&mut self, entry: usize, key: &[u8], data: &[u8]) {
        assert!(!self.is_full(), "insert into full node {}", self.id);
        let count = self.count();
        let size = self.entry_size();
        let start = self.offset(entry);
        let end = self.offset(count);
        self.bytes.copy_within(start..end, start + size);
        self.header.entry_count += 1;
        self.set_key(entry, key);
        self.set_data(entry, data);
    }

    /// Remove the entry at `entry`, returning its key and data.
    pub(crate) fn remove_entry(&mut self, entry: usize) -> (Vec<u8>, Vec<u8>) {
        let removed = (self.key(entry).to_vec(), self.data(entry).to_vec());
        let count = self.count();
        let size = self.entry_size();
        let start = self.offset(entry);
        let end = self.offset(count);
        self.bytes.copy_within(start + size..end, start);
        let last = self.offset(count - 1);
        self.bytes[last..last + size].fill(0);
        self.header.entry_count -= 1;
        removed
    }

    /// Move entries `at..count` out of this node.
    pub(crate) fn split_off(&mut self, at: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        let count = self.count();
        let moved = (at..count)
            .map(|i| (self.key(i).to_vec(), self.data(i).to_vec()))
            .collect();
        let start = self.offset(at);
        let end = self.offset(count);
        self.bytes[start..end].fill(0);
        self.header.entry_count = at as i32;
        moved
    }

    /// Append entries at the end of this node.
    pub(crate) fn extend(&mut self, entries: Vec<(Vec<u8>, Vec<u8>)>) {
        for (key, data) in entries {
            let count = self.count();
            self.insert_entry(count, &key, &data);
        }
    }
}
