//! The B+Tree index.
//!
//! # Structure
//! ```text
//!                     ┌────────────────────────┐
//!                     │ routing: [_ , k3]      │   entry 0 key is a sentinel
//!                     └───┬──────────────┬─────┘
//!                         │              │
//!            ┌────────────▼──┐       ┌───▼───────────┐
//!  head ───► │ data: k1, k2  │ ◄───► │ data: k3, k4  │ ◄─── tail
//!            └───────────────┘       └───────────────┘
//! ```
//!
//! - Routing entry `i > 0` holds a key no greater than every key in child `i`
//!   and greater than every key in child `i - 1`.
//! - Leaves hold entries in ascending key order and form a doubly linked list
//!   from `head` to `tail`.
//! - The tree grows in height only when the root splits, and shrinks when the
//!   root is left with a single child.
//!
//! # Latching
//! The index header doubles as the structure latch: searches take it shared,
//! mutations take it exclusive. Node streams are only opened long enough to
//! copy a node in or out. Mutation events are collected while the latch is
//! held and delivered to observers after it is released, before the mutating
//! call returns.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::codec::{ByteReader, ByteWriter};
use crate::common::config::{IndexConfig, INDEX_HEADER_SIZE, STREAM_ID_SIZE};
use crate::common::{Error, Result, StreamId};
use crate::index::btree::hooks::IndexHooks;
use crate::index::btree::node::{IndexNode, NodeType};
use crate::index::btree::notify::{IndexEvent, IndexObserver, ObserverId, ObserverRegistry};
use crate::storage::StreamManager;

/// Persisted index header.
///
/// # Layout (44 bytes)
/// ```text
/// [fanout:4][capacity:4][keyLength:4][dataLength:4][root:8][head:8][tail:8][height:4]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub fanout: usize,
    pub capacity: usize,
    pub key_length: usize,
    pub data_length: usize,
    pub root: StreamId,
    pub head: StreamId,
    pub tail: StreamId,
    pub height: u32,
}

impl IndexHeader {
    fn to_bytes(self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::with_capacity(INDEX_HEADER_SIZE);
        for v in [self.fanout, self.capacity, self.key_length, self.data_length] {
            let v = i32::try_from(v)
                .map_err(|_| Error::InvalidDefinition(format!("{v} exceeds i32")))?;
            w.put_i32(v);
        }
        w.put_stream_id(self.root);
        w.put_stream_id(self.head);
        w.put_stream_id(self.tail);
        w.put_i32(self.height as i32);
        Ok(w.into_inner())
    }

    fn from_bytes(id: StreamId, bytes: &[u8]) -> Result<Self> {
        let corrupt = |e: Error| Error::CorruptIndexNode(id, format!("bad index header: {e}"));
        let mut r = ByteReader::new(bytes);
        let fanout = r.get_len().map_err(corrupt)?;
        let capacity = r.get_len().map_err(corrupt)?;
        let key_length = r.get_len().map_err(corrupt)?;
        let data_length = r.get_len().map_err(corrupt)?;
        let root = r.get_stream_id().map_err(corrupt)?;
        let head = r.get_stream_id().map_err(corrupt)?;
        let tail = r.get_stream_id().map_err(corrupt)?;
        let height = r.get_len().map_err(corrupt)? as u32;
        Ok(Self {
            fanout,
            capacity,
            key_length,
            data_length,
            root,
            head,
            tail,
            height,
        })
    }

    fn max_entries(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::Routing => self.fanout,
            NodeType::Data => self.capacity,
        }
    }

    fn payload_length(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::Routing => STREAM_ID_SIZE,
            NodeType::Data => self.data_length,
        }
    }
}

/// One step of a root-to-leaf descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStep {
    pub node: StreamId,
    /// Child chosen in a routing node, or the match/insertion point in the leaf.
    pub entry: usize,
}

/// Result of [`BTreeIndex::find_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResult {
    pub found: bool,
    /// Root first, leaf last.
    pub path: Vec<PathStep>,
    /// Match location, or insertion point when not found.
    pub entry: usize,
}

impl FindResult {
    /// The leaf the search ended in.
    pub fn leaf(&self) -> StreamId {
        self.path.last().map_or(StreamId::NIL, |s| s.node)
    }
}

/// A leaf entry location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef {
    pub node: StreamId,
    pub entry: usize,
}

impl EntryRef {
    pub fn new(node: StreamId, entry: usize) -> Self {
        Self { node, entry }
    }
}

/// Events and deferred cleanup failures of one mutation.
#[derive(Default)]
struct Mutation {
    events: Vec<IndexEvent>,
    deferred: Option<Error>,
}

impl Mutation {
    fn push(&mut self, event: IndexEvent) {
        self.events.push(event);
    }

    fn defer(&mut self, err: Error) {
        if self.deferred.is_none() {
            self.deferred = Some(err);
        }
    }
}

/// A B+Tree over fixed-length opaque keys and data.
///
/// Nodes are allocated from a [`StreamManager`]; ordering and key/data
/// lifetimes come from [`IndexHooks`].
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use relcore::index::btree::{BTreeIndex, IntegerKeyHooks};
/// use relcore::storage::MemoryStreamManager;
/// use relcore::IndexConfig;
///
/// let streams = Arc::new(MemoryStreamManager::new());
/// let index = BTreeIndex::create(streams, Arc::new(IntegerKeyHooks), 8, 0, IndexConfig::new(3, 2).unwrap()).unwrap();
/// for k in [5, 3, 8] {
///     index.insert(&IntegerKeyHooks::key(k), &[]).unwrap();
/// }
/// assert!(index.find_key(&IntegerKeyHooks::key(8)).unwrap().found);
/// ```
pub struct BTreeIndex {
    streams: Arc<dyn StreamManager>,
    hooks: Arc<dyn IndexHooks>,
    header_id: StreamId,
    state: RwLock<IndexHeader>,
    generation: AtomicU64,
    observers: ObserverRegistry,
}

impl BTreeIndex {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create an empty index: a header stream and a single empty leaf.
    ///
    /// # Errors
    /// Returns `Error::InvalidDefinition` for an invalid config or a zero key
    /// length.
    pub fn create(
        streams: Arc<dyn StreamManager>,
        hooks: Arc<dyn IndexHooks>,
        key_length: usize,
        data_length: usize,
        config: IndexConfig,
    ) -> Result<Self> {
        config.validate()?;
        if key_length == 0 {
            return Err(Error::InvalidDefinition("key length must be positive".into()));
        }
        let header_id = streams.allocate(INDEX_HEADER_SIZE)?;
        let index = Self {
            streams,
            hooks,
            header_id,
            state: RwLock::new(IndexHeader {
                fanout: config.fanout,
                capacity: config.capacity,
                key_length,
                data_length,
                root: StreamId::NIL,
                head: StreamId::NIL,
                tail: StreamId::NIL,
                height: 1,
            }),
            generation: AtomicU64::new(0),
            observers: ObserverRegistry::new(),
        };
        {
            let mut st = index.state.write();
            index.init_root(&mut st)?;
        }
        Ok(index)
    }

    /// Reattach to an index persisted in `header_id`.
    pub fn open(
        streams: Arc<dyn StreamManager>,
        hooks: Arc<dyn IndexHooks>,
        header_id: StreamId,
    ) -> Result<Self> {
        let bytes = streams.read(header_id)?;
        let header = IndexHeader::from_bytes(header_id, &bytes)?;
        IndexConfig::new(header.fanout, header.capacity)?;
        Ok(Self {
            streams,
            hooks,
            header_id,
            state: RwLock::new(header),
            generation: AtomicU64::new(0),
            observers: ObserverRegistry::new(),
        })
    }

    /// Remove every entry, disposing keys and data, and start over with an
    /// empty root leaf.
    ///
    /// Observers receive `IndexEvent::Reset`.
    pub fn truncate(&self) -> Result<()> {
        let mut m = Mutation::default();
        m.push(IndexEvent::Reset);
        let result = (|| {
            let mut st = self.state.write();
            if let Err(err) = self.release_subtree(&st, st.root) {
                m.defer(err);
            }
            self.init_root(&mut st)
        })();
        tracing::debug!(header = %self.header_id, "index truncated");
        self.finish(m, result)
    }

    /// Dispose every entry and release every stream the index owns.
    pub fn destroy(self) -> Result<()> {
        let st = *self.state.read();
        let released = self.release_subtree(&st, st.root);
        self.observers.dispatch(&[IndexEvent::Reset]);
        let header = self.streams.deallocate(self.header_id);
        released.and(header)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn header_id(&self) -> StreamId {
        self.header_id
    }

    /// Copy of the current header.
    pub fn header(&self) -> IndexHeader {
        *self.state.read()
    }

    pub fn root(&self) -> StreamId {
        self.state.read().root
    }

    pub fn head(&self) -> StreamId {
        self.state.read().head
    }

    pub fn tail(&self) -> StreamId {
        self.state.read().tail
    }

    pub fn height(&self) -> u32 {
        self.state.read().height
    }

    pub fn key_length(&self) -> usize {
        self.state.read().key_length
    }

    pub fn data_length(&self) -> usize {
        self.state.read().data_length
    }

    /// Number of mutations that changed entry positions.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline]
    pub fn streams(&self) -> &Arc<dyn StreamManager> {
        &self.streams
    }

    #[inline]
    pub fn hooks(&self) -> &Arc<dyn IndexHooks> {
        &self.hooks
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Subscribe to mutation events.
    pub fn observe(&self, observer: &Arc<dyn IndexObserver>) -> ObserverId {
        self.observers.register(observer)
    }

    pub fn unobserve(&self, id: ObserverId) {
        self.observers.unregister(id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Descend from the root to the leaf that holds (or would hold) `key`.
    ///
    /// Routing nodes choose the last child whose separator is `<= key`; the
    /// leaf is searched for the first entry `>= key`.
    pub fn find_key(&self, key: &[u8]) -> Result<FindResult> {
        let st = self.state.read();
        self.find_in(&st, key)
    }

    /// First entry `>= probe`, crossing into the next leaf when needed.
    ///
    /// With a partial probe this is the first entry of the matching range.
    pub fn seek_first(&self, probe: &[u8]) -> Result<Option<EntryRef>> {
        let st = self.state.read();
        let leaf = self.descend(&st, probe, true)?;
        let (entry, _) = self.lower_bound(&leaf, probe)?;
        if entry < leaf.count() {
            return Ok(Some(EntryRef::new(leaf.id(), entry)));
        }
        self.first_from(&st, leaf.next())
    }

    /// Last entry `<= probe`, crossing into the prior leaf when needed.
    ///
    /// With a partial probe this is the last entry of the matching range.
    pub fn seek_last(&self, probe: &[u8]) -> Result<Option<EntryRef>> {
        let st = self.state.read();
        let leaf = self.descend(&st, probe, false)?;
        let entry = self.upper_bound(&leaf, probe)?;
        if entry > 0 {
            return Ok(Some(EntryRef::new(leaf.id(), entry - 1)));
        }
        self.last_from(&st, leaf.prior())
    }

    /// First entry in key order.
    pub fn first_entry(&self) -> Result<Option<EntryRef>> {
        let st = self.state.read();
        self.first_from(&st, st.head)
    }

    /// Last entry in key order.
    pub fn last_entry(&self) -> Result<Option<EntryRef>> {
        let st = self.state.read();
        self.last_from(&st, st.tail)
    }

    /// The entry after `at`.
    ///
    /// `at.entry` may be one past the end of its leaf (a displaced position),
    /// in which case the first entry of the next non-empty leaf is returned.
    pub fn next_entry(&self, at: EntryRef) -> Result<Option<EntryRef>> {
        self.normalize(EntryRef::new(at.node, at.entry + 1))
    }

    /// The entry before `at`.
    pub fn prior_entry(&self, at: EntryRef) -> Result<Option<EntryRef>> {
        let st = self.state.read();
        let leaf = self.load(&st, at.node)?;
        let entry = at.entry.min(leaf.count());
        if entry > 0 {
            return Ok(Some(EntryRef::new(at.node, entry - 1)));
        }
        self.last_from(&st, leaf.prior())
    }

    /// `at` itself if it names an entry, otherwise the next entry.
    pub fn normalize(&self, at: EntryRef) -> Result<Option<EntryRef>> {
        let st = self.state.read();
        let leaf = self.load(&st, at.node)?;
        if at.entry < leaf.count() {
            return Ok(Some(at));
        }
        self.first_from(&st, leaf.next())
    }

    /// Copy the key and data stored at `at`.
    pub fn entry(&self, at: EntryRef) -> Result<(Vec<u8>, Vec<u8>)> {
        let st = self.state.read();
        let leaf = self.load(&st, at.node)?;
        if at.entry >= leaf.count() {
            return Err(Error::CorruptIndexNode(
                at.node,
                format!("entry {} out of range", at.entry),
            ));
        }
        Ok((leaf.key(at.entry).to_vec(), leaf.data(at.entry).to_vec()))
    }

    /// Compare the key at `at` with `probe` using the index's hooks.
    pub fn compare_at(&self, at: EntryRef, probe: &[u8]) -> Result<CmpOrdering> {
        let (key, _) = self.entry(at)?;
        self.compare(&key, probe)
    }

    /// Copy of one node.
    pub fn load_node(&self, id: StreamId) -> Result<IndexNode> {
        let st = self.state.read();
        self.load(&st, id)
    }

    /// Every entry in key order, following the leaf list.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let st = self.state.read();
        let mut out = Vec::new();
        let mut id = st.head;
        while !id.is_nil() {
            let leaf = self.load(&st, id)?;
            for i in 0..leaf.count() {
                out.push((leaf.key(i).to_vec(), leaf.data(i).to_vec()));
            }
            id = leaf.next();
        }
        Ok(out)
    }

    /// Number of entries.
    pub fn count(&self) -> Result<usize> {
        let st = self.state.read();
        let mut total = 0;
        let mut id = st.head;
        while !id.is_nil() {
            let leaf = self.load(&st, id)?;
            total += leaf.count();
            id = leaf.next();
        }
        Ok(total)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert a new entry. Key and data are copied through the hooks.
    ///
    /// # Errors
    /// Returns `Error::DuplicateKey` if the key is present.
    pub fn insert(&self, key: &[u8], data: &[u8]) -> Result<()> {
        let mut m = Mutation::default();
        let result = self.insert_locked(key, data, &mut m);
        self.finish(m, result)
    }

    /// Remove an entry, disposing its key and data.
    ///
    /// # Errors
    /// Returns `Error::KeyNotFound` if the key is absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut m = Mutation::default();
        let result = self.delete_locked(key, &mut m);
        self.finish(m, result)
    }

    /// Change an entry's key, and optionally its data.
    ///
    /// When the keys compare equal the entry stays in place and only the data
    /// is replaced. Otherwise the entry is removed and reinserted under
    /// `new_key`, keeping its data unless `new_data` is given.
    ///
    /// # Errors
    /// Returns `Error::KeyNotFound` if `old_key` is absent and
    /// `Error::DuplicateKey` if `new_key` belongs to another entry.
    pub fn update(&self, old_key: &[u8], new_key: &[u8], new_data: Option<&[u8]>) -> Result<()> {
        let mut m = Mutation::default();
        let result = self.update_locked(old_key, new_key, new_data, &mut m);
        self.finish(m, result)
    }

    /// Replace an entry's data in place.
    pub fn update_data(&self, key: &[u8], data: &[u8]) -> Result<()> {
        let mut m = Mutation::default();
        let result = (|| {
            let st = self.state.write();
            let found = self.find_in(&st, key)?;
            if !found.found {
                return Err(Error::KeyNotFound);
            }
            self.replace_data(&st, &found, data, &mut m)
        })();
        self.finish(m, result)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check the structural invariants of the whole tree.
    ///
    /// # Errors
    /// Returns `Error::CorruptIndexNode` naming the first offending node.
    pub fn validate(&self) -> Result<()> {
        let st = self.state.read();
        self.check_subtree(&st, st.root, 1, true)?;

        let mut prior = StreamId::NIL;
        let mut last_key: Option<Vec<u8>> = None;
        let mut id = st.head;
        while !id.is_nil() {
            let leaf = self.load(&st, id)?;
            if !leaf.is_leaf() {
                return Err(Error::CorruptIndexNode(id, "routing node in leaf list".into()));
            }
            if leaf.prior() != prior {
                return Err(Error::CorruptIndexNode(id, "broken prior link".into()));
            }
            for i in 0..leaf.count() {
                if let Some(last) = &last_key {
                    if self.compare(last, leaf.key(i))? != CmpOrdering::Less {
                        return Err(Error::CorruptIndexNode(id, format!("entry {i} out of order")));
                    }
                }
                last_key = Some(leaf.key(i).to_vec());
            }
            prior = id;
            id = leaf.next();
        }
        if prior != st.tail {
            return Err(Error::CorruptIndexNode(st.tail, "tail is not the last leaf".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Internals: search
    // ========================================================================

    fn load(&self, st: &IndexHeader, id: StreamId) -> Result<IndexNode> {
        IndexNode::load(&*self.streams, id, st.key_length, st.data_length)
    }

    fn compare(&self, index_key: &[u8], probe: &[u8]) -> Result<CmpOrdering> {
        self.hooks.compare(index_key, probe).map_err(Error::compare)
    }

    /// Child to follow in a routing node: the last `i >= 1` whose key is
    /// `<= probe` (`< probe` when `strict`), else the sentinel entry 0.
    fn route(&self, node: &IndexNode, probe: &[u8], strict: bool) -> Result<usize> {
        let (mut lo, mut hi) = (1, node.count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            let ord = self.compare(node.key(mid), probe)?;
            let go_right = if strict {
                ord == CmpOrdering::Less
            } else {
                ord != CmpOrdering::Greater
            };
            if go_right {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo - 1)
    }

    /// First leaf entry `>= probe`, and whether it compares equal.
    fn lower_bound(&self, leaf: &IndexNode, probe: &[u8]) -> Result<(usize, bool)> {
        let (mut lo, mut hi) = (0, leaf.count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.compare(leaf.key(mid), probe)? == CmpOrdering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let found = lo < leaf.count() && self.compare(leaf.key(lo), probe)? == CmpOrdering::Equal;
        Ok((lo, found))
    }

    /// First leaf entry `> probe`.
    fn upper_bound(&self, leaf: &IndexNode, probe: &[u8]) -> Result<usize> {
        let (mut lo, mut hi) = (0, leaf.count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.compare(leaf.key(mid), probe)? != CmpOrdering::Greater {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn find_in(&self, st: &IndexHeader, key: &[u8]) -> Result<FindResult> {
        let mut path = Vec::with_capacity(st.height as usize);
        let mut id = st.root;
        loop {
            if path.len() > st.height as usize {
                return Err(Error::CorruptIndexNode(id, "descent exceeds tree height".into()));
            }
            let node = self.load(st, id)?;
            if node.is_leaf() {
                let (entry, found) = self.lower_bound(&node, key)?;
                path.push(PathStep { node: id, entry });
                return Ok(FindResult { found, path, entry });
            }
            if node.count() == 0 {
                return Err(Error::CorruptIndexNode(id, "empty routing node".into()));
            }
            let entry = self.route(&node, key, false)?;
            path.push(PathStep { node: id, entry });
            id = node.child(entry);
        }
    }

    fn descend(&self, st: &IndexHeader, probe: &[u8], strict: bool) -> Result<IndexNode> {
        let mut id = st.root;
        for _ in 0..=st.height {
            let node = self.load(st, id)?;
            if node.is_leaf() {
                return Ok(node);
            }
            if node.count() == 0 {
                return Err(Error::CorruptIndexNode(id, "empty routing node".into()));
            }
            id = node.child(self.route(&node, probe, strict)?);
        }
        Err(Error::CorruptIndexNode(id, "descent exceeds tree height".into()))
    }

    fn first_from(&self, st: &IndexHeader, mut id: StreamId) -> Result<Option<EntryRef>> {
        while !id.is_nil() {
            let leaf = self.load(st, id)?;
            if leaf.count() > 0 {
                return Ok(Some(EntryRef::new(id, 0)));
            }
            id = leaf.next();
        }
        Ok(None)
    }

    fn last_from(&self, st: &IndexHeader, mut id: StreamId) -> Result<Option<EntryRef>> {
        while !id.is_nil() {
            let leaf = self.load(st, id)?;
            if leaf.count() > 0 {
                return Ok(Some(EntryRef::new(id, leaf.count() - 1)));
            }
            id = leaf.prior();
        }
        Ok(None)
    }

    // ========================================================================
    // Internals: mutation
    // ========================================================================

    fn finish(&self, m: Mutation, result: Result<()>) -> Result<()> {
        if !m.events.is_empty() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.observers.dispatch(&m.events);
        }
        result?;
        match m.deferred {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn persist(&self, st: &IndexHeader) -> Result<()> {
        self.streams.write(self.header_id, &st.to_bytes()?)
    }

    fn new_node(&self, st: &IndexHeader, node_type: NodeType) -> Result<IndexNode> {
        let max = st.max_entries(node_type);
        let size = IndexNode::stream_size(st.key_length, st.payload_length(node_type), max);
        let id = self.streams.allocate(size)?;
        Ok(IndexNode::new(id, node_type, st.key_length, st.data_length, max))
    }

    fn init_root(&self, st: &mut IndexHeader) -> Result<()> {
        let mut root = self.new_node(st, NodeType::Data)?;
        root.store(&*self.streams)?;
        st.root = root.id();
        st.head = root.id();
        st.tail = root.id();
        st.height = 1;
        self.persist(st)
    }

    fn check_length(&self, what: &str, bytes: &[u8], expected: usize) -> Result<()> {
        if bytes.len() != expected {
            return Err(Error::InvalidPhysicalFormat(format!(
                "{what} must be {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(())
    }

    fn copy_key(&self, st: &IndexHeader, key: &[u8]) -> Result<Vec<u8>> {
        let mut copy = vec![0; st.key_length];
        self.hooks.copy_key(key, &mut copy).map_err(Error::copy_key)?;
        Ok(copy)
    }

    fn copy_data(&self, st: &IndexHeader, data: &[u8]) -> Result<Vec<u8>> {
        let mut copy = vec![0; st.data_length];
        self.hooks.copy_data(data, &mut copy).map_err(Error::copy_data)?;
        Ok(copy)
    }

    fn dispose_key(&self, key: &[u8], m: &mut Mutation) {
        if let Err(err) = self.hooks.dispose_key(key) {
            m.defer(Error::dispose_key(err));
        }
    }

    fn dispose_data(&self, data: &[u8], m: &mut Mutation) {
        if let Err(err) = self.hooks.dispose_data(data) {
            m.defer(Error::dispose_data(err));
        }
    }

    fn insert_locked(&self, key: &[u8], data: &[u8], m: &mut Mutation) -> Result<()> {
        let mut st = self.state.write();
        self.check_length("key", key, st.key_length)?;
        self.check_length("data", data, st.data_length)?;

        let found = self.find_in(&st, key)?;
        if found.found {
            return Err(Error::DuplicateKey);
        }
        let key_copy = self.copy_key(&st, key)?;
        let data_copy = match self.copy_data(&st, data) {
            Ok(copy) => copy,
            Err(err) => {
                if let Err(cleanup) = self.hooks.dispose_key(&key_copy) {
                    tracing::warn!(error = %cleanup, "failed to dispose key copy");
                }
                return Err(err);
            }
        };
        self.insert_owned(&mut st, &found.path, key_copy, data_copy, m)?;
        self.persist(&st)
    }

    fn delete_locked(&self, key: &[u8], m: &mut Mutation) -> Result<()> {
        let mut st = self.state.write();
        let found = self.find_in(&st, key)?;
        if !found.found {
            return Err(Error::KeyNotFound);
        }
        let (old_key, old_data) = self.remove_at(&mut st, &found.path, m)?;
        self.persist(&st)?;
        self.dispose_key(&old_key, m);
        self.dispose_data(&old_data, m);
        Ok(())
    }

    fn update_locked(
        &self,
        old_key: &[u8],
        new_key: &[u8],
        new_data: Option<&[u8]>,
        m: &mut Mutation,
    ) -> Result<()> {
        let mut st = self.state.write();
        self.check_length("key", new_key, st.key_length)?;
        let found = self.find_in(&st, old_key)?;
        if !found.found {
            return Err(Error::KeyNotFound);
        }

        let leaf = self.load(&st, found.leaf())?;
        if self.compare(leaf.key(found.entry), new_key)? == CmpOrdering::Equal {
            return match new_data {
                Some(data) => self.replace_data(&st, &found, data, m),
                None => Ok(()),
            };
        }

        if self.find_in(&st, new_key)?.found {
            return Err(Error::DuplicateKey);
        }
        let key_copy = self.copy_key(&st, new_key)?;
        let data_copy = match new_data.map(|d| self.copy_data(&st, d)).transpose() {
            Ok(copy) => copy,
            Err(err) => {
                if let Err(cleanup) = self.hooks.dispose_key(&key_copy) {
                    tracing::warn!(error = %cleanup, "failed to dispose key copy");
                }
                return Err(err);
            }
        };

        let (removed_key, removed_data) = self.remove_at(&mut st, &found.path, m)?;
        let data = match data_copy {
            Some(copy) => {
                self.dispose_data(&removed_data, m);
                copy
            }
            None => removed_data,
        };
        let target = self.find_in(&st, new_key)?;
        self.insert_owned(&mut st, &target.path, key_copy, data, m)?;
        self.persist(&st)?;
        self.dispose_key(&removed_key, m);
        Ok(())
    }

    fn replace_data(
        &self,
        st: &IndexHeader,
        found: &FindResult,
        data: &[u8],
        m: &mut Mutation,
    ) -> Result<()> {
        self.check_length("data", data, st.data_length)?;
        let copy = self.copy_data(st, data)?;
        let mut leaf = self.load(st, found.leaf())?;
        let old = leaf.data(found.entry).to_vec();
        leaf.set_data(found.entry, &copy);
        leaf.store(&*self.streams)?;
        self.dispose_data(&old, m);
        Ok(())
    }

    /// Insert an owned entry at the end of `path`, splitting upward as needed.
    fn insert_owned(
        &self,
        st: &mut IndexHeader,
        path: &[PathStep],
        key: Vec<u8>,
        data: Vec<u8>,
        m: &mut Mutation,
    ) -> Result<()> {
        let mut level = path.len() - 1;
        let mut entry = path[level].entry;
        let (mut key, mut data) = (key, data);
        loop {
            let mut node = self.load(st, path[level].node)?;
            if !node.is_leaf() {
                self.check_routing_neighbours(&node, entry, &key)?;
            }
            if !node.is_full() {
                if node.is_leaf() {
                    m.push(IndexEvent::RowsMoved {
                        old_node: node.id(),
                        old_entry_min: entry,
                        old_entry_max: node.count(),
                        new_node: node.id(),
                        entry_delta: 1,
                    });
                }
                node.insert_entry(entry, &key, &data);
                return node.store(&*self.streams);
            }

            let (separator, right) = self.split(st, &mut node, entry, &key, &data, m)?;
            if level == 0 {
                return self.grow_root(st, node.id(), &separator, right);
            }
            level -= 1;
            entry = path[level].entry + 1;
            key = separator;
            data = right.to_bytes().to_vec();
        }
    }

    fn check_routing_neighbours(&self, node: &IndexNode, entry: usize, key: &[u8]) -> Result<()> {
        if entry > 1 && self.compare(node.key(entry - 1), key)? == CmpOrdering::Equal {
            return Err(Error::DuplicateRoutingKey);
        }
        if entry < node.count() && self.compare(node.key(entry), key)? == CmpOrdering::Equal {
            return Err(Error::DuplicateRoutingKey);
        }
        Ok(())
    }

    /// Split a full node around its midpoint and place the pending entry.
    ///
    /// Returns the separator to post to the parent and the new right node.
    fn split(
        &self,
        st: &mut IndexHeader,
        node: &mut IndexNode,
        entry: usize,
        key: &[u8],
        data: &[u8],
        m: &mut Mutation,
    ) -> Result<(Vec<u8>, StreamId)> {
        let count = node.count();
        let split = count / 2;
        let mut right = self.new_node(st, node.node_type())?;

        let moved = node.split_off(split);
        right.extend(moved);
        // a new leaf entry at the split point starts the right node, where
        // a displaced position at that slot ends up
        let to_right = entry > split || (node.is_leaf() && entry == split);
        let placed = if !to_right {
            node.insert_entry(entry, key, data);
            EntryRef::new(node.id(), entry)
        } else {
            right.insert_entry(entry - split, key, data);
            EntryRef::new(right.id(), entry - split)
        };

        let separator = if node.is_leaf() {
            match self.copy_key(st, right.key(0)) {
                Ok(sep) => sep,
                Err(err) => {
                    if let Err(cleanup) = self.streams.deallocate(right.id()) {
                        tracing::warn!(error = %cleanup, node = %right.id(), "failed to release split node");
                    }
                    return Err(err);
                }
            }
        } else {
            let sep = right.key(0).to_vec();
            right.clear_key(0);
            sep
        };

        if node.is_leaf() {
            right.set_prior(node.id());
            right.set_next(node.next());
            if node.next().is_nil() {
                st.tail = right.id();
            } else {
                let mut next = self.load(st, node.next())?;
                next.set_prior(right.id());
                next.store(&*self.streams)?;
            }
            node.set_next(right.id());

            m.push(IndexEvent::RowsMoved {
                old_node: node.id(),
                old_entry_min: split,
                old_entry_max: count,
                new_node: right.id(),
                entry_delta: -(split as i64),
            });
            let placed_count = if placed.node == node.id() { split } else { count - split };
            m.push(IndexEvent::RowsMoved {
                old_node: placed.node,
                old_entry_min: placed.entry,
                old_entry_max: placed_count,
                new_node: placed.node,
                entry_delta: 1,
            });
        }

        right.store(&*self.streams)?;
        node.store(&*self.streams)?;
        tracing::debug!(
            node = %node.id(),
            right = %right.id(),
            split,
            leaf = node.is_leaf(),
            "node split"
        );
        Ok((separator, right.id()))
    }

    fn grow_root(
        &self,
        st: &mut IndexHeader,
        left: StreamId,
        separator: &[u8],
        right: StreamId,
    ) -> Result<()> {
        let mut root = self.new_node(st, NodeType::Routing)?;
        let sentinel = vec![0; st.key_length];
        root.insert_entry(0, &sentinel, &left.to_bytes());
        root.insert_entry(1, separator, &right.to_bytes());
        root.store(&*self.streams)?;
        st.root = root.id();
        st.height += 1;
        tracing::debug!(root = %root.id(), height = st.height, "root split");
        Ok(())
    }

    /// Remove the leaf entry at the end of `path` without disposing it.
    ///
    /// An emptied non-root leaf is unlinked and released, its routing entry
    /// removed, and a single-child root collapsed.
    fn remove_at(
        &self,
        st: &mut IndexHeader,
        path: &[PathStep],
        m: &mut Mutation,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let leaf_level = path.len() - 1;
        let step = path[leaf_level];
        let mut leaf = self.load(st, step.node)?;
        let old_count = leaf.count();
        let removed = leaf.remove_entry(step.entry);

        m.push(IndexEvent::RowDeleted {
            node: step.node,
            entry: step.entry,
        });
        if step.entry == 0 && !leaf.prior().is_nil() {
            // the gap before a leaf's first entry is kept at the end of its
            // prior leaf, where keys falling into it are inserted
            let prior_count = self.load(st, leaf.prior())?.count();
            m.push(IndexEvent::RowsMoved {
                old_node: step.node,
                old_entry_min: 0,
                old_entry_max: 0,
                new_node: leaf.prior(),
                entry_delta: prior_count as i64,
            });
        }
        m.push(IndexEvent::RowsMoved {
            old_node: step.node,
            old_entry_min: step.entry + 1,
            old_entry_max: old_count,
            new_node: step.node,
            entry_delta: -1,
        });

        if leaf.count() > 0 || leaf_level == 0 {
            leaf.store(&*self.streams)?;
            return Ok(removed);
        }

        self.unlink_leaf(st, &leaf, m)?;
        self.streams.deallocate(leaf.id())?;
        self.remove_routing_entry(st, path, leaf_level - 1, m)?;
        self.collapse_root(st)?;
        Ok(removed)
    }

    fn unlink_leaf(&self, st: &mut IndexHeader, leaf: &IndexNode, m: &mut Mutation) -> Result<()> {
        let (prior, next) = (leaf.prior(), leaf.next());
        let mut prior_count = 0;
        if prior.is_nil() {
            st.head = next;
        } else {
            let mut node = self.load(st, prior)?;
            prior_count = node.count();
            node.set_next(next);
            node.store(&*self.streams)?;
        }
        if next.is_nil() {
            st.tail = prior;
        } else {
            let mut node = self.load(st, next)?;
            node.set_prior(prior);
            node.store(&*self.streams)?;
        }

        // a displaced position in the released leaf follows its successor
        if !next.is_nil() {
            m.push(IndexEvent::RowsMoved {
                old_node: leaf.id(),
                old_entry_min: 0,
                old_entry_max: 0,
                new_node: next,
                entry_delta: 0,
            });
        } else if !prior.is_nil() {
            m.push(IndexEvent::RowsMoved {
                old_node: leaf.id(),
                old_entry_min: 0,
                old_entry_max: 0,
                new_node: prior,
                entry_delta: prior_count as i64,
            });
        }
        tracing::debug!(leaf = %leaf.id(), "empty leaf released");
        Ok(())
    }

    fn remove_routing_entry(
        &self,
        st: &mut IndexHeader,
        path: &[PathStep],
        level: usize,
        m: &mut Mutation,
    ) -> Result<()> {
        let step = path[level];
        let mut node = self.load(st, step.node)?;
        let (key, _) = node.remove_entry(step.entry);
        if step.entry == 0 {
            if node.count() > 0 {
                let promoted = node.key(0).to_vec();
                node.clear_key(0);
                self.dispose_key(&promoted, m);
            }
        } else {
            self.dispose_key(&key, m);
        }

        if node.count() > 0 {
            return node.store(&*self.streams);
        }
        self.streams.deallocate(node.id())?;
        if level == 0 {
            return self.init_root(st);
        }
        self.remove_routing_entry(st, path, level - 1, m)
    }

    fn collapse_root(&self, st: &mut IndexHeader) -> Result<()> {
        loop {
            let root = self.load(st, st.root)?;
            if root.is_leaf() || root.count() != 1 {
                return Ok(());
            }
            let child = root.child(0);
            self.streams.deallocate(root.id())?;
            st.root = child;
            st.height -= 1;
            tracing::debug!(root = %child, height = st.height, "root collapsed");
        }
    }

    /// Dispose every entry below `id` and release its nodes.
    ///
    /// Continues past failures and reports the first one.
    fn release_subtree(&self, st: &IndexHeader, id: StreamId) -> Result<()> {
        let node = self.load(st, id)?;
        let mut first_err = None;
        let mut note = |result: Result<()>| {
            if let Err(err) = result {
                tracing::warn!(error = %err, node = %id, "release failed");
                first_err.get_or_insert(err);
            }
        };
        for i in 0..node.count() {
            if node.is_leaf() {
                note(self.hooks.dispose_key(node.key(i)).map_err(Error::dispose_key));
                note(self.hooks.dispose_data(node.data(i)).map_err(Error::dispose_data));
            } else {
                if i > 0 {
                    note(self.hooks.dispose_key(node.key(i)).map_err(Error::dispose_key));
                }
                note(self.release_subtree(st, node.child(i)));
            }
        }
        note(self.streams.deallocate(id));
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Returns the `(min, max)` keys below `id`.
    fn check_subtree(
        &self,
        st: &IndexHeader,
        id: StreamId,
        depth: u32,
        is_root: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let node = self.load(st, id)?;
        if node.count() > st.max_entries(node.node_type()) {
            return Err(Error::CorruptIndexNode(id, "node over capacity".into()));
        }
        if node.is_leaf() {
            if depth != st.height {
                return Err(Error::CorruptIndexNode(id, format!("leaf at depth {depth}")));
            }
            if node.count() == 0 {
                if !is_root {
                    return Err(Error::CorruptIndexNode(id, "empty non-root leaf".into()));
                }
                return Ok(None);
            }
            return Ok(Some((node.key(0).to_vec(), node.key(node.count() - 1).to_vec())));
        }

        if node.count() == 0 || (is_root && node.count() < 2) {
            return Err(Error::CorruptIndexNode(id, "underfull routing node".into()));
        }
        let mut bounds: Option<(Vec<u8>, Vec<u8>)> = None;
        for i in 0..node.count() {
            let Some((min, max)) = self.check_subtree(st, node.child(i), depth + 1, false)? else {
                continue;
            };
            if i > 0 {
                if self.compare(node.key(i), &min)? == CmpOrdering::Greater {
                    return Err(Error::CorruptIndexNode(id, format!("separator {i} above its subtree")));
                }
                if let Some((_, prev_max)) = &bounds {
                    if self.compare(node.key(i), prev_max)? != CmpOrdering::Greater {
                        return Err(Error::CorruptIndexNode(id, format!("separator {i} below left subtree")));
                    }
                }
            }
            bounds = Some(match bounds {
                Some((lo, _)) => (lo, max),
                None => (min, max),
            });
        }
        Ok(bounds)
    }
}

impl fmt::Debug for BTreeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTreeIndex")
            .field("header_id", &self.header_id)
            .field("header", &*self.state.read())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::hooks::IntegerKeyHooks;
    use crate::storage::MemoryStreamManager;

    fn create_index(fanout: usize, capacity: usize) -> (Arc<MemoryStreamManager>, BTreeIndex) {
        let streams = Arc::new(MemoryStreamManager::new());
        let index = BTreeIndex::create(
            streams.clone(),
            Arc::new(IntegerKeyHooks),
            8,
            8,
            IndexConfig::new(fanout, capacity).unwrap(),
        )
        .unwrap();
        (streams, index)
    }

    fn keys(index: &BTreeIndex) -> Vec<i64> {
        index
            .entries()
            .unwrap()
            .iter()
            .map(|(k, _)| IntegerKeyHooks::decode(k).unwrap())
            .collect()
    }

    fn k(v: i64) -> [u8; 8] {
        IntegerKeyHooks::key(v)
    }

    #[test]
    fn test_create_empty() {
        let (_, index) = create_index(3, 2);
        assert_eq!(index.height(), 1);
        assert_eq!(index.head(), index.root());
        assert_eq!(index.tail(), index.root());
        assert_eq!(index.count().unwrap(), 0);
        assert!(!index.find_key(&k(1)).unwrap().found);
        index.validate().unwrap();
    }

    #[test]
    fn test_leaf_split_updates_head_and_tail() {
        let (_, index) = create_index(3, 2);
        index.insert(&k(1), &k(10)).unwrap();
        index.insert(&k(2), &k(20)).unwrap();
        let head = index.head();
        index.insert(&k(3), &k(30)).unwrap();

        assert_eq!(index.height(), 2);
        assert_eq!(index.head(), head);
        assert_ne!(index.tail(), head);
        assert_eq!(keys(&index), vec![1, 2, 3]);
        index.validate().unwrap();
    }

    #[test]
    fn test_duplicate_key() {
        let (_, index) = create_index(3, 2);
        index.insert(&k(1), &k(0)).unwrap();
        assert!(matches!(index.insert(&k(1), &k(0)), Err(Error::DuplicateKey)));
    }

    #[test]
    fn test_delete_missing_key() {
        let (_, index) = create_index(3, 2);
        assert!(matches!(index.delete(&k(4)), Err(Error::KeyNotFound)));
    }

    #[test]
    fn test_delete_releases_empty_leaves_and_collapses() {
        let (streams, index) = create_index(3, 2);
        for v in 0..20 {
            index.insert(&k(v), &k(v)).unwrap();
        }
        assert!(index.height() > 2);
        for v in 0..20 {
            index.delete(&k(v)).unwrap();
            index.validate().unwrap();
        }
        assert_eq!(index.height(), 1);
        assert_eq!(index.count().unwrap(), 0);
        // header stream + root leaf
        assert_eq!(streams.len(), 2);
    }

    #[test]
    fn test_update_in_place_and_move() {
        let (_, index) = create_index(3, 2);
        for v in [1, 2, 3] {
            index.insert(&k(v), &k(v * 10)).unwrap();
        }

        index.update(&k(2), &k(2), Some(&k(99))).unwrap();
        let found = index.find_key(&k(2)).unwrap();
        let (_, data) = index.entry(EntryRef::new(found.leaf(), found.entry)).unwrap();
        assert_eq!(data, k(99).to_vec());

        index.update(&k(1), &k(7), None).unwrap();
        assert_eq!(keys(&index), vec![2, 3, 7]);
        let found = index.find_key(&k(7)).unwrap();
        let (_, data) = index.entry(EntryRef::new(found.leaf(), found.entry)).unwrap();
        assert_eq!(data, k(10).to_vec());

        assert!(matches!(index.update(&k(2), &k(3), None), Err(Error::DuplicateKey)));
        assert!(matches!(index.update(&k(5), &k(6), None), Err(Error::KeyNotFound)));
    }

    #[test]
    fn test_seek_first_and_last() {
        let (_, index) = create_index(3, 2);
        for v in [10, 20, 30, 40, 50] {
            index.insert(&k(v), &k(v)).unwrap();
        }
        let at = |r: Option<EntryRef>| {
            r.map(|r| IntegerKeyHooks::decode(&index.entry(r).unwrap().0).unwrap())
        };
        assert_eq!(at(index.seek_first(&k(25)).unwrap()), Some(30));
        assert_eq!(at(index.seek_first(&k(30)).unwrap()), Some(30));
        assert_eq!(at(index.seek_first(&k(51)).unwrap()), None);
        assert_eq!(at(index.seek_last(&k(25)).unwrap()), Some(20));
        assert_eq!(at(index.seek_last(&k(5)).unwrap()), None);
        assert_eq!(at(index.first_entry().unwrap()), Some(10));
        assert_eq!(at(index.last_entry().unwrap()), Some(50));
    }

    #[test]
    fn test_truncate_resets() {
        let (streams, index) = create_index(3, 2);
        for v in 0..10 {
            index.insert(&k(v), &k(v)).unwrap();
        }
        index.truncate().unwrap();
        assert_eq!(index.count().unwrap(), 0);
        assert_eq!(index.height(), 1);
        assert_eq!(streams.len(), 2);
        index.insert(&k(1), &k(1)).unwrap();
        assert_eq!(keys(&index), vec![1]);
    }

    #[test]
    fn test_open_reattaches() {
        let (streams, index) = create_index(4, 3);
        for v in 0..10 {
            index.insert(&k(v), &k(v)).unwrap();
        }
        let header_id = index.header_id();
        let header = index.header();
        drop(index);

        let reopened = BTreeIndex::open(streams, Arc::new(IntegerKeyHooks), header_id).unwrap();
        assert_eq!(reopened.header(), header);
        assert_eq!(keys(&reopened), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (streams, index) = create_index(3, 2);
        for v in 0..10 {
            index.insert(&k(v), &k(v)).unwrap();
        }
        index.destroy().unwrap();
        assert!(streams.is_empty());
    }

    #[test]
    fn test_wrong_key_length() {
        let (_, index) = create_index(3, 2);
        assert!(matches!(
            index.insert(&[1, 2], &k(0)),
            Err(Error::InvalidPhysicalFormat(_))
        ));
    }

    #[test]
    fn test_generation_advances() {
        let (_, index) = create_index(3, 2);
        let before = index.generation();
        index.insert(&k(1), &k(1)).unwrap();
        assert!(index.generation() > before);
    }
}
