//! A row store over one clustered and several secondary B+Tree indexes.
//!
//! # Entry layout
//! ```text
//! clustered:  key = clustering key columns (or row id)   data = other columns + row id
//! secondary:  key = index columns [+ row id if non-unique] data = clustering key
//! ```
//!
//! Every logical row has exactly one entry in every index. The row id is
//! generated on insert and stored with the clustered entry, so the
//! tie-breaker of a non-unique secondary key can be rebuilt from the stored
//! row on update and delete.
//!
//! # Failure
//! Duplicate keys are detected before any index is touched. If an index
//! write still fails part way, the writes already applied for that operation
//! are compensated in reverse order before the error is returned.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::common::{Error, IndexConfig, Result};
use crate::index::btree::{BTreeIndex, EntryRef};
use crate::storage::StreamManager;
use crate::table::definition::{IndexDefinition, SlotSource, TableDefinition};
use crate::table::record::{decode_slot, Record, SLOT_SIZE};
use crate::table::row_hooks::{KeySlot, RowIndexHooks};
use crate::types::{Column, DataType, Order, OrderColumn, Row, RowType, ScalarKind, Value};

/// Name of the generated row id column in bookmarks of keyless tables.
pub const ROW_ID_COLUMN: &str = "#row_id";

/// One physical index of a [`MultiIndexTable`].
pub struct TableIndex {
    definition: IndexDefinition,
    key_kinds: Vec<ScalarKind>,
    data_kinds: Vec<ScalarKind>,
    key_type: Arc<RowType>,
    btree: BTreeIndex,
}

impl TableIndex {
    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    pub fn btree(&self) -> &BTreeIndex {
        &self.btree
    }

    pub fn order(&self) -> &Order {
        &self.definition.order
    }

    /// Row type of the visible key columns.
    pub fn key_type(&self) -> &Arc<RowType> {
        &self.key_type
    }
}

/// A row as stored: all columns plus its generated id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub row: Row,
    pub row_id: i64,
}

/// A logical table kept consistent across all of its indexes.
pub struct MultiIndexTable {
    definition: TableDefinition,
    streams: Arc<dyn StreamManager>,
    indexes: Vec<TableIndex>,
    next_row_id: AtomicI64,
    bookmark_type: Arc<RowType>,
}

impl MultiIndexTable {
    /// Create the table's indexes.
    pub fn create(
        streams: Arc<dyn StreamManager>,
        definition: TableDefinition,
        config: IndexConfig,
    ) -> Result<Self> {
        let row_type = Arc::clone(definition.row_type());
        let mut indexes: Vec<TableIndex> = Vec::new();
        for index_def in definition.derive_indexes()? {
            match Self::create_index(&streams, &row_type, index_def, config) {
                Ok(index) => indexes.push(index),
                Err(err) => {
                    for index in indexes {
                        if let Err(cleanup) = index.btree.destroy() {
                            tracing::warn!(error = %cleanup, "failed to release partially created table");
                        }
                    }
                    return Err(err);
                }
            }
        }

        let bookmark_type = if definition.is_keyless() {
            Arc::new(RowType::new(vec![Column::new(ROW_ID_COLUMN, DataType::integer())]))
        } else {
            Arc::clone(&indexes[0].key_type)
        };
        tracing::debug!(
            table = definition.name(),
            indexes = indexes.len(),
            "table created"
        );
        Ok(Self {
            definition,
            streams,
            indexes,
            next_row_id: AtomicI64::new(0),
            bookmark_type,
        })
    }

    fn create_index(
        streams: &Arc<dyn StreamManager>,
        row_type: &Arc<RowType>,
        definition: IndexDefinition,
        config: IndexConfig,
    ) -> Result<TableIndex> {
        let kind_of = |source: &SlotSource| match source {
            SlotSource::Column(i) => row_type.column(*i).data_type.kind(),
            SlotSource::RowId => ScalarKind::Integer,
        };
        let key_slots: Vec<KeySlot> = definition
            .key
            .iter()
            .map(|source| KeySlot {
                kind: kind_of(source),
                order: match source {
                    SlotSource::Column(i) => {
                        let name = &row_type.column(*i).name;
                        definition
                            .order
                            .columns()
                            .iter()
                            .find(|c| &c.column == name)
                            .cloned()
                            .unwrap_or_else(|| OrderColumn::asc(name.as_str()))
                    }
                    SlotSource::RowId => OrderColumn::asc(ROW_ID_COLUMN),
                },
            })
            .collect();
        let key_kinds: Vec<ScalarKind> = key_slots.iter().map(|s| s.kind).collect();
        let data_kinds: Vec<ScalarKind> = definition.data.iter().map(kind_of).collect();
        let key_type = Arc::new(RowType::new(
            definition
                .key
                .iter()
                .filter_map(|source| match source {
                    SlotSource::Column(i) => Some(row_type.column(*i).clone()),
                    SlotSource::RowId => None,
                })
                .collect(),
        ));

        let hooks = Arc::new(RowIndexHooks::new(
            Arc::clone(streams),
            key_slots,
            data_kinds.clone(),
        ));
        let btree = BTreeIndex::create(
            Arc::clone(streams),
            hooks.clone(),
            hooks.key_length(),
            hooks.data_length(),
            config,
        )?;
        Ok(TableIndex {
            definition,
            key_kinds,
            data_kinds,
            key_type,
            btree,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn row_type(&self) -> &Arc<RowType> {
        self.definition.row_type()
    }

    pub fn streams(&self) -> &Arc<dyn StreamManager> {
        &self.streams
    }

    /// Row type of bookmarks: the clustering key, or the row id column.
    pub fn bookmark_type(&self) -> &Arc<RowType> {
        &self.bookmark_type
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// The index at `ordinal`; `0` is the clustered index.
    pub fn index(&self, ordinal: usize) -> &TableIndex {
        &self.indexes[ordinal]
    }

    pub fn clustered(&self) -> &TableIndex {
        &self.indexes[0]
    }

    /// First index whose order begins with `order`; an empty order selects
    /// the clustered index.
    pub fn index_for(&self, order: &Order) -> Option<usize> {
        if order.is_empty() {
            return Some(0);
        }
        self.indexes.iter().position(|ix| ix.order().starts_with(order))
    }

    /// Number of rows.
    pub fn count(&self) -> Result<usize> {
        self.clustered().btree.count()
    }

    /// Every row in clustering order.
    pub fn rows(&self) -> Result<Vec<Row>> {
        let index = self.clustered();
        let mut rows = Vec::new();
        let mut at = index.btree.first_entry()?;
        while let Some(entry) = at {
            rows.push(self.stored_at(entry)?.row);
            at = index.btree.next_entry(entry)?;
        }
        Ok(rows)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert a row into every index.
    ///
    /// # Errors
    /// Returns `Error::DuplicateKey` if any unique index already holds the
    /// row's key; no index is modified in that case.
    pub fn insert(&self, row: &Row) -> Result<()> {
        let row = self.conform(row)?;
        for (i, index) in self.indexes.iter().enumerate() {
            if index.definition.unique && !index.definition.key.contains(&SlotSource::RowId) {
                let key = self.encode_key(i, &row, 0)?;
                if index.btree.find_key(key.as_bytes())?.found {
                    return Err(Error::DuplicateKey);
                }
            }
        }

        let row_id = self.next_row_id.fetch_add(1, Ordering::AcqRel) + 1;
        let mut applied = Vec::with_capacity(self.indexes.len());
        for i in 0..self.indexes.len() {
            if let Err(err) = self.insert_entry(i, &row, row_id) {
                for &j in applied.iter().rev() {
                    self.compensate("insert", self.delete_entry(j, &row, row_id));
                }
                return Err(err);
            }
            applied.push(i);
        }
        Ok(())
    }

    /// Replace `old` with `new`, touching only the indexes whose key or data
    /// columns changed.
    ///
    /// # Errors
    /// Returns `Error::KeyNotFound` if `old` is not in the table and
    /// `Error::DuplicateKey` if `new` collides with another row.
    pub fn update(&self, old: &Row, new: &Row) -> Result<()> {
        let stored = self.locate_row(old)?.ok_or(Error::KeyNotFound)?;
        let new_row = self.conform(new)?;
        let changed: Vec<usize> = (0..self.row_type().len())
            .filter(|&i| stored.row.get(i) != new_row.get(i))
            .collect();
        if changed.is_empty() {
            return Ok(());
        }

        let touches = |sources: &[SlotSource]| {
            sources
                .iter()
                .any(|s| matches!(s, SlotSource::Column(c) if changed.contains(c)))
        };
        let plans: Vec<(usize, bool, bool)> = self
            .indexes
            .iter()
            .enumerate()
            .map(|(i, ix)| (i, touches(&ix.definition.key), touches(&ix.definition.data)))
            .filter(|&(_, key, data)| key || data)
            .collect();

        for &(i, key_changed, _) in &plans {
            let index = &self.indexes[i];
            if !key_changed || !index.definition.unique {
                continue;
            }
            let old_key = self.encode_key(i, &stored.row, stored.row_id)?;
            let new_key = self.encode_key(i, &new_row, stored.row_id)?;
            let same = index.btree.hooks().compare(old_key.as_bytes(), new_key.as_bytes())?
                == std::cmp::Ordering::Equal;
            if !same && index.btree.find_key(new_key.as_bytes())?.found {
                return Err(Error::DuplicateKey);
            }
        }

        let mut applied: Vec<(usize, bool, bool)> = Vec::with_capacity(plans.len());
        for &(i, key_changed, data_changed) in &plans {
            let result =
                self.update_entry(i, &stored.row, &new_row, stored.row_id, key_changed, data_changed);
            if let Err(err) = result {
                for &(j, key_changed, data_changed) in applied.iter().rev() {
                    self.compensate(
                        "update",
                        self.update_entry(j, &new_row, &stored.row, stored.row_id, key_changed, data_changed),
                    );
                }
                return Err(err);
            }
            applied.push((i, key_changed, data_changed));
        }
        Ok(())
    }

    /// Remove a row from every index.
    ///
    /// `row` only needs the clustering key columns (or the row id column of
    /// a keyless table); the stored row supplies everything else.
    ///
    /// # Errors
    /// Returns `Error::KeyNotFound` if the row is not in the table.
    pub fn delete(&self, row: &Row) -> Result<()> {
        let stored = self.locate_row(row)?.ok_or(Error::KeyNotFound)?;
        let mut removed = Vec::with_capacity(self.indexes.len());
        for i in (0..self.indexes.len()).rev() {
            if let Err(err) = self.delete_entry(i, &stored.row, stored.row_id) {
                for &j in removed.iter().rev() {
                    self.compensate("delete", self.insert_entry(j, &stored.row, stored.row_id));
                }
                return Err(err);
            }
            removed.push(i);
        }
        Ok(())
    }

    /// Whether the row's clustering key is present.
    pub fn has_row(&self, row: &Row) -> Result<bool> {
        Ok(self.locate_row(row)?.is_some())
    }

    /// The stored row with the clustering key of `key`.
    pub fn find_row(&self, key: &Row) -> Result<Option<Row>> {
        Ok(self.locate_row(key)?.map(|stored| stored.row))
    }

    /// Remove every row from every index.
    pub fn truncate(&self) -> Result<()> {
        let mut first_err = None;
        for index in &self.indexes {
            if let Err(err) = index.btree.truncate() {
                tracing::warn!(error = %err, index = %index.definition, "truncate failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Release every index and the streams its entries refer to.
    pub fn dispose(self) -> Result<()> {
        let mut first_err = None;
        for index in self.indexes {
            if let Err(err) = index.btree.destroy() {
                tracing::warn!(error = %err, table = self.definition.name(), "dispose failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // ========================================================================
    // Row access
    // ========================================================================

    /// Find the stored row for `row`.
    ///
    /// Keyed tables look up the clustering key. Keyless tables use the row
    /// id column when `row` carries one, otherwise the first row equal on
    /// every column `row` shares with the table.
    pub fn locate_row(&self, row: &Row) -> Result<Option<StoredRow>> {
        let clustered = self.clustered();
        if self.definition.is_keyless() {
            if let Some(Value::Integer(id)) = row.row_type().index_of(ROW_ID_COLUMN).and_then(|i| row.get(i)) {
                let id = Value::Integer(*id);
                let probe = Record::encode(&self.streams, &[ScalarKind::Integer], &[Some(&id)])?;
                return self.lookup(probe.as_bytes());
            }
            let mut at = clustered.btree.first_entry()?;
            while let Some(entry) = at {
                let stored = self.stored_at(entry)?;
                let matches = row.row_type().columns().iter().enumerate().all(|(i, column)| {
                    self.row_type()
                        .index_of(&column.name)
                        .map_or(true, |j| row.get(i) == stored.row.get(j))
                });
                if matches {
                    return Ok(Some(stored));
                }
                at = clustered.btree.next_entry(entry)?;
            }
            return Ok(None);
        }

        let mut values = Vec::with_capacity(clustered.key_kinds.len());
        for source in &clustered.definition.key {
            let SlotSource::Column(c) = source else {
                continue;
            };
            let name = &self.row_type().column(*c).name;
            let index = row
                .row_type()
                .index_of(name)
                .ok_or_else(|| Error::UnableToConstructIndexKey(name.clone()))?;
            values.push(row.get(index));
        }
        let probe = Record::encode(&self.streams, &clustered.key_kinds, &values)?;
        self.lookup(probe.as_bytes())
    }

    fn lookup(&self, probe: &[u8]) -> Result<Option<StoredRow>> {
        let found = self.clustered().btree.find_key(probe)?;
        if !found.found {
            return Ok(None);
        }
        self.stored_at(EntryRef::new(found.leaf(), found.entry)).map(Some)
    }

    /// Decode the clustered entry at `at`.
    pub fn stored_at(&self, at: EntryRef) -> Result<StoredRow> {
        let (key, data) = self.clustered().btree.entry(at)?;
        let mut row = Row::new(Arc::clone(self.row_type()));
        let row_id = self.decode_into(0, &key, &data, &mut row)?;
        let row_id = row_id.ok_or_else(|| {
            Error::CorruptIndexNode(at.node, "clustered entry without row id".into())
        })?;
        Ok(StoredRow { row, row_id })
    }

    /// The row at `at` in index `ordinal`.
    ///
    /// Served from the entry itself when the index covers every column of
    /// `wanted`; otherwise resolved through the clustered index.
    pub fn read_row(&self, ordinal: usize, at: EntryRef, wanted: &RowType) -> Result<StoredRow> {
        if ordinal == 0 {
            return self.stored_at(at);
        }
        let index = &self.indexes[ordinal];
        let (key, data) = index.btree.entry(at)?;
        let covered = wanted.columns().iter().all(|column| {
            self.row_type()
                .index_of(&column.name)
                .map_or(true, |c| index.definition.covers(c))
        });
        if covered {
            let mut row = Row::new(Arc::clone(self.row_type()));
            let row_id = self.decode_into(ordinal, &key, &data, &mut row)?;
            if let Some(row_id) = row_id {
                return Ok(StoredRow { row, row_id });
            }
        }
        self.lookup(&data)?.ok_or_else(|| {
            Error::CorruptIndexNode(at.node, format!("entry {} has no clustered row", at.entry))
        })
    }

    /// Visible key columns of the entry at `at`.
    pub fn key_at(&self, ordinal: usize, at: EntryRef) -> Result<Row> {
        let index = &self.indexes[ordinal];
        let (key, _) = index.btree.entry(at)?;
        let mut row = Row::new(Arc::clone(&index.key_type));
        let mut column = 0;
        for (slot, (source, kind)) in index.definition.key.iter().zip(&index.key_kinds).enumerate() {
            if let SlotSource::Column(_) = source {
                let offset = slot * SLOT_SIZE;
                row.set(column, decode_slot(&*self.streams, *kind, &key[offset..offset + SLOT_SIZE])?);
                column += 1;
            }
        }
        Ok(row)
    }

    /// Bookmark row for a stored row.
    pub fn bookmark_of(&self, stored: &StoredRow) -> Row {
        if self.definition.is_keyless() {
            let mut bookmark = Row::new(Arc::clone(&self.bookmark_type));
            bookmark.set(0, Some(Value::Integer(stored.row_id)));
            return bookmark;
        }
        stored.row.project(Arc::clone(&self.bookmark_type))
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// Full key of `row` in index `ordinal`.
    pub(crate) fn encode_key(&self, ordinal: usize, row: &Row, row_id: i64) -> Result<Record> {
        let index = &self.indexes[ordinal];
        self.encode_slots(&index.definition.key, &index.key_kinds, row, row_id)
    }

    fn encode_data(&self, ordinal: usize, row: &Row, row_id: i64) -> Result<Record> {
        let index = &self.indexes[ordinal];
        self.encode_slots(&index.definition.data, &index.data_kinds, row, row_id)
    }

    fn encode_slots(
        &self,
        sources: &[SlotSource],
        kinds: &[ScalarKind],
        row: &Row,
        row_id: i64,
    ) -> Result<Record> {
        let id = Value::Integer(row_id);
        let values: Vec<Option<&Value>> = sources
            .iter()
            .map(|source| match source {
                SlotSource::Column(c) => row.get(*c),
                SlotSource::RowId => Some(&id),
            })
            .collect();
        Record::encode(&self.streams, kinds, &values)
    }

    /// Probe for index `ordinal` from the leading key columns `key` carries.
    ///
    /// Encoding stops at the first key column `key` does not have, giving a
    /// partial key.
    pub fn encode_probe(&self, ordinal: usize, key: &Row) -> Result<Record> {
        let index = &self.indexes[ordinal];
        let mut kinds = Vec::new();
        let mut values = Vec::new();
        for (source, kind) in index.definition.key.iter().zip(&index.key_kinds) {
            let name = match source {
                SlotSource::Column(c) => self.row_type().column(*c).name.as_str(),
                SlotSource::RowId => ROW_ID_COLUMN,
            };
            let Some(i) = key.row_type().index_of(name) else {
                break;
            };
            kinds.push(*kind);
            values.push(key.get(i));
        }
        Record::encode(&self.streams, &kinds, &values)
    }

    fn decode_into(&self, ordinal: usize, key: &[u8], data: &[u8], row: &mut Row) -> Result<Option<i64>> {
        let index = &self.indexes[ordinal];
        let mut row_id = None;
        let slots = index
            .definition
            .key
            .iter()
            .zip(&index.key_kinds)
            .enumerate()
            .map(|(i, s)| (s, &key[i * SLOT_SIZE..(i + 1) * SLOT_SIZE]))
            .chain(
                index
                    .definition
                    .data
                    .iter()
                    .zip(&index.data_kinds)
                    .enumerate()
                    .map(|(i, s)| (s, &data[i * SLOT_SIZE..(i + 1) * SLOT_SIZE])),
            );
        for ((source, kind), slot) in slots {
            let value = decode_slot(&*self.streams, *kind, slot)?;
            match source {
                SlotSource::Column(c) => row.set(*c, value),
                SlotSource::RowId => row_id = value.and_then(|v| v.as_integer()),
            }
        }
        Ok(row_id)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// `row` reshaped to the table's row type with deferred values expanded.
    fn conform(&self, row: &Row) -> Result<Row> {
        let mut row = if Arc::ptr_eq(row.row_type(), self.row_type()) || **row.row_type() == **self.row_type() {
            row.clone()
        } else {
            row.project(Arc::clone(self.row_type()))
        };
        if !row.expanded_streams() {
            row.expand_streams(&*self.streams)?;
        }
        Ok(row)
    }

    fn insert_entry(&self, ordinal: usize, row: &Row, row_id: i64) -> Result<()> {
        let key = self.encode_key(ordinal, row, row_id)?;
        let data = self.encode_data(ordinal, row, row_id)?;
        self.indexes[ordinal].btree.insert(key.as_bytes(), data.as_bytes())
    }

    fn delete_entry(&self, ordinal: usize, row: &Row, row_id: i64) -> Result<()> {
        let key = self.encode_key(ordinal, row, row_id)?;
        self.indexes[ordinal].btree.delete(key.as_bytes())
    }

    fn update_entry(
        &self,
        ordinal: usize,
        from: &Row,
        to: &Row,
        row_id: i64,
        key_changed: bool,
        data_changed: bool,
    ) -> Result<()> {
        let btree = &self.indexes[ordinal].btree;
        let old_key = self.encode_key(ordinal, from, row_id)?;
        if key_changed {
            let new_key = self.encode_key(ordinal, to, row_id)?;
            let new_data = data_changed
                .then(|| self.encode_data(ordinal, to, row_id))
                .transpose()?;
            btree.update(
                old_key.as_bytes(),
                new_key.as_bytes(),
                new_data.as_ref().map(Record::as_bytes),
            )
        } else {
            let data = self.encode_data(ordinal, to, row_id)?;
            btree.update_data(old_key.as_bytes(), data.as_bytes())
        }
    }

    fn compensate(&self, operation: &str, result: Result<()>) {
        if let Err(err) = result {
            tracing::warn!(
                error = %err,
                table = self.definition.name(),
                operation,
                "failed to compensate partial index write"
            );
        }
    }
}

impl fmt::Debug for MultiIndexTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiIndexTable")
            .field("name", &self.definition.name())
            .field(
                "indexes",
                &self.indexes.iter().map(|ix| ix.definition.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
