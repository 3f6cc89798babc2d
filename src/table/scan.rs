//! Positioned, self-correcting cursors over one index of a table.
//!
//! A [`Scan`] remembers its position as a leaf `(node, entry)` pair. While
//! open it is registered with its index as an [`IndexObserver`], so when a
//! write (through any cursor on the same table) moves or deletes the entry
//! it sits on, the saved position follows the entry or is marked displaced.
//!
//! A displaced position names the gap the deleted entry left, as a slot
//! that may lie one past the end of its leaf. The next step forward lands
//! on the first entry after the gap, including one inserted into it since,
//! and the next step back on the entry before it.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Error, Result};
use crate::index::btree::{BTreeIndex, EntryRef, IndexEvent, IndexObserver, ObserverId};
use crate::table::multi_index::{MultiIndexTable, StoredRow};
use crate::table::record::Record;
use crate::types::Row;

/// Logical traversal direction relative to the index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDirection {
    #[default]
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    at: Option<EntryRef>,
    bof: bool,
    eof: bool,
    displaced: bool,
}

impl Position {
    const BOF: Position = Position {
        at: None,
        bof: true,
        eof: false,
        displaced: false,
    };

    const EOF: Position = Position {
        at: None,
        bof: false,
        eof: true,
        displaced: false,
    };

    fn on(at: EntryRef) -> Self {
        Self {
            at: Some(at),
            bof: false,
            eof: false,
            displaced: false,
        }
    }
}

/// Index observer holding a scan's saved position.
struct Tracker {
    position: Mutex<Position>,
}

impl IndexObserver for Tracker {
    fn on_event(&self, event: &IndexEvent) {
        let mut position = self.position.lock();
        match *event {
            IndexEvent::RowsMoved {
                old_node,
                old_entry_min,
                new_node,
                entry_delta,
                ..
            } => {
                if let Some(at) = position.at {
                    // an entry inserted into a displaced slot fills the gap
                    let filled = position.displaced
                        && old_node == new_node
                        && entry_delta > 0
                        && old_node == at.node
                        && old_entry_min == at.entry;
                    if filled {
                        return;
                    }
                    if let Some((node, entry)) = event.moved_position(at.node, at.entry) {
                        position.at = Some(EntryRef::new(node, entry));
                    }
                }
            }
            IndexEvent::RowDeleted { node, entry } => {
                if position.at == Some(EntryRef::new(node, entry)) {
                    position.displaced = true;
                }
            }
            IndexEvent::Reset => *position = Position::BOF,
        }
    }
}

/// A bidirectional, optionally bounded cursor over one table index.
///
/// Bounds are given in scan order: `first_key` is where a forward scan
/// starts and a backward scan stops. Either may be a partial key.
pub struct Scan {
    table: Arc<MultiIndexTable>,
    ordinal: usize,
    direction: ScanDirection,
    first_key: Option<Row>,
    last_key: Option<Row>,
    lower: Option<Record>,
    upper: Option<Record>,
    tracker: Arc<Tracker>,
    registration: Option<ObserverId>,
}

impl Scan {
    /// A scan over index `ordinal` of `table`.
    pub fn new(table: Arc<MultiIndexTable>, ordinal: usize, direction: ScanDirection) -> Self {
        Self {
            table,
            ordinal,
            direction,
            first_key: None,
            last_key: None,
            lower: None,
            upper: None,
            tracker: Arc::new(Tracker {
                position: Mutex::new(Position::BOF),
            }),
            registration: None,
        }
    }

    /// Restrict the scan to keys between `first_key` and `last_key`.
    pub fn with_bounds(mut self, first_key: Option<Row>, last_key: Option<Row>) -> Self {
        self.first_key = first_key;
        self.last_key = last_key;
        self
    }

    #[inline]
    pub fn table(&self) -> &Arc<MultiIndexTable> {
        &self.table
    }

    #[inline]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    #[inline]
    pub fn direction(&self) -> ScanDirection {
        self.direction
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.registration.is_some()
    }

    fn btree(&self) -> &BTreeIndex {
        self.table.index(self.ordinal).btree()
    }

    fn check_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::ScanInactive)
        }
    }

    fn position(&self) -> Position {
        *self.tracker.position.lock()
    }

    fn set_position(&self, position: Position) {
        *self.tracker.position.lock() = position;
    }

    fn forward(&self) -> bool {
        self.direction == ScanDirection::Forward
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start observing the index and move to BOF. Opening twice is a no-op.
    pub fn open(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        let first = self
            .first_key
            .as_ref()
            .map(|key| self.table.encode_probe(self.ordinal, key))
            .transpose()?;
        let last = self
            .last_key
            .as_ref()
            .map(|key| self.table.encode_probe(self.ordinal, key))
            .transpose()?;
        (self.lower, self.upper) = if self.forward() { (first, last) } else { (last, first) };

        self.set_position(Position::BOF);
        let observer: Arc<dyn IndexObserver> = self.tracker.clone();
        self.registration = Some(self.btree().observe(&observer));
        Ok(())
    }

    /// Stop observing the index. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(id) = self.registration.take() {
            self.btree().unobserve(id);
        }
        self.lower = None;
        self.upper = None;
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    pub fn bof(&self) -> bool {
        self.position().bof
    }

    pub fn eof(&self) -> bool {
        self.position().eof
    }

    /// Move before the first row.
    pub fn first(&mut self) -> Result<()> {
        self.check_active()?;
        self.set_position(Position::BOF);
        Ok(())
    }

    /// Move after the last row.
    pub fn last(&mut self) -> Result<()> {
        self.check_active()?;
        self.set_position(Position::EOF);
        Ok(())
    }

    /// Advance one row. Returns `false` (and sets EOF) past the last row.
    pub fn next(&mut self) -> Result<bool> {
        self.check_active()?;
        let position = self.position();
        if position.eof {
            return Ok(false);
        }
        let candidate = match position.at {
            Some(at) if !position.bof => self.step(at, position.displaced, true)?,
            _ => self.boundary(true)?,
        };
        match candidate {
            Some(at) if self.in_bounds(at)? => {
                self.set_position(Position::on(at));
                Ok(true)
            }
            _ => {
                let empty = position.bof;
                self.set_position(Position { bof: empty, ..Position::EOF });
                Ok(false)
            }
        }
    }

    /// Retreat one row. Returns `false` (and sets BOF) before the first row.
    pub fn prior(&mut self) -> Result<bool> {
        self.check_active()?;
        let position = self.position();
        if position.bof {
            return Ok(false);
        }
        let candidate = match position.at {
            Some(at) if !position.eof => self.step(at, position.displaced, false)?,
            _ => self.boundary(false)?,
        };
        match candidate {
            Some(at) if self.in_bounds(at)? => {
                self.set_position(Position::on(at));
                Ok(true)
            }
            _ => {
                let empty = position.eof;
                self.set_position(Position { eof: empty, ..Position::BOF });
                Ok(false)
            }
        }
    }

    /// The neighbouring entry in scan order.
    fn step(&self, at: EntryRef, displaced: bool, ahead: bool) -> Result<Option<EntryRef>> {
        let btree = self.btree();
        if ahead == self.forward() {
            if displaced {
                btree.normalize(at)
            } else {
                btree.next_entry(at)
            }
        } else {
            btree.prior_entry(at)
        }
    }

    /// The first (`start`) or last entry in scan order, honoring bounds.
    fn boundary(&self, start: bool) -> Result<Option<EntryRef>> {
        let btree = self.btree();
        if start == self.forward() {
            match &self.lower {
                Some(lower) => btree.seek_first(lower.as_bytes()),
                None => btree.first_entry(),
            }
        } else {
            match &self.upper {
                Some(upper) => btree.seek_last(upper.as_bytes()),
                None => btree.last_entry(),
            }
        }
    }

    fn in_bounds(&self, at: EntryRef) -> Result<bool> {
        let btree = self.btree();
        if let Some(lower) = &self.lower {
            if btree.compare_at(at, lower.as_bytes())? == CmpOrdering::Less {
                return Ok(false);
            }
        }
        if let Some(upper) = &self.upper {
            if btree.compare_at(at, upper.as_bytes())? == CmpOrdering::Greater {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn current(&self) -> Result<EntryRef> {
        self.check_active()?;
        let position = self.position();
        match position.at {
            Some(at) if !position.bof && !position.eof && !position.displaced => Ok(at),
            _ => Err(Error::NoActiveRow),
        }
    }

    // ========================================================================
    // Rows and keys
    // ========================================================================

    /// The current row as stored.
    pub fn row(&self) -> Result<StoredRow> {
        let at = self.current()?;
        self.table.read_row(self.ordinal, at, self.table.row_type())
    }

    /// Copy the current row into `row` by column name.
    ///
    /// Columns outside this index are fetched through the clustered index
    /// only when `row` asks for them.
    pub fn get_row(&self, row: &mut Row) -> Result<()> {
        let at = self.current()?;
        let stored = self.table.read_row(self.ordinal, at, row.row_type())?;
        stored.row.copy_to(row);
        Ok(())
    }

    /// Visible key columns of the current entry.
    pub fn get_key(&self) -> Result<Row> {
        let at = self.current()?;
        self.table.key_at(self.ordinal, at)
    }

    /// Position on the first entry matching the (possibly partial) `key`.
    ///
    /// Returns `false` without moving if there is none within bounds.
    pub fn find_key(&mut self, key: &Row) -> Result<bool> {
        self.check_active()?;
        let probe = self.table.encode_probe(self.ordinal, key)?;
        let btree = self.btree();
        let found = if self.forward() {
            btree.seek_first(probe.as_bytes())?
        } else {
            btree.seek_last(probe.as_bytes())?
        };
        let Some(at) = found else {
            return Ok(false);
        };
        if btree.compare_at(at, probe.as_bytes())? != CmpOrdering::Equal || !self.in_bounds(at)? {
            return Ok(false);
        }
        self.set_position(Position::on(at));
        Ok(true)
    }

    /// Position on the first entry at or after `key` in scan order.
    ///
    /// Returns whether a row is current; otherwise the scan is at EOF.
    pub fn find_nearest(&mut self, key: &Row) -> Result<bool> {
        self.check_active()?;
        let probe = self.table.encode_probe(self.ordinal, key)?;
        let btree = self.btree();
        let mut found = if self.forward() {
            btree.seek_first(probe.as_bytes())?
        } else {
            btree.seek_last(probe.as_bytes())?
        };
        if let Some(at) = found {
            let before_start = match (self.forward(), &self.lower, &self.upper) {
                (true, Some(lower), _) => btree.compare_at(at, lower.as_bytes())? == CmpOrdering::Less,
                (false, _, Some(upper)) => btree.compare_at(at, upper.as_bytes())? == CmpOrdering::Greater,
                _ => false,
            };
            if before_start {
                found = self.boundary(true)?;
            }
        }
        match found {
            Some(at) if self.in_bounds(at)? => {
                self.set_position(Position::on(at));
                Ok(true)
            }
            _ => {
                self.set_position(Position::EOF);
                Ok(false)
            }
        }
    }

    /// Number of entries within bounds.
    pub fn count(&self) -> Result<usize> {
        self.check_active()?;
        if self.lower.is_none() && self.upper.is_none() {
            return self.btree().count();
        }
        let mut total = 0;
        let mut at = self.boundary(true)?;
        while let Some(entry) = at {
            if !self.in_bounds(entry)? {
                break;
            }
            total += 1;
            at = self.step(entry, false, true)?;
        }
        Ok(total)
    }

    // ========================================================================
    // Bookmarks
    // ========================================================================

    /// Bookmark of the current row.
    pub fn get_bookmark(&self) -> Result<Row> {
        let stored = self.row()?;
        Ok(self.table.bookmark_of(&stored))
    }

    /// Position on the row a bookmark names.
    ///
    /// Returns `false` without moving if the row is gone or out of bounds.
    pub fn goto_bookmark(&mut self, bookmark: &Row) -> Result<bool> {
        self.check_active()?;
        let Some(stored) = self.table.locate_row(bookmark)? else {
            return Ok(false);
        };
        let key = self.table.encode_key(self.ordinal, &stored.row, stored.row_id)?;
        let found = self.btree().find_key(key.as_bytes())?;
        let at = EntryRef::new(found.leaf(), found.entry);
        if !found.found || !self.in_bounds(at)? {
            return Ok(false);
        }
        self.set_position(Position::on(at));
        Ok(true)
    }

    /// Order of two bookmarks in scan order.
    ///
    /// # Errors
    /// Returns `Error::KeyNotFound` if either row is gone.
    pub fn compare_bookmarks(&self, a: &Row, b: &Row) -> Result<CmpOrdering> {
        let key_of = |bookmark: &Row| -> Result<Record> {
            let stored = self.table.locate_row(bookmark)?.ok_or(Error::KeyNotFound)?;
            self.table.encode_key(self.ordinal, &stored.row, stored.row_id)
        };
        let (a, b) = (key_of(a)?, key_of(b)?);
        let ord = self.btree().hooks().compare(a.as_bytes(), b.as_bytes())?;
        Ok(if self.forward() { ord } else { ord.reverse() })
    }
}

impl Drop for Scan {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scan")
            .field("table", &self.table.name())
            .field("ordinal", &self.ordinal)
            .field("direction", &self.direction)
            .field("position", &self.position())
            .finish()
    }
}
