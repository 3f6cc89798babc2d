//! The cursor protocol every operator implements.
//!
//! # States
//! ```text
//!   Inactive ──open──► Active ──close──► Inactive
//!                        │
//!        BOF ◄──prior── row ──next──► EOF
//! ```
//!
//! A freshly opened cursor sits at BOF. `next`/`prior` return whether a row
//! is current; at either crack `select` fails with `Error::NoCurrentRow`.
//! Optional behavior is advertised through [`Capabilities`]; calling an
//! operation the cursor does not support fails with the matching capability
//! error instead of doing nothing.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::execution::aggregate::AggregateCursor;
use crate::execution::base::TableCursor;
use crate::execution::explode::ExplodeCursor;
use crate::execution::join::{MergeJoin, NestedLoopJoin, SearchedJoin};
use crate::execution::order::OrderCursor;
use crate::execution::project::ProjectCursor;
use crate::execution::restrict::RestrictCursor;
use crate::execution::set::{SetFilterCursor, UnionCursor};
use crate::types::{Order, Row, RowType};

/// Row predicate supplied by the expression evaluator.
pub type Predicate = Arc<dyn Fn(&Row) -> Result<bool> + Send + Sync>;

/// Set of optional cursor behaviors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NAVIGABLE: Self = Self(1);
    pub const BACKWARDS_NAVIGABLE: Self = Self(1 << 1);
    pub const BOOKMARKABLE: Self = Self(1 << 2);
    pub const SEARCHABLE: Self = Self(1 << 3);
    pub const COUNTABLE: Self = Self(1 << 4);
    pub const UPDATEABLE: Self = Self(1 << 5);
    pub const TRUNCATEABLE: Self = Self(1 << 6);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0x7f)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Fail with the capability's error unless `self` contains it.
    pub fn require(self, capability: Self) -> Result<()> {
        if self.contains(capability) {
            return Ok(());
        }
        Err(match capability {
            Self::BACKWARDS_NAVIGABLE => Error::NotBackwardsNavigable,
            Self::BOOKMARKABLE => Error::NotBookmarkable,
            Self::SEARCHABLE => Error::NotSearchable,
            Self::COUNTABLE => Error::NotCountable,
            Self::TRUNCATEABLE => Error::NotTruncateable,
            Self::UPDATEABLE => Error::CapabilityNotSupported("updateable"),
            _ => Error::CapabilityNotSupported("navigable"),
        })
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Capabilities {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 7] = [
            "navigable",
            "backwards",
            "bookmarkable",
            "searchable",
            "countable",
            "updateable",
            "truncateable",
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Capabilities({})", names.join(" | "))
    }
}

/// Whether a cursor reflects its own writes immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorType {
    /// Position is left where it was after a write.
    #[default]
    Static,
    /// Re-synchronizes on the written row after insert and update.
    Dynamic,
}

/// Activity and crack flags shared by every operator.
#[derive(Debug, Clone)]
pub struct CursorState {
    row_type: Arc<RowType>,
    active: bool,
    bof: bool,
    eof: bool,
}

impl CursorState {
    pub fn new(row_type: Arc<RowType>) -> Self {
        Self {
            row_type,
            active: false,
            bof: true,
            eof: false,
        }
    }

    #[inline]
    pub fn row_type(&self) -> &Arc<RowType> {
        &self.row_type
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn check_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(Error::TableInactive)
        }
    }

    /// Fail with `Error::TableActive` if the cursor is open.
    pub fn check_inactive(&self) -> Result<()> {
        if self.active {
            Err(Error::TableActive)
        } else {
            Ok(())
        }
    }

    pub fn activate(&mut self) {
        self.active = true;
        self.set_bof();
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    #[inline]
    pub fn bof(&self) -> bool {
        self.bof
    }

    #[inline]
    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn set_bof(&mut self) {
        self.bof = true;
        self.eof = false;
    }

    pub fn set_eof(&mut self) {
        self.bof = false;
        self.eof = true;
    }

    /// Both cracks at once: the cursor has no rows.
    pub fn set_empty(&mut self) {
        self.bof = true;
        self.eof = true;
    }

    pub fn set_on_row(&mut self) {
        self.bof = false;
        self.eof = false;
    }

    pub fn check_on_row(&self) -> Result<()> {
        self.check_active()?;
        if self.bof || self.eof {
            Err(Error::NoCurrentRow)
        } else {
            Ok(())
        }
    }
}

/// The navigable row source contract.
///
/// Optional operations default to the capability error for that operation.
pub trait CursorOps {
    fn row_type(&self) -> &Arc<RowType>;

    fn capabilities(&self) -> Capabilities;

    fn cursor_type(&self) -> CursorType {
        CursorType::Static
    }

    /// The order rows are produced in, if any.
    fn order(&self) -> Option<Order> {
        None
    }

    fn is_active(&self) -> bool;

    /// Acquire sources and move to BOF. Opening an open cursor is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Release sources. Closing a closed cursor is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Move to BOF.
    fn first(&mut self) -> Result<()>;

    /// Move to EOF.
    fn last(&mut self) -> Result<()> {
        Err(Error::NotBackwardsNavigable)
    }

    fn next(&mut self) -> Result<bool>;

    fn prior(&mut self) -> Result<bool> {
        Err(Error::NotBackwardsNavigable)
    }

    fn bof(&self) -> bool;

    fn eof(&self) -> bool;

    /// Copy the current row into `row` by column name.
    fn select(&mut self, row: &mut Row) -> Result<()>;

    /// Rewind to BOF, re-reading sources where needed.
    fn reset(&mut self) -> Result<()> {
        self.first()
    }

    fn get_bookmark(&mut self) -> Result<Row> {
        Err(Error::NotBookmarkable)
    }

    fn goto_bookmark(&mut self, _bookmark: &Row) -> Result<bool> {
        Err(Error::NotBookmarkable)
    }

    fn compare_bookmarks(&mut self, _a: &Row, _b: &Row) -> Result<Ordering> {
        Err(Error::NotBookmarkable)
    }

    fn get_key(&mut self) -> Result<Row> {
        Err(Error::NotSearchable)
    }

    /// Position on the row matching a (possibly partial) key.
    fn find_key(&mut self, _key: &Row) -> Result<bool> {
        Err(Error::NotSearchable)
    }

    /// Position on the nearest row at or after a key.
    fn find_nearest(&mut self, _key: &Row) -> Result<bool> {
        Err(Error::NotSearchable)
    }

    /// Re-synchronize on `row`, or the nearest row if it is gone.
    fn refresh(&mut self, _row: &Row) -> Result<bool> {
        Err(Error::NotSearchable)
    }

    fn count(&mut self) -> Result<usize> {
        Err(Error::NotCountable)
    }

    fn insert(&mut self, _row: &Row) -> Result<()> {
        Err(Error::CapabilityNotSupported("updateable"))
    }

    /// Replace the current row.
    fn update(&mut self, _row: &Row) -> Result<()> {
        Err(Error::CapabilityNotSupported("updateable"))
    }

    /// Delete the current row.
    fn delete(&mut self) -> Result<()> {
        Err(Error::CapabilityNotSupported("updateable"))
    }

    fn truncate(&mut self) -> Result<()> {
        Err(Error::NotTruncateable)
    }
}

/// Any operator.
pub enum Cursor {
    Table(TableCursor),
    Restrict(RestrictCursor),
    Project(ProjectCursor),
    Order(OrderCursor),
    Aggregate(AggregateCursor),
    Union(UnionCursor),
    SetFilter(SetFilterCursor),
    Explode(ExplodeCursor),
    NestedLoopJoin(NestedLoopJoin),
    MergeJoin(MergeJoin),
    SearchedJoin(SearchedJoin),
}

macro_rules! dispatch {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            Cursor::Table($c) => $body,
            Cursor::Restrict($c) => $body,
            Cursor::Project($c) => $body,
            Cursor::Order($c) => $body,
            Cursor::Aggregate($c) => $body,
            Cursor::Union($c) => $body,
            Cursor::SetFilter($c) => $body,
            Cursor::Explode($c) => $body,
            Cursor::NestedLoopJoin($c) => $body,
            Cursor::MergeJoin($c) => $body,
            Cursor::SearchedJoin($c) => $body,
        }
    };
}

impl Cursor {
    pub fn kind(&self) -> &'static str {
        match self {
            Cursor::Table(_) => "table",
            Cursor::Restrict(_) => "restrict",
            Cursor::Project(_) => "project",
            Cursor::Order(_) => "order",
            Cursor::Aggregate(_) => "aggregate",
            Cursor::Union(_) => "union",
            Cursor::SetFilter(_) => "set filter",
            Cursor::Explode(_) => "explode",
            Cursor::NestedLoopJoin(_) => "nested loop join",
            Cursor::MergeJoin(_) => "merge join",
            Cursor::SearchedJoin(_) => "searched join",
        }
    }
}

impl CursorOps for Cursor {
    fn row_type(&self) -> &Arc<RowType> {
        dispatch!(self, c => c.row_type())
    }

    fn capabilities(&self) -> Capabilities {
        dispatch!(self, c => c.capabilities())
    }

    fn cursor_type(&self) -> CursorType {
        dispatch!(self, c => c.cursor_type())
    }

    fn order(&self) -> Option<Order> {
        dispatch!(self, c => c.order())
    }

    fn is_active(&self) -> bool {
        dispatch!(self, c => c.is_active())
    }

    fn open(&mut self) -> Result<()> {
        dispatch!(self, c => c.open())
    }

    fn close(&mut self) -> Result<()> {
        dispatch!(self, c => c.close())
    }

    fn first(&mut self) -> Result<()> {
        dispatch!(self, c => c.first())
    }

    fn last(&mut self) -> Result<()> {
        dispatch!(self, c => c.last())
    }

    fn next(&mut self) -> Result<bool> {
        dispatch!(self, c => c.next())
    }

    fn prior(&mut self) -> Result<bool> {
        dispatch!(self, c => c.prior())
    }

    fn bof(&self) -> bool {
        dispatch!(self, c => c.bof())
    }

    fn eof(&self) -> bool {
        dispatch!(self, c => c.eof())
    }

    fn select(&mut self, row: &mut Row) -> Result<()> {
        dispatch!(self, c => c.select(row))
    }

    fn reset(&mut self) -> Result<()> {
        dispatch!(self, c => c.reset())
    }

    fn get_bookmark(&mut self) -> Result<Row> {
        dispatch!(self, c => c.get_bookmark())
    }

    fn goto_bookmark(&mut self, bookmark: &Row) -> Result<bool> {
        dispatch!(self, c => c.goto_bookmark(bookmark))
    }

    fn compare_bookmarks(&mut self, a: &Row, b: &Row) -> Result<Ordering> {
        dispatch!(self, c => c.compare_bookmarks(a, b))
    }

    fn get_key(&mut self) -> Result<Row> {
        dispatch!(self, c => c.get_key())
    }

    fn find_key(&mut self, key: &Row) -> Result<bool> {
        dispatch!(self, c => c.find_key(key))
    }

    fn find_nearest(&mut self, key: &Row) -> Result<bool> {
        dispatch!(self, c => c.find_nearest(key))
    }

    fn refresh(&mut self, row: &Row) -> Result<bool> {
        dispatch!(self, c => c.refresh(row))
    }

    fn count(&mut self) -> Result<usize> {
        dispatch!(self, c => c.count())
    }

    fn insert(&mut self, row: &Row) -> Result<()> {
        dispatch!(self, c => c.insert(row))
    }

    fn update(&mut self, row: &Row) -> Result<()> {
        dispatch!(self, c => c.update(row))
    }

    fn delete(&mut self) -> Result<()> {
        dispatch!(self, c => c.delete())
    }

    fn truncate(&mut self) -> Result<()> {
        dispatch!(self, c => c.truncate())
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("kind", &self.kind())
            .field("active", &self.is_active())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// The current row of `cursor` as a new row of its own type.
pub fn select_row(cursor: &mut impl CursorOps) -> Result<Row> {
    let mut row = Row::new(Arc::clone(cursor.row_type()));
    cursor.select(&mut row)?;
    Ok(row)
}

/// Count by walking from BOF to EOF, leaving the cursor at EOF.
pub fn count_rows(cursor: &mut impl CursorOps) -> Result<usize> {
    cursor.first()?;
    let mut count = 0;
    while cursor.next()? {
        count += 1;
    }
    Ok(count)
}

/// Open `sources` in order; if one fails, close those already opened.
pub fn open_all(sources: &mut [&mut Cursor]) -> Result<()> {
    for i in 0..sources.len() {
        if let Err(err) = sources[i].open() {
            close_all(&mut sources[..i]);
            return Err(err);
        }
    }
    Ok(())
}

/// Close `sources` in reverse order, continuing past failures.
pub fn close_all(sources: &mut [&mut Cursor]) -> Option<Error> {
    let mut first_err = None;
    for source in sources.iter_mut().rev() {
        if let Err(err) = source.close() {
            tracing::warn!(error = %err, cursor = source.kind(), "failed to close source");
            first_err.get_or_insert(err);
        }
    }
    first_err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set() {
        let caps = Capabilities::NAVIGABLE | Capabilities::SEARCHABLE;
        assert!(caps.contains(Capabilities::SEARCHABLE));
        assert!(!caps.contains(Capabilities::COUNTABLE));
        assert!(caps.without(Capabilities::SEARCHABLE).contains(Capabilities::NAVIGABLE));
        assert!(matches!(caps.require(Capabilities::COUNTABLE), Err(Error::NotCountable)));
        assert!(matches!(
            caps.require(Capabilities::BACKWARDS_NAVIGABLE),
            Err(Error::NotBackwardsNavigable)
        ));
        assert!(Capabilities::all().contains(caps));
        assert_eq!(format!("{caps:?}"), "Capabilities(navigable | searchable)");
    }

    #[test]
    fn test_state_cracks() {
        let mut state = CursorState::new(Arc::new(RowType::default()));
        assert!(matches!(state.check_active(), Err(Error::TableInactive)));
        state.activate();
        assert!(state.bof() && !state.eof());
        assert!(matches!(state.check_on_row(), Err(Error::NoCurrentRow)));
        state.set_on_row();
        assert!(state.check_on_row().is_ok());
        state.set_empty();
        assert!(state.bof() && state.eof());
        assert!(matches!(state.check_inactive(), Err(Error::TableActive)));
    }
}
