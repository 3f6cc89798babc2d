//! Join operators.
//!
//! | Inputs                                   | Operator          |
//! |------------------------------------------|-------------------|
//! | anything                                 | [`NestedLoopJoin`] |
//! | both ordered on the key, one side unique | [`MergeJoin`]      |
//! | inner side searchable on the key         | [`SearchedJoin`]   |
//!
//! Choosing between them is the planner's job; each one produces the same
//! rows for inputs it accepts. The joined row has the left columns followed
//! by the right columns, so their names must not overlap.
//!
//! Every algorithm walks an *outer* and an *inner* source. The outer side is
//! the left one, except for a right outer join, which walks the right.

mod merge;
mod nested_loop;
mod searched;

pub use merge::MergeJoin;
pub use nested_loop::NestedLoopJoin;
pub use searched::SearchedJoin;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{close_all, open_all, Cursor, CursorOps, CursorState, Predicate};
use crate::types::{Order, Row, RowType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    /// Every left row, nil-extended when nothing on the right matches.
    LeftOuter,
    /// Every right row, nil-extended when nothing on the left matches.
    RightOuter,
    /// Every pair of rows.
    Times,
}

impl JoinKind {
    pub fn is_outer(self) -> bool {
        matches!(self, JoinKind::LeftOuter | JoinKind::RightOuter)
    }
}

/// What a join matches on.
///
/// Two rows match when every key column has a value on both sides and the
/// values compare equal, and then the optional predicate holds for the
/// joined row.
#[derive(Clone)]
pub struct JoinDefinition {
    pub kind: JoinKind,
    pub left_key: Order,
    pub right_key: Order,
    /// Whether no two left rows share a key.
    pub left_unique: bool,
    /// Whether no two right rows share a key.
    pub right_unique: bool,
    pub predicate: Option<Predicate>,
}

impl JoinDefinition {
    pub fn new(kind: JoinKind, left_key: Order, right_key: Order) -> Self {
        Self {
            kind,
            left_key,
            right_key,
            left_unique: false,
            right_unique: false,
            predicate: None,
        }
    }

    /// Equi-join on column lists of equal length, ascending.
    pub fn on<S: AsRef<str>>(kind: JoinKind, left: &[S], right: &[S]) -> Self {
        Self::new(kind, Order::ascending(left), Order::ascending(right))
    }

    /// Cartesian product.
    pub fn times() -> Self {
        Self::new(JoinKind::Times, Order::default(), Order::default())
    }

    pub fn with_unique(mut self, left_unique: bool, right_unique: bool) -> Self {
        self.left_unique = left_unique;
        self.right_unique = right_unique;
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn validate(&self, left: &RowType, right: &RowType) -> Result<()> {
        if self.kind == JoinKind::Times {
            return Ok(());
        }
        if self.left_key.is_empty() || self.left_key.len() != self.right_key.len() {
            return Err(Error::InvalidDefinition(format!(
                "join keys differ in length: {} and {}",
                self.left_key.len(),
                self.right_key.len()
            )));
        }
        for name in self.left_key.names() {
            left.require(name)?;
        }
        for name in self.right_key.names() {
            right.require(name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for JoinDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinDefinition")
            .field("kind", &self.kind)
            .field("left_key", &self.left_key.names().collect::<Vec<_>>())
            .field("right_key", &self.right_key.names().collect::<Vec<_>>())
            .field("left_unique", &self.left_unique)
            .field("right_unique", &self.right_unique)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// State every join algorithm shares.
pub(crate) struct JoinCore {
    ctx: ExecutionContext,
    kind: JoinKind,
    predicate: Option<Predicate>,
    /// Outer and inner sources, in acquisition order.
    outer: Box<Cursor>,
    inner: Box<Cursor>,
    outer_key: Order,
    inner_key: Order,
    outer_unique: bool,
    inner_unique: bool,
    state: CursorState,
    current: Option<Row>,
    /// The current outer row has matched at least once.
    row_found: bool,
    /// The nil-extended row for the current outer row has been produced.
    row_included: bool,
}

impl JoinCore {
    pub(crate) fn new(ctx: ExecutionContext, left: Cursor, right: Cursor, definition: JoinDefinition) -> Result<Self> {
        definition.validate(left.row_type(), right.row_type())?;
        let row_type = Arc::new(left.row_type().concat(right.row_type())?);
        let swapped = definition.kind == JoinKind::RightOuter;
        let (outer, inner, outer_key, inner_key, outer_unique, inner_unique) = if swapped {
            (
                right,
                left,
                definition.right_key,
                definition.left_key,
                definition.right_unique,
                definition.left_unique,
            )
        } else {
            (
                left,
                right,
                definition.left_key,
                definition.right_key,
                definition.left_unique,
                definition.right_unique,
            )
        };
        Ok(Self {
            ctx,
            kind: definition.kind,
            predicate: definition.predicate,
            outer: Box::new(outer),
            inner: Box::new(inner),
            outer_key,
            inner_key,
            outer_unique,
            inner_unique,
            state: CursorState::new(row_type),
            current: None,
            row_found: false,
            row_included: false,
        })
    }

    pub(crate) fn row_type(&self) -> &Arc<RowType> {
        self.state.row_type()
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        if self.state.is_active() {
            return Ok(());
        }
        open_all(&mut [&mut *self.outer, &mut *self.inner])?;
        self.state.activate();
        self.begin_outer_row();
        Ok(())
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.state.deactivate();
        self.current = None;
        close_all(&mut [&mut *self.outer, &mut *self.inner]).map_or(Ok(()), Err)
    }

    /// Start over on a new outer row.
    pub(crate) fn begin_outer_row(&mut self) {
        self.current = None;
        self.row_found = false;
        self.row_included = false;
    }

    pub(crate) fn select(&self, row: &mut Row) -> Result<()> {
        self.state.check_on_row()?;
        let current = self.current.as_ref().ok_or(Error::NoCurrentRow)?;
        current.copy_to(row);
        Ok(())
    }

    /// Order of the outer key against the inner key under the outer key's
    /// column policies.
    pub(crate) fn compare_keys(&self, outer: &Row, inner: &Row) -> Result<Ordering> {
        for (outer_column, inner_column) in self.outer_key.columns().iter().zip(self.inner_key.columns()) {
            let ord = outer_column.compare(outer.value(&outer_column.column)?, inner.value(&inner_column.column)?)?;
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }

    /// Whether every key column has a value on both sides and they are equal.
    pub(crate) fn keys_match(&self, outer: &Row, inner: &Row) -> Result<bool> {
        for (outer_column, inner_column) in self.outer_key.columns().iter().zip(self.inner_key.columns()) {
            let (Some(a), Some(b)) = (outer.value(&outer_column.column)?, inner.value(&inner_column.column)?) else {
                return Ok(false);
            };
            if outer_column.compare(Some(a), Some(b))? != Ordering::Equal {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The joined row when `outer` and `inner` match.
    pub(crate) fn try_match(&self, outer: &Row, inner: &Row) -> Result<Option<Row>> {
        if self.kind != JoinKind::Times && !self.keys_match(outer, inner)? {
            return Ok(None);
        }
        let joined = self.join(outer, Some(inner));
        match &self.predicate {
            Some(predicate) if !predicate(&joined)? => Ok(None),
            _ => Ok(Some(joined)),
        }
    }

    fn join(&self, outer: &Row, inner: Option<&Row>) -> Row {
        let mut row = Row::new(Arc::clone(self.state.row_type()));
        outer.copy_to(&mut row);
        if let Some(inner) = inner {
            inner.copy_to(&mut row);
        }
        row
    }

    /// Make `row` current as a match.
    pub(crate) fn emit_match(&mut self, row: Row) {
        self.row_found = true;
        self.current = Some(row);
        self.state.set_on_row();
    }

    /// Produce the nil-extended row for `outer` if this is an outer join
    /// and the row has neither matched nor been produced yet.
    pub(crate) fn emit_unmatched(&mut self, outer: &Row) -> bool {
        if !self.kind.is_outer() || self.row_found || self.row_included {
            return false;
        }
        self.row_included = true;
        self.current = Some(self.join(outer, None));
        self.state.set_on_row();
        true
    }

    pub(crate) fn outer_order(&self) -> Option<Order> {
        self.outer.order()
    }
}
