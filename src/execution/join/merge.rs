use std::cmp::Ordering;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{select_row, Capabilities, Cursor, CursorOps};
use crate::execution::join::{JoinCore, JoinDefinition, JoinKind};
use crate::types::{Order, Row, RowType};

/// What the last produced row was, which decides the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// At a crack; both sides must be stepped.
    Start,
    Matched,
    Unmatched,
}

/// Walks two sources ordered on the join key in step.
///
/// At least one side's key must be unique: on a match the non-unique side
/// advances while the unique side's row stays put. Works in both directions
/// when both sources navigate backwards; comparisons flip sign when moving
/// backwards.
pub struct MergeJoin {
    core: JoinCore,
    pending: Pending,
    forward: bool,
    outer_row: Option<Row>,
    inner_row: Option<Row>,
}

impl MergeJoin {
    /// # Errors
    /// Returns `Error::InvalidDefinition` for a cartesian product, when
    /// neither key is unique, or when a source is not ordered on its key.
    pub fn new(ctx: ExecutionContext, left: Cursor, right: Cursor, definition: JoinDefinition) -> Result<Self> {
        if definition.kind == JoinKind::Times {
            return Err(Error::InvalidDefinition("merge join needs a key".into()));
        }
        if !definition.left_unique && !definition.right_unique {
            return Err(Error::InvalidDefinition(
                "merge join needs a unique key on at least one side".into(),
            ));
        }
        for (source, key) in [(&left, &definition.left_key), (&right, &definition.right_key)] {
            if !source.order().is_some_and(|order| order.starts_with(key)) {
                return Err(Error::InvalidDefinition(format!(
                    "merge join source is not ordered on ({})",
                    key.names().collect::<Vec<_>>().join(", ")
                )));
            }
        }
        Ok(Self {
            core: JoinCore::new(ctx, left, right, definition)?,
            pending: Pending::Start,
            forward: true,
            outer_row: None,
            inner_row: None,
        })
    }

    fn reposition(&mut self, forward: bool) -> Result<()> {
        self.core.state.check_active()?;
        if forward {
            self.core.outer.first()?;
            self.core.inner.first()?;
            self.core.state.set_bof();
        } else {
            self.core.outer.last()?;
            self.core.inner.last()?;
            self.core.state.set_eof();
        }
        self.core.begin_outer_row();
        self.pending = Pending::Start;
        self.forward = forward;
        self.outer_row = None;
        self.inner_row = None;
        Ok(())
    }

    fn step_outer(&mut self, forward: bool) -> Result<()> {
        let moved = if forward {
            self.core.outer.next()?
        } else {
            self.core.outer.prior()?
        };
        self.outer_row = if moved {
            Some(select_row(&mut *self.core.outer)?)
        } else {
            None
        };
        self.core.begin_outer_row();
        Ok(())
    }

    fn step_inner(&mut self, forward: bool) -> Result<()> {
        let moved = if forward {
            self.core.inner.next()?
        } else {
            self.core.inner.prior()?
        };
        self.inner_row = if moved {
            Some(select_row(&mut *self.core.inner)?)
        } else {
            None
        };
        Ok(())
    }

    /// Leave the current pair behind the way a match would.
    fn step_past_match(&mut self, forward: bool) -> Result<()> {
        if self.core.inner_unique {
            self.step_outer(forward)
        } else {
            self.step_inner(forward)
        }
    }

    /// Whether the inner source sits at the crack it would leave by moving
    /// in this direction, as it does after a change of direction.
    fn inner_behind(&self, forward: bool) -> bool {
        let inner = &self.core.inner;
        if forward {
            inner.bof() && !inner.eof()
        } else {
            inner.eof() && !inner.bof()
        }
    }

    fn step(&mut self, forward: bool) -> Result<bool> {
        self.core.state.check_active()?;
        if (forward && self.core.state.eof()) || (!forward && self.core.state.bof()) {
            return Ok(false);
        }
        if self.pending == Pending::Start && self.forward != forward {
            self.reposition(forward)?;
        }
        self.forward = forward;

        match self.pending {
            Pending::Start => {
                self.step_outer(forward)?;
                self.step_inner(forward)?;
            }
            Pending::Matched => self.step_past_match(forward)?,
            Pending::Unmatched => self.step_outer(forward)?,
        }

        loop {
            self.core.ctx.check_cancelled()?;
            let Some(outer) = self.outer_row.as_ref() else {
                let empty = (forward && self.core.state.bof()) || (!forward && self.core.state.eof());
                self.pending = Pending::Start;
                self.core.current = None;
                if empty {
                    self.core.state.set_empty();
                } else if forward {
                    self.core.state.set_eof();
                } else {
                    self.core.state.set_bof();
                }
                return Ok(false);
            };

            let Some(inner) = self.inner_row.as_ref() else {
                if self.inner_behind(forward) {
                    self.step_inner(forward)?;
                    continue;
                }
                if self.core.emit_unmatched(outer) {
                    self.pending = Pending::Unmatched;
                    return Ok(true);
                }
                self.step_outer(forward)?;
                continue;
            };

            let mut ord = self.core.compare_keys(outer, inner)?;
            if !forward {
                ord = ord.reverse();
            }
            match ord {
                Ordering::Less => {
                    if self.core.emit_unmatched(outer) {
                        self.pending = Pending::Unmatched;
                        return Ok(true);
                    }
                    self.step_outer(forward)?;
                }
                Ordering::Greater => self.step_inner(forward)?,
                Ordering::Equal => match self.core.try_match(outer, inner)? {
                    Some(joined) => {
                        self.core.emit_match(joined);
                        self.pending = Pending::Matched;
                        return Ok(true);
                    }
                    None => {
                        // stepping the outer side leaves this row for good
                        if self.core.inner_unique && self.core.emit_unmatched(outer) {
                            self.pending = Pending::Unmatched;
                            return Ok(true);
                        }
                        self.step_past_match(forward)?;
                    }
                },
            }
        }
    }
}

impl CursorOps for MergeJoin {
    fn row_type(&self) -> &Arc<RowType> {
        self.core.row_type()
    }

    fn capabilities(&self) -> Capabilities {
        let backwards =
            self.core.outer.capabilities() & self.core.inner.capabilities() & Capabilities::BACKWARDS_NAVIGABLE;
        Capabilities::NAVIGABLE | backwards
    }

    fn order(&self) -> Option<Order> {
        self.core.outer_order()
    }

    fn is_active(&self) -> bool {
        self.core.state.is_active()
    }

    fn open(&mut self) -> Result<()> {
        self.core.open()?;
        self.reposition(true)
    }

    fn close(&mut self) -> Result<()> {
        self.outer_row = None;
        self.inner_row = None;
        self.pending = Pending::Start;
        self.core.close()
    }

    fn first(&mut self) -> Result<()> {
        self.reposition(true)
    }

    fn last(&mut self) -> Result<()> {
        self.capabilities().require(Capabilities::BACKWARDS_NAVIGABLE)?;
        self.reposition(false)
    }

    fn next(&mut self) -> Result<bool> {
        self.step(true)
    }

    fn prior(&mut self) -> Result<bool> {
        self.capabilities().require(Capabilities::BACKWARDS_NAVIGABLE)?;
        self.step(false)
    }

    fn bof(&self) -> bool {
        self.core.state.bof()
    }

    fn eof(&self) -> bool {
        self.core.state.eof()
    }

    fn select(&mut self, row: &mut Row) -> Result<()> {
        self.core.select(row)
    }
}
