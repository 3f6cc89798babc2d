use std::sync::Arc;

use crate::common::Result;
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{select_row, Capabilities, Cursor, CursorOps};
use crate::execution::join::{JoinCore, JoinDefinition};
use crate::types::{Order, Row, RowType};

/// Rescans the inner source once per outer row.
///
/// Accepts any inputs and any join kind; forward only.
pub struct NestedLoopJoin {
    core: JoinCore,
    outer_row: Option<Row>,
}

impl NestedLoopJoin {
    pub fn new(ctx: ExecutionContext, left: Cursor, right: Cursor, definition: JoinDefinition) -> Result<Self> {
        Ok(Self {
            core: JoinCore::new(ctx, left, right, definition)?,
            outer_row: None,
        })
    }
}

impl CursorOps for NestedLoopJoin {
    fn row_type(&self) -> &Arc<RowType> {
        self.core.row_type()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NAVIGABLE
    }

    fn order(&self) -> Option<Order> {
        self.core.outer_order()
    }

    fn is_active(&self) -> bool {
        self.core.state.is_active()
    }

    fn open(&mut self) -> Result<()> {
        self.outer_row = None;
        self.core.open()
    }

    fn close(&mut self) -> Result<()> {
        self.outer_row = None;
        self.core.close()
    }

    fn first(&mut self) -> Result<()> {
        self.core.state.check_active()?;
        self.outer_row = None;
        self.core.begin_outer_row();
        self.core.outer.first()?;
        self.core.state.set_bof();
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        let core = &mut self.core;
        core.state.check_active()?;
        if core.state.eof() {
            return Ok(false);
        }
        loop {
            core.ctx.check_cancelled()?;
            if self.outer_row.is_none() {
                if !core.outer.next()? {
                    let empty = core.state.bof();
                    core.current = None;
                    core.state.set_eof();
                    if empty {
                        core.state.set_empty();
                    }
                    return Ok(false);
                }
                core.begin_outer_row();
                core.inner.first()?;
                self.outer_row = Some(select_row(&mut *core.outer)?);
            }

            if core.inner.next()? {
                let inner_row = select_row(&mut *core.inner)?;
                let Some(outer_row) = self.outer_row.as_ref() else {
                    continue;
                };
                if let Some(joined) = core.try_match(outer_row, &inner_row)? {
                    core.emit_match(joined);
                    return Ok(true);
                }
                continue;
            }

            if let Some(outer_row) = self.outer_row.take() {
                if core.emit_unmatched(&outer_row) {
                    return Ok(true);
                }
            }
        }
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
