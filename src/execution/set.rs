//! Set operators over two sources with the same columns.

use std::sync::Arc;

use crate::common::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{close_all, open_all, select_row, Capabilities, Cursor, CursorOps};
use crate::execution::materialize::{delegate_to_materialized, drain, insert_distinct, Materialized};
use crate::table::TableDefinition;
use crate::types::{Order, Row, RowType};

fn check_compatible(left: &RowType, right: &RowType) -> Result<()> {
    if left.len() != right.len() || !left.names().all(|name| right.contains(name)) {
        return Err(Error::InvalidDefinition(format!(
            "set operands have different columns: ({}) and ({})",
            left.names().collect::<Vec<_>>().join(", "),
            right.names().collect::<Vec<_>>().join(", ")
        )));
    }
    Ok(())
}

fn distinct_definition(name: &str, row_type: &Arc<RowType>) -> TableDefinition {
    let all = Order::ascending(&row_type.names().collect::<Vec<_>>());
    TableDefinition::new(name, Arc::clone(row_type)).with_key(all)
}

/// Distinct rows of either source, ordered on every column.
pub struct UnionCursor {
    ctx: ExecutionContext,
    left: Box<Cursor>,
    right: Box<Cursor>,
    rows: Option<Materialized>,
}

impl UnionCursor {
    /// # Errors
    /// Returns `Error::InvalidDefinition` unless both sources have the same
    /// column names.
    pub fn new(ctx: ExecutionContext, left: Cursor, right: Cursor) -> Result<Self> {
        check_compatible(left.row_type(), right.row_type())?;
        Ok(Self {
            ctx,
            left: Box::new(left),
            right: Box::new(right),
            rows: None,
        })
    }

    fn materialize(&mut self) -> Result<Materialized> {
        let row_type = Arc::clone(self.left.row_type());
        let (ctx, left, right) = (&self.ctx, &mut *self.left, &mut *self.right);
        Materialized::build(ctx, distinct_definition("union", &row_type), None, |table| {
            let mut add = |row: Row| insert_distinct(table, &row.project(Arc::clone(&row_type))).map(|_| ());
            drain(ctx, left, &mut add)?;
            drain(ctx, right, &mut add)?;
            Ok(())
        })
    }
}

impl CursorOps for UnionCursor {
    fn row_type(&self) -> &Arc<RowType> {
        self.left.row_type()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all().without(Capabilities::UPDATEABLE | Capabilities::TRUNCATEABLE)
    }

    fn order(&self) -> Option<Order> {
        Some(Order::ascending(&self.left.row_type().names().collect::<Vec<_>>()))
    }

    fn is_active(&self) -> bool {
        self.rows.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.rows.is_some() {
            return Ok(());
        }
        open_all(&mut [&mut *self.left, &mut *self.right])?;
        match self.materialize() {
            Ok(rows) => {
                self.rows = Some(rows);
                Ok(())
            }
            Err(err) => {
                close_all(&mut [&mut *self.left, &mut *self.right]);
                Err(err)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(rows) = self.rows.take() {
            rows.release();
        }
        close_all(&mut [&mut *self.left, &mut *self.right]).map_or(Ok(()), Err)
    }

    fn reset(&mut self) -> Result<()> {
        if let Some(rows) = self.rows.take() {
            rows.release();
        }
        self.left.reset()?;
        self.right.reset()?;
        self.rows = Some(self.materialize()?);
        Ok(())
    }

    delegate_to_materialized!(rows);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    /// Left rows absent from the right.
    Difference,
    /// Left rows present in the right.
    Intersect,
}

/// Left rows filtered by membership in the right source.
///
/// The right source is loaded into a temporary table keyed on every column;
/// the left source streams through in its own order.
pub struct SetFilterCursor {
    ctx: ExecutionContext,
    operation: SetOperation,
    left: Box<Cursor>,
    right: Box<Cursor>,
    members: Option<Materialized>,
}

impl SetFilterCursor {
    /// # Errors
    /// Returns `Error::InvalidDefinition` unless both sources have the same
    /// column names.
    pub fn new(ctx: ExecutionContext, operation: SetOperation, left: Cursor, right: Cursor) -> Result<Self> {
        check_compatible(left.row_type(), right.row_type())?;
        Ok(Self {
            ctx,
            operation,
            left: Box::new(left),
            right: Box::new(right),
            members: None,
        })
    }

    pub fn difference(ctx: ExecutionContext, left: Cursor, right: Cursor) -> Result<Self> {
        Self::new(ctx, SetOperation::Difference, left, right)
    }

    pub fn intersect(ctx: ExecutionContext, left: Cursor, right: Cursor) -> Result<Self> {
        Self::new(ctx, SetOperation::Intersect, left, right)
    }

    fn materialize(&mut self) -> Result<Materialized> {
        let row_type = Arc::clone(self.left.row_type());
        let (ctx, right) = (&self.ctx, &mut *self.right);
        Materialized::build(ctx, distinct_definition("members", &row_type), None, |table| {
            drain(ctx, right, |row| {
                insert_distinct(table, &row.project(Arc::clone(&row_type))).map(|_| ())
            })
            .map(|_| ())
        })
    }

    fn admitted(&mut self) -> Result<bool> {
        let members = self.members.as_ref().ok_or(Error::TableInactive)?;
        let row = select_row(&mut *self.left)?;
        let present = members.table().has_row(&row)?;
        Ok(present == (self.operation == SetOperation::Intersect))
    }

    fn step(&mut self, forward: bool) -> Result<bool> {
        loop {
            self.ctx.check_cancelled()?;
            let moved = if forward {
                self.left.next()?
            } else {
                self.left.prior()?
            };
            if !moved {
                return Ok(false);
            }
            if self.admitted()? {
                return Ok(true);
            }
        }
    }
}

impl CursorOps for SetFilterCursor {
    fn row_type(&self) -> &Arc<RowType> {
        self.left.row_type()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NAVIGABLE | (self.left.capabilities() & Capabilities::BACKWARDS_NAVIGABLE)
    }

    fn order(&self) -> Option<Order> {
        self.left.order()
    }

    fn is_active(&self) -> bool {
        self.members.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.members.is_some() {
            return Ok(());
        }
        open_all(&mut [&mut *self.left, &mut *self.right])?;
        match self.materialize() {
            Ok(members) => {
                self.members = Some(members);
                self.left.first()
            }
            Err(err) => {
                close_all(&mut [&mut *self.left, &mut *self.right]);
                Err(err)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(members) = self.members.take() {
            members.release();
        }
        close_all(&mut [&mut *self.left, &mut *self.right]).map_or(Ok(()), Err)
    }

    fn first(&mut self) -> Result<()> {
        self.left.first()
    }

    fn last(&mut self) -> Result<()> {
        self.left.last()
    }

    fn next(&mut self) -> Result<bool> {
        self.step(true)
    }

    fn prior(&mut self) -> Result<bool> {
        self.capabilities().require(Capabilities::BACKWARDS_NAVIGABLE)?;
        self.step(false)
    }

    fn bof(&self) -> bool {
        self.left.bof()
    }

    fn eof(&self) -> bool {
        self.left.eof()
    }

    fn select(&mut self, row: &mut Row) -> Result<()> {
        self.left.select(row)
    }

    fn reset(&mut self) -> Result<()> {
        if let Some(members) = self.members.take() {
            members.release();
        }
        self.right.reset()?;
        self.members = Some(self.materialize()?);
        self.left.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::base::TableCursor;
    use crate::execution::test_support::{context, int_table, rows_of};

    fn single(ctx: &ExecutionContext, values: &[i64]) -> Cursor {
        let rows: Vec<Vec<i64>> = values.iter().map(|v| vec![*v]).collect();
        let rows: Vec<&[i64]> = rows.iter().map(Vec::as_slice).collect();
        Cursor::Table(TableCursor::new(int_table(ctx, &["n"], None, &rows)))
    }

    #[test]
    fn test_union_is_distinct_and_ordered() {
        let ctx = context();
        let (left, right) = (single(&ctx, &[3, 1, 3]), single(&ctx, &[2, 3, 5]));
        let mut cursor = UnionCursor::new(ctx, left, right).unwrap();
        cursor.open().unwrap();
        assert_eq!(
            rows_of(&mut cursor, &["n"]),
            vec![vec![Some(1)], vec![Some(2)], vec![Some(3)], vec![Some(5)]]
        );
        assert_eq!(cursor.count().unwrap(), 4);
        cursor.close().unwrap();
    }

    #[test]
    fn test_difference_and_intersect() {
        let ctx = context();
        let mut difference =
            SetFilterCursor::difference(ctx.clone(), single(&ctx, &[1, 2, 3, 4]), single(&ctx, &[2, 4, 6])).unwrap();
        difference.open().unwrap();
        assert_eq!(rows_of(&mut difference, &["n"]), vec![vec![Some(1)], vec![Some(3)]]);
        assert!(matches!(difference.count(), Err(Error::NotCountable)));

        let mut intersect =
            SetFilterCursor::intersect(ctx.clone(), single(&ctx, &[1, 2, 3, 4]), single(&ctx, &[2, 4, 6])).unwrap();
        intersect.open().unwrap();
        assert_eq!(rows_of(&mut intersect, &["n"]), vec![vec![Some(2)], vec![Some(4)]]);
        assert!(intersect.prior().unwrap());
    }

    #[test]
    fn test_incompatible_columns() {
        let ctx = context();
        let other = Cursor::Table(TableCursor::new(int_table(&ctx, &["m"], None, &[])));
        assert!(matches!(
            UnionCursor::new(ctx.clone(), single(&ctx, &[1]), other),
            Err(Error::InvalidDefinition(_))
        ));
    }
}
