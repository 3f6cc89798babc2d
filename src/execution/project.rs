//! Projection onto a subset of columns, optionally removing duplicates.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::common::Result;
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{Capabilities, Cursor, CursorOps};
use crate::execution::materialize::{drain, insert_distinct, Materialized};
use crate::table::TableDefinition;
use crate::types::{Order, Row, RowType};

/// Columns of the source by name.
///
/// A plain projection streams from its source. A distinct projection loads
/// the projected rows into a temporary table keyed on every column, so it
/// comes back ordered on all of its columns.
pub struct ProjectCursor {
    ctx: ExecutionContext,
    source: Box<Cursor>,
    row_type: Arc<RowType>,
    distinct: bool,
    distinct_rows: Option<Materialized>,
}

impl ProjectCursor {
    /// # Errors
    /// Returns `Error::ColumnNotFound` if the source lacks a column.
    pub fn new<S: AsRef<str>>(ctx: ExecutionContext, source: Cursor, columns: &[S]) -> Result<Self> {
        let row_type = Arc::new(source.row_type().project(columns)?);
        Ok(Self {
            ctx,
            source: Box::new(source),
            row_type,
            distinct: false,
            distinct_rows: None,
        })
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    fn all_columns(&self) -> Order {
        Order::ascending(&self.row_type.names().collect::<Vec<_>>())
    }

    fn materialize(&mut self) -> Result<Materialized> {
        let definition = TableDefinition::new("distinct", Arc::clone(&self.row_type)).with_key(self.all_columns());
        let row_type = Arc::clone(&self.row_type);
        let (ctx, source) = (&self.ctx, &mut *self.source);
        Materialized::build(ctx, definition, None, |table| {
            drain(ctx, source, |row| {
                insert_distinct(table, &row.project(Arc::clone(&row_type))).map(|_| ())
            })
            .map(|_| ())
        })
    }

    fn preserves_order(&self) -> Option<Order> {
        let order = self.source.order()?;
        let covered = order.names().all(|name| self.row_type.contains(name));
        covered.then_some(order)
    }
}

impl CursorOps for ProjectCursor {
    fn row_type(&self) -> &Arc<RowType> {
        &self.row_type
    }

    fn capabilities(&self) -> Capabilities {
        if let Some(rows) = &self.distinct_rows {
            return rows.capabilities();
        }
        if self.distinct {
            return Capabilities::all().without(Capabilities::UPDATEABLE | Capabilities::TRUNCATEABLE);
        }
        let streamed = self
            .source
            .capabilities()
            .without(Capabilities::UPDATEABLE | Capabilities::TRUNCATEABLE);
        if self.preserves_order().is_some() {
            streamed
        } else {
            streamed.without(Capabilities::SEARCHABLE)
        }
    }

    fn order(&self) -> Option<Order> {
        if self.distinct {
            Some(self.all_columns())
        } else {
            self.preserves_order()
        }
    }

    fn is_active(&self) -> bool {
        self.source.is_active()
    }

    fn open(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        self.source.open()?;
        if self.distinct {
            match self.materialize() {
                Ok(rows) => self.distinct_rows = Some(rows),
                Err(err) => {
                    if let Err(close_err) = self.source.close() {
                        tracing::warn!(error = %close_err, "failed to close projection source");
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(rows) = self.distinct_rows.take() {
            rows.release();
        }
        self.source.close()
    }

    fn first(&mut self) -> Result<()> {
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().first(),
            None => self.source.first(),
        }
    }

    fn last(&mut self) -> Result<()> {
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().last(),
            None => self.source.last(),
        }
    }

    fn next(&mut self) -> Result<bool> {
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().next(),
            None => self.source.next(),
        }
    }

    fn prior(&mut self) -> Result<bool> {
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().prior(),
            None => self.source.prior(),
        }
    }

    fn bof(&self) -> bool {
        match &self.distinct_rows {
            Some(rows) => rows.cursor_ref().bof(),
            None => self.source.bof(),
        }
    }

    fn eof(&self) -> bool {
        match &self.distinct_rows {
            Some(rows) => rows.cursor_ref().eof(),
            None => self.source.eof(),
        }
    }

    fn select(&mut self, row: &mut Row) -> Result<()> {
        let mut projected = Row::new(Arc::clone(&self.row_type));
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().select(&mut projected)?,
            None => self.source.select(&mut projected)?,
        }
        projected.copy_to(row);
        Ok(())
    }

    /// Re-reads the source when distinct.
    fn reset(&mut self) -> Result<()> {
        if !self.distinct {
            return self.source.reset();
        }
        if let Some(rows) = self.distinct_rows.take() {
            rows.release();
        }
        self.source.reset()?;
        self.distinct_rows = Some(self.materialize()?);
        Ok(())
    }

    fn get_bookmark(&mut self) -> Result<Row> {
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().get_bookmark(),
            None => self.source.get_bookmark(),
        }
    }

    fn goto_bookmark(&mut self, bookmark: &Row) -> Result<bool> {
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().goto_bookmark(bookmark),
            None => self.source.goto_bookmark(bookmark),
        }
    }

    fn compare_bookmarks(&mut self, a: &Row, b: &Row) -> Result<Ordering> {
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().compare_bookmarks(a, b),
            None => self.source.compare_bookmarks(a, b),
        }
    }

    fn get_key(&mut self) -> Result<Row> {
        self.capabilities().require(Capabilities::SEARCHABLE)?;
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().get_key(),
            None => self.source.get_key(),
        }
    }

    fn find_key(&mut self, key: &Row) -> Result<bool> {
        self.capabilities().require(Capabilities::SEARCHABLE)?;
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().find_key(key),
            None => self.source.find_key(key),
        }
    }

    fn find_nearest(&mut self, key: &Row) -> Result<bool> {
        self.capabilities().require(Capabilities::SEARCHABLE)?;
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().find_nearest(key),
            None => self.source.find_nearest(key),
        }
    }

    fn refresh(&mut self, row: &Row) -> Result<bool> {
        self.capabilities().require(Capabilities::SEARCHABLE)?;
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().refresh(row),
            None => self.source.refresh(row),
        }
    }

    fn count(&mut self) -> Result<usize> {
        match &mut self.distinct_rows {
            Some(rows) => rows.cursor().count(),
            None => self.source.count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::execution::base::TableCursor;
    use crate::execution::test_support::{context, int_table, rows_of};

    fn pairs() -> (ExecutionContext, Cursor) {
        let ctx = context();
        let table = int_table(
            &ctx,
            &["id", "grp"],
            Some(&["id"]),
            &[&[1, 20], &[2, 10], &[3, 20], &[4, 10], &[5, 30]],
        );
        (ctx, Cursor::Table(TableCursor::new(table)))
    }

    #[test]
    fn test_plain_projection_streams() {
        let (ctx, source) = pairs();
        let mut cursor = ProjectCursor::new(ctx, source, &["grp"]).unwrap();
        cursor.open().unwrap();
        assert_eq!(cursor.row_type().len(), 1);
        assert_eq!(rows_of(&mut cursor, &["grp"]).len(), 5);
        assert_eq!(cursor.count().unwrap(), 5);
        assert!(cursor.order().is_none());
        assert!(!cursor.capabilities().contains(Capabilities::SEARCHABLE));
    }

    #[test]
    fn test_projection_keeping_key_keeps_order() {
        let (ctx, source) = pairs();
        let cursor = ProjectCursor::new(ctx, source, &["id"]).unwrap();
        let order = cursor.order().unwrap();
        assert_eq!(order.names().collect::<Vec<_>>(), vec!["id"]);
        assert!(cursor.capabilities().contains(Capabilities::SEARCHABLE));
    }

    #[test]
    fn test_distinct_projection() {
        let (ctx, source) = pairs();
        let mut cursor = ProjectCursor::new(ctx, source, &["grp"]).unwrap().distinct();
        cursor.open().unwrap();
        assert_eq!(
            rows_of(&mut cursor, &["grp"]),
            vec![vec![Some(10)], vec![Some(20)], vec![Some(30)]]
        );
        assert_eq!(cursor.count().unwrap(), 3);
        assert!(cursor.prior().unwrap());
        cursor.close().unwrap();
        assert!(!cursor.is_active());
    }

    #[test]
    fn test_unknown_column() {
        let (ctx, source) = pairs();
        assert!(matches!(
            ProjectCursor::new(ctx, source, &["nope"]),
            Err(Error::ColumnNotFound(_))
        ));
    }
}
