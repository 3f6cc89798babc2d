//! Restriction: rows of the source that satisfy a predicate.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{select_row, Capabilities, Cursor, CursorOps, CursorType, Predicate};
use crate::types::{Order, Row, RowType};

pub struct RestrictCursor {
    ctx: ExecutionContext,
    source: Box<Cursor>,
    predicate: Predicate,
}

impl RestrictCursor {
    pub fn new(ctx: ExecutionContext, source: Cursor, predicate: Predicate) -> Self {
        Self {
            ctx,
            source: Box::new(source),
            predicate,
        }
    }

    pub fn source(&self) -> &Cursor {
        &self.source
    }

    fn satisfied(&mut self) -> Result<bool> {
        let row = select_row(&mut *self.source)?;
        (self.predicate)(&row)
    }

    fn step(&mut self, forward: bool) -> Result<bool> {
        loop {
            self.ctx.check_cancelled()?;
            let moved = if forward {
                self.source.next()?
            } else {
                self.source.prior()?
            };
            if !moved {
                return Ok(false);
            }
            if self.satisfied()? {
                return Ok(true);
            }
        }
    }

    fn check_row(&self, row: &Row) -> Result<()> {
        if (self.predicate)(row)? {
            Ok(())
        } else {
            Err(Error::RestrictionViolated)
        }
    }
}

impl CursorOps for RestrictCursor {
    fn row_type(&self) -> &Arc<RowType> {
        self.source.row_type()
    }

    fn capabilities(&self) -> Capabilities {
        self.source
            .capabilities()
            .without(Capabilities::SEARCHABLE | Capabilities::COUNTABLE | Capabilities::TRUNCATEABLE)
    }

    fn cursor_type(&self) -> CursorType {
        self.source.cursor_type()
    }

    fn order(&self) -> Option<Order> {
        self.source.order()
    }

    fn is_active(&self) -> bool {
        self.source.is_active()
    }

    fn open(&mut self) -> Result<()> {
        self.source.open()
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }

    fn first(&mut self) -> Result<()> {
        self.source.first()
    }

    fn last(&mut self) -> Result<()> {
        self.source.last()
    }

    fn next(&mut self) -> Result<bool> {
        self.step(true)
    }

    fn prior(&mut self) -> Result<bool> {
        self.capabilities().require(Capabilities::BACKWARDS_NAVIGABLE)?;
        self.step(false)
    }

    fn bof(&self) -> bool {
        self.source.bof()
    }

    fn eof(&self) -> bool {
        self.source.eof()
    }

    fn select(&mut self, row: &mut Row) -> Result<()> {
        self.source.select(row)
    }

    fn reset(&mut self) -> Result<()> {
        self.source.reset()
    }

    fn get_bookmark(&mut self) -> Result<Row> {
        self.source.get_bookmark()
    }

    /// Fails to land on a row the predicate rejects.
    fn goto_bookmark(&mut self, bookmark: &Row) -> Result<bool> {
        Ok(self.source.goto_bookmark(bookmark)? && self.satisfied()?)
    }

    fn compare_bookmarks(&mut self, a: &Row, b: &Row) -> Result<Ordering> {
        self.source.compare_bookmarks(a, b)
    }

    fn insert(&mut self, row: &Row) -> Result<()> {
        self.check_row(row)?;
        self.source.insert(row)
    }

    fn update(&mut self, row: &Row) -> Result<()> {
        let mut updated = select_row(&mut *self.source)?;
        row.copy_to(&mut updated);
        self.check_row(&updated)?;
        self.source.update(row)
    }

    fn delete(&mut self) -> Result<()> {
        self.source.delete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::{ints, numbers_cursor, values};
    use crate::types::Value;

    fn even() -> Predicate {
        Arc::new(|row: &Row| Ok(row.get(0).and_then(Value::as_integer).is_some_and(|n| n % 2 == 0)))
    }

    #[test]
    fn test_filters_both_directions() {
        let (ctx, source) = numbers_cursor(1..=6);
        let mut cursor = RestrictCursor::new(ctx, source, even());
        cursor.open().unwrap();
        assert_eq!(values(&mut cursor), vec![2, 4, 6]);
        assert!(cursor.eof());
        assert!(cursor.prior().unwrap());
        assert_eq!(select_row(&mut cursor).unwrap().get(0), Some(&Value::Integer(6)));
        assert!(cursor.prior().unwrap());
        assert_eq!(select_row(&mut cursor).unwrap().get(0), Some(&Value::Integer(4)));
        assert!(matches!(cursor.count(), Err(Error::NotCountable)));
        assert!(matches!(cursor.find_key(&ints(&cursor, 2)), Err(Error::NotSearchable)));
    }

    #[test]
    fn test_insert_checks_predicate() {
        let (ctx, source) = numbers_cursor(1..=2);
        let mut cursor = RestrictCursor::new(ctx, source, even());
        cursor.open().unwrap();
        assert!(matches!(cursor.insert(&ints(&cursor, 7)), Err(Error::RestrictionViolated)));
        cursor.insert(&ints(&cursor, 8)).unwrap();
        assert_eq!(values(&mut cursor), vec![2, 8]);
    }

    #[test]
    fn test_cancellation() {
        let (ctx, source) = numbers_cursor(1..=4);
        let mut cursor = RestrictCursor::new(ctx.clone(), source, even());
        cursor.open().unwrap();
        ctx.cancellation().cancel();
        assert!(matches!(cursor.next(), Err(Error::Cancelled)));
    }
}
