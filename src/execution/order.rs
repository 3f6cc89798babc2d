//! Sorting a source into a requested order.

use std::sync::Arc;

use crate::common::Result;
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{Capabilities, Cursor, CursorOps};
use crate::execution::materialize::{delegate_to_materialized, drain, Materialized};
use crate::table::TableDefinition;
use crate::types::{Order, RowType};

/// Rows of the source in `order`.
///
/// The source is copied into a temporary keyless table carrying `order` as
/// a secondary index. Rows with equal sort keys keep their source order,
/// since the index breaks ties on the generated row id.
pub struct OrderCursor {
    ctx: ExecutionContext,
    source: Box<Cursor>,
    order: Order,
    rows: Option<Materialized>,
}

impl OrderCursor {
    /// # Errors
    /// Returns `Error::ColumnNotFound` if an order column is not in the
    /// source, and `Error::InvalidDefinition` for an empty order.
    pub fn new(ctx: ExecutionContext, source: Cursor, order: Order) -> Result<Self> {
        TableDefinition::new("order", Arc::clone(source.row_type()))
            .with_order(order.clone())
            .derive_indexes()?;
        Ok(Self {
            ctx,
            source: Box::new(source),
            order,
            rows: None,
        })
    }

    fn materialize(&mut self) -> Result<Materialized> {
        let definition =
            TableDefinition::new("order", Arc::clone(self.source.row_type())).with_order(self.order.clone());
        let (ctx, source) = (&self.ctx, &mut *self.source);
        Materialized::build(ctx, definition, Some(&self.order), |table| {
            drain(ctx, source, |row| table.insert(&row)).map(|_| ())
        })
    }
}

impl CursorOps for OrderCursor {
    fn row_type(&self) -> &Arc<RowType> {
        self.source.row_type()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all().without(Capabilities::UPDATEABLE | Capabilities::TRUNCATEABLE)
    }

    fn order(&self) -> Option<Order> {
        Some(self.order.clone())
    }

    fn is_active(&self) -> bool {
        self.rows.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.rows.is_some() {
            return Ok(());
        }
        self.source.open()?;
        match self.materialize() {
            Ok(rows) => {
                self.rows = Some(rows);
                Ok(())
            }
            Err(err) => {
                if let Err(close_err) = self.source.close() {
                    tracing::warn!(error = %close_err, "failed to close order source");
                }
                Err(err)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(rows) = self.rows.take() {
            rows.release();
        }
        self.source.close()
    }

    fn reset(&mut self) -> Result<()> {
        if let Some(rows) = self.rows.take() {
            rows.release();
        }
        self.source.reset()?;
        self.rows = Some(self.materialize()?);
        Ok(())
    }

    delegate_to_materialized!(rows);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::execution::base::TableCursor;
    use crate::execution::test_support::{context, int_table, rows_of};
    use crate::types::{DataType, OrderColumn, Row, Value};

    fn source(ctx: &ExecutionContext) -> Cursor {
        let table = int_table(
            ctx,
            &["id", "score"],
            Some(&["id"]),
            &[&[1, 30], &[2, 10], &[3, 20], &[4, 10], &[5, 30]],
        );
        Cursor::Table(TableCursor::new(table))
    }

    #[test]
    fn test_sorts_stably() {
        let ctx = context();
        let order = Order::new(vec![OrderColumn::desc("score")]);
        let mut cursor = OrderCursor::new(ctx.clone(), source(&ctx), order).unwrap();
        cursor.open().unwrap();
        assert_eq!(
            rows_of(&mut cursor, &["id"]),
            vec![vec![Some(1)], vec![Some(5)], vec![Some(3)], vec![Some(2)], vec![Some(4)]]
        );
        assert_eq!(cursor.count().unwrap(), 5);
    }

    #[test]
    fn test_find_key_on_sorted_rows() {
        let ctx = context();
        let mut cursor = OrderCursor::new(ctx.clone(), source(&ctx), Order::ascending(&["score"])).unwrap();
        cursor.open().unwrap();
        let key_type = Arc::new(RowType::of([("score", DataType::integer())]));
        let key = Row::from_values(key_type, vec![Some(Value::Integer(20))]).unwrap();
        assert!(cursor.find_key(&key).unwrap());
        let mut row = Row::new(cursor.row_type().clone());
        cursor.select(&mut row).unwrap();
        assert_eq!(row.value("id").unwrap(), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_closed_cursor_is_inactive() {
        let ctx = context();
        let mut cursor = OrderCursor::new(ctx.clone(), source(&ctx), Order::ascending(&["score"])).unwrap();
        assert!(matches!(cursor.next(), Err(Error::TableInactive)));
        assert!(matches!(
            OrderCursor::new(ctx.clone(), source(&ctx), Order::ascending(&["nope"])),
            Err(Error::ColumnNotFound(_))
        ));
    }
}
