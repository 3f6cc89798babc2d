use std::sync::Arc;

use crate::common::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{select_row, Capabilities, Cursor, CursorOps};
use crate::execution::join::{JoinCore, JoinDefinition, JoinKind};
use crate::types::{Order, Row, RowType};

/// Looks up each outer row's key in a searchable inner source.
///
/// When the inner key is not unique, the rows following the found one are
/// read until the key changes. Forward only.
pub struct SearchedJoin {
    core: JoinCore,
    key_type: Arc<RowType>,
    outer_row: Option<Row>,
    /// The inner source is on a row whose key matches the outer row.
    in_run: bool,
}

impl SearchedJoin {
    /// # Errors
    /// Returns `Error::NotSearchable` if the inner source cannot find keys,
    /// and `Error::InvalidDefinition` for a cartesian product or an inner
    /// source not ordered on its key.
    pub fn new(ctx: ExecutionContext, left: Cursor, right: Cursor, definition: JoinDefinition) -> Result<Self> {
        if definition.kind == JoinKind::Times {
            return Err(Error::InvalidDefinition("searched join needs a key".into()));
        }
        let core = JoinCore::new(ctx, left, right, definition)?;
        core.inner.capabilities().require(Capabilities::SEARCHABLE)?;
        if !core.inner.order().is_some_and(|order| order.starts_with(&core.inner_key)) {
            return Err(Error::InvalidDefinition(format!(
                "searched join source is not ordered on ({})",
                core.inner_key.names().collect::<Vec<_>>().join(", ")
            )));
        }
        let key_type = Arc::new(core.inner.row_type().project(&core.inner_key.names().collect::<Vec<_>>())?);
        Ok(Self {
            core,
            key_type,
            outer_row: None,
            in_run: false,
        })
    }

    /// Position the inner source on the first row matching the outer key.
    fn seek(&mut self) -> Result<bool> {
        let Some(outer) = self.outer_row.as_ref() else {
            return Ok(false);
        };
        let mut values = Vec::with_capacity(self.core.outer_key.len());
        for column in self.core.outer_key.names() {
            match outer.value(column)? {
                Some(value) => values.push(Some(value.clone())),
                None => return Ok(false),
            }
        }
        let key = Row::from_values(Arc::clone(&self.key_type), values)?;
        self.core.inner.find_key(&key)
    }
}

impl CursorOps for SearchedJoin {
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
        self.in_run = false;
        self.core.open()
    }

    fn close(&mut self) -> Result<()> {
        self.outer_row = None;
        self.in_run = false;
        self.core.close()
    }

    fn first(&mut self) -> Result<()> {
        self.core.state.check_active()?;
        self.outer_row = None;
        self.in_run = false;
        self.core.begin_outer_row();
        self.core.outer.first()?;
        self.core.state.set_bof();
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        self.core.state.check_active()?;
        if self.core.state.eof() {
            return Ok(false);
        }
        loop {
            self.core.ctx.check_cancelled()?;
            let positioned = if self.outer_row.is_none() {
                if !self.core.outer.next()? {
                    let empty = self.core.state.bof();
                    self.core.current = None;
                    self.core.state.set_eof();
                    if empty {
                        self.core.state.set_empty();
                    }
                    return Ok(false);
                }
                self.core.begin_outer_row();
                self.outer_row = Some(select_row(&mut *self.core.outer)?);
                self.seek()?
            } else {
                self.in_run && !self.core.inner_unique && self.core.inner.next()?
            };
            self.in_run = false;

            if positioned {
                let inner = select_row(&mut *self.core.inner)?;
                if let Some(outer) = self.outer_row.as_ref() {
                    if self.core.keys_match(outer, &inner)? {
                        self.in_run = true;
                        if let Some(joined) = self.core.try_match(outer, &inner)? {
                            self.core.emit_match(joined);
                            return Ok(true);
                        }
                        continue;
                    }
                }
            }

            if let Some(outer) = self.outer_row.take() {
                if self.core.emit_unmatched(&outer) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::base::TableCursor;
    use crate::execution::test_support::{context, int_table, rows_of};
    use crate::table::{MultiIndexTable, TableDefinition};
    use crate::types::{DataType, Value};

    fn by_dept(ctx: &ExecutionContext) -> Cursor {
        let row_type = Arc::new(RowType::of([("id", DataType::integer()), ("dept", DataType::integer())]));
        let definition = TableDefinition::new("staff", row_type.clone())
            .with_key(Order::ascending(&["id"]))
            .with_order(Order::ascending(&["dept"]));
        let table = MultiIndexTable::create(Arc::clone(ctx.streams()), definition, ctx.config().index).unwrap();
        for (id, dept) in [(1, 10), (2, 20), (3, 10), (4, 30)] {
            let row = Row::from_values(row_type.clone(), vec![Some(Value::Integer(id)), Some(Value::Integer(dept))])
                .unwrap();
            table.insert(&row).unwrap();
        }
        Cursor::Table(TableCursor::ordered(Arc::new(table), &Order::ascending(&["dept"])).unwrap())
    }

    fn depts(ctx: &ExecutionContext) -> Cursor {
        Cursor::Table(TableCursor::new(int_table(ctx, &["d"], Some(&["d"]), &[&[10], &[20], &[40]])))
    }

    #[test]
    fn test_non_unique_inner_run() {
        let ctx = context();
        let definition = JoinDefinition::on(JoinKind::Inner, &["d"], &["dept"]).with_unique(true, false);
        let mut join = SearchedJoin::new(ctx.clone(), depts(&ctx), by_dept(&ctx), definition).unwrap();
        join.open().unwrap();
        let mut rows = rows_of(&mut join, &["d", "id"]);
        rows.sort();
        assert_eq!(
            rows,
            vec![
                vec![Some(10), Some(1)],
                vec![Some(10), Some(3)],
                vec![Some(20), Some(2)]
            ]
        );
    }

    #[test]
    fn test_left_outer_keeps_unmatched() {
        let ctx = context();
        let definition = JoinDefinition::on(JoinKind::LeftOuter, &["d"], &["dept"]).with_unique(true, false);
        let mut join = SearchedJoin::new(ctx.clone(), depts(&ctx), by_dept(&ctx), definition).unwrap();
        join.open().unwrap();
        let rows = rows_of(&mut join, &["d", "id"]);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3], vec![Some(40), None]);
    }

    #[test]
    fn test_inner_must_be_searchable() {
        let ctx = context();
        let keyless = Cursor::Table(TableCursor::new(int_table(&ctx, &["dept"], None, &[])));
        let definition = JoinDefinition::on(JoinKind::Inner, &["d"], &["dept"]);
        assert!(matches!(
            SearchedJoin::new(ctx.clone(), depts(&ctx), keyless, definition),
            Err(Error::NotSearchable)
        ));
    }
}
