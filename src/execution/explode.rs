//! Hierarchical expansion of a self-referencing source.

use std::sync::Arc;

use crate::common::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{Capabilities, Cursor, CursorOps, CursorState, Predicate};
use crate::execution::materialize::{drain, release_table};
use crate::table::{MultiIndexTable, Scan, ScanDirection, TableDefinition};
use crate::types::{Column, DataType, Order, Row, RowType, Value};

/// How rows of an [`ExplodeCursor`] relate to each other.
///
/// The children of a row are the rows whose `child_columns` equal its
/// `parent_columns`, column for column.
#[derive(Clone)]
pub struct ExplodeDefinition {
    pub root: Predicate,
    pub parent_columns: Vec<String>,
    pub child_columns: Vec<String>,
    pub level_column: String,
    pub sequence_column: Option<String>,
}

impl ExplodeDefinition {
    pub fn new<S: AsRef<str>>(root: Predicate, parent_columns: &[S], child_columns: &[S]) -> Self {
        Self {
            root,
            parent_columns: parent_columns.iter().map(|s| s.as_ref().to_string()).collect(),
            child_columns: child_columns.iter().map(|s| s.as_ref().to_string()).collect(),
            level_column: "level".to_string(),
            sequence_column: Some("sequence".to_string()),
        }
    }

    pub fn with_level_column(mut self, name: impl Into<String>) -> Self {
        self.level_column = name.into();
        self
    }

    pub fn with_sequence_column(mut self, name: Option<String>) -> Self {
        self.sequence_column = name;
        self
    }
}

/// Depth-first, pre-order walk of a hierarchy.
///
/// Root rows (level 1) are the source rows satisfying the root predicate, in
/// source order. Each row is followed by its descendants before its next
/// sibling. A row whose parent key is already on the current path fails the
/// walk with `Error::HierarchyCycle`.
pub struct ExplodeCursor {
    ctx: ExecutionContext,
    source: Box<Cursor>,
    definition: ExplodeDefinition,
    state: CursorState,
    child_key_type: Arc<RowType>,
    table: Option<Arc<MultiIndexTable>>,
    child_index: usize,
    levels: Vec<Scan>,
    path: Vec<Vec<Option<Value>>>,
    pending: Option<Vec<Option<Value>>>,
    current: Option<Row>,
    sequence: i64,
}

impl ExplodeCursor {
    /// # Errors
    /// Returns `Error::ColumnNotFound` for an unknown column and
    /// `Error::InvalidDefinition` for mismatched column lists or output
    /// column names already used by the source.
    pub fn new(ctx: ExecutionContext, source: Cursor, definition: ExplodeDefinition) -> Result<Self> {
        if definition.parent_columns.is_empty() || definition.parent_columns.len() != definition.child_columns.len() {
            return Err(Error::InvalidDefinition(
                "explode needs matching, non-empty parent and child columns".into(),
            ));
        }
        let source_type = source.row_type();
        source_type.project(&definition.parent_columns)?;
        let child_key_type = Arc::new(source_type.project(&definition.child_columns)?);

        let mut extra = vec![Column::new(definition.level_column.clone(), DataType::integer())];
        if let Some(sequence) = &definition.sequence_column {
            extra.push(Column::new(sequence.clone(), DataType::integer()));
        }
        let row_type = Arc::new(source_type.concat(&RowType::new(extra))?);

        Ok(Self {
            ctx,
            source: Box::new(source),
            definition,
            state: CursorState::new(row_type),
            child_key_type,
            table: None,
            child_index: 0,
            levels: Vec::new(),
            path: Vec::new(),
            pending: None,
            current: None,
            sequence: 0,
        })
    }

    fn table(&self) -> Result<&Arc<MultiIndexTable>> {
        self.table.as_ref().ok_or(Error::TableInactive)
    }

    fn load(&mut self) -> Result<()> {
        let child_order = Order::ascending(&self.definition.child_columns);
        let definition =
            TableDefinition::new("explode", Arc::clone(self.source.row_type())).with_order(child_order.clone());
        let table = Arc::new(MultiIndexTable::create(
            Arc::clone(self.ctx.streams()),
            definition,
            self.ctx.config().index,
        )?);
        let loaded = drain(&self.ctx, &mut *self.source, |row| table.insert(&row));
        let index = table.index_for(&child_order);
        match (loaded, index) {
            (Ok(rows), Some(index)) => {
                tracing::debug!(rows, "explode source loaded");
                self.child_index = index;
                self.table = Some(table);
                Ok(())
            }
            (Err(err), _) => {
                release_table(table);
                Err(err)
            }
            (Ok(_), None) => {
                release_table(table);
                Err(Error::InvalidDefinition("explode child index missing".into()))
            }
        }
    }

    /// Back to BOF with only the root level open.
    fn restart(&mut self) -> Result<()> {
        self.levels.clear();
        self.path.clear();
        self.pending = None;
        self.current = None;
        self.sequence = 0;
        let mut roots = Scan::new(Arc::clone(self.table()?), 0, ScanDirection::Forward);
        roots.open()?;
        self.levels.push(roots);
        self.state.set_bof();
        Ok(())
    }

    fn parent_key(&self, row: &Row) -> Result<Vec<Option<Value>>> {
        self.definition
            .parent_columns
            .iter()
            .map(|column| Ok(row.value(column)?.cloned()))
            .collect()
    }

    /// Open a level over the children of the row with `key`.
    fn descend(&mut self, key: Vec<Option<Value>>) -> Result<()> {
        let bound = Row::from_values(Arc::clone(&self.child_key_type), key.clone())?;
        let mut children = Scan::new(Arc::clone(self.table()?), self.child_index, ScanDirection::Forward)
            .with_bounds(Some(bound.clone()), Some(bound));
        children.open()?;
        self.levels.push(children);
        self.path.push(key);
        Ok(())
    }

    fn emit(&mut self, stored: &Row, level: usize) -> Result<()> {
        let mut row = Row::new(Arc::clone(self.state.row_type()));
        stored.copy_to(&mut row);
        row.set_value(&self.definition.level_column, Some(Value::Integer(level as i64)))?;
        self.sequence += 1;
        if let Some(sequence) = &self.definition.sequence_column {
            row.set_value(sequence, Some(Value::Integer(self.sequence)))?;
        }
        self.current = Some(row);
        self.state.set_on_row();
        Ok(())
    }
}

impl CursorOps for ExplodeCursor {
    fn row_type(&self) -> &Arc<RowType> {
        self.state.row_type()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NAVIGABLE
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    fn open(&mut self) -> Result<()> {
        if self.state.is_active() {
            return Ok(());
        }
        self.source.open()?;
        let opened = self.load().and_then(|()| {
            self.state.activate();
            self.restart()
        });
        if let Err(err) = opened {
            if let Err(close_err) = self.close() {
                tracing::warn!(error = %close_err, "failed to close explode after open failure");
            }
            return Err(err);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.levels.clear();
        self.path.clear();
        self.pending = None;
        self.current = None;
        if let Some(table) = self.table.take() {
            release_table(table);
        }
        self.state.deactivate();
        self.source.close()
    }

    fn first(&mut self) -> Result<()> {
        self.state.check_active()?;
        self.restart()
    }

    fn next(&mut self) -> Result<bool> {
        self.state.check_active()?;
        if self.state.eof() {
            return Ok(false);
        }
        if let Some(key) = self.pending.take() {
            self.descend(key)?;
        }
        loop {
            self.ctx.check_cancelled()?;
            let depth = self.levels.len();
            let Some(level) = self.levels.last_mut() else {
                let empty = self.sequence == 0;
                self.current = None;
                self.state.set_eof();
                if empty {
                    self.state.set_empty();
                }
                return Ok(false);
            };
            if !level.next()? {
                self.levels.pop();
                self.path.truncate(self.levels.len().saturating_sub(1));
                continue;
            }
            let stored = level.row()?.row;
            if depth == 1 && !(self.definition.root)(&stored)? {
                continue;
            }
            let key = self.parent_key(&stored)?;
            if depth > 1 && self.path.contains(&key) {
                return Err(Error::HierarchyCycle);
            }
            self.emit(&stored, depth)?;
            if key.iter().all(Option::is_some) {
                self.pending = Some(key);
            }
            return Ok(true);
        }
    }

    fn bof(&self) -> bool {
        self.state.bof()
    }

    fn eof(&self) -> bool {
        self.state.eof()
    }

    fn select(&mut self, row: &mut Row) -> Result<()> {
        self.state.check_on_row()?;
        let current = self.current.as_ref().ok_or(Error::NoCurrentRow)?;
        current.copy_to(row);
        Ok(())
    }

    /// Re-reads the source.
    fn reset(&mut self) -> Result<()> {
        self.state.check_active()?;
        self.levels.clear();
        if let Some(table) = self.table.take() {
            release_table(table);
        }
        self.source.reset()?;
        self.load()?;
        self.restart()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::base::TableCursor;
    use crate::execution::test_support::{context, int_table, rows_of};

    fn roots_where_parent_is_zero() -> Predicate {
        Arc::new(|row: &Row| Ok(row.value("parent")?.and_then(Value::as_integer) == Some(0)))
    }

    #[test]
    fn test_depth_first_with_levels() {
        let ctx = context();
        let table = int_table(
            &ctx,
            &["id", "parent"],
            Some(&["id"]),
            &[&[1, 0], &[2, 1], &[3, 1], &[4, 2], &[5, 0]],
        );
        let definition = ExplodeDefinition::new(roots_where_parent_is_zero(), &["id"], &["parent"]);
        let mut cursor = ExplodeCursor::new(ctx, Cursor::Table(TableCursor::new(table)), definition).unwrap();
        cursor.open().unwrap();
        assert_eq!(
            rows_of(&mut cursor, &["id", "level", "sequence"]),
            vec![
                vec![Some(1), Some(1), Some(1)],
                vec![Some(2), Some(2), Some(2)],
                vec![Some(4), Some(3), Some(3)],
                vec![Some(3), Some(2), Some(4)],
                vec![Some(5), Some(1), Some(5)],
            ]
        );
        assert!(cursor.eof());
        assert!(matches!(cursor.prior(), Err(Error::NotBackwardsNavigable)));
    }

    #[test]
    fn test_cycle_is_reported() {
        let ctx = context();
        let table = int_table(&ctx, &["id", "parent"], Some(&["id"]), &[&[1, 2], &[2, 1]]);
        let root: Predicate = Arc::new(|row: &Row| Ok(row.value("id")?.and_then(Value::as_integer) == Some(1)));
        let definition = ExplodeDefinition::new(root, &["id"], &["parent"]);
        let mut cursor = ExplodeCursor::new(ctx, Cursor::Table(TableCursor::new(table)), definition).unwrap();
        cursor.open().unwrap();
        assert!(cursor.next().unwrap());
        assert!(cursor.next().unwrap());
        assert!(matches!(cursor.next(), Err(Error::HierarchyCycle)));
    }

    #[test]
    fn test_output_names_must_be_free() {
        let ctx = context();
        let table = int_table(&ctx, &["id", "level"], Some(&["id"]), &[]);
        let definition = ExplodeDefinition::new(roots_where_parent_is_zero(), &["id"], &["level"]);
        assert!(matches!(
            ExplodeCursor::new(ctx, Cursor::Table(TableCursor::new(table)), definition),
            Err(Error::InvalidDefinition(_))
        ));
    }
}
