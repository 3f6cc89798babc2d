//! Base table access: a cursor over one index of a [`MultiIndexTable`].

use std::cmp::Ordering;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::execution::cursor::{Capabilities, CursorOps, CursorState, CursorType};
use crate::table::{MultiIndexTable, Scan, ScanDirection, StoredRow};
use crate::types::{Order, Row, RowType};

/// The leaf operator of every plan.
///
/// Navigation, bookmarks and key search go straight to a [`Scan`]; writes go
/// to the table, so every other open scan on it follows the change.
pub struct TableCursor {
    state: CursorState,
    table: Arc<MultiIndexTable>,
    scan: Scan,
    order: Option<Order>,
    cursor_type: CursorType,
}

fn no_current_row(err: Error) -> Error {
    match err {
        Error::NoActiveRow => Error::NoCurrentRow,
        Error::ScanInactive => Error::TableInactive,
        other => other,
    }
}

impl TableCursor {
    /// A forward cursor over the clustered index.
    pub fn new(table: Arc<MultiIndexTable>) -> Self {
        Self::on_index(table, 0, ScanDirection::Forward)
    }

    /// A cursor over index `ordinal` in `direction`.
    pub fn on_index(table: Arc<MultiIndexTable>, ordinal: usize, direction: ScanDirection) -> Self {
        let index_order = table.index(ordinal).order();
        let order = match direction {
            _ if index_order.is_empty() => None,
            ScanDirection::Forward => Some(index_order.clone()),
            ScanDirection::Backward => Some(index_order.reversed()),
        };
        Self {
            state: CursorState::new(Arc::clone(table.row_type())),
            scan: Scan::new(Arc::clone(&table), ordinal, direction),
            table,
            order,
            cursor_type: CursorType::Static,
        }
    }

    /// A cursor producing rows in `order`, walking an index forward or
    /// backward as needed.
    ///
    /// # Errors
    /// Returns `Error::InvalidDefinition` if no index supports `order`.
    pub fn ordered(table: Arc<MultiIndexTable>, order: &Order) -> Result<Self> {
        if let Some(ordinal) = table.index_for(order) {
            return Ok(Self::on_index(table, ordinal, ScanDirection::Forward));
        }
        if let Some(ordinal) = table.index_for(&order.reversed()) {
            return Ok(Self::on_index(table, ordinal, ScanDirection::Backward));
        }
        Err(Error::InvalidDefinition(format!(
            "no index of {} supports order ({})",
            table.name(),
            order.names().collect::<Vec<_>>().join(", ")
        )))
    }

    /// Restrict the cursor to keys between `first` and `last`, in cursor
    /// order. Fails with `Error::TableActive` once open.
    pub fn with_bounds(mut self, first: Option<Row>, last: Option<Row>) -> Result<Self> {
        self.state.check_inactive()?;
        let scan = Scan::new(Arc::clone(&self.table), self.scan.ordinal(), self.scan.direction());
        self.scan = scan.with_bounds(first, last);
        Ok(self)
    }

    pub fn with_cursor_type(mut self, cursor_type: CursorType) -> Self {
        self.cursor_type = cursor_type;
        self
    }

    #[inline]
    pub fn table(&self) -> &Arc<MultiIndexTable> {
        &self.table
    }

    /// Close the cursor and hand back its table.
    pub fn into_table(mut self) -> Arc<MultiIndexTable> {
        self.scan.close();
        self.table
    }

    fn current(&self) -> Result<StoredRow> {
        self.state.check_active()?;
        self.scan.row().map_err(no_current_row)
    }
}

impl CursorOps for TableCursor {
    fn row_type(&self) -> &Arc<RowType> {
        self.state.row_type()
    }

    fn capabilities(&self) -> Capabilities {
        let all = Capabilities::all();
        if self.order.is_some() {
            all
        } else {
            all.without(Capabilities::SEARCHABLE)
        }
    }

    fn cursor_type(&self) -> CursorType {
        self.cursor_type
    }

    fn order(&self) -> Option<Order> {
        self.order.clone()
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    fn open(&mut self) -> Result<()> {
        if self.state.is_active() {
            return Ok(());
        }
        self.scan.open()?;
        self.state.activate();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.scan.close();
        self.state.deactivate();
        Ok(())
    }

    fn first(&mut self) -> Result<()> {
        self.state.check_active()?;
        self.scan.first()
    }

    fn last(&mut self) -> Result<()> {
        self.state.check_active()?;
        self.scan.last()
    }

    fn next(&mut self) -> Result<bool> {
        self.state.check_active()?;
        self.scan.next()
    }

    fn prior(&mut self) -> Result<bool> {
        self.state.check_active()?;
        self.scan.prior()
    }

    fn bof(&self) -> bool {
        self.scan.bof()
    }

    fn eof(&self) -> bool {
        self.scan.eof()
    }

    fn select(&mut self, row: &mut Row) -> Result<()> {
        self.state.check_active()?;
        self.scan.get_row(row).map_err(no_current_row)
    }

    fn get_bookmark(&mut self) -> Result<Row> {
        self.state.check_active()?;
        self.scan.get_bookmark().map_err(no_current_row)
    }

    fn goto_bookmark(&mut self, bookmark: &Row) -> Result<bool> {
        self.state.check_active()?;
        self.scan.goto_bookmark(bookmark)
    }

    fn compare_bookmarks(&mut self, a: &Row, b: &Row) -> Result<Ordering> {
        self.scan.compare_bookmarks(a, b)
    }

    fn get_key(&mut self) -> Result<Row> {
        self.capabilities().require(Capabilities::SEARCHABLE)?;
        self.state.check_active()?;
        self.scan.get_key().map_err(no_current_row)
    }

    fn find_key(&mut self, key: &Row) -> Result<bool> {
        self.capabilities().require(Capabilities::SEARCHABLE)?;
        self.state.check_active()?;
        self.scan.find_key(key)
    }

    fn find_nearest(&mut self, key: &Row) -> Result<bool> {
        self.capabilities().require(Capabilities::SEARCHABLE)?;
        self.state.check_active()?;
        self.scan.find_nearest(key)
    }

    /// Land on `row` itself if it is still stored, otherwise on the nearest
    /// row by this cursor's key.
    fn refresh(&mut self, row: &Row) -> Result<bool> {
        self.state.check_active()?;
        if self.scan.goto_bookmark(row)? {
            return Ok(true);
        }
        if self.order.is_none() {
            self.scan.first()?;
            return Ok(false);
        }
        self.scan.find_nearest(row)
    }

    fn count(&mut self) -> Result<usize> {
        self.state.check_active()?;
        self.scan.count()
    }

    fn insert(&mut self, row: &Row) -> Result<()> {
        self.state.check_active()?;
        self.table.insert(row)?;
        if self.cursor_type == CursorType::Dynamic {
            self.refresh(row)?;
        }
        Ok(())
    }

    /// Replace the current row; columns `row` does not carry keep their
    /// stored values.
    fn update(&mut self, row: &Row) -> Result<()> {
        let current = self.current()?;
        let mut updated = current.row.clone();
        row.copy_to(&mut updated);
        self.table.update(&self.table.bookmark_of(&current), &updated)?;
        if self.cursor_type == CursorType::Dynamic {
            self.refresh(&updated)?;
        }
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        let current = self.current()?;
        self.table.delete(&self.table.bookmark_of(&current))
    }

    fn truncate(&mut self) -> Result<()> {
        self.state.check_active()?;
        self.table.truncate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IndexConfig;
    use crate::execution::cursor::select_row;
    use crate::storage::MemoryStreamManager;
    use crate::table::TableDefinition;
    use crate::types::{DataType, OrderColumn, Value};

    fn employees() -> Arc<MultiIndexTable> {
        let row_type = Arc::new(RowType::of([
            ("id", DataType::integer()),
            ("dept", DataType::text()),
        ]));
        let definition = TableDefinition::new("employees", row_type.clone())
            .with_key(Order::ascending(&["id"]))
            .with_order(Order::ascending(&["dept"]));
        let table = MultiIndexTable::create(
            Arc::new(MemoryStreamManager::new()),
            definition,
            IndexConfig::new(4, 3).unwrap(),
        )
        .unwrap();
        for (id, dept) in [(1, "A"), (2, "B"), (3, "A"), (4, "C")] {
            let row = Row::from_values(
                row_type.clone(),
                vec![Some(Value::Integer(id)), Some(Value::from(dept))],
            )
            .unwrap();
            table.insert(&row).unwrap();
        }
        Arc::new(table)
    }

    fn ids(cursor: &mut TableCursor) -> Vec<i64> {
        cursor.first().unwrap();
        let mut out = Vec::new();
        while cursor.next().unwrap() {
            let row = select_row(cursor).unwrap();
            out.push(row.get(0).and_then(Value::as_integer).unwrap());
        }
        out
    }

    fn id_row(cursor: &TableCursor, id: i64) -> Row {
        let key_type = Arc::new(cursor.table().row_type().project(&["id"]).unwrap());
        Row::from_values(key_type, vec![Some(Value::Integer(id))]).unwrap()
    }

    #[test]
    fn test_requires_open() {
        let mut cursor = TableCursor::new(employees());
        assert!(matches!(cursor.next(), Err(Error::TableInactive)));
        cursor.open().unwrap();
        assert!(cursor.bof());
        let mut row = Row::new(cursor.row_type().clone());
        assert!(matches!(cursor.select(&mut row), Err(Error::NoCurrentRow)));
        cursor.close().unwrap();
        cursor.close().unwrap();
    }

    #[test]
    fn test_ordered_picks_index_and_direction() {
        let table = employees();
        let mut by_id_desc = TableCursor::ordered(table.clone(), &Order::new(vec![OrderColumn::desc("id")])).unwrap();
        by_id_desc.open().unwrap();
        assert_eq!(ids(&mut by_id_desc), vec![4, 3, 2, 1]);

        let mut by_dept = TableCursor::ordered(table.clone(), &Order::ascending(&["dept"])).unwrap();
        by_dept.open().unwrap();
        let depts = ids(&mut by_dept);
        assert_eq!(depts.len(), 4);
        assert_eq!(depts[3], 4);

        assert!(matches!(
            TableCursor::ordered(table, &Order::ascending(&["missing"])),
            Err(Error::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_writes_through_cursor() {
        let mut cursor = TableCursor::new(employees());
        cursor.open().unwrap();
        assert!(cursor.find_key(&id_row(&cursor, 2)).unwrap());
        cursor.delete().unwrap();
        assert_eq!(cursor.count().unwrap(), 3);
        assert!(cursor.next().unwrap());
        assert_eq!(select_row(&mut cursor).unwrap().get(0), Some(&Value::Integer(3)));

        let dept_type = Arc::new(cursor.row_type().project(&["dept"]).unwrap());
        let change = Row::from_values(dept_type, vec![Some(Value::from("Z"))]).unwrap();
        cursor.update(&change).unwrap();
        let row = cursor.table().find_row(&id_row(&cursor, 3)).unwrap().unwrap();
        assert_eq!(row.value("dept").unwrap(), Some(&Value::from("Z")));

        cursor.truncate().unwrap();
        assert_eq!(ids(&mut cursor), Vec::<i64>::new());
    }

    #[test]
    fn test_dynamic_insert_moves_to_row() {
        let mut cursor = TableCursor::new(employees()).with_cursor_type(CursorType::Dynamic);
        cursor.open().unwrap();
        let row = Row::from_values(
            cursor.row_type().clone(),
            vec![Some(Value::Integer(9)), Some(Value::from("D"))],
        )
        .unwrap();
        cursor.insert(&row).unwrap();
        assert_eq!(select_row(&mut cursor).unwrap(), row);
    }

    #[test]
    fn test_bounds_must_be_set_while_closed() {
        let table = employees();
        let mut cursor = TableCursor::new(table);
        let (first, last) = (id_row(&cursor, 2), id_row(&cursor, 3));
        cursor.open().unwrap();
        assert!(matches!(
            cursor.with_bounds(Some(first.clone()), Some(last.clone())),
            Err(Error::TableActive)
        ));

        let mut bounded = TableCursor::new(employees())
            .with_bounds(Some(first), Some(last))
            .unwrap();
        bounded.open().unwrap();
        assert_eq!(ids(&mut bounded), vec![2, 3]);
        assert_eq!(bounded.count().unwrap(), 2);
    }
}
