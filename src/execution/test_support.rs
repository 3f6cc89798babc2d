//! Fixtures shared by the operator tests.

use std::sync::Arc;

use crate::common::{EngineConfig, IndexConfig};
use crate::execution::base::TableCursor;
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{select_row, Cursor, CursorOps};
use crate::storage::MemoryStreamManager;
use crate::table::{MultiIndexTable, TableDefinition};
use crate::types::{DataType, Order, Row, RowType, Value};

/// A context with tiny nodes so that a handful of rows already splits.
pub fn context() -> ExecutionContext {
    let index = IndexConfig::new(4, 3).unwrap();
    ExecutionContext::new(Arc::new(MemoryStreamManager::new())).with_config(EngineConfig { index })
}

pub fn table_of(ctx: &ExecutionContext, row_type: Arc<RowType>, key: Option<&[&str]>) -> Arc<MultiIndexTable> {
    let mut definition = TableDefinition::new("t", row_type);
    if let Some(key) = key {
        definition = definition.with_key(Order::ascending(key));
    }
    Arc::new(MultiIndexTable::create(Arc::clone(ctx.streams()), definition, ctx.config().index).unwrap())
}

/// A table of integer columns holding `rows`.
pub fn int_table(
    ctx: &ExecutionContext,
    columns: &[&str],
    key: Option<&[&str]>,
    rows: &[&[i64]],
) -> Arc<MultiIndexTable> {
    let row_type = Arc::new(RowType::of(columns.iter().map(|name| (*name, DataType::integer()))));
    let table = table_of(ctx, Arc::clone(&row_type), key);
    for values in rows {
        let values = values.iter().map(|v| Some(Value::Integer(*v))).collect();
        table.insert(&Row::from_values(Arc::clone(&row_type), values).unwrap()).unwrap();
    }
    table
}

/// A cursor over a table keyed on its single column `n`.
pub fn numbers_cursor(numbers: impl IntoIterator<Item = i64>) -> (ExecutionContext, Cursor) {
    let ctx = context();
    let rows: Vec<[i64; 1]> = numbers.into_iter().map(|n| [n]).collect();
    let rows: Vec<&[i64]> = rows.iter().map(|r| r.as_slice()).collect();
    let table = int_table(&ctx, &["n"], Some(&["n"]), &rows);
    (ctx, Cursor::Table(TableCursor::new(table)))
}

/// A row of `cursor`'s type whose first column is `n`.
pub fn ints(cursor: &impl CursorOps, n: i64) -> Row {
    let mut row = Row::new(Arc::clone(cursor.row_type()));
    row.set(0, Some(Value::Integer(n)));
    row
}

/// First column of every row, from the start.
pub fn values(cursor: &mut impl CursorOps) -> Vec<i64> {
    cursor.first().unwrap();
    let mut out = Vec::new();
    while cursor.next().unwrap() {
        let row = select_row(cursor).unwrap();
        out.extend(row.get(0).and_then(Value::as_integer));
    }
    out
}

/// The named columns of every row, from the start.
pub fn rows_of(cursor: &mut impl CursorOps, columns: &[&str]) -> Vec<Vec<Option<i64>>> {
    cursor.first().unwrap();
    let mut out = Vec::new();
    while cursor.next().unwrap() {
        let row = select_row(cursor).unwrap();
        out.push(
            columns
                .iter()
                .map(|name| row.value(name).unwrap().and_then(Value::as_integer))
                .collect(),
        );
    }
    out
}
