//! Private tables that operators fill from their sources.

use std::sync::Arc;

use crate::codec::TableWriter;
use crate::common::{Error, Result};
use crate::execution::base::TableCursor;
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{select_row, Capabilities, CursorOps};
use crate::table::{MultiIndexTable, TableDefinition};
use crate::types::{Order, Row};

/// A temporary table and the cursor reading it back.
///
/// Owned by one operator between `open` and `close`.
pub(crate) struct Materialized {
    cursor: TableCursor,
}

impl Materialized {
    /// Create a table from `definition`, let `fill` load it, and open a
    /// cursor over it in `order` (clustering order when `None`).
    pub fn build(
        ctx: &ExecutionContext,
        definition: TableDefinition,
        order: Option<&Order>,
        fill: impl FnOnce(&MultiIndexTable) -> Result<()>,
    ) -> Result<Self> {
        let table = Arc::new(MultiIndexTable::create(
            Arc::clone(ctx.streams()),
            definition,
            ctx.config().index,
        )?);
        let opened = fill(&table).and_then(|()| {
            let mut cursor = match order {
                Some(order) => TableCursor::ordered(Arc::clone(&table), order)?,
                None => TableCursor::new(Arc::clone(&table)),
            };
            cursor.open()?;
            Ok(cursor)
        });
        match opened {
            Ok(cursor) => {
                tracing::debug!(table = table.name(), rows = table.count().unwrap_or_default(), "materialized");
                Ok(Self { cursor })
            }
            Err(err) => {
                release_table(table);
                Err(err)
            }
        }
    }

    #[inline]
    pub fn cursor(&mut self) -> &mut TableCursor {
        &mut self.cursor
    }

    #[inline]
    pub fn cursor_ref(&self) -> &TableCursor {
        &self.cursor
    }

    #[inline]
    pub fn table(&self) -> &Arc<MultiIndexTable> {
        self.cursor.table()
    }

    /// Capabilities a read-only materialization offers.
    pub fn capabilities(&self) -> Capabilities {
        self.cursor
            .capabilities()
            .without(Capabilities::UPDATEABLE | Capabilities::TRUNCATEABLE)
    }

    /// Close the cursor and free the table's streams.
    pub fn release(self) {
        release_table(self.cursor.into_table());
    }
}

/// The open materialization's cursor, or `Error::TableInactive`.
pub(crate) fn materialized(rows: &mut Option<Materialized>) -> Result<&mut TableCursor> {
    rows.as_mut().map(Materialized::cursor).ok_or(Error::TableInactive)
}

/// Navigation, bookmark, search and count operations served by a
/// `Option<Materialized>` field.
macro_rules! delegate_to_materialized {
    ($rows:ident) => {
        fn first(&mut self) -> $crate::common::Result<()> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.first()
        }

        fn last(&mut self) -> $crate::common::Result<()> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.last()
        }

        fn next(&mut self) -> $crate::common::Result<bool> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.next()
        }

        fn prior(&mut self) -> $crate::common::Result<bool> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.prior()
        }

        fn bof(&self) -> bool {
            self.$rows.as_ref().map_or(true, |rows| rows.cursor_ref().bof())
        }

        fn eof(&self) -> bool {
            self.$rows.as_ref().map_or(false, |rows| rows.cursor_ref().eof())
        }

        fn select(&mut self, row: &mut $crate::types::Row) -> $crate::common::Result<()> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.select(row)
        }

        fn get_bookmark(&mut self) -> $crate::common::Result<$crate::types::Row> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.get_bookmark()
        }

        fn goto_bookmark(&mut self, bookmark: &$crate::types::Row) -> $crate::common::Result<bool> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.goto_bookmark(bookmark)
        }

        fn compare_bookmarks(
            &mut self,
            a: &$crate::types::Row,
            b: &$crate::types::Row,
        ) -> $crate::common::Result<std::cmp::Ordering> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.compare_bookmarks(a, b)
        }

        fn get_key(&mut self) -> $crate::common::Result<$crate::types::Row> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.get_key()
        }

        fn find_key(&mut self, key: &$crate::types::Row) -> $crate::common::Result<bool> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.find_key(key)
        }

        fn find_nearest(&mut self, key: &$crate::types::Row) -> $crate::common::Result<bool> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.find_nearest(key)
        }

        fn refresh(&mut self, row: &$crate::types::Row) -> $crate::common::Result<bool> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.refresh(row)
        }

        fn count(&mut self) -> $crate::common::Result<usize> {
            $crate::execution::materialize::materialized(&mut self.$rows)?.count()
        }
    };
}

pub(crate) use delegate_to_materialized;

/// Dispose a temporary table once no scan holds it.
pub(crate) fn release_table(table: Arc<MultiIndexTable>) {
    match Arc::try_unwrap(table) {
        Ok(table) => {
            let name = table.name().to_string();
            if let Err(err) = table.dispose() {
                tracing::warn!(error = %err, table = %name, "failed to dispose temporary table");
            }
        }
        Err(table) => {
            tracing::warn!(table = table.name(), "temporary table still referenced; streams not freed");
        }
    }
}

/// Insert `row`, treating a duplicate key as already present.
pub(crate) fn insert_distinct(table: &MultiIndexTable, row: &Row) -> Result<bool> {
    match table.insert(row) {
        Ok(()) => Ok(true),
        Err(Error::DuplicateKey) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Walk `source` from BOF, handing each row to `each`.
pub(crate) fn drain(
    ctx: &ExecutionContext,
    source: &mut impl CursorOps,
    mut each: impl FnMut(Row) -> Result<()>,
) -> Result<usize> {
    source.first()?;
    let mut rows = 0;
    while source.next()? {
        ctx.check_cancelled()?;
        each(select_row(source)?)?;
        rows += 1;
    }
    Ok(rows)
}

/// Encode every row of `cursor` in the table transfer format.
pub fn encode_cursor(ctx: &ExecutionContext, cursor: &mut impl CursorOps) -> Result<Vec<u8>> {
    let mut writer = TableWriter::new();
    drain(ctx, cursor, |row| writer.push(&row))?;
    writer.finish()
}
