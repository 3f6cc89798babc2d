//! Join algorithms agree with each other and with a brute-force count.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use relcore::execution::{
    count_rows, select_row, Cursor, CursorOps, ExecutionContext, JoinDefinition, JoinKind, MergeJoin, NestedLoopJoin,
    Predicate, SearchedJoin, TableCursor,
};
use relcore::storage::MemoryStreamManager;
use relcore::table::{MultiIndexTable, TableDefinition};
use relcore::types::{DataType, Order, Row, RowType, Value};
use relcore::{EngineConfig, IndexConfig};

fn context() -> ExecutionContext {
    let config = EngineConfig::with_index(IndexConfig::new(4, 3).unwrap());
    ExecutionContext::new(Arc::new(MemoryStreamManager::new())).with_config(config)
}

fn table(ctx: &ExecutionContext, columns: &[&str], key: &[&str], rows: &[Vec<i64>]) -> Arc<MultiIndexTable> {
    let rows: Vec<Vec<Option<i64>>> = rows.iter().map(|values| values.iter().copied().map(Some).collect()).collect();
    nullable_table(ctx, columns, key, &rows)
}

fn nullable_table(
    ctx: &ExecutionContext,
    columns: &[&str],
    key: &[&str],
    rows: &[Vec<Option<i64>>],
) -> Arc<MultiIndexTable> {
    let row_type = Arc::new(RowType::of(columns.iter().map(|c| (*c, DataType::integer()))));
    let definition = TableDefinition::new("t", row_type.clone()).with_key(Order::ascending(key));
    let table = MultiIndexTable::create(ctx.streams().clone(), definition, ctx.config().index).unwrap();
    for values in rows {
        let values = values.iter().map(|v| v.map(Value::Integer)).collect();
        table.insert(&Row::from_values(row_type.clone(), values).unwrap()).unwrap();
    }
    Arc::new(table)
}

/// Left rows `(k, l)` with repeated `k`; right rows `(m)` with unique `m`.
fn sources(ctx: &ExecutionContext, left: &[(i64, i64)], right: &[i64]) -> (Cursor, Cursor) {
    let left: Vec<Vec<i64>> = left.iter().map(|(k, l)| vec![*k, *l]).collect();
    let right: Vec<Vec<i64>> = right.iter().map(|m| vec![*m]).collect();
    (
        Cursor::Table(TableCursor::new(table(ctx, &["k", "l"], &["k", "l"], &left))),
        Cursor::Table(TableCursor::new(table(ctx, &["m"], &["m"], &right))),
    )
}

fn definition(kind: JoinKind) -> JoinDefinition {
    JoinDefinition::on(kind, &["k"], &["m"]).with_unique(false, true)
}

fn join_all(kind: JoinKind, left: &[(i64, i64)], right: &[i64]) -> Vec<Cursor> {
    let ctx = context();
    join_all_with(&ctx, || sources(&ctx, left, right), || definition(kind))
}

/// The same join run by every algorithm.
fn join_all_with(
    ctx: &ExecutionContext,
    sources: impl Fn() -> (Cursor, Cursor),
    definition: impl Fn() -> JoinDefinition,
) -> Vec<Cursor> {
    let (l, r) = sources();
    let nested = NestedLoopJoin::new(ctx.clone(), l, r, definition()).unwrap();
    let (l, r) = sources();
    let merge = MergeJoin::new(ctx.clone(), l, r, definition()).unwrap();
    let (l, r) = sources();
    let searched = SearchedJoin::new(ctx.clone(), l, r, definition()).unwrap();
    vec![
        Cursor::NestedLoopJoin(nested),
        Cursor::MergeJoin(merge),
        Cursor::SearchedJoin(searched),
    ]
}

fn pairs(cursor: &mut Cursor) -> Vec<(Option<i64>, Option<i64>)> {
    cursor.first().unwrap();
    let mut out = Vec::new();
    while cursor.next().unwrap() {
        let row = select_row(cursor).unwrap();
        let get = |name: &str| row.value(name).unwrap().and_then(Value::as_integer);
        out.push((get("l"), get("m")));
    }
    out.sort();
    out
}

/// Merge join over a non-unique left key and a unique right key.
#[test]
fn test_merge_join_duplicate_left_keys() {
    let ctx = context();
    let (left, right) = sources(&ctx, &[(1, 100), (1, 101), (2, 102)], &[1, 2, 3]);
    let mut join = MergeJoin::new(ctx, left, right, definition(JoinKind::Inner)).unwrap();
    join.open().unwrap();
    let mut keys = Vec::new();
    while join.next().unwrap() {
        let row = select_row(&mut join).unwrap();
        keys.push((
            row.value("k").unwrap().and_then(Value::as_integer).unwrap(),
            row.value("m").unwrap().and_then(Value::as_integer).unwrap(),
        ));
    }
    assert_eq!(keys, vec![(1, 1), (1, 1), (2, 2)]);
    join.close().unwrap();
}

#[test]
fn test_times_pairs_everything() {
    let ctx = context();
    let (left, right) = sources(&ctx, &[(1, 1), (2, 2)], &[7, 8, 9]);
    let mut join = NestedLoopJoin::new(ctx, left, right, JoinDefinition::times()).unwrap();
    join.open().unwrap();
    assert_eq!(count_rows(&mut join).unwrap(), 6);
}

#[test]
fn test_predicate_filters_matches() {
    let ctx = context();
    let odd_l = || -> Predicate {
        Arc::new(|row: &Row| Ok(row.value("l")?.and_then(Value::as_integer).is_some_and(|l| l % 2 == 1)))
    };
    let joins = join_all_with(
        &ctx,
        || sources(&ctx, &[(1, 1), (1, 2), (2, 3)], &[1, 2]),
        || definition(JoinKind::LeftOuter).with_predicate(odd_l()),
    );
    for mut join in joins {
        join.open().unwrap();
        assert_eq!(
            pairs(&mut join),
            vec![(Some(1), Some(1)), (Some(2), None), (Some(3), Some(2))]
        );
    }
}

#[test]
fn test_nil_keys_are_unmatched() {
    let ctx = context();
    let nullable_sources = || {
        let left = vec![vec![None, Some(1)], vec![Some(1), Some(2)], vec![Some(2), Some(3)]];
        let right = vec![vec![None], vec![Some(1)]];
        (
            Cursor::Table(TableCursor::new(nullable_table(&ctx, &["k", "l"], &["k", "l"], &left))),
            Cursor::Table(TableCursor::new(nullable_table(&ctx, &["m"], &["m"], &right))),
        )
    };
    for mut join in join_all_with(&ctx, nullable_sources, || definition(JoinKind::LeftOuter)) {
        join.open().unwrap();
        assert_eq!(
            pairs(&mut join),
            vec![(Some(1), None), (Some(2), Some(1)), (Some(3), None)]
        );
    }
    for mut join in join_all_with(&ctx, nullable_sources, || definition(JoinKind::Inner)) {
        join.open().unwrap();
        assert_eq!(pairs(&mut join), vec![(Some(2), Some(1))]);
    }
}

#[test]
fn test_empty_join_sets_both_cracks() {
    let ctx = context();
    let (left, right) = sources(&ctx, &[(5, 5)], &[1]);
    let mut join = MergeJoin::new(ctx, left, right, definition(JoinKind::Inner)).unwrap();
    join.open().unwrap();
    assert!(!join.next().unwrap());
    assert!(join.bof() && join.eof());
}

fn left_rows() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::btree_set((0i64..8, 0i64..1000), 0..25).prop_map(|set| set.into_iter().collect())
}

fn right_keys() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(0i64..8, 0..8).prop_map(|set| set.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_algorithms_agree(left in left_rows(), right in right_keys()) {
        let right_set: BTreeSet<i64> = right.iter().copied().collect();
        let matches = left.iter().filter(|(k, _)| right_set.contains(k)).count();
        let unmatched = left.len() - matches;

        let mut expected = None;
        for mut join in join_all(JoinKind::Inner, &left, &right) {
            join.open().unwrap();
            let rows = pairs(&mut join);
            prop_assert_eq!(rows.len(), matches);
            match &expected {
                None => expected = Some(rows),
                Some(first) => prop_assert_eq!(first, &rows),
            }
            join.close().unwrap();
        }

        for mut join in join_all(JoinKind::LeftOuter, &left, &right) {
            join.open().unwrap();
            let rows = pairs(&mut join);
            prop_assert_eq!(rows.len(), matches + unmatched);
            prop_assert_eq!(rows.iter().filter(|(_, m)| m.is_none()).count(), unmatched);
        }
    }
}
