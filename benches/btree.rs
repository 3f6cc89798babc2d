//! B+Tree and join benchmarks.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relcore::execution::{
    count_rows, Cursor, CursorOps, ExecutionContext, JoinDefinition, JoinKind, MergeJoin, NestedLoopJoin,
    SearchedJoin, TableCursor,
};
use relcore::index::btree::{BTreeIndex, IntegerKeyHooks};
use relcore::storage::MemoryStreamManager;
use relcore::table::{MultiIndexTable, TableDefinition};
use relcore::types::{DataType, Order, Row, RowType, Value};
use relcore::IndexConfig;

fn populated(count: i64) -> BTreeIndex {
    let streams = Arc::new(MemoryStreamManager::new());
    let index = BTreeIndex::create(streams, Arc::new(IntegerKeyHooks), 8, 8, IndexConfig::default()).unwrap();
    for k in 0..count {
        index.insert(&IntegerKeyHooks::key(k), &IntegerKeyHooks::key(k)).unwrap();
    }
    index
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/insert");
    for count in [1_000i64, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.iter(|| black_box(populated(count)));
        });
    }
    group.finish();
}

fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/find_key");
    group.throughput(Throughput::Elements(1));
    let index = populated(10_000);
    group.bench_function("10k_entries", |b| {
        let mut k = 0i64;
        b.iter(|| {
            k = (k + 7919) % 10_000;
            black_box(index.find_key(&IntegerKeyHooks::key(k)).unwrap())
        });
    });
    group.finish();
}

fn table(ctx: &ExecutionContext, name: &str, rows: i64, modulo: i64) -> Arc<MultiIndexTable> {
    let row_type = Arc::new(RowType::of([(name, DataType::integer()), ("id", DataType::integer())]));
    let definition = TableDefinition::new(name, row_type.clone()).with_key(Order::ascending(&[name, "id"]));
    let table = MultiIndexTable::create(ctx.streams().clone(), definition, ctx.config().index).unwrap();
    for id in 0..rows {
        let values = vec![Some(Value::Integer(id % modulo)), Some(Value::Integer(id))];
        table.insert(&Row::from_values(row_type.clone(), values).unwrap()).unwrap();
    }
    Arc::new(table)
}

fn bench_joins(c: &mut Criterion) {
    let mut group = c.benchmark_group("join/inner");
    let ctx = ExecutionContext::new(Arc::new(MemoryStreamManager::new()));
    let left = table(&ctx, "k", 500, 100);
    let right = table(&ctx, "m", 100, 100);
    let definition = || JoinDefinition::on(JoinKind::Inner, &["k"], &["m"]).with_unique(false, true);
    let sources = || {
        (
            Cursor::Table(TableCursor::new(left.clone())),
            Cursor::Table(TableCursor::new(right.clone())),
        )
    };

    group.bench_function("nested_loop", |b| {
        b.iter(|| {
            let (l, r) = sources();
            let mut join = NestedLoopJoin::new(ctx.clone(), l, r, definition()).unwrap();
            join.open().unwrap();
            black_box(count_rows(&mut join).unwrap())
        });
    });
    group.bench_function("merge", |b| {
        b.iter(|| {
            let (l, r) = sources();
            let mut join = MergeJoin::new(ctx.clone(), l, r, definition()).unwrap();
            join.open().unwrap();
            black_box(count_rows(&mut join).unwrap())
        });
    });
    group.bench_function("searched", |b| {
        b.iter(|| {
            let (l, r) = sources();
            let mut join = SearchedJoin::new(ctx.clone(), l, r, definition()).unwrap();
            join.open().unwrap();
            black_box(count_rows(&mut join).unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_find, bench_joins);
criterion_main!(benches);
