//! Index lookup throughput across the secondary, composite, and
//! full-text index kinds.
//!
//! Not load-bearing for correctness — these numbers exist to catch
//! regressions in the lookup path, not to gate a merge.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use kvdb::{Database, IndexKind, IndexQuery, TypedValue};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

fn setup_populated_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    for i in 0..1000 {
        db.put(&format!("key{i}"), TypedValue::Int(i % 100)).unwrap();
    }
    db.create_index(IndexKind::Secondary, "by_value", &["value".to_string()]).unwrap();
    db.create_index(IndexKind::FullText, "by_text", &["value".to_string()]).unwrap();
    (db, temp_dir)
}

fn bench_secondary_exact(c: &mut Criterion) {
    let (db, _temp) = setup_populated_db();

    let mut group = c.benchmark_group("index");
    group.throughput(Throughput::Elements(1));

    let counter = AtomicU64::new(0);
    group.bench_function("secondary_exact", |b| {
        b.iter(|| {
            let i = counter.fetch_add(1, Ordering::SeqCst) % 100;
            db.lookup("by_value", &IndexQuery::Exact(&[&i.to_string()]))
        })
    });
    group.finish();
}

fn bench_secondary_range(c: &mut Criterion) {
    let (db, _temp) = setup_populated_db();

    let mut group = c.benchmark_group("index");
    group.throughput(Throughput::Elements(1));

    group.bench_function("secondary_range", |b| {
        b.iter(|| db.lookup("by_value", &IndexQuery::Range(&["10"], &["20"])))
    });
    group.finish();
}

fn bench_query_plan(c: &mut Criterion) {
    let (db, _temp) = setup_populated_db();

    let mut group = c.benchmark_group("index");
    group.throughput(Throughput::Elements(1));

    group.bench_function("plan_query", |b| {
        b.iter(|| {
            db.plan_query(
                &[kvdb::QueryCondition::new("value", kvdb::ConditionOperator::Eq, "42")],
                true,
            )
        })
    });
    group.finish();
}

criterion_group!(benches, bench_secondary_exact, bench_secondary_range, bench_query_plan);
criterion_main!(benches);
