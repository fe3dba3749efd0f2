//! Write-ahead log throughput under sustained point writes.
//!
//! Not load-bearing for correctness — these numbers exist to catch
//! regressions in the append/flush path, not to gate a merge.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use kvdb::{Database, EngineConfig, TypedValue};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

fn setup_db(durability: kvdb::DurabilityMode) -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = EngineConfig { durability_mode: durability, ..EngineConfig::default() };
    let db = Database::open_with_config(temp_dir.path(), config).unwrap();
    (db, temp_dir)
}

fn bench_put_standard_durability(c: &mut Criterion) {
    let (db, _temp) = setup_db(kvdb::DurabilityMode::Standard);

    let mut group = c.benchmark_group("wal");
    group.throughput(Throughput::Elements(1));

    let counter = AtomicU64::new(0);
    group.bench_function("put_standard", |b| {
        b.iter(|| {
            let i = counter.fetch_add(1, Ordering::SeqCst);
            db.put(&format!("key{i}"), TypedValue::Int(i as i64)).unwrap()
        })
    });
    group.finish();
}

fn bench_put_always_durability(c: &mut Criterion) {
    let (db, _temp) = setup_db(kvdb::DurabilityMode::Always);

    let mut group = c.benchmark_group("wal");
    group.throughput(Throughput::Elements(1));

    let counter = AtomicU64::new(0);
    group.bench_function("put_always_fsync", |b| {
        b.iter(|| {
            let i = counter.fetch_add(1, Ordering::SeqCst);
            db.put(&format!("key{i}"), TypedValue::Int(i as i64)).unwrap()
        })
    });
    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let (db, _temp) = setup_db(kvdb::DurabilityMode::Standard);
    for i in 0..1000 {
        db.put(&format!("key{i}"), TypedValue::Int(i as i64)).unwrap();
    }

    let mut group = c.benchmark_group("wal");
    group.throughput(Throughput::Elements(1));

    let counter = AtomicU64::new(0);
    group.bench_function("delete", |b| {
        b.iter(|| {
            let i = counter.fetch_add(1, Ordering::SeqCst) % 1000;
            db.del(&format!("key{i}")).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_put_standard_durability, bench_put_always_durability, bench_delete);
criterion_main!(benches);
