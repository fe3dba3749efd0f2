//! The six literal end-to-end scenarios (spec §8), each driven through
//! `Database` since it's the only type that can exercise the WAL,
//! memtable, and index layers together.

use kvdb_core::TypedValue;
use kvdb_search::{IndexKind, IndexQuery};
use tempfile::tempdir;

use crate::config::EngineConfig;
use crate::database::Database;

fn str_value(s: &str) -> TypedValue {
    TypedValue::String(s.to_string())
}

#[test]
fn crash_recovery_roundtrip() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.put("a", str_value("1")).unwrap(), 1);
        assert_eq!(db.put("b", str_value("2")).unwrap(), 2);
        assert_eq!(db.del("a").unwrap(), 3);
        assert_eq!(db.get_snapshot(), 3);
    }

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.get("a"), None);
    assert_eq!(db.get("b"), Some(str_value("2")));
    assert_eq!(db.get_snapshot(), 3);
}

#[test]
fn segment_rollover_preserves_all_entries_in_order() {
    let dir = tempdir().unwrap();
    let config = EngineConfig { wal_max_segment_size: 1024, ..EngineConfig::default() };
    let db = Database::open_with_config(dir.path(), config).unwrap();

    for i in 0..100 {
        db.put(&format!("key-{i:04}"), str_value(&"x".repeat(20))).unwrap();
    }

    let wal_dir = dir.path().join("wal");
    let segment_files: Vec<_> = std::fs::read_dir(&wal_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("wal_segment_"))
        .collect();
    assert!(segment_files.len() >= 2, "expected segment rollover, got {} segment(s)", segment_files.len());

    assert_eq!(db.get_snapshot(), 100);
    for i in 0..100 {
        assert!(db.get(&format!("key-{i:04}")).is_some());
    }
}

#[test]
fn snapshot_isolation_between_two_readers() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();

    let snapshot_1 = db.acquire_snapshot();
    db.put("x", TypedValue::Int(10)).unwrap();
    let snapshot_2 = db.acquire_snapshot();

    assert_eq!(db.get_at("x", snapshot_1), None);
    assert_eq!(db.get_at("x", snapshot_2), Some(TypedValue::Int(10)));

    db.release_snapshot(snapshot_1);
    db.release_snapshot(snapshot_2);
}

#[test]
fn secondary_index_correctness() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();

    db.put("k1", str_value("10")).unwrap();
    db.put("k2", str_value("20")).unwrap();
    db.put("k3", str_value("20")).unwrap();
    db.create_index(IndexKind::Secondary, "by_value", &["value".to_string()]).unwrap();

    let exact = db.lookup("by_value", &IndexQuery::Exact(&["20"]));
    let mut exact_keys = exact.keys.clone();
    exact_keys.sort();
    assert_eq!(exact_keys, vec!["k2".to_string(), "k3".to_string()]);

    let range = db.lookup("by_value", &IndexQuery::Range(&["10"], &["15"]));
    assert_eq!(range.keys, vec!["k1".to_string()]);

    db.del("k2").unwrap();
    let after_delete = db.lookup("by_value", &IndexQuery::Exact(&["20"]));
    assert_eq!(after_delete.keys, vec!["k3".to_string()]);
}

#[test]
fn positional_phrase_search_respects_max_distance() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();

    db.put("d1", str_value("the quick brown fox jumps")).unwrap();
    db.put("d2", str_value("brown fox")).unwrap();
    db.create_index(IndexKind::Positional, "body", &["value".to_string()]).unwrap();

    let tight = db.lookup("body", &IndexQuery::Phrase("brown fox", 0));
    let mut tight_keys = tight.keys.clone();
    tight_keys.sort();
    assert_eq!(tight_keys, vec!["d1".to_string(), "d2".to_string()]);

    let exact_gap = db.lookup("body", &IndexQuery::Phrase("quick fox", 0));
    assert!(exact_gap.keys.is_empty());

    let relaxed_gap = db.lookup("body", &IndexQuery::Phrase("quick fox", 1));
    assert_eq!(relaxed_gap.keys, vec!["d1".to_string()]);
}

#[test]
fn checkpoint_then_restore_reverts_to_the_checkpointed_lsn() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();

    for i in 0..50 {
        db.put(&format!("k{i}"), TypedValue::Int(i)).unwrap();
    }
    assert_eq!(db.get_snapshot(), 50);
    let checkpoint = db.create_checkpoint("fifty").unwrap();
    assert_eq!(checkpoint.info.lsn, 50);

    for i in 50..100i64 {
        db.put(&format!("k{i}"), TypedValue::Int(i)).unwrap();
    }
    assert_eq!(db.get_snapshot(), 100);

    db.restore_checkpoint(checkpoint.info.id).unwrap();
    assert_eq!(db.get_snapshot(), 50);
    assert_eq!(db.get("k49"), Some(TypedValue::Int(49)));
    assert_eq!(db.get("k60"), None);

    let next_lsn = db.put("after-restore", str_value("resumed")).unwrap();
    assert_eq!(next_lsn, 51);
}
