//! `kvdb`: an embeddable, single-node key-value storage engine with typed
//! values, MVCC reads, a segmented write-ahead log, and a secondary/
//! full-text/positional index subsystem.
//!
//! This crate is a thin re-export of [`kvdb_engine`] — the workspace is
//! split into `kvdb-core`, `kvdb-durability`, `kvdb-storage`,
//! `kvdb-concurrency`, `kvdb-search`, `kvdb-executor`, and `kvdb-engine`
//! so each concern (value model, WAL, memtable, locking, indexes, the
//! query optimizer, the control plane) can be developed and tested in
//! isolation, but callers only need this crate and the
//! [`Database`] type it re-exports.
//!
//! ```no_run
//! use kvdb::{Database, TypedValue};
//!
//! let db = Database::open("./data").unwrap();
//! db.put("greeting", TypedValue::String("hello".into())).unwrap();
//! assert_eq!(db.get("greeting"), Some(TypedValue::String("hello".into())));
//! ```

pub use kvdb_engine::*;
