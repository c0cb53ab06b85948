//! File-backed checkpoint store: durability across reopen and concurrent writers.

use barvault_core::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use std::sync::Arc;
use std::thread;

#[test]
fn checkpoints_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/checkpoints.db");
    {
        let store = SqliteCheckpointStore::open(&path).unwrap();
        store.set("AAPL", 1_705_312_260_000_000_000).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
    }
    let reopened = SqliteCheckpointStore::open(&path).unwrap();
    assert_eq!(
        reopened.get("AAPL").unwrap(),
        Some(1_705_312_260_000_000_000)
    );
}

#[test]
fn concurrent_symbol_upserts() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteCheckpointStore::open(dir.path().join("cp.db")).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let symbol = format!("SYM{i}");
                for ts in 0..25 {
                    store.set(&symbol, ts).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let all = store.all().unwrap();
    assert_eq!(all.len(), 8);
    assert!(all.iter().all(|(_, ts)| *ts == 24));
}

#[test]
fn two_handles_on_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cp.db");
    let a = SqliteCheckpointStore::open(&path).unwrap();
    let b = SqliteCheckpointStore::open(&path).unwrap();

    a.set("AAPL", 10).unwrap();
    assert_eq!(b.get("AAPL").unwrap(), Some(10));
    assert!(b.reset("AAPL").unwrap());
    assert_eq!(a.get("AAPL").unwrap(), None);
}
