#![cfg(feature = "fjall")]

use ccx_storage::fjall::FjallStore;
use ccx_storage::{BlockLog, Column, KeyValueStore, KvBlockLog, WriteBatch};

#[test]
fn fjall_store_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FjallStore::open(dir.path()).expect("open fjall");

    store.put(Column::Meta, b"key", b"value").expect("put");
    assert_eq!(
        store.get(Column::Meta, b"key").expect("get"),
        Some(b"value".to_vec())
    );

    store.put(Column::Meta, b"prefix:1", b"a").expect("put");
    store.put(Column::Meta, b"prefix:2", b"b").expect("put");
    let hits = store.scan_prefix(Column::Meta, b"prefix:").expect("scan");
    assert_eq!(hits.len(), 2);

    let mut batch = WriteBatch::new();
    batch.put(Column::Meta, b"batch", b"ok");
    batch.delete(Column::Meta, b"key");
    store.write_batch(&batch).expect("batch commit");
    assert!(store.get(Column::Meta, b"key").expect("get").is_none());
}

#[test]
fn block_log_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let log = KvBlockLog::open(FjallStore::open(dir.path()).expect("open")).expect("log");
        for record in [&b"genesis"[..], b"one", b"two"] {
            log.append(record).expect("append");
        }
        log.truncate_from(2).expect("truncate");
        log.store().persist().expect("persist");
    }

    let log = KvBlockLog::open(FjallStore::open(dir.path()).expect("reopen")).expect("log");
    assert_eq!(log.len().expect("len"), 2);
    assert_eq!(log.get(0).expect("get"), Some(b"genesis".to_vec()));
    assert_eq!(log.get(2).expect("get"), None);
}
