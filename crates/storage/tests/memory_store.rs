use std::sync::Arc;

use galena_storage::memory::MemoryStore;
use galena_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn column_names_are_distinct() {
    let mut names = Vec::new();
    for (idx, column) in Column::ALL.iter().copied().enumerate() {
        assert_eq!(column.index(), idx);
        assert!(!names.contains(&column.as_str()), "duplicate {column:?}");
        names.push(column.as_str());
    }
}

#[test]
fn get_put_delete_roundtrip() {
    let store = MemoryStore::new();
    assert_eq!(store.get(Column::Coins, b"k").expect("get"), None);
    store.put(Column::Coins, b"k", b"v").expect("put");
    assert_eq!(
        store.get(Column::Coins, b"k").expect("get"),
        Some(b"v".to_vec())
    );
    // The same key in another column is a different record.
    assert_eq!(store.get(Column::BlockTree, b"k").expect("get"), None);
    store.delete(Column::Coins, b"k").expect("delete");
    assert_eq!(store.get(Column::Coins, b"k").expect("get"), None);
}

#[test]
fn prefix_scan_is_ordered_and_bounded() {
    let store = MemoryStore::new();
    store.put(Column::Coins, b"a\x02", b"2").expect("put");
    store.put(Column::Coins, b"a\x01", b"1").expect("put");
    store.put(Column::Coins, b"b\x01", b"other tag").expect("put");
    store.put(Column::Coins, b"a\x03", b"3").expect("put");

    let entries = store.scan_prefix(Column::Coins, b"a").expect("scan");
    let keys: Vec<&[u8]> = entries.iter().map(|(key, _)| key.as_slice()).collect();
    assert_eq!(keys, vec![b"a\x01".as_slice(), b"a\x02", b"a\x03"]);
}

#[test]
fn for_each_prefix_visitor_can_stop_early() {
    let store = MemoryStore::new();
    for byte in 0u8..8 {
        store.put(Column::Coins, &[b'a', byte], b"v").expect("put");
    }

    let mut seen = 0usize;
    store
        .for_each_prefix(Column::Coins, b"a", &mut |_key, _value| {
            seen += 1;
            Ok(seen < 3)
        })
        .expect("scan");
    assert_eq!(seen, 3);
}

#[test]
fn batch_applies_all_ops() {
    let store = Arc::new(MemoryStore::new());
    store.put(Column::Coins, b"stale", b"x").expect("put");

    let mut batch = WriteBatch::new();
    batch.put(Column::Coins, b"one", b"1");
    batch.put(Column::BlockTree, b"two", b"2");
    batch.delete(Column::Coins, b"stale");
    store.write_batch(&batch).expect("commit");

    assert_eq!(
        store.get(Column::Coins, b"one").expect("get"),
        Some(b"1".to_vec())
    );
    assert_eq!(
        store.get(Column::BlockTree, b"two").expect("get"),
        Some(b"2".to_vec())
    );
    assert_eq!(store.get(Column::Coins, b"stale").expect("get"), None);
}
