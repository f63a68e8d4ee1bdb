use std::collections::BTreeMap;
use std::sync::Arc;

use galena_chainstate::coins::{CoinsDb, CoinsEntry};
use galena_chainstate::keys::coin_key;
use galena_chainstate::StateError;
use galena_primitives::{Hash256, TxOut, ZERO_HASH};
use galena_storage::memory::MemoryStore;
use galena_storage::{Column, KeyValueStore};

fn entry_with_values(height: u32, values: &[i64]) -> CoinsEntry {
    let outputs = values
        .iter()
        .map(|value| TxOut {
            value: *value,
            script_pubkey: vec![0x51],
        })
        .collect();
    CoinsEntry::new(1, false, height, outputs)
}

#[test]
fn set_get_roundtrip() {
    let store = Arc::new(MemoryStore::new());
    let coins = CoinsDb::new(Arc::clone(&store));
    let txid: Hash256 = [0x11; 32];
    let entry = entry_with_values(100, &[10, 20]);

    coins.set_coins(&txid, &entry).expect("set");
    assert!(coins.have_coins(&txid).expect("have"));
    assert_eq!(coins.get_coins(&txid).expect("get"), Some(entry));
}

#[test]
fn missing_entry_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let coins = CoinsDb::new(store);
    let txid: Hash256 = [0x22; 32];
    assert!(!coins.have_coins(&txid).expect("have"));
    assert_eq!(coins.get_coins(&txid).expect("get"), None);
}

#[test]
fn fully_spent_entry_is_pruned() {
    let store = Arc::new(MemoryStore::new());
    let coins = CoinsDb::new(Arc::clone(&store));
    let txid: Hash256 = [0x33; 32];
    let mut entry = entry_with_values(100, &[10, 20]);
    coins.set_coins(&txid, &entry).expect("set");

    entry.spend(0).expect("spend first");
    coins.set_coins(&txid, &entry).expect("set partial");
    assert!(coins.have_coins(&txid).expect("have"));
    let fetched = coins.get_coins(&txid).expect("get").expect("present");
    assert_eq!(fetched.unspent_count(), 1);

    entry.spend(1).expect("spend second");
    assert!(entry.is_pruned());
    coins.set_coins(&txid, &entry).expect("set pruned");
    assert!(!coins.have_coins(&txid).expect("have"));
    assert_eq!(coins.get_coins(&txid).expect("get"), None);
}

#[test]
fn best_block_defaults_to_zero() {
    let store = Arc::new(MemoryStore::new());
    let coins = CoinsDb::new(Arc::clone(&store));
    assert_eq!(coins.best_block().expect("best"), ZERO_HASH);

    let tip: Hash256 = [0x44; 32];
    coins.set_best_block(&tip).expect("set best");
    assert_eq!(coins.best_block().expect("best"), tip);
}

#[test]
fn apply_commits_coins_and_pointer_together() {
    let store = Arc::new(MemoryStore::new());
    let coins = CoinsDb::new(Arc::clone(&store));

    let spent: Hash256 = [0x55; 32];
    coins
        .set_coins(&spent, &entry_with_values(5, &[7]))
        .expect("seed");

    let mut changes = BTreeMap::new();
    changes.insert([0x66; 32], entry_with_values(10, &[1, 2]));
    changes.insert([0x77; 32], entry_with_values(11, &[3]));
    // A fully spent entry in the change set deletes its record.
    changes.insert(spent, CoinsEntry::new(1, false, 5, Vec::new()));
    let tip: Hash256 = [0x88; 32];

    coins.apply(&changes, Some(&tip)).expect("apply");

    assert!(coins.have_coins(&[0x66; 32]).expect("have"));
    assert!(coins.have_coins(&[0x77; 32]).expect("have"));
    assert!(!coins.have_coins(&spent).expect("have"));
    assert_eq!(coins.best_block().expect("best"), tip);
}

#[test]
fn apply_without_best_block_leaves_pointer() {
    let store = Arc::new(MemoryStore::new());
    let coins = CoinsDb::new(Arc::clone(&store));
    let tip: Hash256 = [0x99; 32];
    coins.set_best_block(&tip).expect("set best");

    let mut changes = BTreeMap::new();
    changes.insert([0xaa; 32], entry_with_values(12, &[9]));
    coins.apply(&changes, None).expect("apply");

    assert_eq!(coins.best_block().expect("best"), tip);
}

#[test]
fn corrupt_entry_is_a_decode_error() {
    let store = Arc::new(MemoryStore::new());
    let txid: Hash256 = [0xbb; 32];
    store
        .put(Column::Coins, &coin_key(&txid), b"\x01\x01")
        .expect("put garbage");

    let coins = CoinsDb::new(Arc::clone(&store));
    // Present but malformed: distinct from not-found.
    assert!(coins.have_coins(&txid).expect("have"));
    match coins.get_coins(&txid) {
        Err(StateError::Decode(_)) => {}
        other => panic!("expected decode error, got {other:?}"),
    }
}

#[test]
fn encode_decode_preserves_spent_slots() {
    let mut entry = entry_with_values(42, &[10, 20, 30]);
    entry.spend(1).expect("spend");
    let decoded = CoinsEntry::decode(&entry.encode()).expect("decode");
    assert_eq!(decoded, entry);
    assert_eq!(decoded.outputs[1], None);
    assert_eq!(decoded.unspent_count(), 2);
}
