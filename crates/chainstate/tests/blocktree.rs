use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use galena_chainstate::blocktree::{
    BlockFileInfo, BlockMap, BlockTreeDb, DiskBlockEntry, STATUS_HAVE_DATA, STATUS_HAVE_UNDO,
};
use galena_chainstate::txindex::TxLocation;
use galena_chainstate::StateError;
use galena_primitives::{Hash256, ZERO_HASH};
use galena_storage::memory::MemoryStore;

fn entry(prev: Hash256, height: i32, tx_count: u32) -> DiskBlockEntry {
    DiskBlockEntry {
        prev,
        height,
        file: 0,
        data_pos: height as u32 * 1000,
        undo_pos: 0,
        version: 2,
        merkle_root: [height as u8; 32],
        time: 1_400_000_000 + height as u32,
        bits: 0x1d00_ffff,
        nonce: height as u32,
        status: STATUS_HAVE_DATA,
        tx_count,
    }
}

fn load(tree: &BlockTreeDb<Arc<MemoryStore>>) -> BlockMap {
    let mut map = BlockMap::new();
    let interrupt = AtomicBool::new(false);
    assert!(tree.load_block_index(&mut map, &interrupt).expect("load"));
    map
}

#[test]
fn disk_entry_roundtrip() {
    let original = entry([0x01; 32], 7, 3);
    let decoded = DiskBlockEntry::decode(&original.encode()).expect("decode");
    assert_eq!(decoded, original);
}

#[test]
fn disk_entry_rejects_truncation() {
    let bytes = entry([0x01; 32], 7, 3).encode();
    assert!(DiskBlockEntry::decode(&bytes[..bytes.len() - 1]).is_err());
    let mut extended = bytes.clone();
    extended.push(0);
    assert!(DiskBlockEntry::decode(&extended).is_err());
}

#[test]
fn write_read_block_index() {
    let store = Arc::new(MemoryStore::new());
    let tree = BlockTreeDb::new(Arc::clone(&store));
    let hash: Hash256 = [0xab; 32];
    let original = entry(ZERO_HASH, 0, 1);
    tree.write_block_index(&hash, &original).expect("write");
    assert_eq!(tree.read_block_index(&hash).expect("read"), Some(original));
    assert_eq!(tree.read_block_index(&[0xcd; 32]).expect("read"), None);
}

#[test]
fn load_is_insertion_order_independent() {
    let hash_a: Hash256 = [0xa1; 32];
    let hash_b: Hash256 = [0xb2; 32];
    let hash_c: Hash256 = [0xc3; 32];
    let entries = [
        (hash_a, entry(ZERO_HASH, 0, 1)),
        (hash_b, entry(hash_a, 1, 2)),
        (hash_c, entry(hash_b, 2, 3)),
    ];

    let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 1, 0], [1, 2, 0]];
    for order in orders {
        let store = Arc::new(MemoryStore::new());
        let tree = BlockTreeDb::new(Arc::clone(&store));
        for index in order {
            let (hash, entry) = &entries[index];
            tree.write_block_index(hash, entry).expect("write");
        }

        let map = load(&tree);
        assert_eq!(map.len(), 3);

        let id_a = map.get(&hash_a).expect("a");
        let id_b = map.get(&hash_b).expect("b");
        let id_c = map.get(&hash_c).expect("c");
        assert_eq!(map.node(id_c).prev, Some(id_b));
        assert_eq!(map.node(id_b).prev, Some(id_a));
        assert_eq!(map.node(id_a).prev, None);
        assert_eq!(map.height_of(&hash_c), Some(2));
        assert!(map.node(id_a).populated());
    }
}

#[test]
fn missing_parent_stays_unpopulated() {
    let store = Arc::new(MemoryStore::new());
    let tree = BlockTreeDb::new(Arc::clone(&store));
    let parent: Hash256 = [0x0a; 32];
    let child: Hash256 = [0x0b; 32];
    tree.write_block_index(&child, &entry(parent, 9, 1))
        .expect("write");

    let map = load(&tree);
    assert_eq!(map.len(), 2);
    let parent_id = map.get(&parent).expect("parent placeholder");
    assert!(!map.node(parent_id).populated());
    assert_eq!(map.height_of(&parent), None);
    let child_id = map.get(&child).expect("child");
    assert_eq!(map.node(child_id).prev, Some(parent_id));
}

#[test]
fn inconsistent_entry_aborts_load() {
    let store = Arc::new(MemoryStore::new());
    let tree = BlockTreeDb::new(Arc::clone(&store));
    // Claims block data but carries no transactions.
    let mut bad = entry(ZERO_HASH, 0, 1);
    bad.tx_count = 0;
    tree.write_block_index(&[0x0c; 32], &bad).expect("write");

    let mut map = BlockMap::new();
    let interrupt = AtomicBool::new(false);
    match tree.load_block_index(&mut map, &interrupt) {
        Err(StateError::CorruptIndex(_)) => {}
        other => panic!("expected corrupt index, got {other:?}"),
    }
}

#[test]
fn undo_without_data_fails_check() {
    let mut bad = entry(ZERO_HASH, 0, 1);
    bad.status = STATUS_HAVE_UNDO;
    assert!(!bad.check());
}

#[test]
fn interrupted_load_stops_cleanly() {
    let store = Arc::new(MemoryStore::new());
    let tree = BlockTreeDb::new(Arc::clone(&store));
    tree.write_block_index(&[0x0d; 32], &entry(ZERO_HASH, 0, 1))
        .expect("write");

    let mut map = BlockMap::new();
    let interrupt = AtomicBool::new(true);
    let finished = tree.load_block_index(&mut map, &interrupt).expect("load");
    assert!(!finished);
    assert!(map.is_empty());
}

#[test]
fn flags_roundtrip() {
    let store = Arc::new(MemoryStore::new());
    let tree = BlockTreeDb::new(Arc::clone(&store));

    assert_eq!(tree.read_flag("txindex").expect("read"), None);
    tree.write_flag("txindex", true).expect("write");
    assert_eq!(tree.read_flag("txindex").expect("read"), Some(true));
    tree.write_flag("txindex", false).expect("write");
    assert_eq!(tree.read_flag("txindex").expect("read"), Some(false));
    assert_eq!(tree.read_flag("other").expect("read"), None);
}

#[test]
fn reindexing_sentinel() {
    let store = Arc::new(MemoryStore::new());
    let tree = BlockTreeDb::new(Arc::clone(&store));
    assert!(!tree.read_reindexing().expect("read"));
    tree.write_reindexing(true).expect("write");
    assert!(tree.read_reindexing().expect("read"));
    tree.write_reindexing(false).expect("write");
    assert!(!tree.read_reindexing().expect("read"));
}

#[test]
fn last_file_roundtrip() {
    let store = Arc::new(MemoryStore::new());
    let tree = BlockTreeDb::new(Arc::clone(&store));
    assert_eq!(tree.read_last_file().expect("read"), None);
    tree.write_last_file(12).expect("write");
    assert_eq!(tree.read_last_file().expect("read"), Some(12));
}

#[test]
fn file_info_accumulates_blocks() {
    let store = Arc::new(MemoryStore::new());
    let tree = BlockTreeDb::new(Arc::clone(&store));

    let mut info = BlockFileInfo::default();
    info.add_block(100, 1_400_000_500);
    info.add_block(99, 1_400_000_400);
    info.add_block(101, 1_400_000_600);
    info.size += 3_000;
    assert_eq!(info.blocks, 3);
    assert_eq!(info.height_first, 99);
    assert_eq!(info.height_last, 101);
    assert_eq!(info.time_first, 1_400_000_400);
    assert_eq!(info.time_last, 1_400_000_600);

    tree.write_file_info(3, &info).expect("write");
    assert_eq!(tree.read_file_info(3).expect("read"), Some(info));
    assert_eq!(tree.read_file_info(4).expect("read"), None);
}

#[test]
fn tx_locations_batch_roundtrip() {
    let store = Arc::new(MemoryStore::new());
    let tree = BlockTreeDb::new(Arc::clone(&store));

    let locations = vec![
        (
            [0x01; 32],
            TxLocation {
                file: 0,
                block_pos: 0,
                tx_offset: 81,
            },
        ),
        (
            [0x02; 32],
            TxLocation {
                file: 0,
                block_pos: 0,
                tx_offset: 150,
            },
        ),
    ];
    tree.write_tx_locations(&locations).expect("write");

    assert_eq!(
        tree.read_tx_location(&[0x01; 32]).expect("read"),
        Some(locations[0].1)
    );
    assert_eq!(
        tree.read_tx_location(&[0x02; 32]).expect("read"),
        Some(locations[1].1)
    );
    assert_eq!(tree.read_tx_location(&[0x03; 32]).expect("read"), None);
}
