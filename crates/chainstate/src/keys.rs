//! On-disk key layout for the coin and block tree columns.
//!
//! Every record carries a single leading tag byte, so all keys of one kind
//! iterate contiguously in the engine's byte order. Integer key components
//! are big-endian for the same reason.

use galena_primitives::Hash256;
use smallvec::SmallVec;

pub const COIN_TAG: u8 = b'c';
pub const BEST_BLOCK_TAG: u8 = b'B';

pub const BLOCK_INDEX_TAG: u8 = b'b';
pub const FILE_INFO_TAG: u8 = b'f';
pub const LAST_FILE_TAG: u8 = b'l';
pub const REINDEX_TAG: u8 = b'R';
pub const FLAG_TAG: u8 = b'F';
pub const TX_INDEX_TAG: u8 = b't';

pub const BEST_BLOCK_KEY: [u8; 1] = [BEST_BLOCK_TAG];
pub const LAST_FILE_KEY: [u8; 1] = [LAST_FILE_TAG];
pub const REINDEX_KEY: [u8; 1] = [REINDEX_TAG];

pub fn coin_key(txid: &Hash256) -> [u8; 33] {
    tagged_hash_key(COIN_TAG, txid)
}

pub fn block_index_key(hash: &Hash256) -> [u8; 33] {
    tagged_hash_key(BLOCK_INDEX_TAG, hash)
}

pub fn tx_index_key(txid: &Hash256) -> [u8; 33] {
    tagged_hash_key(TX_INDEX_TAG, txid)
}

pub fn file_info_key(file: u32) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = FILE_INFO_TAG;
    key[1..].copy_from_slice(&file.to_be_bytes());
    key
}

pub fn flag_key(name: &str) -> SmallVec<[u8; 80]> {
    let mut key = SmallVec::with_capacity(1 + name.len());
    key.push(FLAG_TAG);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Hash portion of a tagged 33-byte key, if the key has that shape.
pub fn hash_from_tagged_key(key: &[u8]) -> Option<Hash256> {
    if key.len() != 33 {
        return None;
    }
    key[1..].try_into().ok()
}

fn tagged_hash_key(tag: u8, hash: &Hash256) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = tag;
    key[1..].copy_from_slice(hash);
    key
}
