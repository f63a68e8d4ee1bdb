//! Block index store and in-memory block tree reconstruction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use galena_primitives::encoding::{DecodeError, Decoder, Encoder};
use galena_primitives::{Hash256, ZERO_HASH};
use galena_storage::{Column, KeyValueStore, WriteBatch};

use crate::keys::{
    block_index_key, file_info_key, flag_key, hash_from_tagged_key, tx_index_key, BLOCK_INDEX_TAG,
    LAST_FILE_KEY, REINDEX_KEY,
};
use crate::txindex::TxLocation;
use crate::StateError;

pub const STATUS_HAVE_DATA: u32 = 1 << 0;
pub const STATUS_HAVE_UNDO: u32 = 1 << 1;
pub const STATUS_FAILED: u32 = 1 << 2;

/// On-disk block index record. Identity/height/header fields never change
/// once written; status and file positions may be rewritten as the node
/// learns more about the block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiskBlockEntry {
    pub prev: Hash256,
    pub height: i32,
    pub file: u32,
    pub data_pos: u32,
    pub undo_pos: u32,
    pub version: i32,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub status: u32,
    pub tx_count: u32,
}

impl DiskBlockEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_hash(&self.prev);
        encoder.write_i32_le(self.height);
        encoder.write_u32_le(self.file);
        encoder.write_u32_le(self.data_pos);
        encoder.write_u32_le(self.undo_pos);
        encoder.write_i32_le(self.version);
        encoder.write_hash(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        encoder.write_u32_le(self.status);
        encoder.write_u32_le(self.tx_count);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let prev = decoder.read_hash()?;
        let height = decoder.read_i32_le()?;
        let file = decoder.read_u32_le()?;
        let data_pos = decoder.read_u32_le()?;
        let undo_pos = decoder.read_u32_le()?;
        let version = decoder.read_i32_le()?;
        let merkle_root = decoder.read_hash()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        let status = decoder.read_u32_le()?;
        let tx_count = decoder.read_u32_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            prev,
            height,
            file,
            data_pos,
            undo_pos,
            version,
            merkle_root,
            time,
            bits,
            nonce,
            status,
            tx_count,
        })
    }

    /// Local self-consistency: a record claiming full data must carry a
    /// transaction count, undo data implies block data, heights are
    /// nonnegative.
    pub fn check(&self) -> bool {
        if self.height < 0 {
            return false;
        }
        if self.status & STATUS_HAVE_DATA != 0 && self.tx_count == 0 {
            return false;
        }
        if self.status & STATUS_HAVE_UNDO != 0 && self.status & STATUS_HAVE_DATA == 0 {
            return false;
        }
        true
    }
}

/// Per-file accounting for the raw block files.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockFileInfo {
    pub blocks: u32,
    pub size: u64,
    pub undo_size: u64,
    pub height_first: i32,
    pub height_last: i32,
    pub time_first: u32,
    pub time_last: u32,
}

impl BlockFileInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u32_le(self.blocks);
        encoder.write_u64_le(self.size);
        encoder.write_u64_le(self.undo_size);
        encoder.write_i32_le(self.height_first);
        encoder.write_i32_le(self.height_last);
        encoder.write_u32_le(self.time_first);
        encoder.write_u32_le(self.time_last);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let blocks = decoder.read_u32_le()?;
        let size = decoder.read_u64_le()?;
        let undo_size = decoder.read_u64_le()?;
        let height_first = decoder.read_i32_le()?;
        let height_last = decoder.read_i32_le()?;
        let time_first = decoder.read_u32_le()?;
        let time_last = decoder.read_u32_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            blocks,
            size,
            undo_size,
            height_first,
            height_last,
            time_first,
            time_last,
        })
    }

    pub fn add_block(&mut self, height: i32, time: u32) {
        if self.blocks == 0 || self.height_first > height {
            self.height_first = height;
        }
        if self.blocks == 0 || self.time_first > time {
            self.time_first = time;
        }
        self.blocks += 1;
        if height > self.height_last {
            self.height_last = height;
        }
        if time > self.time_last {
            self.time_last = time;
        }
    }
}

/// Handle into the in-memory block tree arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct BlockId(u32);

#[derive(Clone, Debug)]
pub struct BlockNode {
    pub hash: Hash256,
    pub prev: Option<BlockId>,
    pub height: i32,
    pub file: u32,
    pub data_pos: u32,
    pub undo_pos: u32,
    pub version: i32,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub status: u32,
    pub tx_count: u32,
    populated: bool,
}

impl BlockNode {
    fn placeholder(hash: Hash256) -> Self {
        Self {
            hash,
            prev: None,
            height: 0,
            file: 0,
            data_pos: 0,
            undo_pos: 0,
            version: 0,
            merkle_root: ZERO_HASH,
            time: 0,
            bits: 0,
            nonce: 0,
            status: 0,
            tx_count: 0,
            populated: false,
        }
    }

    /// False for a node only known as some child's predecessor: its own
    /// record has not been visited (or never existed) and its fields carry
    /// no data.
    pub fn populated(&self) -> bool {
        self.populated
    }

    pub fn have_data(&self) -> bool {
        self.status & STATUS_HAVE_DATA != 0
    }

    pub fn have_undo(&self) -> bool {
        self.status & STATUS_HAVE_UNDO != 0
    }

    pub fn is_failed(&self) -> bool {
        self.status & STATUS_FAILED != 0
    }
}

/// In-memory block tree, reconstructed from the store at startup. Nodes are
/// arena slots addressed by `BlockId`; `get_or_create` is idempotent, which
/// makes the load pass independent of on-disk record order.
#[derive(Default)]
pub struct BlockMap {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<Hash256, BlockId>,
}

impl BlockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, hash: &Hash256) -> Option<BlockId> {
        self.by_hash.get(hash).copied()
    }

    pub fn get_or_create(&mut self, hash: &Hash256) -> BlockId {
        if let Some(id) = self.by_hash.get(hash) {
            return *id;
        }
        let id = BlockId(self.nodes.len() as u32);
        self.nodes.push(BlockNode::placeholder(*hash));
        self.by_hash.insert(*hash, id);
        id
    }

    pub fn node(&self, id: BlockId) -> &BlockNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: BlockId) -> &mut BlockNode {
        &mut self.nodes[id.0 as usize]
    }

    /// Fills a node from its on-disk record and links it to its
    /// predecessor, creating the predecessor as a placeholder if needed.
    /// An all-zero predecessor hash marks the tree root and links nothing.
    pub fn populate(&mut self, id: BlockId, entry: &DiskBlockEntry) {
        let prev = if entry.prev == ZERO_HASH {
            None
        } else {
            Some(self.get_or_create(&entry.prev))
        };
        let node = self.node_mut(id);
        node.prev = prev;
        node.height = entry.height;
        node.file = entry.file;
        node.data_pos = entry.data_pos;
        node.undo_pos = entry.undo_pos;
        node.version = entry.version;
        node.merkle_root = entry.merkle_root;
        node.time = entry.time;
        node.bits = entry.bits;
        node.nonce = entry.nonce;
        node.status = entry.status;
        node.tx_count = entry.tx_count;
        node.populated = true;
    }

    pub fn height_of(&self, hash: &Hash256) -> Option<i32> {
        let id = self.get(hash)?;
        let node = self.node(id);
        node.populated.then_some(node.height)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BlockNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (BlockId(idx as u32), node))
    }
}

/// Block index store: block metadata, file accounting, the tx index, and
/// the persisted process flags. Single-record operations go straight to the
/// engine; only the tx index write batches.
pub struct BlockTreeDb<S> {
    store: S,
}

impl<S> BlockTreeDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> BlockTreeDb<S> {
    pub fn write_block_index(&self, hash: &Hash256, entry: &DiskBlockEntry) -> Result<(), StateError> {
        self.store
            .put(Column::BlockTree, &block_index_key(hash), &entry.encode())?;
        Ok(())
    }

    pub fn read_block_index(&self, hash: &Hash256) -> Result<Option<DiskBlockEntry>, StateError> {
        match self.store.get(Column::BlockTree, &block_index_key(hash))? {
            Some(bytes) => Ok(Some(DiskBlockEntry::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn write_file_info(&self, file: u32, info: &BlockFileInfo) -> Result<(), StateError> {
        self.store
            .put(Column::BlockTree, &file_info_key(file), &info.encode())?;
        Ok(())
    }

    pub fn read_file_info(&self, file: u32) -> Result<Option<BlockFileInfo>, StateError> {
        match self.store.get(Column::BlockTree, &file_info_key(file))? {
            Some(bytes) => Ok(Some(BlockFileInfo::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn write_last_file(&self, file: u32) -> Result<(), StateError> {
        self.store
            .put(Column::BlockTree, &LAST_FILE_KEY, &file.to_le_bytes())?;
        Ok(())
    }

    pub fn read_last_file(&self) -> Result<Option<u32>, StateError> {
        match self.store.get(Column::BlockTree, &LAST_FILE_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    StateError::Decode(DecodeError::InvalidData("invalid last file record"))
                })?;
                Ok(Some(u32::from_le_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// The sentinel is written while a reindex is in flight and erased once
    /// it completes, so an interrupted rebuild is detected at startup.
    pub fn write_reindexing(&self, reindexing: bool) -> Result<(), StateError> {
        if reindexing {
            self.store.put(Column::BlockTree, &REINDEX_KEY, b"1")?;
        } else {
            self.store.delete(Column::BlockTree, &REINDEX_KEY)?;
        }
        Ok(())
    }

    pub fn read_reindexing(&self) -> Result<bool, StateError> {
        Ok(self.store.get(Column::BlockTree, &REINDEX_KEY)?.is_some())
    }

    pub fn write_flag(&self, name: &str, value: bool) -> Result<(), StateError> {
        let key = flag_key(name);
        self.store
            .put(Column::BlockTree, &key, if value { b"1" } else { b"0" })?;
        Ok(())
    }

    pub fn read_flag(&self, name: &str) -> Result<Option<bool>, StateError> {
        let key = flag_key(name);
        match self.store.get(Column::BlockTree, &key)? {
            Some(bytes) => match bytes.as_slice() {
                b"1" => Ok(Some(true)),
                b"0" => Ok(Some(false)),
                _ => Err(StateError::Decode(DecodeError::InvalidData(
                    "invalid flag record",
                ))),
            },
            None => Ok(None),
        }
    }

    pub fn write_tx_locations(&self, locations: &[(Hash256, TxLocation)]) -> Result<(), StateError> {
        let mut batch = WriteBatch::new();
        batch.reserve(locations.len());
        for (txid, location) in locations {
            batch.put(Column::BlockTree, tx_index_key(txid), location.encode());
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }

    pub fn read_tx_location(&self, txid: &Hash256) -> Result<Option<TxLocation>, StateError> {
        match self.store.get(Column::BlockTree, &tx_index_key(txid))? {
            Some(bytes) => TxLocation::decode(&bytes)
                .ok_or(StateError::Decode(DecodeError::InvalidData(
                    "invalid tx location record",
                )))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Rebuilds the in-memory block tree from the on-disk records.
    ///
    /// One forward pass over the block-index tag. Node creation is
    /// get-or-create by hash, so a child read before its parent links
    /// correctly once the parent's own record arrives; a predecessor whose
    /// record never arrives stays present but unpopulated. Returns
    /// `Ok(false)` when interrupted before the pass finished.
    pub fn load_block_index(
        &self,
        map: &mut BlockMap,
        interrupt: &AtomicBool,
    ) -> Result<bool, StateError> {
        let mut failure: Option<StateError> = None;
        let mut interrupted = false;
        let mut loaded = 0u64;
        self.store
            .for_each_prefix(Column::BlockTree, &[BLOCK_INDEX_TAG], &mut |key, value| {
                if interrupt.load(Ordering::Relaxed) {
                    interrupted = true;
                    return Ok(false);
                }
                let Some(hash) = hash_from_tagged_key(key) else {
                    failure = Some(StateError::CorruptIndex("malformed block index key"));
                    return Ok(false);
                };
                let entry = match DiskBlockEntry::decode(value) {
                    Ok(entry) => entry,
                    Err(err) => {
                        failure = Some(StateError::Decode(err));
                        return Ok(false);
                    }
                };
                if !entry.check() {
                    galena_log::log_error!(
                        "block index entry at height {} failed consistency check",
                        entry.height
                    );
                    failure = Some(StateError::CorruptIndex(
                        "block index entry failed consistency check",
                    ));
                    return Ok(false);
                }
                let node_id = map.get_or_create(&hash);
                map.populate(node_id, &entry);
                loaded += 1;
                Ok(true)
            })?;
        if let Some(err) = failure {
            return Err(err);
        }
        if interrupted {
            galena_log::log_info!("block index load interrupted after {loaded} entries");
            return Ok(false);
        }
        galena_log::log_debug!("loaded {loaded} block index entries");
        Ok(true)
    }
}
