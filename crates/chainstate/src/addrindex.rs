//! Address (script) transaction index and redeem records.

use galena_primitives::encoding::{DecodeError, Decoder, Encoder};
use galena_primitives::{hash160, Hash256, OutPoint, Transaction};
use galena_storage::{Column, KeyValueStore};

use crate::blockfiles::BlockFileStore;
use crate::blocktree::BlockTreeDb;
use crate::txindex::{TxLocation, TX_LOCATION_LEN};
use crate::StateError;

// Record kinds in the address column are disjoint by key length: script ids
// are 20 bytes, redeem keys 32, the flag keys below neither.
pub const ADDR_REINDEX_KEY: &[u8] = b"R";
pub const ADDR_ENABLED_KEY: &[u8] = b"Faddrindex";

/// Identity of a spending condition: the hash of a scriptPubKey.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ScriptId([u8; 20]);

impl ScriptId {
    pub fn from_script(script_pubkey: &[u8]) -> Self {
        Self(hash160(script_pubkey))
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Per-output spend records of one transaction: slot `n` names the
/// transaction and input position that consumed output `n`, once known.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RedeemEntry {
    pub slots: Vec<Option<(Hash256, u32)>>,
}

impl RedeemEntry {
    pub fn record(&mut self, vout: usize, txid: Hash256, input_index: u32) {
        if vout >= self.slots.len() {
            self.slots.resize(vout + 1, None);
        }
        self.slots[vout] = Some((txid, input_index));
    }

    pub fn spent_by(&self, vout: usize) -> Option<(Hash256, u32)> {
        self.slots.get(vout).copied().flatten()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_varint(self.slots.len() as u64);
        for slot in &self.slots {
            match slot {
                Some((txid, input_index)) => {
                    encoder.write_u8(1);
                    encoder.write_hash(txid);
                    encoder.write_u32_le(*input_index);
                }
                None => encoder.write_u8(0),
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let slot_count = decoder.read_varint()?;
        let mut slots = Vec::with_capacity(slot_count as usize);
        for _ in 0..slot_count {
            let slot = match decoder.read_u8()? {
                0 => None,
                1 => {
                    let txid = decoder.read_hash()?;
                    let input_index = decoder.read_u32_le()?;
                    Some((txid, input_index))
                }
                _ => return Err(DecodeError::InvalidData("invalid redeem slot flag")),
            };
            slots.push(slot);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { slots })
    }
}

fn encode_locations(locations: &[TxLocation]) -> Vec<u8> {
    let mut out = Vec::with_capacity(locations.len() * TX_LOCATION_LEN);
    for location in locations {
        out.extend_from_slice(&location.encode());
    }
    out
}

fn decode_locations(bytes: &[u8]) -> Result<Vec<TxLocation>, DecodeError> {
    if bytes.len() % TX_LOCATION_LEN != 0 {
        return Err(DecodeError::InvalidData("invalid tx location list"));
    }
    let mut locations = Vec::with_capacity(bytes.len() / TX_LOCATION_LEN);
    for chunk in bytes.chunks_exact(TX_LOCATION_LEN) {
        let location = TxLocation::decode(chunk)
            .ok_or(DecodeError::InvalidData("invalid tx location list"))?;
        locations.push(location);
    }
    Ok(locations)
}

/// Script of the output an input consumes. The address index resolves spent
/// outputs through this seam; `None` means the referenced transaction is
/// unknown to the resolver.
pub trait PrevOutResolver {
    fn prev_script(&self, outpoint: &OutPoint) -> Result<Option<Vec<u8>>, StateError>;
}

/// Resolver backed by the tx index and the raw block files.
pub struct ChainResolver<'a, S> {
    pub tree: &'a BlockTreeDb<S>,
    pub files: &'a BlockFileStore,
}

impl<S: KeyValueStore> PrevOutResolver for ChainResolver<'_, S> {
    fn prev_script(&self, outpoint: &OutPoint) -> Result<Option<Vec<u8>>, StateError> {
        let Some(location) = self.tree.read_tx_location(&outpoint.hash)? else {
            return Ok(None);
        };
        let (transaction, _header) = self.files.read_transaction(&location)?;
        Ok(transaction
            .vout
            .get(outpoint.index as usize)
            .map(|output| output.script_pubkey.clone()))
    }
}

/// Address index store. Entries are append-only and re-derivable from block
/// data, so writes are plain puts rather than batches; a failed write leaves
/// earlier puts in place and the reindex pass repairs the rest.
pub struct AddressDb<S> {
    store: S,
}

impl<S> AddressDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> AddressDb<S> {
    /// Indexes one block's transactions. `locations[i]` locates
    /// `transactions[i]` on disk.
    ///
    /// Inputs append the transaction's location under the consumed output's
    /// script identity, once per script per transaction, and record the
    /// redeem slot for the consumed outpoint. Outputs append under their own
    /// script identity, one append per output.
    pub fn add_transactions<R: PrevOutResolver>(
        &self,
        transactions: &[Transaction],
        locations: &[TxLocation],
        resolver: &R,
    ) -> Result<(), StateError> {
        for (transaction, location) in transactions.iter().zip(locations) {
            let txid = transaction.txid();

            let mut spent_ids: Vec<ScriptId> = Vec::new();
            for (input_index, input) in transaction.vin.iter().enumerate() {
                if input.prevout.is_null() {
                    continue;
                }
                self.record_redeem(&input.prevout, &txid, input_index as u32)?;
                let Some(script) = resolver.prev_script(&input.prevout)? else {
                    continue;
                };
                let script_id = ScriptId::from_script(&script);
                if spent_ids.contains(&script_id) {
                    continue;
                }
                spent_ids.push(script_id);
                self.append_location(&script_id, location)?;
            }

            for output in &transaction.vout {
                let script_id = ScriptId::from_script(&output.script_pubkey);
                self.append_location(&script_id, location)?;
            }
        }
        Ok(())
    }

    /// Locations of every transaction that created an output to, or spent an
    /// output of, this script identity. Empty if never indexed.
    pub fn get_transactions(&self, script_id: &ScriptId) -> Result<Vec<TxLocation>, StateError> {
        match self.store.get(Column::Address, script_id.as_bytes())? {
            Some(bytes) => Ok(decode_locations(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Which transaction (and input position) spent the given outpoint.
    pub fn read_spent_by(&self, outpoint: &OutPoint) -> Result<Option<(Hash256, u32)>, StateError> {
        match self.store.get(Column::Address, &outpoint.hash)? {
            Some(bytes) => Ok(RedeemEntry::decode(&bytes)?.spent_by(outpoint.index as usize)),
            None => Ok(None),
        }
    }

    pub fn write_reindexing(&self, reindexing: bool) -> Result<(), StateError> {
        if reindexing {
            self.store.put(Column::Address, ADDR_REINDEX_KEY, b"1")?;
        } else {
            self.store.delete(Column::Address, ADDR_REINDEX_KEY)?;
        }
        Ok(())
    }

    pub fn read_reindexing(&self) -> Result<bool, StateError> {
        Ok(self.store.get(Column::Address, ADDR_REINDEX_KEY)?.is_some())
    }

    pub fn write_enabled(&self, enabled: bool) -> Result<(), StateError> {
        self.store
            .put(Column::Address, ADDR_ENABLED_KEY, if enabled { b"1" } else { b"0" })?;
        Ok(())
    }

    pub fn read_enabled(&self) -> Result<Option<bool>, StateError> {
        match self.store.get(Column::Address, ADDR_ENABLED_KEY)? {
            Some(bytes) => match bytes.as_slice() {
                b"1" => Ok(Some(true)),
                b"0" => Ok(Some(false)),
                _ => Err(StateError::Decode(DecodeError::InvalidData(
                    "invalid enabled flag record",
                ))),
            },
            None => Ok(None),
        }
    }

    fn append_location(
        &self,
        script_id: &ScriptId,
        location: &TxLocation,
    ) -> Result<(), StateError> {
        let mut locations = match self.store.get(Column::Address, script_id.as_bytes())? {
            Some(bytes) => decode_locations(&bytes)?,
            None => Vec::new(),
        };
        locations.push(*location);
        self.store.put(
            Column::Address,
            script_id.as_bytes(),
            &encode_locations(&locations),
        )?;
        Ok(())
    }

    fn record_redeem(
        &self,
        outpoint: &OutPoint,
        txid: &Hash256,
        input_index: u32,
    ) -> Result<(), StateError> {
        let mut entry = match self.store.get(Column::Address, &outpoint.hash)? {
            Some(bytes) => RedeemEntry::decode(&bytes)?,
            None => RedeemEntry::default(),
        };
        entry.record(outpoint.index as usize, *txid, input_index);
        self.store
            .put(Column::Address, &outpoint.hash, &entry.encode())?;
        Ok(())
    }
}
