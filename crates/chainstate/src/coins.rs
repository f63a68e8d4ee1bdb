//! UTXO set store keyed by transaction id.

use std::collections::BTreeMap;

use galena_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use galena_primitives::{Hash256, TxOut, ZERO_HASH};
use galena_storage::{Column, KeyValueStore, WriteBatch};

use crate::keys::{coin_key, hash_from_tagged_key, BEST_BLOCK_KEY, COIN_TAG};
use crate::StateError;

/// Unspent outputs of one transaction. A slot holds `None` once the
/// corresponding output has been spent; an entry whose slots are all spent
/// must never be stored (it is pruned instead).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoinsEntry {
    pub version: u32,
    pub coinbase: bool,
    pub height: u32,
    pub outputs: Vec<Option<TxOut>>,
}

impl CoinsEntry {
    pub fn new(version: u32, coinbase: bool, height: u32, outputs: Vec<TxOut>) -> Self {
        Self {
            version,
            coinbase,
            height,
            outputs: outputs.into_iter().map(Some).collect(),
        }
    }

    pub fn is_pruned(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    pub fn unspent_count(&self) -> usize {
        self.outputs.iter().filter(|slot| slot.is_some()).count()
    }

    /// Takes the output at `index`, marking the slot spent.
    pub fn spend(&mut self, index: usize) -> Option<TxOut> {
        self.outputs.get_mut(index).and_then(Option::take)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_varint(self.version as u64);
        encoder.write_u8(u8::from(self.coinbase));
        encoder.write_varint(self.height as u64);
        encoder.write_varint(self.outputs.len() as u64);
        for slot in &self.outputs {
            match slot {
                Some(output) => {
                    encoder.write_u8(1);
                    output.consensus_encode(&mut encoder);
                }
                None => encoder.write_u8(0),
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = read_varint_u32(&mut decoder)?;
        let coinbase = match decoder.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(DecodeError::InvalidData("invalid coinbase flag")),
        };
        let height = read_varint_u32(&mut decoder)?;
        let slot_count = decoder.read_varint()?;
        let mut outputs = Vec::with_capacity(slot_count as usize);
        for _ in 0..slot_count {
            let slot = match decoder.read_u8()? {
                0 => None,
                1 => Some(TxOut::consensus_decode(&mut decoder)?),
                _ => return Err(DecodeError::InvalidData("invalid output slot flag")),
            };
            outputs.push(slot);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            version,
            coinbase,
            height,
            outputs,
        })
    }
}

fn read_varint_u32(decoder: &mut Decoder) -> Result<u32, DecodeError> {
    u32::try_from(decoder.read_varint()?).map_err(|_| DecodeError::InvalidData("value out of range"))
}

fn batch_write_coins(batch: &mut WriteBatch, txid: &Hash256, entry: &CoinsEntry) {
    if entry.is_pruned() {
        batch.delete(Column::Coins, coin_key(txid));
    } else {
        batch.put(Column::Coins, coin_key(txid), entry.encode());
    }
}

/// UTXO set store. All mutations go through engine batches; `apply` is the
/// one path chain extension and reorgs should use, so coin changes and the
/// best-block pointer land in a single atomic commit.
pub struct CoinsDb<S> {
    store: S,
}

impl<S> CoinsDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> CoinsDb<S> {
    pub fn get_coins(&self, txid: &Hash256) -> Result<Option<CoinsEntry>, StateError> {
        match self.store.get(Column::Coins, &coin_key(txid))? {
            Some(bytes) => Ok(Some(CoinsEntry::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Existence check; does not decode the value.
    pub fn have_coins(&self, txid: &Hash256) -> Result<bool, StateError> {
        Ok(self.store.get(Column::Coins, &coin_key(txid))?.is_some())
    }

    pub fn set_coins(&self, txid: &Hash256, entry: &CoinsEntry) -> Result<(), StateError> {
        let mut batch = WriteBatch::new();
        batch_write_coins(&mut batch, txid, entry);
        self.store.write_batch(&batch)?;
        Ok(())
    }

    /// Hash of the chain tip this store reflects; all-zero when unset.
    pub fn best_block(&self) -> Result<Hash256, StateError> {
        match self.store.get(Column::Coins, &BEST_BLOCK_KEY)? {
            Some(bytes) => bytes
                .as_slice()
                .try_into()
                .map_err(|_| StateError::Decode(DecodeError::InvalidData("invalid best block hash"))),
            None => Ok(ZERO_HASH),
        }
    }

    pub fn set_best_block(&self, hash: &Hash256) -> Result<(), StateError> {
        let mut batch = WriteBatch::new();
        batch.put(Column::Coins, BEST_BLOCK_KEY, *hash);
        self.store.write_batch(&batch)?;
        Ok(())
    }

    /// Applies every coin upsert/delete and the optional best-block update
    /// as one atomic engine batch.
    pub fn apply(
        &self,
        coins: &BTreeMap<Hash256, CoinsEntry>,
        best_block: Option<&Hash256>,
    ) -> Result<(), StateError> {
        galena_log::log_debug!("committing {} changed coin entries", coins.len());
        let mut batch = WriteBatch::new();
        batch.reserve(coins.len() + 1);
        for (txid, entry) in coins {
            batch_write_coins(&mut batch, txid, entry);
        }
        if let Some(hash) = best_block {
            batch.put(Column::Coins, BEST_BLOCK_KEY, *hash);
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }

    /// Ordered walk over every coin record (raw value bytes). The visitor
    /// returns `Ok(false)` to stop the walk early.
    pub fn for_each_coin(
        &self,
        visitor: &mut dyn FnMut(&Hash256, &[u8]) -> Result<bool, StateError>,
    ) -> Result<(), StateError> {
        let mut failure: Option<StateError> = None;
        self.store
            .for_each_prefix(Column::Coins, &[COIN_TAG], &mut |key, value| {
                let Some(txid) = hash_from_tagged_key(key) else {
                    failure = Some(StateError::CorruptIndex("malformed coin key"));
                    return Ok(false);
                };
                match visitor(&txid, value) {
                    Ok(keep_going) => Ok(keep_going),
                    Err(err) => {
                        failure = Some(err);
                        Ok(false)
                    }
                }
            })?;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
