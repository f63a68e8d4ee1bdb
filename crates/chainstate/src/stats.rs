//! Deterministic integrity scan over the UTXO set.

use std::sync::atomic::{AtomicBool, Ordering};

use sha2::{Digest, Sha256};

use galena_primitives::encoding::{Encodable, Encoder};
use galena_primitives::Hash256;
use galena_storage::KeyValueStore;

use crate::blocktree::BlockMap;
use crate::coins::{CoinsDb, CoinsEntry};
use crate::StateError;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CoinStats {
    pub best_block: Hash256,
    pub height: i32,
    pub transactions: u64,
    pub transaction_outputs: u64,
    pub serialized_size: u64,
    pub total_amount: i64,
    pub hash_serialized: Hash256,
}

/// Walks every coin record in key order, hashing the set into a single
/// digest and accumulating totals. Iteration order is fixed by the key
/// encoding, so an unmodified store always produces the same stats.
///
/// The interrupt flag is checked between records; a cancelled scan returns
/// `Ok(None)` with no partial stats. A record that fails to decode aborts
/// the scan with the decode error.
pub fn utxo_stats<S: KeyValueStore>(
    coins: &CoinsDb<S>,
    index: &BlockMap,
    interrupt: &AtomicBool,
) -> Result<Option<CoinStats>, StateError> {
    let best_block = coins.best_block()?;
    let mut hasher = Sha256::new();
    hasher.update(best_block);

    let mut stats = CoinStats {
        best_block,
        ..Default::default()
    };
    let mut interrupted = false;
    coins.for_each_coin(&mut |txid, raw| {
        if interrupt.load(Ordering::Relaxed) {
            interrupted = true;
            return Ok(false);
        }
        let entry = CoinsEntry::decode(raw).map_err(StateError::Decode)?;

        let mut record = Encoder::new();
        record.write_hash(txid);
        record.write_varint(entry.version as u64);
        record.write_u8(if entry.coinbase { b'c' } else { b'n' });
        record.write_varint(entry.height as u64);
        for (position, slot) in entry.outputs.iter().enumerate() {
            let Some(output) = slot else {
                continue;
            };
            record.write_varint(position as u64 + 1);
            output.consensus_encode(&mut record);
            stats.transaction_outputs += 1;
            stats.total_amount += output.value;
        }
        record.write_varint(0);
        hasher.update(record.into_inner());

        stats.transactions += 1;
        stats.serialized_size += 32 + raw.len() as u64;
        Ok(true)
    })?;
    if interrupted {
        return Ok(None);
    }

    stats.height = index.height_of(&best_block).unwrap_or(0);
    stats.hash_serialized.copy_from_slice(&hasher.finalize());
    Ok(Some(stats))
}
