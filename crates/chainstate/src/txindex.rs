//! Transaction location records.

pub const TX_LOCATION_LEN: usize = 16;

/// Where a transaction's raw bytes live: which block file, the byte position
/// of the containing block's record, and the transaction's offset within the
/// serialized block. Immutable once written.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxLocation {
    pub file: u32,
    pub block_pos: u64,
    pub tx_offset: u32,
}

impl TxLocation {
    pub fn encode(&self) -> [u8; TX_LOCATION_LEN] {
        let mut out = [0u8; TX_LOCATION_LEN];
        out[0..4].copy_from_slice(&self.file.to_le_bytes());
        out[4..12].copy_from_slice(&self.block_pos.to_le_bytes());
        out[12..16].copy_from_slice(&self.tx_offset.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != TX_LOCATION_LEN {
            return None;
        }
        let file = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let block_pos = u64::from_le_bytes(bytes[4..12].try_into().ok()?);
        let tx_offset = u32::from_le_bytes(bytes[12..16].try_into().ok()?);
        Some(Self {
            file,
            block_pos,
            tx_offset,
        })
    }
}
