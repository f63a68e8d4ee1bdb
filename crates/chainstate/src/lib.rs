//! Persistent chain state: the UTXO set, the block index, and the address
//! index, each owning its namespace in the storage engine.

pub mod addrindex;
pub mod blockfiles;
pub mod blocktree;
pub mod coins;
pub mod keys;
pub mod stats;
pub mod txindex;

use galena_primitives::encoding::DecodeError;
use galena_storage::StoreError;

use crate::blockfiles::BlockFileError;

#[derive(Debug)]
pub enum StateError {
    Store(StoreError),
    Decode(DecodeError),
    BlockFile(BlockFileError),
    CorruptIndex(&'static str),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Store(err) => write!(f, "{err}"),
            StateError::Decode(err) => write!(f, "{err}"),
            StateError::BlockFile(err) => write!(f, "{err}"),
            StateError::CorruptIndex(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for StateError {}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        StateError::Store(err)
    }
}

impl From<DecodeError> for StateError {
    fn from(err: DecodeError) -> Self {
        StateError::Decode(err)
    }
}

impl From<BlockFileError> for StateError {
    fn from(err: BlockFileError) -> Self {
        StateError::BlockFile(err)
    }
}
