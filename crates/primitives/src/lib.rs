//! Core block/transaction types and canonical serialization.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use hash::{hash160, sha256, sha256d, Hash256, ZERO_HASH};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
