//! Append-only block flat files and raw transaction reads.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use galena_primitives::block::BLOCK_HEADER_LEN;
use galena_primitives::encoding::{Decodable, DecodeError, Decoder};
use galena_primitives::{Block, BlockHeader, Transaction};

use crate::txindex::TxLocation;

/// Position of one length-prefixed block record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockLocation {
    pub file: u32,
    pub pos: u64,
    pub len: u32,
}

#[derive(Debug)]
pub enum BlockFileError {
    Io(std::io::Error),
    InvalidLocation,
    LengthMismatch,
    Decode(DecodeError),
}

impl std::fmt::Display for BlockFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockFileError::Io(err) => write!(f, "{err}"),
            BlockFileError::InvalidLocation => write!(f, "invalid block file location"),
            BlockFileError::LengthMismatch => write!(f, "block file length mismatch"),
            BlockFileError::Decode(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for BlockFileError {}

impl From<std::io::Error> for BlockFileError {
    fn from(err: std::io::Error) -> Self {
        BlockFileError::Io(err)
    }
}

impl From<DecodeError> for BlockFileError {
    fn from(err: DecodeError) -> Self {
        BlockFileError::Decode(err)
    }
}

/// Raw block storage: numbered append-only files with length-prefixed
/// records, rolling to the next file at a size cap.
pub struct BlockFileStore {
    dir: PathBuf,
    prefix: String,
    max_file_size: u64,
    state: Mutex<BlockFileState>,
}

#[derive(Debug)]
struct BlockFileState {
    current_file: u32,
    current_len: u64,
}

impl BlockFileStore {
    pub fn new(dir: impl Into<PathBuf>, max_file_size: u64) -> Result<Self, BlockFileError> {
        Self::new_with_prefix(dir, "blk", max_file_size)
    }

    pub fn new_with_prefix(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        max_file_size: u64,
    ) -> Result<Self, BlockFileError> {
        let dir = dir.into();
        let prefix = prefix.into();
        std::fs::create_dir_all(&dir)?;
        let (current_file, current_len) = Self::locate_active_file(&dir, &prefix, max_file_size)?;
        Ok(Self {
            dir,
            prefix,
            max_file_size,
            state: Mutex::new(BlockFileState {
                current_file,
                current_len,
            }),
        })
    }

    pub fn append(&self, bytes: &[u8]) -> Result<BlockLocation, BlockFileError> {
        let mut state = self.state.lock().expect("block file lock");
        let needed = 4u64 + bytes.len() as u64;
        if state.current_len + needed > self.max_file_size {
            state.current_file += 1;
            state.current_len = 0;
        }
        let pos = state.current_len;
        let path = self.file_path(state.current_file);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = bytes.len() as u32;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(bytes)?;
        file.flush()?;
        state.current_len += needed;
        Ok(BlockLocation {
            file: state.current_file,
            pos,
            len,
        })
    }

    /// Appends a serialized block and reports where it and each of its
    /// transactions landed.
    pub fn append_block(
        &self,
        block: &Block,
    ) -> Result<(BlockLocation, Vec<TxLocation>), BlockFileError> {
        let (bytes, offsets) = block.serialize_with_tx_offsets();
        let location = self.append(&bytes)?;
        let tx_locations = offsets
            .into_iter()
            .map(|tx_offset| TxLocation {
                file: location.file,
                block_pos: location.pos,
                tx_offset,
            })
            .collect();
        Ok((location, tx_locations))
    }

    pub fn read(&self, location: &BlockLocation) -> Result<Vec<u8>, BlockFileError> {
        if location.len == 0 {
            return Err(BlockFileError::InvalidLocation);
        }
        let path = self.file_path(location.file);
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(location.pos))?;
        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let stored_len = u32::from_le_bytes(len_bytes);
        if stored_len != location.len {
            return Err(BlockFileError::LengthMismatch);
        }
        let mut buffer = vec![0u8; stored_len as usize];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Reads the one transaction a `TxLocation` points at, along with the
    /// header of its containing block.
    pub fn read_transaction(
        &self,
        location: &TxLocation,
    ) -> Result<(Transaction, BlockHeader), BlockFileError> {
        let path = self.file_path(location.file);
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(location.block_pos))?;
        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let record_len = u32::from_le_bytes(len_bytes) as u64;
        if u64::from(location.tx_offset) >= record_len {
            return Err(BlockFileError::InvalidLocation);
        }

        let mut header_bytes = [0u8; BLOCK_HEADER_LEN];
        file.read_exact(&mut header_bytes)?;
        let mut decoder = Decoder::new(&header_bytes);
        let header = BlockHeader::consensus_decode(&mut decoder)?;

        file.seek(SeekFrom::Start(
            location.block_pos + 4 + u64::from(location.tx_offset),
        ))?;
        let mut tail = vec![0u8; (record_len - u64::from(location.tx_offset)) as usize];
        file.read_exact(&mut tail)?;
        let mut decoder = Decoder::new(&tail);
        let transaction = Transaction::consensus_decode(&mut decoder)?;
        Ok((transaction, header))
    }

    fn file_path(&self, file: u32) -> PathBuf {
        self.dir.join(format!("{}{file:05}.dat", self.prefix))
    }

    fn locate_active_file(
        dir: &Path,
        prefix: &str,
        max_file_size: u64,
    ) -> Result<(u32, u64), BlockFileError> {
        let mut file = 0u32;
        let mut last_existing: Option<(u32, u64)> = None;
        loop {
            let path = dir.join(format!("{prefix}{file:05}.dat"));
            if !path.exists() {
                break;
            }
            let metadata = std::fs::metadata(&path)?;
            last_existing = Some((file, metadata.len()));
            file += 1;
        }

        match last_existing {
            Some((last_file, len)) => {
                if len >= max_file_size {
                    Ok((last_file + 1, 0))
                } else {
                    Ok((last_file, len))
                }
            }
            None => Ok((0, 0)),
        }
    }
}
