//! File functions
//!
//! The file has the following structure
//!
//! Superblock (block 0)
//!   [Node] (blocks 1..)
//!
//! The Superblock contains the format tag, the root node index and the next free block index.
//! Each node occupies one block and a node's index is its block index, so block n starts at
//! byte offset n * BLOCK_SIZE.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::Result;
use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BlockStore;
use crate::BINCODER;

pub(crate) const BLOCK_SIZE: usize = 512;

const MAGIC: [u8; 8] = *b"4348PRJ3";

/// Index 0 is the superblock, so it doubles as "no block".
pub(crate) const NO_BLOCK: u64 = 0;

pub(crate) type Block = [u8; BLOCK_SIZE];

/// Block file errors.
#[derive(Error, Debug, PartialEq)]
pub enum BlockFileError {
    /// The superblock does not carry our format tag
    #[error("not a blockdex file, bad magic: {0:?}")]
    InvalidMagic([u8; 8]),

    /// Fewer than BLOCK_SIZE bytes were available for a block
    #[error("short read of block: {0}, got {1} bytes")]
    ShortRead(u64, usize),

    /// An encoded structure did not fit in a block
    #[error("encoded size: {0} exceeds block size")]
    Oversized(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Superblock {
    magic: [u8; 8],
    pub(crate) root: u64,
    pub(crate) next_free: u64,
}

impl Default for Superblock {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            root: NO_BLOCK,
            next_free: 1,
        }
    }
}

impl Superblock {
    pub(crate) fn serialize(&self) -> Result<Block> {
        to_block(self)
    }

    pub(crate) fn deserialize(block: &Block) -> Result<Self> {
        let header: Superblock = BINCODER.deserialize(block)?;
        if header.magic != MAGIC {
            return Err(BlockFileError::InvalidMagic(header.magic).into());
        }
        Ok(header)
    }
}

/// Serialize `value` into the front of a zero padded block.
pub(crate) fn to_block<T: Serialize>(value: &T) -> Result<Block> {
    let bytes = BINCODER.serialize(value)?;
    if bytes.len() > BLOCK_SIZE {
        return Err(BlockFileError::Oversized(bytes.len()).into());
    }
    let mut block = [0; BLOCK_SIZE];
    block[..bytes.len()].copy_from_slice(&bytes);
    Ok(block)
}

#[derive(Debug)]
pub(crate) struct BlockFile {
    file: File,
}

impl BlockFile {
    /// Create a new file containing only an empty superblock. Fails if `path` exists.
    pub(crate) fn try_new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut this = Self { file };
        this.write_header(&Superblock::default())?;
        Ok(this)
    }

    pub(crate) fn try_open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(false)
            .open(path)?;

        Ok(Self { file })
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.file.sync_all().map_err(|e| e.into())
    }

    pub(crate) fn read_header(&mut self) -> Result<Superblock> {
        let block = self.read_block(0)?;
        Superblock::deserialize(&block)
    }

    pub(crate) fn write_header(&mut self, header: &Superblock) -> Result<()> {
        let block = header.serialize()?;
        self.write_block(0, &block)
    }

    fn offset(idx: u64) -> u64 {
        idx * BLOCK_SIZE as u64
    }
}

impl BlockStore for BlockFile {
    fn read_block(&mut self, idx: u64) -> Result<Block> {
        let mut block = [0; BLOCK_SIZE];
        self.file.seek(SeekFrom::Start(BlockFile::offset(idx)))?;

        // Like read_exact, but we want to know how much we got
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.file.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled < BLOCK_SIZE {
            return Err(BlockFileError::ShortRead(idx, filled).into());
        }
        Ok(block)
    }

    fn write_block(&mut self, idx: u64, block: &Block) -> Result<()> {
        self.file.seek(SeekFrom::Start(BlockFile::offset(idx)))?;
        self.file.write_all(block)?;
        Ok(())
    }
}
