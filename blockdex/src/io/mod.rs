//! Block I/O
//!

use anyhow::Result;

pub(crate) mod file;

pub use self::file::BlockFileError;
pub(crate) use self::file::{to_block, Block, BlockFile, Superblock, BLOCK_SIZE, NO_BLOCK};

/// Fixed size block access, addressed by block index.
pub(crate) trait BlockStore {
    /// Read the block at `idx`. Anything short of a full block is an error.
    fn read_block(&mut self, idx: u64) -> Result<Block>;

    /// Write `block` at `idx`.
    fn write_block(&mut self, idx: u64, block: &Block) -> Result<()>;
}
