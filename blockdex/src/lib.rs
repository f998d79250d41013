#![warn(missing_docs)]
//! Blockdex B-Tree index
//!
//! # Implementation Details
//!
//! Provides an ordered index of `u64` keys and `u64` values stored in a single file.
//!
//! The file is a sequence of 512 byte blocks. Block 0 is the superblock, which holds a format
//! tag, the block index of the root node and the next block index to allocate. Every other
//! block holds exactly one B-Tree node.
//!
//! The tree has a minimum degree of 10, so a node holds at most 19 keys and 20 children.
//! Nodes never point at each other in memory. Parents and children are referenced by block
//! index and every access goes through a small LRU page cache (3 nodes by default). When the
//! cache is over capacity, the least recently used node is evicted and written back to its
//! block if it was modified.
//!
//! Insertion splits full nodes on the way down, so a single root to leaf pass is always
//! enough. Nodes are never deleted.
//!
//! At load/store to disk, the superblock and nodes are serialized/deserialized using bincode,
//! configured for fixed width big-endian integers, which gives a stable byte layout.
//!
//! When a [`btree::Blockdex`] is closed or dropped, dirty nodes and the superblock are
//! flushed and synced to disk.
//!

pub mod btree;
mod io;

pub use io::BlockFileError;

use bincode::config::AllowTrailing;
use bincode::config::BigEndian;
use bincode::config::FixintEncoding;
use bincode::config::WithOtherEndian;
use bincode::config::WithOtherIntEncoding;
use bincode::config::WithOtherTrailing;
use bincode::{DefaultOptions, Options};
use std::sync::LazyLock;

type Bincoder = WithOtherEndian<
    WithOtherIntEncoding<WithOtherTrailing<DefaultOptions, AllowTrailing>, FixintEncoding>,
    BigEndian,
>;

static BINCODER: LazyLock<Bincoder> = LazyLock::new(|| {
    bincode::DefaultOptions::new()
        .allow_trailing_bytes()
        .with_fixint_encoding()
        .with_big_endian()
});
