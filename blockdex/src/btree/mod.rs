//! B-Tree implementation
//!

// Re-export
pub use self::blockdex::Blockdex;
pub use self::blockdex::BlockdexError;
pub use self::blockdex::DEFAULT_CACHE_CAPACITY;
pub use self::iter::Entries;

pub mod blockdex;
mod cache;
mod iter;
mod node;
mod sparse;
