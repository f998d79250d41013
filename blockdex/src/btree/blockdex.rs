//! B-Tree implementation
//!
//! This is the main data structure exposed by the library.
//!

use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::Result;
use thiserror::Error;

use super::cache::PageCache;
use super::iter::Entries;
use super::node::{Node, MAX_CHILDREN, MAX_KEYS, MIN_KEYS};
use crate::io::{BlockFile, BlockStore, Superblock, NO_BLOCK};

/// Number of nodes held in memory unless told otherwise.
pub const DEFAULT_CACHE_CAPACITY: usize = 3;

/// Blockdex specific errors.
#[derive(Error, Debug, PartialEq)]
pub enum BlockdexError {
    /// Supplied cache capacity too small
    #[error("cache capacity: {0} must be >=1")]
    CacheTooSmall(usize),

    /// A node on disk breaks a B-Tree invariant
    #[error("corrupt node with index: {0}: {1}")]
    Corrupt(u64, String),

    /// Could not find a node's child
    #[error("could not find child: {1} for node with index: {0}")]
    LostChild(u64, usize),
}

/// A B-Tree index stored in a single file.
///
/// Keys and values are `u64`. Duplicate keys are allowed and are kept in insertion order.
pub struct Blockdex {
    file: BlockFile,
    path: PathBuf,
    header: Superblock,
    cache: PageCache,
    closed: bool,
}

impl Blockdex {
    /// Create a new index at the specified path. Fails if the path already exists.
    pub fn try_new<P: AsRef<Path>>(origin: P) -> Result<Self> {
        Blockdex::try_new_with_capacity(origin, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a new index at the specified path, caching at most `capacity` nodes.
    pub fn try_new_with_capacity<P: AsRef<Path>>(origin: P, capacity: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or(BlockdexError::CacheTooSmall(capacity))?;
        let path: &Path = origin.as_ref();

        tracing::info!("Creating B-Tree at: {}", path.display());

        let file = BlockFile::try_new(path)?;

        Ok(Self {
            file,
            path: path.into(),
            header: Superblock::default(),
            cache: PageCache::new(capacity),
            closed: false,
        })
    }

    /// Open an existing index at the specified path.
    pub fn try_open<P: AsRef<Path>>(origin: P) -> Result<Self> {
        Blockdex::try_open_with_capacity(origin, DEFAULT_CACHE_CAPACITY)
    }

    /// Open an existing index at the specified path, caching at most `capacity` nodes.
    pub fn try_open_with_capacity<P: AsRef<Path>>(origin: P, capacity: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or(BlockdexError::CacheTooSmall(capacity))?;
        let path: &Path = origin.as_ref();

        tracing::info!("Opening B-Tree at: {}", path.display());

        let mut file = BlockFile::try_open(path)?;
        let header = file.read_header()?;

        tracing::debug!(root = header.root, next_free = header.next_free, "read superblock");

        Ok(Self {
            file,
            path: path.into(),
            header,
            cache: PageCache::new(capacity),
            closed: false,
        })
    }

    /// Flush everything to disk and release the file.
    pub fn close(mut self) -> Result<()> {
        tracing::info!("Closing B-Tree at: {}", self.path.display());
        // Even if this fails, there's no point in trying again on drop
        self.closed = true;
        self.flush_to_disk()
    }

    /// Write all modified nodes and the superblock to disk and sync the file.
    pub fn flush_to_disk(&mut self) -> Result<()> {
        tracing::debug!("About to flush {} cached nodes", self.cache.len());
        self.cache.flush_all(&mut self.file)?;
        self.write_header()?;
        self.file.flush()
    }

    /// Block index of the root node, if the tree isn't empty.
    pub fn root(&self) -> Option<u64> {
        match self.header.root {
            NO_BLOCK => None,
            idx => Some(idx),
        }
    }

    /// The block index the next allocated node will receive.
    pub fn next_block(&self) -> u64 {
        self.header.next_free
    }

    /// Find the first entry, in key order, with this key.
    pub fn search(&mut self, key: u64) -> Result<Option<(u64, u64)>> {
        let Some(mut idx) = self.root() else {
            return Ok(None);
        };
        let mut found = None;
        loop {
            let node = self.fetch_node(idx)?;
            let pos = node.search_position(key);
            if pos < node.len() && node.keys()[pos] == key {
                // An equal key may also be hiding in the left subtree, and it would come
                // first, so keep looking.
                found = Some(node.pair(pos));
            }
            idx = node.child(pos);
            if idx == NO_BLOCK {
                return Ok(found);
            }
        }
    }

    /// Get the value of the first entry with this key.
    pub fn get(&mut self, key: u64) -> Result<Option<u64>> {
        Ok(self.search(key)?.map(|(_, value)| value))
    }

    /// Does the tree contain this key?
    pub fn contains(&mut self, key: u64) -> Result<bool> {
        Ok(self.search(key)?.is_some())
    }

    /// Insert a Key and Value.
    pub fn insert(&mut self, key: u64, value: u64) -> Result<()> {
        tracing::debug!("INSERTING: {}, {}", key, value);
        let Some(root_idx) = self.root() else {
            let mut root = self.add_node(NO_BLOCK)?;
            root.insert_value(key, value);
            self.header.root = root.index();
            self.write_header()?;
            return self.replace_node(root);
        };

        let root = self.fetch_node(root_idx)?;
        if root.is_full() {
            let mut new_root = self.add_node(NO_BLOCK)?;
            let new_idx = new_root.index();
            tracing::debug!(old = root_idx, new = new_idx, "Adding a new root");
            new_root.set_child(0, root_idx);
            self.replace_node(new_root)?;
            self.update_node(root_idx, |node| node.set_parent(new_idx))?;
            self.header.root = new_idx;
            self.write_header()?;
            self.split_child(new_idx, 0)?;
            self.insert_non_full(new_idx, key, value)
        } else {
            self.insert_non_full(root_idx, key, value)
        }
    }

    /// Iterate over all entries in ascending key order.
    ///
    /// Each call starts again from the root.
    pub fn entries(&mut self) -> Entries<'_> {
        let root = self.root();
        Entries::new(self, root)
    }

    /// Write every entry as a `key,value` line, in ascending key order. Returns the number of
    /// entries written.
    pub fn export<W: Write>(&mut self, mut out: W) -> Result<usize> {
        let mut count = 0;
        for entry in self.entries() {
            let (key, value) = entry?;
            writeln!(out, "{key},{value}")?;
            count += 1;
        }
        out.flush()?;
        Ok(count)
    }

    /// Return count of entries.
    pub fn count(&mut self) -> Result<usize> {
        self.entries().try_fold(0, |count, entry| entry.map(|_| count + 1))
    }

    /// Number of levels in the tree. An empty tree has height 0.
    pub fn height(&mut self) -> Result<usize> {
        let mut height = 0;
        let mut idx = self.header.root;
        while idx != NO_BLOCK {
            height += 1;
            idx = self.fetch_node(idx)?.child(0);
        }
        Ok(height)
    }

    /// Log basic information about our B-Tree.
    pub fn info(&mut self) -> Result<()> {
        let height = self.height()?;
        let count = self.count()?;
        tracing::info!(
            path = %self.path.display(),
            root = self.header.root,
            next_block = self.header.next_free,
            height,
            count,
            cache_capacity = self.cache.capacity(),
            "B-Tree"
        );
        Ok(())
    }

    /// Verify all the nodes in the tree.
    ///
    /// Checks fan-out, key ordering within and across nodes, child slots, parent links and
    /// that all leaves are at the same depth.
    pub fn verify(&mut self) -> Result<()> {
        struct Pending {
            idx: u64,
            parent: u64,
            depth: usize,
            low: Option<u64>,
            high: Option<u64>,
        }

        let Some(root) = self.root() else {
            return Ok(());
        };
        let mut leaf_depth = None;
        let mut pending = vec![Pending {
            idx: root,
            parent: NO_BLOCK,
            depth: 0,
            low: None,
            high: None,
        }];

        while let Some(next) = pending.pop() {
            let node = self.fetch_node(next.idx)?;
            let corrupt = |reason: String| BlockdexError::Corrupt(next.idx, reason);

            if node.index() >= self.header.next_free {
                return Err(corrupt("index was never allocated".to_string()).into());
            }
            if node.parent() != next.parent {
                return Err(corrupt(format!(
                    "parent is: {}, expected: {}",
                    node.parent(),
                    next.parent
                ))
                .into());
            }
            if next.parent != NO_BLOCK && node.len() < MIN_KEYS {
                return Err(corrupt(format!("only {} keys", node.len())).into());
            }
            if node.keys().windows(2).any(|pair| pair[0] > pair[1]) {
                return Err(corrupt("keys out of order".to_string()).into());
            }
            let in_range = |key: &u64| {
                next.low.map_or(true, |low| *key >= low)
                    && next.high.map_or(true, |high| *key <= high)
            };
            if !node.keys().iter().all(in_range) {
                return Err(corrupt("key outside parent separators".to_string()).into());
            }

            if node.is_leaf() {
                match leaf_depth {
                    None => leaf_depth = Some(next.depth),
                    Some(depth) if depth != next.depth => {
                        return Err(corrupt(format!(
                            "leaf at depth: {}, expected: {depth}",
                            next.depth
                        ))
                        .into());
                    }
                    Some(_) => (),
                }
                continue;
            }

            let (used, unused) = node.child_slots().split_at(node.len() + 1);
            if used.iter().any(|c| *c == NO_BLOCK) || unused.iter().any(|c| *c != NO_BLOCK) {
                return Err(corrupt("child slots don't match key count".to_string()).into());
            }
            for (pos, child) in used.iter().enumerate() {
                pending.push(Pending {
                    idx: *child,
                    parent: node.index(),
                    depth: next.depth + 1,
                    low: if pos == 0 {
                        next.low
                    } else {
                        Some(node.keys()[pos - 1])
                    },
                    high: node.keys().get(pos).copied().or(next.high),
                });
            }
        }
        Ok(())
    }

    /// Find a node from cache (or disk).
    pub(crate) fn fetch_node(&mut self, idx: u64) -> Result<Node> {
        if let Some(node) = self.cache.get(idx) {
            return Ok(node);
        }
        let node = self.read_node(idx)?;
        self.cache.put(node.clone(), false, &mut self.file)?;
        Ok(node)
    }

    /// Read a node from disk.
    fn read_node(&mut self, idx: u64) -> Result<Node> {
        if idx == NO_BLOCK || idx >= self.header.next_free {
            return Err(BlockdexError::Corrupt(idx, "index was never allocated".to_string()).into());
        }
        let block = self.file.read_block(idx)?;
        let node = Node::deserialize(&block)?;
        if node.index() != idx {
            return Err(BlockdexError::Corrupt(
                idx,
                format!("block holds node with index: {}", node.index()),
            )
            .into());
        }
        if node.count() > MAX_KEYS as u64 {
            return Err(
                BlockdexError::Corrupt(idx, format!("key count: {}", node.count())).into(),
            );
        }
        Ok(node)
    }

    /// Hand a modified node back to the cache.
    fn replace_node(&mut self, node: Node) -> Result<()> {
        self.cache.put(node, true, &mut self.file)
    }

    fn update_node(&mut self, idx: u64, f: impl FnOnce(&mut Node)) -> Result<()> {
        let mut node = self.fetch_node(idx)?;
        f(&mut node);
        self.replace_node(node)
    }

    /// Allocate a new, empty node. The superblock is written straight away so the allocation
    /// survives even if the node itself is never flushed.
    fn add_node(&mut self, parent: u64) -> Result<Node> {
        let idx = self.header.next_free;
        self.header.next_free += 1;
        self.write_header()?;
        tracing::debug!(node = idx, parent, "allocated node");

        let node = Node::new(idx, parent);
        self.cache.put(node.clone(), true, &mut self.file)?;
        Ok(node)
    }

    fn write_header(&mut self) -> Result<()> {
        self.file.write_header(&self.header)
    }

    /// Split the full child at `pos` of the (non-full) parent.
    fn split_child(&mut self, parent_idx: u64, pos: usize) -> Result<()> {
        let child_idx = self.fetch_node(parent_idx)?.child(pos);
        if child_idx == NO_BLOCK {
            return Err(BlockdexError::LostChild(parent_idx, pos).into());
        }

        let mut sibling = self.add_node(parent_idx)?;
        let mut child = self.fetch_node(child_idx)?;
        let (key, value) = child.split(&mut sibling);
        let sibling_idx = sibling.index();

        // Everything that moved needs to know its new parent
        for grandchild in sibling.child_slots()[..MAX_CHILDREN / 2]
            .iter()
            .copied()
            .filter(|c| *c != NO_BLOCK)
        {
            self.update_node(grandchild, |node| node.set_parent(sibling_idx))?;
        }
        self.replace_node(child)?;
        self.replace_node(sibling)?;

        let mut parent = self.fetch_node(parent_idx)?;
        parent.insert_child(pos, key, value, sibling_idx);
        self.replace_node(parent)
    }

    /// Insert into the subtree rooted at `idx`, whose root must not be full.
    fn insert_non_full(&mut self, mut idx: u64, key: u64, value: u64) -> Result<()> {
        loop {
            let mut node = self.fetch_node(idx)?;
            if node.is_leaf() {
                node.insert_value(key, value);
                return self.replace_node(node);
            }

            let mut pos = node.child_position(key);
            let child_idx = node.child(pos);
            if child_idx == NO_BLOCK {
                return Err(BlockdexError::LostChild(idx, pos).into());
            }
            if self.fetch_node(child_idx)?.is_full() {
                self.split_child(idx, pos)?;
                // The promoted median now sits at pos
                let node = self.fetch_node(idx)?;
                if key >= node.keys()[pos] {
                    pos += 1;
                }
                idx = node.child(pos);
            } else {
                idx = child_idx;
            }
        }
    }
}

impl Drop for Blockdex {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.flush_to_disk() {
            tracing::warn!("could not flush index file to disk: {}", e);
        }
    }
}
