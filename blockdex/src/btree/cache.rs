//! Page Cache
//!
//! A small, bounded, least recently used cache of decoded nodes. Modified nodes are written
//! back to the block store when they are evicted or flushed. Nothing is written for a clean
//! node.

use std::num::NonZeroUsize;

use anyhow::Result;
use lru::LruCache;

use super::node::Node;
use super::sparse::BuildIdentityHasher;
use crate::io::BlockStore;

#[derive(Debug)]
struct Entry {
    node: Node,
    dirty: bool,
}

pub(crate) struct PageCache {
    entries: LruCache<u64, Entry, BuildIdentityHasher>,
}

impl PageCache {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::with_hasher(capacity, Default::default()),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, idx: u64) -> bool {
        self.entries.contains(&idx)
    }

    /// Return a copy of a resident node and mark it most recently used.
    pub(crate) fn get(&mut self, idx: u64) -> Option<Node> {
        self.entries.get(&idx).map(|entry| entry.node.clone())
    }

    /// Insert (or replace) a node as most recently used, evicting the least recently used
    /// node if the cache is full.
    ///
    /// A replaced entry stays dirty if it was already dirty. A dirty victim is only
    /// discarded once it has been written, so a failed write leaves it resident.
    pub(crate) fn put(
        &mut self,
        node: Node,
        dirty: bool,
        store: &mut impl BlockStore,
    ) -> Result<()> {
        let idx = node.index();
        if let Some(entry) = self.entries.get_mut(&idx) {
            entry.node = node;
            entry.dirty |= dirty;
            return Ok(());
        }

        if self.entries.len() == self.capacity() {
            if let Some((victim, entry)) = self.entries.peek_lru() {
                if entry.dirty {
                    tracing::debug!(node = victim, "writing back evicted node");
                    store.write_block(*victim, &entry.node.serialize()?)?;
                }
            }
            self.entries.pop_lru();
        }
        self.entries.push(idx, Entry { node, dirty });
        Ok(())
    }

    /// Write back every dirty node and empty the cache.
    pub(crate) fn flush_all(&mut self, store: &mut impl BlockStore) -> Result<()> {
        for (idx, entry) in self.entries.iter_mut().filter(|(_, e)| e.dirty) {
            tracing::debug!(node = idx, "flushing node");
            store.write_block(*idx, &entry.node.serialize()?)?;
            entry.dirty = false;
        }
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::io::{Block, NO_BLOCK};

    /// Records writes so we can see exactly what the cache does.
    #[derive(Default)]
    struct MemoryStore {
        blocks: HashMap<u64, Block>,
        writes: Vec<u64>,
        broken: bool,
    }

    impl BlockStore for MemoryStore {
        fn read_block(&mut self, idx: u64) -> Result<Block> {
            self.blocks
                .get(&idx)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no block: {idx}"))
        }

        fn write_block(&mut self, idx: u64, block: &Block) -> Result<()> {
            if self.broken {
                anyhow::bail!("write failed: {idx}");
            }
            self.writes.push(idx);
            self.blocks.insert(idx, *block);
            Ok(())
        }
    }

    fn page_cache(capacity: usize) -> PageCache {
        PageCache::new(NonZeroUsize::new(capacity).expect("non zero"))
    }

    fn node(idx: u64) -> Node {
        let mut node = Node::new(idx, NO_BLOCK);
        node.insert_value(idx, idx * 100);
        node
    }

    #[test]
    fn it_evicts_least_recently_used() {
        let mut store = MemoryStore::default();
        let mut cache = page_cache(3);
        for idx in 1..=3 {
            cache.put(node(idx), false, &mut store).expect("put");
        }
        // 1 is now most recently used, so 2 is next out
        assert!(cache.get(1).is_some());
        cache.put(node(4), false, &mut store).expect("put");

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(3));
        assert!(cache.contains(4));
        // Everything was clean
        assert!(store.writes.is_empty());
    }

    #[test]
    fn it_writes_back_dirty_nodes_on_eviction() {
        let mut store = MemoryStore::default();
        let mut cache = page_cache(2);
        cache.put(node(1), true, &mut store).expect("put");
        cache.put(node(2), false, &mut store).expect("put");
        cache.put(node(3), false, &mut store).expect("put");
        assert_eq!(store.writes, vec![1]);
        cache.put(node(4), false, &mut store).expect("put");
        assert_eq!(store.writes, vec![1]);

        let block = store.read_block(1).expect("written");
        assert_eq!(Node::deserialize(&block).expect("decodes"), node(1));
    }

    #[test]
    fn it_keeps_a_replaced_entry_dirty() {
        let mut store = MemoryStore::default();
        let mut cache = page_cache(1);
        cache.put(node(1), true, &mut store).expect("put");
        let mut updated = cache.get(1).expect("resident");
        updated.insert_value(7, 70);
        cache.put(updated.clone(), false, &mut store).expect("put");
        cache.put(node(2), false, &mut store).expect("put");

        assert_eq!(store.writes, vec![1]);
        let block = store.read_block(1).expect("written");
        assert_eq!(Node::deserialize(&block).expect("decodes"), updated);
    }

    #[test]
    fn it_misses_unknown_nodes() {
        let mut cache = page_cache(3);
        assert!(cache.get(42).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn it_flushes_only_dirty_nodes() {
        let mut store = MemoryStore::default();
        let mut cache = page_cache(3);
        cache.put(node(1), true, &mut store).expect("put");
        cache.put(node(2), false, &mut store).expect("put");
        cache.put(node(3), true, &mut store).expect("put");

        cache.flush_all(&mut store).expect("flush");

        store.writes.sort_unstable();
        assert_eq!(store.writes, vec![1, 3]);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.capacity(), 3);
    }

    #[test]
    fn it_keeps_a_dirty_victim_when_write_back_fails() {
        let mut store = MemoryStore::default();
        let mut cache = page_cache(1);
        cache.put(node(1), true, &mut store).expect("put");

        store.broken = true;
        assert!(cache.put(node(2), false, &mut store).is_err());
        assert!(cache.contains(1));
        assert!(!cache.contains(2));

        store.broken = false;
        cache.flush_all(&mut store).expect("flush");
        assert_eq!(store.writes, vec![1]);
        let block = store.read_block(1).expect("written");
        assert_eq!(Node::deserialize(&block).expect("decodes"), node(1));
    }
}
