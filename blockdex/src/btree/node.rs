//! B-Tree Node
//!
//! A node is stored in exactly one block:
//!
//! | bytes   | field                      |
//! |---------|----------------------------|
//! | 0..8    | block index                |
//! | 8..16   | parent block index         |
//! | 16..24  | key count                  |
//! | 24..176 | 19 keys                    |
//! | 176..328| 19 values                  |
//! | 328..488| 20 child block indices     |
//! | 488..512| zero padding               |
//!
//! All fields are big-endian u64. A child index of 0 means "no child".

use anyhow::Error;
use anyhow::Result;
use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::io::{to_block, Block, NO_BLOCK};
use crate::BINCODER;

/// Minimum degree of the tree.
pub(crate) const DEGREE: usize = 10;

pub(crate) const MAX_KEYS: usize = 2 * DEGREE - 1;

pub(crate) const MAX_CHILDREN: usize = 2 * DEGREE;

/// Only non-root nodes are held to this.
pub(crate) const MIN_KEYS: usize = DEGREE - 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Node {
    idx: u64,
    parent: u64,
    count: u64,
    keys: [u64; MAX_KEYS],
    values: [u64; MAX_KEYS],
    children: [u64; MAX_CHILDREN],
}

impl Node {
    pub(crate) fn new(idx: u64, parent: u64) -> Self {
        Self {
            idx,
            parent,
            count: 0,
            keys: [0; MAX_KEYS],
            values: [0; MAX_KEYS],
            children: [NO_BLOCK; MAX_CHILDREN],
        }
    }

    pub(crate) fn serialize(&self) -> Result<Block> {
        to_block(self)
    }

    pub(crate) fn deserialize(block: &Block) -> Result<Self> {
        BINCODER.deserialize(block).map_err(Error::new)
    }

    pub(crate) fn index(&self) -> u64 {
        self.idx
    }

    pub(crate) fn parent(&self) -> u64 {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: u64) {
        self.parent = parent;
    }

    /// Raw key count, exactly as stored. Use this to validate a node read from disk.
    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn len(&self) -> usize {
        self.count as usize
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() == MAX_KEYS
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.iter().all(|c| *c == NO_BLOCK)
    }

    pub(crate) fn keys(&self) -> &[u64] {
        &self.keys[..self.len()]
    }

    pub(crate) fn pair(&self, pos: usize) -> (u64, u64) {
        (self.keys[pos], self.values[pos])
    }

    #[cfg(test)]
    pub(crate) fn pairs(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.keys().iter().copied().zip(self.values.iter().copied())
    }

    pub(crate) fn child(&self, pos: usize) -> u64 {
        self.children[pos]
    }

    /// Every child slot, including the empty ones.
    pub(crate) fn child_slots(&self) -> &[u64; MAX_CHILDREN] {
        &self.children
    }

    pub(crate) fn set_child(&mut self, pos: usize, child: u64) {
        self.children[pos] = child;
    }

    /// Position of the first key >= `key`.
    pub(crate) fn search_position(&self, key: u64) -> usize {
        self.keys().partition_point(|k| *k < key)
    }

    /// Position of the child whose subtree should receive `key`. Equal keys go right, so
    /// duplicates stay in insertion order.
    pub(crate) fn child_position(&self, key: u64) -> usize {
        self.keys().partition_point(|k| *k <= key)
    }

    /// Add a pair to a leaf, after any existing pairs with an equal key.
    pub(crate) fn insert_value(&mut self, key: u64, value: u64) {
        assert!(!self.is_full(), "insert into full node: {}", self.idx);
        let len = self.len();
        let pos = self.child_position(key);
        self.keys.copy_within(pos..len, pos + 1);
        self.values.copy_within(pos..len, pos + 1);
        self.keys[pos] = key;
        self.values[pos] = value;
        self.count += 1;
    }

    /// Add a separator pair at `pos` with `child` as its right hand child.
    pub(crate) fn insert_child(&mut self, pos: usize, key: u64, value: u64, child: u64) {
        assert!(!self.is_full(), "insert into full node: {}", self.idx);
        let len = self.len();
        self.children.copy_within(pos + 1..len + 1, pos + 2);
        self.children[pos + 1] = child;
        self.keys.copy_within(pos..len, pos + 1);
        self.values.copy_within(pos..len, pos + 1);
        self.keys[pos] = key;
        self.values[pos] = value;
        self.count += 1;
    }

    /// Split a full node. The upper half of our pairs and children move into `sibling`,
    /// which must be empty, and the median pair is returned for promotion to our parent.
    pub(crate) fn split(&mut self, sibling: &mut Node) -> (u64, u64) {
        assert!(self.is_full(), "split of non-full node: {}", self.idx);
        assert_eq!(sibling.count, 0);

        tracing::debug!(node = self.idx, sibling = sibling.idx, "splitting node");
        sibling.keys[..DEGREE - 1].copy_from_slice(&self.keys[DEGREE..]);
        sibling.values[..DEGREE - 1].copy_from_slice(&self.values[DEGREE..]);
        sibling.children[..DEGREE].copy_from_slice(&self.children[DEGREE..]);
        sibling.count = (DEGREE - 1) as u64;

        let median = self.pair(DEGREE - 1);

        // Clear everything we gave away (and the median) so stale data never reaches disk
        self.keys[DEGREE - 1..].fill(0);
        self.values[DEGREE - 1..].fill(0);
        self.children[DEGREE..].fill(NO_BLOCK);
        self.count = (DEGREE - 1) as u64;

        median
    }
}
