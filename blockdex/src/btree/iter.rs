use anyhow::Result;

use super::blockdex::Blockdex;
use crate::io::NO_BLOCK;

/// Position within one node of an in-order walk.
#[derive(Debug)]
struct Frame {
    idx: u64,
    pos: usize,
    /// Have we already walked the child to the left of `pos`?
    descended: bool,
}

/// In-order iterator over the entries of a [`Blockdex`], in ascending key order.
///
/// Nodes are fetched through the page cache one step at a time, so only the path from the
/// root to the current node is remembered (as block indices), never the nodes themselves.
/// After an error the iterator is exhausted.
pub struct Entries<'a> {
    tree: &'a mut Blockdex,
    stack: Vec<Frame>,
}

impl<'a> Entries<'a> {
    pub(crate) fn new(tree: &'a mut Blockdex, root: Option<u64>) -> Self {
        let stack = root
            .map(|idx| Frame {
                idx,
                pos: 0,
                descended: false,
            })
            .into_iter()
            .collect();
        Self { tree, stack }
    }

    fn advance(&mut self) -> Result<Option<(u64, u64)>> {
        // Each node contains a number of entries and children, we must interleave the two:
        // child[0], entry[0], child[1], ... entry[len - 1], child[len]
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let node = self.tree.fetch_node(frame.idx)?;
            if !frame.descended {
                frame.descended = true;
                let child = node.child(frame.pos);
                if child != NO_BLOCK {
                    self.stack.push(Frame {
                        idx: child,
                        pos: 0,
                        descended: false,
                    });
                    continue;
                }
            }
            if frame.pos < node.len() {
                let pair = node.pair(frame.pos);
                frame.pos += 1;
                frame.descended = false;
                return Ok(Some(pair));
            }
            self.stack.pop();
        }
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(pair) => pair.map(Ok),
            Err(e) => {
                self.stack.clear();
                Some(Err(e))
            }
        }
    }
}
