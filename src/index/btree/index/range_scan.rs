use log::warn;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::codec;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, LeafNode};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::guard::BasicPageGuard;

use super::base::BPlusTree;

struct Cursor<'a> {
    // Pins the leaf the cursor sits on for as long as it is current
    _guard: BasicPageGuard<'a>,
    leaf: LeafNode,
    index: usize,
}

/// Forward iterator over the leaf chain, yielding entries in ascending key
/// order. Exhaustion is the end sentinel.
pub struct TreeIterator<'a> {
    buffer_pool: &'a BufferPoolManager,
    key_size: usize,
    current: Option<Cursor<'a>>,
}

impl<'a> TreeIterator<'a> {
    fn exhausted(tree: &'a BPlusTree) -> Self {
        Self {
            buffer_pool: &tree.buffer_pool,
            key_size: tree.key_size,
            current: None,
        }
    }

    fn positioned(tree: &'a BPlusTree, guard: BasicPageGuard<'a>, leaf: LeafNode, index: usize) -> Self {
        Self {
            buffer_pool: &tree.buffer_pool,
            key_size: tree.key_size,
            current: Some(Cursor {
                _guard: guard,
                leaf,
                index,
            }),
        }
    }
}

impl Iterator for TreeIterator<'_> {
    type Item = (Vec<u8>, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut cursor = self.current.take()?;
            if cursor.index < cursor.leaf.size() {
                let item = (
                    cursor.leaf.keys[cursor.index].clone(),
                    cursor.leaf.values[cursor.index],
                );
                cursor.index += 1;
                self.current = Some(cursor);
                return Some(item);
            }

            let next_page_id = cursor.leaf.next_page_id;
            drop(cursor);
            if next_page_id == INVALID_PAGE_ID {
                return None;
            }

            let guard = match self.buffer_pool.fetch_page_basic(next_page_id) {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("leaf scan stopped at page {}: {}", next_page_id, e);
                    return None;
                }
            };
            let BTreeNode::Leaf(leaf) = codec::decode_node(&guard.read()[..], self.key_size) else {
                panic!("corrupt index: leaf chain reached a non-leaf page");
            };
            self.current = Some(Cursor {
                _guard: guard,
                leaf,
                index: 0,
            });
        }
    }
}

impl BPlusTree {
    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<TreeIterator<'_>, BTreeError> {
        let root_page_id = self.root_page_id()?;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(TreeIterator::exhausted(self));
        }

        let mut page_id = root_page_id;
        loop {
            let guard = self.buffer_pool.fetch_page_basic(page_id)?;
            let node = codec::decode_node(&guard.read()[..], self.key_size);
            match node {
                BTreeNode::Internal(node) => {
                    page_id = node.children[0];
                }
                BTreeNode::Leaf(leaf) => {
                    return Ok(TreeIterator::positioned(self, guard, leaf, 0));
                }
            }
        }
    }

    /// Iterator positioned at `key`. An absent key yields an exhausted
    /// iterator.
    pub fn begin_at(&self, key: &[u8]) -> Result<TreeIterator<'_>, BTreeError> {
        self.check_key(key)?;
        let cmp = self.comparator.as_ref();

        let root_page_id = self.root_page_id()?;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(TreeIterator::exhausted(self));
        }

        let mut page_id = root_page_id;
        loop {
            let guard = self.buffer_pool.fetch_page_basic(page_id)?;
            let node = codec::decode_node(&guard.read()[..], self.key_size);
            match node {
                BTreeNode::Internal(node) => {
                    page_id = node.children[node.child_index(key, cmp)];
                }
                BTreeNode::Leaf(leaf) => {
                    return match leaf.position(key, cmp) {
                        Ok(index) => Ok(TreeIterator::positioned(self, guard, leaf, index)),
                        Err(_) => Ok(TreeIterator::exhausted(self)),
                    };
                }
            }
        }
    }
}
