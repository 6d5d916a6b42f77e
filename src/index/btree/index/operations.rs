use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::codec;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};

use super::base::{BPlusTree, Context};

impl BPlusTree {
    /// Point lookup. Descends with read guards, releasing each parent
    /// before latching its child.
    pub fn get(&self, key: &[u8]) -> Result<Option<Rid>, BTreeError> {
        self.check_key(key)?;
        let cmp = self.comparator.as_ref();

        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_page_id = codec::read_root_page_id(header.data());
        drop(header);
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut page_id = root_page_id;
        loop {
            let guard = self.buffer_pool.fetch_page_read(page_id)?;
            match codec::decode_node(guard.data(), self.key_size) {
                BTreeNode::Internal(node) => {
                    let child = node.children[node.child_index(key, cmp)];
                    drop(guard);
                    page_id = child;
                }
                BTreeNode::Leaf(leaf) => return Ok(leaf.get(key, cmp)),
            }
        }
    }

    /// Insert a unique key. Returns false if the key is already present.
    ///
    /// Descends with write guards; ancestors (header included) are released
    /// as soon as a child cannot split, so concurrent writers only contend
    /// on the subtree a split could actually touch.
    pub fn insert(&self, key: &[u8], value: Rid) -> Result<bool, BTreeError> {
        self.check_key(key)?;
        let cmp = self.comparator.as_ref();
        let mut ctx = Context::new();

        let mut header = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_page_id = codec::read_root_page_id(header.data());

        if root_page_id == INVALID_PAGE_ID {
            // Empty tree: the first leaf becomes the root
            let (leaf_page_id, mut leaf_guard) = self.buffer_pool.new_page_guarded()?;
            let mut leaf = LeafNode::new(self.leaf_max_size);
            leaf.insert(key.to_vec(), value, cmp);
            codec::encode_leaf(&leaf, self.key_size, &mut leaf_guard.write()[..]);
            codec::write_root_page_id(header.data_mut(), leaf_page_id);
            return Ok(true);
        }

        ctx.root_page_id = root_page_id;
        ctx.header = Some(header);

        let mut page_id = root_page_id;
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let mut node = codec::decode_node(guard.data(), self.key_size);
        loop {
            match node {
                BTreeNode::Internal(internal) => {
                    let child_id = internal.children[internal.child_index(key, cmp)];
                    ctx.write_set.push((page_id, guard));
                    let child_guard = self.buffer_pool.fetch_page_write(child_id)?;
                    let child_node = codec::decode_node(child_guard.data(), self.key_size);
                    if child_node.size() + 1 < child_node.max_size() {
                        // Safe under insertion: nothing above can change
                        ctx.header = None;
                        ctx.write_set.clear();
                    }
                    page_id = child_id;
                    guard = child_guard;
                    node = child_node;
                }
                BTreeNode::Leaf(mut leaf) => {
                    if leaf.get(key, cmp).is_some() {
                        return Ok(false);
                    }
                    if leaf.size() < leaf.max_size {
                        leaf.insert(key.to_vec(), value, cmp);
                        codec::encode_leaf(&leaf, self.key_size, guard.data_mut());
                        return Ok(true);
                    }

                    // Full leaf: split, link the chain, propagate upward
                    leaf.insert(key.to_vec(), value, cmp);
                    let (separator, mut right) = leaf.split();
                    let (right_id, mut right_guard) = self.buffer_pool.new_page_guarded()?;
                    right.next_page_id = leaf.next_page_id;
                    leaf.next_page_id = right_id;
                    codec::encode_leaf(&leaf, self.key_size, guard.data_mut());
                    codec::encode_leaf(&right, self.key_size, &mut right_guard.write()[..]);
                    drop(right_guard);
                    drop(guard);
                    self.insert_in_parent(page_id, separator, right_id, &mut ctx)?;
                    return Ok(true);
                }
            }
        }
    }

    /// Publish a split: hang `(separator, right)` off the parent of `left`,
    /// growing a new root when `left` was the root.
    fn insert_in_parent<'a>(
        &'a self,
        left_id: PageId,
        separator: Vec<u8>,
        right_id: PageId,
        ctx: &mut Context<'a>,
    ) -> Result<(), BTreeError> {
        let cmp = self.comparator.as_ref();

        if ctx.root_page_id == left_id {
            let (new_root_id, mut root_guard) = self.buffer_pool.new_page_guarded()?;
            let mut root = InternalNode::new(self.internal_max_size);
            root.children.push(left_id);
            root.keys.push(separator);
            root.children.push(right_id);
            codec::encode_internal(&root, self.key_size, &mut root_guard.write()[..]);

            let header = ctx.header.as_mut().expect("header guard held for root split");
            codec::write_root_page_id(header.data_mut(), new_root_id);
            ctx.root_page_id = new_root_id;
            return Ok(());
        }

        let (parent_id, mut parent_guard) = ctx
            .write_set
            .pop()
            .expect("parent guard held on the descent path");
        let BTreeNode::Internal(mut parent) = codec::decode_node(parent_guard.data(), self.key_size)
        else {
            panic!("corrupt index: parent of page {} is not internal", left_id);
        };

        if parent.size() < parent.max_size {
            parent.insert(separator, right_id, cmp);
            codec::encode_internal(&parent, self.key_size, parent_guard.data_mut());
            return Ok(());
        }

        // Parent is full too: split it and recurse with the promoted key
        parent.insert(separator, right_id, cmp);
        let (middle, right) = parent.split();
        let (new_right_id, mut right_guard) = self.buffer_pool.new_page_guarded()?;
        codec::encode_internal(&parent, self.key_size, parent_guard.data_mut());
        codec::encode_internal(&right, self.key_size, &mut right_guard.write()[..]);
        drop(right_guard);
        drop(parent_guard);
        self.insert_in_parent(parent_id, middle, new_right_id, ctx)
    }
}
