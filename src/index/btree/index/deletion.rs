use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::codec;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::storage::page::guard::WritePageGuard;

use super::base::{BPlusTree, Context};

impl BPlusTree {
    /// Remove a key. Absent keys are a no-op.
    ///
    /// Mirrors the insert descent with the delete-safety test: ancestors
    /// are released once a child cannot underflow.
    pub fn remove(&self, key: &[u8]) -> Result<(), BTreeError> {
        self.check_key(key)?;
        let cmp = self.comparator.as_ref();
        let mut ctx = Context::new();

        let header = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_page_id = codec::read_root_page_id(header.data());
        if root_page_id == INVALID_PAGE_ID {
            return Ok(());
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
                    if child_node.size() > child_node.min_size() {
                        // Safe under deletion: no merge can propagate up
                        ctx.header = None;
                        ctx.write_set.clear();
                    }
                    page_id = child_id;
                    guard = child_guard;
                    node = child_node;
                }
                BTreeNode::Leaf(_) => break,
            }
        }
        self.remove_entry(page_id, guard, key, &mut ctx)
    }

    /// Remove `key` from the page behind `guard`, then restore the size
    /// invariant: collapse the root, or merge with / borrow from a sibling
    /// on underflow, recursing into the parent when a separator disappears.
    fn remove_entry<'a>(
        &'a self,
        page_id: PageId,
        mut guard: WritePageGuard<'a>,
        key: &[u8],
        ctx: &mut Context<'a>,
    ) -> Result<(), BTreeError> {
        let cmp = self.comparator.as_ref();
        let mut node = codec::decode_node(guard.data(), self.key_size);

        let removed = match &mut node {
            BTreeNode::Leaf(leaf) => leaf.remove(key, cmp),
            BTreeNode::Internal(internal) => internal.remove_key(key, cmp),
        };
        if !removed {
            return Ok(());
        }

        if page_id == ctx.root_page_id {
            if node.size() == 0 {
                // Last entry gone: the tree is empty again
                let header = ctx.header.as_mut().expect("header guard held for root change");
                codec::write_root_page_id(header.data_mut(), INVALID_PAGE_ID);
                ctx.root_page_id = INVALID_PAGE_ID;
                drop(guard);
                self.buffer_pool.delete_page(page_id)?;
                return Ok(());
            }
            if let BTreeNode::Internal(ref internal) = node {
                if internal.size() == 1 {
                    // Root with a single child: promote the child
                    let child = internal.children[0];
                    let header = ctx.header.as_mut().expect("header guard held for root change");
                    codec::write_root_page_id(header.data_mut(), child);
                    ctx.root_page_id = child;
                    drop(guard);
                    self.buffer_pool.delete_page(page_id)?;
                    return Ok(());
                }
            }
            codec::encode_node(&node, self.key_size, guard.data_mut());
            return Ok(());
        }

        if node.size() >= node.min_size() {
            codec::encode_node(&node, self.key_size, guard.data_mut());
            return Ok(());
        }

        // Underflow: find the sibling and the separator between the pair
        let (parent_id, mut parent_guard) = ctx
            .write_set
            .pop()
            .expect("parent guard held for underflow handling");
        let BTreeNode::Internal(mut parent) = codec::decode_node(parent_guard.data(), self.key_size)
        else {
            panic!("corrupt index: parent of page {} is not internal", page_id);
        };
        let pos = parent
            .children
            .iter()
            .position(|&c| c == page_id)
            .expect("underflowing page must appear in its parent");
        // Left sibling, unless this page is the leftmost child
        let (sibling_pos, separator_idx) = if pos == 0 { (1, 0) } else { (pos - 1, pos - 1) };
        let separator = parent.keys[separator_idx].clone();
        let sibling_id = parent.children[sibling_pos];

        let mut sibling_guard = self.buffer_pool.fetch_page_write(sibling_id)?;
        let mut sibling = codec::decode_node(sibling_guard.data(), self.key_size);

        if sibling.size() <= sibling.min_size() {
            // Sibling cannot lend: merge the pair into its left page and
            // pull the separator out of the parent
            let (right_id, left_guard, right_guard) = match (node, sibling) {
                (BTreeNode::Leaf(cur), BTreeNode::Leaf(sib)) => {
                    let (mut left, right, right_id, mut left_guard, right_guard) = if pos == 0 {
                        (cur, sib, sibling_id, guard, sibling_guard)
                    } else {
                        (sib, cur, page_id, sibling_guard, guard)
                    };
                    left.keys.extend(right.keys);
                    left.values.extend(right.values);
                    left.next_page_id = right.next_page_id;
                    codec::encode_leaf(&left, self.key_size, left_guard.data_mut());
                    (right_id, left_guard, right_guard)
                }
                (BTreeNode::Internal(cur), BTreeNode::Internal(sib)) => {
                    let (mut left, right, right_id, mut left_guard, right_guard) = if pos == 0 {
                        (cur, sib, sibling_id, guard, sibling_guard)
                    } else {
                        (sib, cur, page_id, sibling_guard, guard)
                    };
                    // The separator comes down as the key over the right
                    // page's pointer-only child
                    left.keys.push(separator.clone());
                    left.keys.extend(right.keys);
                    left.children.extend(right.children);
                    codec::encode_internal(&left, self.key_size, left_guard.data_mut());
                    (right_id, left_guard, right_guard)
                }
                _ => panic!("corrupt index: sibling pages of different kinds"),
            };
            drop(left_guard);
            drop(right_guard);
            self.remove_entry(parent_id, parent_guard, &separator, ctx)?;
            self.buffer_pool.delete_page(right_id)?;
            return Ok(());
        }

        // Sibling can lend: move one entry over and fix the separator
        match (&mut node, &mut sibling) {
            (BTreeNode::Leaf(cur), BTreeNode::Leaf(sib)) => {
                if pos == 0 {
                    // Steal the right sibling's first entry
                    let k = sib.keys.remove(0);
                    let v = sib.values.remove(0);
                    cur.keys.push(k);
                    cur.values.push(v);
                    parent.keys[separator_idx] = sib.keys[0].clone();
                } else {
                    // Steal the left sibling's last entry
                    let last = sib.keys.len() - 1;
                    let k = sib.keys.remove(last);
                    let v = sib.values.remove(last);
                    cur.keys.insert(0, k.clone());
                    cur.values.insert(0, v);
                    parent.keys[separator_idx] = k;
                }
            }
            (BTreeNode::Internal(cur), BTreeNode::Internal(sib)) => {
                if pos == 0 {
                    // Separator comes down over the right sibling's first
                    // child; its first key moves up
                    cur.keys.push(separator.clone());
                    cur.children.push(sib.children.remove(0));
                    parent.keys[separator_idx] = sib.keys.remove(0);
                } else {
                    let last_key = sib.keys.remove(sib.keys.len() - 1);
                    let last_child = sib.children.remove(sib.children.len() - 1);
                    cur.keys.insert(0, separator.clone());
                    cur.children.insert(0, last_child);
                    parent.keys[separator_idx] = last_key;
                }
            }
            _ => panic!("corrupt index: sibling pages of different kinds"),
        }
        codec::encode_node(&node, self.key_size, guard.data_mut());
        codec::encode_node(&sibling, self.key_size, sibling_guard.data_mut());
        codec::encode_internal(&parent, self.key_size, parent_guard.data_mut());
        Ok(())
    }
}
