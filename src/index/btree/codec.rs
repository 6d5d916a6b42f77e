use byteorder::{BigEndian, ByteOrder};

use crate::common::types::{PageId, Rid, PAGE_SIZE};
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};

// Header page: bytes 0..4 hold the root page id, big-endian signed.
const ROOT_OFFSET: usize = 0;

// Node pages: tag byte, u16 entry count, u16 max size; leaves add a
// big-endian next-page id before the entry slots.
const TAG_LEAF: u8 = 1;
const TAG_INTERNAL: u8 = 2;
const SIZE_OFFSET: usize = 1;
const MAX_SIZE_OFFSET: usize = 3;
const NEXT_PAGE_OFFSET: usize = 5;
pub const INTERNAL_HEADER_SIZE: usize = 5;
pub const LEAF_HEADER_SIZE: usize = 9;

/// Per-entry bytes: key + child page id.
pub fn internal_entry_size(key_size: usize) -> usize {
    key_size + 4
}

/// Per-entry bytes: key + record id (page + slot).
pub fn leaf_entry_size(key_size: usize) -> usize {
    key_size + 8
}

/// Whether `max_size` entries of either node kind fit in a page.
pub fn node_fits_page(max_size: usize, key_size: usize) -> bool {
    INTERNAL_HEADER_SIZE + max_size * internal_entry_size(key_size) <= PAGE_SIZE
        && LEAF_HEADER_SIZE + max_size * leaf_entry_size(key_size) <= PAGE_SIZE
}

pub fn read_root_page_id(data: &[u8]) -> PageId {
    BigEndian::read_i32(&data[ROOT_OFFSET..ROOT_OFFSET + 4])
}

pub fn write_root_page_id(data: &mut [u8], root_page_id: PageId) {
    BigEndian::write_i32(&mut data[ROOT_OFFSET..ROOT_OFFSET + 4], root_page_id);
}

/// Decode a node page. A corrupt type tag is a fatal invariant violation.
pub fn decode_node(data: &[u8], key_size: usize) -> BTreeNode {
    let tag = data[0];
    let size = BigEndian::read_u16(&data[SIZE_OFFSET..SIZE_OFFSET + 2]) as usize;
    let max_size = BigEndian::read_u16(&data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 2]) as usize;

    match tag {
        TAG_LEAF => {
            let next_page_id = BigEndian::read_i32(&data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4]);
            let mut node = LeafNode::new(max_size);
            node.next_page_id = next_page_id;
            let entry = leaf_entry_size(key_size);
            for i in 0..size {
                let off = LEAF_HEADER_SIZE + i * entry;
                node.keys.push(data[off..off + key_size].to_vec());
                let page_id = BigEndian::read_i32(&data[off + key_size..off + key_size + 4]);
                let slot = BigEndian::read_u32(&data[off + key_size + 4..off + key_size + 8]);
                node.values.push(Rid::new(page_id, slot));
            }
            BTreeNode::Leaf(node)
        }
        TAG_INTERNAL => {
            let mut node = InternalNode::new(max_size);
            let entry = internal_entry_size(key_size);
            for i in 0..size {
                let off = INTERNAL_HEADER_SIZE + i * entry;
                // Slot 0's key bytes are present but meaningless
                if i > 0 {
                    node.keys.push(data[off..off + key_size].to_vec());
                }
                node.children
                    .push(BigEndian::read_i32(&data[off + key_size..off + key_size + 4]));
            }
            BTreeNode::Internal(node)
        }
        _ => panic!("corrupt index page: unknown type tag {}", tag),
    }
}

pub fn encode_node(node: &BTreeNode, key_size: usize, data: &mut [u8]) {
    match node {
        BTreeNode::Leaf(leaf) => encode_leaf(leaf, key_size, data),
        BTreeNode::Internal(internal) => encode_internal(internal, key_size, data),
    }
}

pub fn encode_leaf(leaf: &LeafNode, key_size: usize, data: &mut [u8]) {
    data[0] = TAG_LEAF;
    BigEndian::write_u16(&mut data[SIZE_OFFSET..SIZE_OFFSET + 2], leaf.size() as u16);
    BigEndian::write_u16(
        &mut data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 2],
        leaf.max_size as u16,
    );
    BigEndian::write_i32(
        &mut data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4],
        leaf.next_page_id,
    );
    let entry = leaf_entry_size(key_size);
    for (i, (key, rid)) in leaf.keys.iter().zip(leaf.values.iter()).enumerate() {
        let off = LEAF_HEADER_SIZE + i * entry;
        data[off..off + key_size].copy_from_slice(key);
        BigEndian::write_i32(&mut data[off + key_size..off + key_size + 4], rid.page_id);
        BigEndian::write_u32(&mut data[off + key_size + 4..off + key_size + 8], rid.slot);
    }
}

pub fn encode_internal(internal: &InternalNode, key_size: usize, data: &mut [u8]) {
    data[0] = TAG_INTERNAL;
    BigEndian::write_u16(
        &mut data[SIZE_OFFSET..SIZE_OFFSET + 2],
        internal.size() as u16,
    );
    BigEndian::write_u16(
        &mut data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 2],
        internal.max_size as u16,
    );
    let entry = internal_entry_size(key_size);
    for (i, child) in internal.children.iter().enumerate() {
        let off = INTERNAL_HEADER_SIZE + i * entry;
        if i == 0 {
            data[off..off + key_size].fill(0);
        } else {
            data[off..off + key_size].copy_from_slice(&internal.keys[i - 1]);
        }
        BigEndian::write_i32(&mut data[off + key_size..off + key_size + 4], *child);
    }
}
