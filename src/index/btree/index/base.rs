use std::sync::Arc;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::codec;
use crate::index::btree::comparator::KeyComparator;
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::guard::WritePageGuard;

/// Disk-backed B+tree index over the buffer pool.
///
/// Keys are opaque byte strings of a fixed length ordered by the injected
/// comparator; values are record ids. Concurrent readers and writers are
/// isolated by latch crabbing through page guards (see the operation
/// modules).
pub struct BPlusTree {
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) comparator: Arc<dyn KeyComparator>,
    pub(crate) header_page_id: PageId,
    pub(crate) key_size: usize,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
}

/// Per-operation descent state: the write guards still held on the path
/// root → current node, plus the header guard while a structural change may
/// still reach the root. Crabbing empties both as soon as a child is known
/// to be safe.
pub(crate) struct Context<'a> {
    pub root_page_id: PageId,
    pub header: Option<WritePageGuard<'a>>,
    pub write_set: Vec<(PageId, WritePageGuard<'a>)>,
}

impl Context<'_> {
    pub fn new() -> Self {
        Self {
            root_page_id: INVALID_PAGE_ID,
            header: None,
            write_set: Vec::new(),
        }
    }
}

impl BPlusTree {
    /// Create a tree over `header_page_id`, initializing it as empty. The
    /// header page must already be allocated in the pool.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        header_page_id: PageId,
        comparator: Arc<dyn KeyComparator>,
        key_size: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(
            leaf_max_size >= 3 && internal_max_size >= 3,
            "B+tree node capacity must be at least 3"
        );
        let max_size = leaf_max_size.max(internal_max_size);
        if key_size == 0 || !codec::node_fits_page(max_size, key_size) {
            return Err(BTreeError::NodeTooLarge { max_size, key_size });
        }

        let mut header = buffer_pool.fetch_page_write(header_page_id)?;
        codec::write_root_page_id(header.data_mut(), INVALID_PAGE_ID);
        drop(header);

        Ok(Self {
            buffer_pool,
            comparator,
            header_page_id,
            key_size,
            leaf_max_size,
            internal_max_size,
        })
    }

    /// Current root page id, `INVALID_PAGE_ID` for an empty tree.
    pub fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        Ok(codec::read_root_page_id(header.data()))
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    pub(crate) fn check_key(&self, key: &[u8]) -> Result<(), BTreeError> {
        if key.len() != self.key_size {
            return Err(BTreeError::InvalidKeyLength {
                expected: self.key_size,
                got: key.len(),
            });
        }
        Ok(())
    }
}
