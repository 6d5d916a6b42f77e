use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use opaldb::index::btree::{BPlusTree, SliceComparator};
use opaldb::storage::buffer::BufferPoolManager;

// Initialize test logging once; later calls are no-ops
#[allow(dead_code)]
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
    replacer_k: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    init_test_logging();
    let file = NamedTempFile::new()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, replacer_k, file.path())?);
    Ok((buffer_pool, file))
}

// Create a B+tree over a fresh pool. Keys are 8 bytes; use `key()` to
// encode integers order-preservingly.
#[allow(dead_code)]
pub fn create_test_tree(
    pool_size: usize,
    leaf_max_size: usize,
    internal_max_size: usize,
) -> Result<(BPlusTree, Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size, 2)?;

    let (header_page_id, header_guard) = buffer_pool.new_page_guarded()?;
    drop(header_guard);

    let tree = BPlusTree::new(
        buffer_pool.clone(),
        header_page_id,
        Arc::new(SliceComparator),
        8,
        leaf_max_size,
        internal_max_size,
    )?;
    Ok((tree, buffer_pool, file))
}

// Big-endian encoding keeps byte order equal to numeric order
#[allow(dead_code)]
pub fn key(v: u64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}
