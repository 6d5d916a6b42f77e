// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::{BPlusTree, BTreeError, KeyComparator, SliceComparator};
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use transaction::concurrency::{
    DeadlockDetector, IsolationLevel, LockManager, LockMode, Transaction, TransactionManager,
};
