use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Key length {got} does not match the tree's key size {expected}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Node of {max_size} entries with {key_size}-byte keys does not fit a page")]
    NodeTooLarge { max_size: usize, key_size: usize },

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}
