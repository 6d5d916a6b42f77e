use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} not found in the buffer pool")]
    PageNotFound(PageId),

    #[error("All frames are pinned, cannot serve the request")]
    BufferPoolFull,

    #[error("Replacer is full, cannot track another frame")]
    ReplacerFull,

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
}
