use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual page-granular disk I/O.
///
/// The database is a single file of `PAGE_SIZE`-aligned slots, one per page
/// id. Reads past the end of the file yield zeroed pages, so callers never
/// need to pre-extend the file.
pub struct DiskManager {
    db_file: Mutex<File>,
    deallocated: Mutex<HashSet<PageId>>,
}

impl DiskManager {
    /// Create a new DiskManager backed by the given database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
            deallocated: Mutex::new(HashSet::new()),
        })
    }

    /// Read a page from disk into the caller's buffer
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskManagerError> {
        if page_id < 0 || buf.len() != PAGE_SIZE {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset as u64 >= file_size {
            // Never written yet: hand back a zeroed page
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(buf)?;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<(), DiskManagerError> {
        if page_id < 0 || data.len() != PAGE_SIZE {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut file = self.db_file.lock();

        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        file.flush()?;

        Ok(())
    }

    /// Mark a page as deallocated. Space reclamation on disk is out of
    /// scope; this only records the id so diagnostics can tell a dropped
    /// page apart from a never-written one.
    pub fn deallocate_page(&self, page_id: PageId) {
        self.deallocated.lock().insert(page_id);
        debug!("deallocated page {}", page_id);
    }

    fn page_offset(&self, page_id: PageId) -> usize {
        page_id as usize * PAGE_SIZE
    }
}
