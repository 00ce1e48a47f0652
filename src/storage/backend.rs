use crate::pages::{PAGE_SIZE, Page, PageId};

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Block-oriented secondary store consumed by the buffer pool.
///
/// Page-id space management belongs to the pool; `allocate_page` only gives
/// the backend a chance to reserve room and `deallocate_page` to reclaim it.
/// Dense backends may treat both as no-ops.
pub trait StorageBackend: Send + Sync {
    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), StorageError>;
    fn write_page(&self, page: &Page, page_id: PageId) -> Result<(), StorageError>;
    fn allocate_page(&self, page_id: PageId) -> Result<(), StorageError>;
    fn deallocate_page(&self, page_id: PageId) -> Result<(), StorageError>;
    fn sync(&self);
}

/// Manages the on-disk storage of pages in a single database file.
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    /// Creates a new storage file, truncating any previous content.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(StorageError::Io)?;

        Ok(Self { file })
    }

    /// Opens an existing storage file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(false)
            .truncate(false)
            .open(path)
            .map_err(StorageError::Io)?;

        Ok(Self { file })
    }
}

impl StorageBackend for FileStorage {
    /// Reads a page from the database file.
    ///
    /// A page that was allocated but never written back reads as zeroes.
    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), StorageError> {
        let offset = page_id.get() as u64 * PAGE_SIZE as u64;

        match self.file.read_exact_at(page.data.as_mut_slice(), offset) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                page.reset();
                Ok(())
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Writes a page to the database file.
    fn write_page(&self, page: &Page, page_id: PageId) -> Result<(), StorageError> {
        let offset = page_id.get() as u64 * PAGE_SIZE as u64;

        self.file
            .write_all_at(page.data.as_slice(), offset)
            .map_err(StorageError::Io)?;

        Ok(())
    }

    /// Extends the file so the page's slot exists on disk.
    fn allocate_page(&self, page_id: PageId) -> Result<(), StorageError> {
        let needed = (page_id.get() as u64 + 1) * PAGE_SIZE as u64;
        if self.file.metadata()?.len() < needed {
            self.file.set_len(needed)?;
        }
        Ok(())
    }

    fn deallocate_page(&self, _page_id: PageId) -> Result<(), StorageError> {
        // TODO: free space map so deallocated slots can be reused
        Ok(())
    }

    /// Attempts to sync file data and metadata to the disk.
    ///
    /// # Panics
    ///
    /// Panics if the underlying `File::sync_all` operation fails.
    fn sync(&self) {
        let result = self.file.sync_all();
        if result.is_err() {
            // if fsync fails, we can't make sure data is flushed to disk
            // ref: https://wiki.postgresql.org/wiki/Fsync_Errors
            panic!("flush (fsync) failed");
        }
    }
}

/// In-memory backend for tests. Counts physical reads and writes so tests
/// can assert on cache behavior.
#[derive(Default)]
pub struct MemStorage {
    pages: Mutex<HashMap<PageId, Box<Page>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    deallocated: Mutex<Vec<PageId>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn deallocated(&self) -> Vec<PageId> {
        self.deallocated.lock().unwrap().clone()
    }

    /// Snapshot of a page's bytes as the store last saw them.
    pub fn page_data(&self, page_id: PageId) -> Option<Box<[u8; PAGE_SIZE]>> {
        self.pages
            .lock()
            .unwrap()
            .get(&page_id)
            .map(|page| Box::new(page.data))
    }
}

impl StorageBackend for MemStorage {
    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), StorageError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.pages.lock().unwrap().get(&page_id) {
            Some(stored) => page.data.copy_from_slice(&stored.data),
            None => page.reset(),
        }
        Ok(())
    }

    fn write_page(&self, page: &Page, page_id: PageId) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut stored = Box::new(Page::new());
        stored.data.copy_from_slice(&page.data);
        self.pages.lock().unwrap().insert(page_id, stored);
        Ok(())
    }

    fn allocate_page(&self, _page_id: PageId) -> Result<(), StorageError> {
        Ok(())
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<(), StorageError> {
        self.pages.lock().unwrap().remove(&page_id);
        self.deallocated.lock().unwrap().push(page_id);
        Ok(())
    }

    fn sync(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::NamedTempFile;

    #[test]
    fn file_storage_round_trip() {
        let path = NamedTempFile::new().unwrap();
        let storage = FileStorage::create(path.path()).unwrap();

        let mut page = Page::new();
        page.data[0] = 0xca;
        page.data[PAGE_SIZE - 1] = 0xfe;
        storage.write_page(&page, PageId::new(3)).unwrap();
        storage.sync();

        let mut read_back = Page::new();
        storage.read_page(PageId::new(3), &mut read_back).unwrap();
        assert_eq!(read_back.data[0], 0xca);
        assert_eq!(read_back.data[PAGE_SIZE - 1], 0xfe);
    }

    #[test]
    fn file_storage_reads_unwritten_page_as_zeroes() {
        let path = NamedTempFile::new().unwrap();
        let storage = FileStorage::create(path.path()).unwrap();
        storage.allocate_page(PageId::new(7)).unwrap();

        let mut page = Page::new();
        page.data.fill(0xff);
        storage.read_page(PageId::new(7), &mut page).unwrap();
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn mem_storage_counts_io() {
        let storage = MemStorage::new();

        let mut page = Page::new();
        page.data[42] = 42;
        storage.write_page(&page, PageId::new(0)).unwrap();

        let mut read_back = Page::new();
        storage.read_page(PageId::new(0), &mut read_back).unwrap();
        assert_eq!(read_back.data[42], 42);
        assert_eq!(storage.write_count(), 1);
        assert_eq!(storage.read_count(), 1);

        storage.deallocate_page(PageId::new(0)).unwrap();
        assert_eq!(storage.deallocated(), vec![PageId::new(0)]);
        assert!(storage.page_data(PageId::new(0)).is_none());
    }
}
