use crate::buffer::pool::BufferPoolManager;
use crate::buffer::{AccessType, FrameId};
use crate::pages::{HashBucketPage, HashDirectoryPage, Page, PageId};
use crate::wal::Lsn;

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use log::error;

/// Scoped handle on a pinned page, holding no latch.
///
/// Byte access goes through `data`/`data_mut`, which take the frame latch
/// for the duration of the borrow. Dropping the guard flushes the page if
/// this guard dirtied it, then releases the pin. `into_read`/`into_write`
/// trade the guard for one that keeps a latch for its whole lifetime.
///
/// Guards borrow the pool, so they cannot outlive it, and moving one
/// transfers the unpin duty: a moved-from guard no longer exists to drop.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    access: AccessType,
    dirty: bool,
}

/// Shared borrow of a page's bytes, keeping the frame's read latch.
pub struct PageDataRef<'g> {
    _latch: RwLockReadGuard<'g, ()>,
    page: &'g Page,
}

impl Deref for PageDataRef<'_> {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        self.page
    }
}

/// Exclusive borrow of a page's bytes, keeping the frame's write latch.
pub struct PageDataMut<'g> {
    _latch: RwLockWriteGuard<'g, ()>,
    page: &'g mut Page,
}

impl Deref for PageDataMut<'_> {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        self.page
    }
}

impl DerefMut for PageDataMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.page
    }
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        access: AccessType,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            access,
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> PageDataRef<'_> {
        let latch = self.pool.latch_read_validated(self.frame_id, self.page_id);
        // SAFETY: read latch held by the returned borrow
        let page = unsafe { self.pool.frame_data(self.frame_id) };
        PageDataRef {
            _latch: latch,
            page,
        }
    }

    pub fn data_mut(&mut self) -> PageDataMut<'_> {
        self.dirty = true;
        let latch = self.pool.latch_write_validated(self.frame_id, self.page_id);
        self.pool.frame_metadata(self.frame_id).set_dirty();
        // SAFETY: write latch held by the returned borrow
        let page = unsafe { self.pool.frame_data_mut(self.frame_id) };
        PageDataMut {
            _latch: latch,
            page,
        }
    }

    /// Trades this guard for one holding the frame's shared latch.
    pub fn into_read(self) -> ReadPageGuard<'a> {
        let this = ManuallyDrop::new(self);
        let latch = this.pool.latch_read_validated(this.frame_id, this.page_id);
        ReadPageGuard {
            pool: this.pool,
            frame_id: this.frame_id,
            page_id: this.page_id,
            access: this.access,
            latch: Some(latch),
        }
    }

    /// Trades this guard for one holding the frame's exclusive latch.
    pub fn into_write(self) -> WritePageGuard<'a> {
        let this = ManuallyDrop::new(self);
        let latch = this.pool.latch_write_validated(this.frame_id, this.page_id);
        WritePageGuard {
            pool: this.pool,
            frame_id: this.frame_id,
            page_id: this.page_id,
            access: this.access,
            dirty: this.dirty,
            latch: Some(latch),
        }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.pool.flush_page(self.page_id) {
                // the frame keeps its dirty bit; eviction retries the write
                error!("flush of page {} on guard drop failed: {e}", self.page_id);
            }
        }
        self.pool.unpin_page(self.page_id, false, self.access);
    }
}

/// Scoped handle holding a page's shared latch for its whole lifetime.
pub struct ReadPageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    access: AccessType,
    latch: Option<RwLockReadGuard<'a, ()>>,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &Page {
        // SAFETY: the guard holds the frame's read latch
        unsafe { self.pool.frame_data(self.frame_id) }
    }

    pub fn as_bucket(&self) -> &HashBucketPage {
        self.data().into()
    }

    pub fn as_directory(&self) -> &HashDirectoryPage {
        self.data().into()
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // latch first, pin second
        self.latch.take();
        self.pool.unpin_page(self.page_id, false, self.access);
    }
}

/// Scoped handle holding a page's exclusive latch for its whole lifetime.
pub struct WritePageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    access: AccessType,
    dirty: bool,
    latch: Option<RwLockWriteGuard<'a, ()>>,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &Page {
        // SAFETY: the guard holds the frame's write latch
        unsafe { self.pool.frame_data(self.frame_id) }
    }

    pub fn data_mut(&mut self) -> &mut Page {
        self.dirty = true;
        self.pool.frame_metadata(self.frame_id).set_dirty();
        // SAFETY: the guard holds the frame's write latch
        unsafe { self.pool.frame_data_mut(self.frame_id) }
    }

    /// Stamps the frame with the LSN of the last logged change, so eviction
    /// knows how far to force the WAL.
    pub fn set_lsn(&self, lsn: Lsn) {
        self.pool.frame_metadata(self.frame_id).set_lsn(lsn);
    }

    pub fn as_bucket(&self) -> &HashBucketPage {
        self.data().into()
    }

    pub fn as_bucket_mut(&mut self) -> &mut HashBucketPage {
        self.data_mut().into()
    }

    pub fn as_directory(&self) -> &HashDirectoryPage {
        self.data().into()
    }

    pub fn as_directory_mut(&mut self) -> &mut HashDirectoryPage {
        self.data_mut().into()
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        // latch first, pin second
        self.latch.take();
        self.pool.unpin_page(self.page_id, self.dirty, self.access);
    }
}
