use crate::buffer::guard::{PageGuard, ReadPageGuard, WritePageGuard};
use crate::buffer::replacer::{LruKReplacer, Replacer};
use crate::buffer::{AccessType, FrameId};
use crate::config::CONFIG;
use crate::pages::{FrameMetadata, PAGE_INVALID, Page, PageId};
use crate::storage::{StorageBackend, StorageError};
use crate::wal::{INVALID_LSN, LogManager, Lsn, WalError};

use std::cell::UnsafeCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("all frames are pinned")]
    NoFrameAvailable,
    #[error("storage")]
    Storage(#[from] StorageError),
    #[error("wal")]
    Wal(#[from] WalError),
}

// UnsafeCell<Page> has the same in-memory layout as Page.
// We could use RwLock<Page> but RwLock metadata would be stored
// next to Page data. This way we make sure pages are contiguous
// in-memory and no RwLock metadata is prepended or appended.
struct UnsafePage(UnsafeCell<Page>);
// SAFETY:
// Shared and exclusive access are handled with a separate RwLock stored
// in FrameLatch, so it is safe to mark UnsafePage as Sync.
unsafe impl Sync for UnsafePage {}

impl Default for UnsafePage {
    fn default() -> Self {
        Self(UnsafeCell::new(Page::new()))
    }
}

#[derive(Default)]
struct FrameLatch {
    latch: RwLock<()>,
}

struct PoolState {
    /// page_id -> frame_id for every resident page
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    /// pages whose eviction writeback is in flight; a fetch of one of these
    /// waits until the store holds the page before reading it back
    flushing: HashSet<PageId>,
}

/// Bounded in-memory cache of disk pages.
///
/// The pool owns a fixed array of frames, a page table mapping resident page
/// ids to frames, a free list and a replacement policy. Access goes through
/// scoped guards which pin their frame for as long as they live; a frame with
/// a zero pin count is handed to the replacer and may be reclaimed for
/// another page, writing its contents back first when dirty.
///
/// The pool mutex protects the page table, the free list and (transitively)
/// the replacer; it is never held across disk I/O. Page bytes are protected
/// by one reader/writer latch per frame, held across disk transfers into or
/// out of that frame.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Box<[UnsafePage]>,
    frames_metadata: Box<[FrameMetadata]>,
    frames_latch: Box<[FrameLatch]>,
    state: Mutex<PoolState>,
    state_cv: Condvar,
    replacer: Mutex<Box<dyn Replacer>>,
    disk: Arc<dyn StorageBackend>,
    wal: Option<Arc<LogManager>>,
    next_page_id: AtomicU32,
    num_instances: u32,
    instance_index: u32,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk: Arc<dyn StorageBackend>) -> Self {
        Self::with_replacer(
            pool_size,
            disk,
            Box::new(LruKReplacer::new(CONFIG.REPLACER_K)),
        )
    }

    pub fn with_replacer(
        pool_size: usize,
        disk: Arc<dyn StorageBackend>,
        replacer: Box<dyn Replacer>,
    ) -> Self {
        Self::new_partitioned_with_replacer(pool_size, 1, 0, disk, None, replacer)
    }

    /// A pool managing one residue class of the page-id space, so several
    /// pools can share a store without overlapping allocations.
    pub fn new_partitioned(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk: Arc<dyn StorageBackend>,
        wal: Option<Arc<LogManager>>,
    ) -> Self {
        Self::new_partitioned_with_replacer(
            pool_size,
            num_instances,
            instance_index,
            disk,
            wal,
            Box::new(LruKReplacer::new(CONFIG.REPLACER_K)),
        )
    }

    fn new_partitioned_with_replacer(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk: Arc<dyn StorageBackend>,
        wal: Option<Arc<LogManager>>,
        replacer: Box<dyn Replacer>,
    ) -> Self {
        assert!(pool_size > 0);
        assert!(num_instances > 0);
        assert!(instance_index < num_instances);

        let frames = std::iter::repeat_with(UnsafePage::default).take(pool_size);
        let frames_metadata = std::iter::repeat_with(FrameMetadata::default).take(pool_size);
        let frames_latch = std::iter::repeat_with(FrameLatch::default).take(pool_size);
        Self {
            pool_size,
            frames: Box::from_iter(frames),
            frames_metadata: Box::from_iter(frames_metadata),
            frames_latch: Box::from_iter(frames_latch),
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list: VecDeque::from_iter(0..pool_size),
                flushing: HashSet::new(),
            }),
            state_cv: Condvar::new(),
            replacer: Mutex::new(replacer),
            disk,
            wal,
            next_page_id: AtomicU32::new(instance_index),
            num_instances,
            instance_index,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// SAFETY: callers hold the frame's read or write latch.
    unsafe fn page_ref(&self, frame_id: FrameId) -> &Page {
        unsafe { &*(self.frames[frame_id].0.get()) }
    }

    /// SAFETY: callers hold the frame's write latch.
    #[allow(clippy::mut_from_ref)]
    unsafe fn page_ref_mut(&self, frame_id: FrameId) -> &mut Page {
        unsafe { &mut *(self.frames[frame_id].0.get()) }
    }

    fn metadata(&self, frame_id: FrameId) -> &FrameMetadata {
        &self.frames_metadata[frame_id]
    }

    fn allocate_page_id(&self) -> Result<PageId, BufferPoolError> {
        let raw = self
            .next_page_id
            .fetch_add(self.num_instances, Ordering::Relaxed);
        debug_assert_eq!(raw % self.num_instances, self.instance_index);
        let page_id = PageId::new(raw);
        self.disk.allocate_page(page_id)?;
        Ok(page_id)
    }

    /// Claims a frame for `page_id` and returns it with the write latch held,
    /// the page-table entry installed, pinned once, metadata reset, contents
    /// untouched.
    ///
    /// The caller's lock on the pool state is consumed: the frame is picked
    /// and the placeholder entry published under it, so a concurrent fetcher
    /// of `page_id` either sees the entry (and blocks on the frame latch
    /// until the frame is filled) or claims a frame of its own for another
    /// page. A dirty victim is written back (WAL first) under the frame
    /// latch only; its page id sits in `flushing` meanwhile so a re-fetch of
    /// the old page cannot read a stale version from the store.
    fn acquire_frame<'a>(
        &'a self,
        mut state: MutexGuard<'_, PoolState>,
        page_id: PageId,
    ) -> Result<(FrameId, RwLockWriteGuard<'a, ()>), BufferPoolError> {
        let frame_id;
        let mut writeback = None;
        if let Some(free) = state.free_list.pop_front() {
            frame_id = free;
            debug_assert_eq!(self.metadata(frame_id).page_id(), PAGE_INVALID);
        } else {
            let Some(victim) = self.replacer.lock().unwrap().evict() else {
                return Err(BufferPoolError::NoFrameAvailable);
            };
            frame_id = victim;
            let meta = self.metadata(frame_id);
            let old_page_id = meta.page_id();
            state.page_table.remove(&old_page_id);
            if meta.is_dirty() {
                state.flushing.insert(old_page_id);
                writeback = Some((old_page_id, meta.lsn()));
            }
        }
        let prev = self.metadata(frame_id).pin();
        debug_assert_eq!(prev, 0);
        state.page_table.insert(page_id, frame_id);
        drop(state);

        let latch = self.frames_latch[frame_id].latch.write().unwrap();
        let meta = self.metadata(frame_id);

        if let Some((old_page_id, lsn)) = writeback {
            let result = self.force_and_write(frame_id, old_page_id, lsn);
            let mut state = self.state.lock().unwrap();
            state.flushing.remove(&old_page_id);
            self.state_cv.notify_all();
            if let Err(e) = result {
                error!("writeback of page {old_page_id} failed: {e}");
                if meta.get_pin_counter() == 1 {
                    // nobody waits for the new tenant yet: give the frame
                    // back to its old page and fail the claim
                    state.page_table.remove(&page_id);
                    state.page_table.insert(old_page_id, frame_id);
                    meta.unpin();
                    let mut replacer = self.replacer.lock().unwrap();
                    replacer.record_access(frame_id, AccessType::Unknown);
                    replacer.set_evictable(frame_id, true);
                    return Err(e);
                }
                // fetchers of the new page already pinned the placeholder;
                // the claim must go through, the old version is lost
                error!("dropping unflushed page {old_page_id}");
            }
            debug!("evicted dirty page {old_page_id} from frame {frame_id}");
        }

        meta.set_page_id(page_id);
        meta.clear_dirty();
        meta.set_lsn(INVALID_LSN);
        Ok((frame_id, latch))
    }

    fn force_and_write(
        &self,
        frame_id: FrameId,
        page_id: PageId,
        lsn: Lsn,
    ) -> Result<(), BufferPoolError> {
        if let Some(wal) = &self.wal {
            wal.flush(lsn)?;
        }
        // SAFETY: the caller holds the frame's write latch
        let page = unsafe { self.page_ref(frame_id) };
        self.disk.write_page(page, page_id)?;
        Ok(())
    }

    /// Undo a claim whose disk read failed so the frame never surfaces with
    /// partial contents.
    fn abandon_claim(&self, frame_id: FrameId, page_id: PageId, latch: RwLockWriteGuard<'_, ()>) {
        let meta = self.metadata(frame_id);
        let mut state = self.state.lock().unwrap();
        if meta.get_pin_counter() > 1 {
            // concurrent fetchers already pinned the placeholder; the best
            // we can offer them is a well-defined zeroed page
            error!("leaving page {page_id} zeroed after failed read");
            let page = unsafe { self.page_ref_mut(frame_id) };
            page.reset();
            meta.unpin();
            return;
        }
        state.page_table.remove(&page_id);
        meta.set_page_id(PAGE_INVALID);
        meta.unpin();
        drop(latch);
        state.free_list.push_back(frame_id);
    }

    fn track_access(&self, frame_id: FrameId, access: AccessType) {
        let mut replacer = self.replacer.lock().unwrap();
        replacer.record_access(frame_id, access);
        replacer.set_evictable(frame_id, false);
    }

    /// Allocates a fresh page id, pins it into a zeroed frame and returns a
    /// guard for it. Fails with `NoFrameAvailable` when every frame is
    /// pinned.
    pub fn new_page(&self, access: AccessType) -> Result<PageGuard<'_>, BufferPoolError> {
        let page_id = self.allocate_page_id()?;
        let state = self.state.lock().unwrap();
        let (frame_id, latch) = self.acquire_frame(state, page_id)?;
        // SAFETY: frame write latch held
        let page = unsafe { self.page_ref_mut(frame_id) };
        page.reset();
        drop(latch);
        self.track_access(frame_id, access);
        Ok(PageGuard::new(self, frame_id, page_id, access))
    }

    /// Pins `page_id` into the pool, reading it from the store if it is not
    /// already resident, and returns a guard for it.
    pub fn fetch_page(
        &self,
        page_id: PageId,
        access: AccessType,
    ) -> Result<PageGuard<'_>, BufferPoolError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                self.metadata(frame_id).pin();
                let mut replacer = self.replacer.lock().unwrap();
                replacer.record_access(frame_id, access);
                replacer.set_evictable(frame_id, false);
                return Ok(PageGuard::new(self, frame_id, page_id, access));
            }
            if !state.flushing.contains(&page_id) {
                break;
            }
            // the page is leaving another frame right now; wait until the
            // store has it before reading it back
            state = self.state_cv.wait(state).unwrap();
        }

        let (frame_id, latch) = self.acquire_frame(state, page_id)?;
        // SAFETY: frame write latch held
        let page = unsafe { self.page_ref_mut(frame_id) };
        if let Err(e) = self.disk.read_page(page_id, page) {
            self.abandon_claim(frame_id, page_id, latch);
            return Err(e.into());
        }
        drop(latch);
        self.track_access(frame_id, access);
        Ok(PageGuard::new(self, frame_id, page_id, access))
    }

    pub fn fetch_page_read(
        &self,
        page_id: PageId,
        access: AccessType,
    ) -> Result<ReadPageGuard<'_>, BufferPoolError> {
        Ok(self.fetch_page(page_id, access)?.into_read())
    }

    pub fn fetch_page_write(
        &self,
        page_id: PageId,
        access: AccessType,
    ) -> Result<WritePageGuard<'_>, BufferPoolError> {
        Ok(self.fetch_page(page_id, access)?.into_write())
    }

    /// Releases one pin on a resident page, folding `is_dirty` into the
    /// frame's dirty bit. Returns false when the page is not resident or
    /// holds no pin; both are caller bugs and loud in debug builds.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool, _access: AccessType) -> bool {
        let state = self.state.lock().unwrap();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            warn!("unpin of non-resident page {page_id}");
            return false;
        };
        let meta = self.metadata(frame_id);
        if meta.get_pin_counter() == 0 {
            warn!("unpin of unpinned page {page_id}");
            return false;
        }
        if is_dirty {
            meta.set_dirty();
        }
        if meta.unpin() == 1 {
            self.replacer.lock().unwrap().set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a resident page's buffer to the store, forcing the WAL up to
    /// the page's LSN first. Leaves pin state alone and runs under the
    /// frame's read latch, concurrent with readers. `Ok(false)` when the
    /// page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let frame_id = {
            let state = self.state.lock().unwrap();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => return Ok(false),
            }
        };

        let _latch = self.frames_latch[frame_id].latch.read().unwrap();
        let meta = self.metadata(frame_id);
        if meta.page_id() != page_id {
            // the frame changed tenant between lookup and latch
            return Ok(false);
        }
        if let Some(wal) = &self.wal {
            wal.flush(meta.lsn())?;
        }
        let page = unsafe { self.page_ref(frame_id) };
        self.disk.write_page(page, page_id)?;
        meta.clear_dirty();
        Ok(true)
    }

    /// Flushes every resident page, in no particular order.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock().unwrap();
            state.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drops a page from the pool and deallocates its id. `Ok(false)` when
    /// the page is resident and pinned; `Ok(true)` otherwise, including when
    /// the page was not resident at all.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let frame_id = {
            let mut state = self.state.lock().unwrap();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                drop(state);
                self.disk.deallocate_page(page_id)?;
                return Ok(true);
            };
            if self.metadata(frame_id).get_pin_counter() > 0 {
                return Ok(false);
            }
            state.page_table.remove(&page_id);
            self.replacer.lock().unwrap().remove(frame_id);
            frame_id
        };

        // the frame is unreachable now: not in the table, not on the free
        // list, untracked by the replacer
        {
            let _latch = self.frames_latch[frame_id].latch.write().unwrap();
            let meta = self.metadata(frame_id);
            meta.set_page_id(PAGE_INVALID);
            meta.clear_dirty();
            meta.set_lsn(INVALID_LSN);
            let page = unsafe { self.page_ref_mut(frame_id) };
            page.reset();
        }
        self.state.lock().unwrap().free_list.push_back(frame_id);
        self.disk.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<usize> {
        let state = self.state.lock().unwrap();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(self.metadata(frame_id).get_pin_counter())
    }

    /// Number of frames the replacer could evict right now.
    pub fn evictable_count(&self) -> usize {
        self.replacer.lock().unwrap().size()
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().unwrap().free_list.len()
    }

    /// Read latch on a frame, retrying until the frame actually carries
    /// `page_id`: a fetcher may publish the page-table entry moments before
    /// it takes the frame latch to fill the frame.
    pub(crate) fn latch_read_validated(
        &self,
        frame_id: FrameId,
        page_id: PageId,
    ) -> RwLockReadGuard<'_, ()> {
        loop {
            let latch = self.frames_latch[frame_id].latch.read().unwrap();
            if self.metadata(frame_id).page_id() == page_id {
                return latch;
            }
            drop(latch);
            std::thread::yield_now();
        }
    }

    /// Write-latch counterpart of `latch_read_validated`.
    pub(crate) fn latch_write_validated(
        &self,
        frame_id: FrameId,
        page_id: PageId,
    ) -> RwLockWriteGuard<'_, ()> {
        loop {
            let latch = self.frames_latch[frame_id].latch.write().unwrap();
            if self.metadata(frame_id).page_id() == page_id {
                return latch;
            }
            drop(latch);
            std::thread::yield_now();
        }
    }

    /// SAFETY: callers hold the frame's read or write latch.
    pub(crate) unsafe fn frame_data(&self, frame_id: FrameId) -> &Page {
        unsafe { self.page_ref(frame_id) }
    }

    /// SAFETY: callers hold the frame's write latch.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn frame_data_mut(&self, frame_id: FrameId) -> &mut Page {
        unsafe { self.page_ref_mut(frame_id) }
    }

    pub(crate) fn frame_metadata(&self, frame_id: FrameId) -> &FrameMetadata {
        self.metadata(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ClockReplacer;
    use crate::pages::PAGE_SIZE;
    use crate::storage::MemStorage;

    use tempfile::NamedTempFile;

    fn make_pool(pool_size: usize) -> (Arc<MemStorage>, BufferPoolManager) {
        let disk = Arc::new(MemStorage::new());
        let pool = BufferPoolManager::with_replacer(
            pool_size,
            disk.clone(),
            Box::new(LruKReplacer::new(2)),
        );
        (disk, pool)
    }

    #[test]
    fn cache_hit_needs_no_disk_read() {
        let (disk, pool) = make_pool(3);

        let p1 = pool.new_page(AccessType::Unknown).unwrap().page_id();
        let _g2 = pool.new_page(AccessType::Unknown).unwrap();
        let _g3 = pool.new_page(AccessType::Unknown).unwrap();
        assert_eq!(pool.evictable_count(), 1);

        let g1 = pool.fetch_page(p1, AccessType::Unknown).unwrap();
        assert_eq!(g1.page_id(), p1);
        assert_eq!(disk.read_count(), 0);
        assert_eq!(pool.evictable_count(), 0);
    }

    #[test]
    fn eviction_prefers_older_cold_pages() {
        let (disk, pool) = make_pool(2);

        let p1 = pool.new_page(AccessType::Unknown).unwrap().page_id();
        let p2 = pool.new_page(AccessType::Unknown).unwrap().page_id();
        let p3 = pool.new_page(AccessType::Unknown).unwrap().page_id();

        // p1 was the oldest single-access page
        assert!(pool.pin_count(p1).is_none());
        assert!(pool.pin_count(p2).is_some());
        assert!(pool.pin_count(p3).is_some());

        // bringing p1 back reads from disk and pushes p2 out
        let _g1 = pool.fetch_page(p1, AccessType::Unknown).unwrap();
        assert_eq!(disk.read_count(), 1);
        assert!(pool.pin_count(p2).is_none());
        assert!(pool.pin_count(p3).is_some());
    }

    #[test]
    fn dirty_pages_are_written_back_on_eviction() {
        let (disk, pool) = make_pool(2);

        let guard = pool.new_page(AccessType::Unknown).unwrap();
        let p1 = guard.page_id();
        let mut writer = guard.into_write();
        writer.data_mut().data[0] = 0xab;
        writer.data_mut().data[PAGE_SIZE - 1] = 0xcd;
        drop(writer);

        // fill the pool to push p1 out
        let _p2 = pool.new_page(AccessType::Unknown).unwrap().page_id();
        let _p3 = pool.new_page(AccessType::Unknown).unwrap().page_id();
        assert!(pool.pin_count(p1).is_none());

        let stored = disk.page_data(p1).expect("page written back");
        assert_eq!(stored[0], 0xab);
        assert_eq!(stored[PAGE_SIZE - 1], 0xcd);
    }

    #[test]
    fn no_frame_available_when_everything_is_pinned() {
        let (_disk, pool) = make_pool(1);

        let g1 = pool.new_page(AccessType::Unknown).unwrap();
        assert!(matches!(
            pool.new_page(AccessType::Unknown),
            Err(BufferPoolError::NoFrameAvailable)
        ));
        assert!(matches!(
            pool.fetch_page(PageId::new(999), AccessType::Unknown),
            Err(BufferPoolError::NoFrameAvailable)
        ));
        // the pinned page survived the failed allocations
        assert_eq!(pool.pin_count(g1.page_id()), Some(1));

        drop(g1);
        pool.new_page(AccessType::Unknown).unwrap();
    }

    #[test]
    fn unpin_is_rejected_once_count_reaches_zero() {
        let (_disk, pool) = make_pool(2);

        let p1 = pool.new_page(AccessType::Unknown).unwrap().page_id();
        assert_eq!(pool.pin_count(p1), Some(0));
        assert!(!pool.unpin_page(p1, false, AccessType::Unknown));
        assert_eq!(pool.pin_count(p1), Some(0));
        assert!(!pool.unpin_page(PageId::new(999), false, AccessType::Unknown));
    }

    #[test]
    fn pin_accounting_matches_outstanding_guards() {
        let (_disk, pool) = make_pool(2);

        let g1 = pool.new_page(AccessType::Unknown).unwrap();
        let p1 = g1.page_id();
        let g2 = pool.fetch_page(p1, AccessType::Unknown).unwrap();
        assert_eq!(pool.pin_count(p1), Some(2));

        drop(g1);
        assert_eq!(pool.pin_count(p1), Some(1));
        drop(g2);
        assert_eq!(pool.pin_count(p1), Some(0));
        assert_eq!(pool.evictable_count(), 1);
    }

    #[test]
    fn flush_clears_the_dirty_bit() {
        let (disk, pool) = make_pool(2);

        let guard = pool.new_page(AccessType::Unknown).unwrap();
        let p1 = guard.page_id();
        let mut writer = guard.into_write();
        writer.data_mut().data[7] = 7;
        drop(writer);

        assert!(pool.flush_page(p1).unwrap());
        assert_eq!(disk.page_data(p1).unwrap()[7], 7);
        assert!(!pool.flush_page(PageId::new(999)).unwrap());

        // a clean eviction now skips the writeback
        let writes = disk.write_count();
        let _ = pool.new_page(AccessType::Unknown).unwrap();
        let _ = pool.new_page(AccessType::Unknown).unwrap();
        assert!(pool.pin_count(p1).is_none());
        assert_eq!(disk.write_count(), writes);
    }

    #[test]
    fn flush_all_pages_writes_every_resident_page() {
        let (disk, pool) = make_pool(3);

        let mut page_ids = vec![];
        for _ in 0..3 {
            let guard = pool.new_page(AccessType::Unknown).unwrap();
            page_ids.push(guard.page_id());
            let mut writer = guard.into_write();
            writer.data_mut().data[0] = 1;
        }

        pool.flush_all_pages().unwrap();
        for page_id in page_ids {
            assert_eq!(disk.page_data(page_id).unwrap()[0], 1);
        }
    }

    #[test]
    fn delete_page_frees_the_frame() {
        let (disk, pool) = make_pool(2);

        let g1 = pool.new_page(AccessType::Unknown).unwrap();
        let p1 = g1.page_id();

        // pinned: refused
        assert!(!pool.delete_page(p1).unwrap());
        drop(g1);

        let free_before = pool.free_frame_count();
        assert!(pool.delete_page(p1).unwrap());
        assert_eq!(pool.free_frame_count(), free_before + 1);
        assert!(pool.pin_count(p1).is_none());
        assert_eq!(disk.deallocated(), vec![p1]);

        // non-resident deletes succeed
        assert!(pool.delete_page(PageId::new(999)).unwrap());
    }

    #[test]
    fn partitioned_pools_carve_disjoint_id_spaces() {
        let disk = Arc::new(MemStorage::new());
        let pool = BufferPoolManager::new_partitioned(4, 3, 1, disk, None);

        for expected in [1u32, 4, 7, 10] {
            let page_id = pool.new_page(AccessType::Unknown).unwrap().page_id();
            assert_eq!(page_id, PageId::new(expected));
        }
    }

    #[test]
    fn wal_is_forced_before_writeback() {
        let wal_path = NamedTempFile::new().unwrap();
        let wal = Arc::new(LogManager::create(wal_path.path()).unwrap());
        let disk = Arc::new(MemStorage::new());
        let pool = BufferPoolManager::new_partitioned(2, 1, 0, disk, Some(wal.clone()));

        let guard = pool.new_page(AccessType::Unknown).unwrap();
        let p1 = guard.page_id();
        let mut writer = guard.into_write();
        writer.data_mut().data[0] = 1;
        let lsn = wal.append(b"update p1");
        writer.set_lsn(lsn);
        drop(writer);
        assert!(wal.persistent_lsn() < lsn);

        // eviction of the dirty page must force the log first
        let _ = pool.new_page(AccessType::Unknown).unwrap();
        let _ = pool.new_page(AccessType::Unknown).unwrap();
        assert!(pool.pin_count(p1).is_none());
        assert!(wal.persistent_lsn() >= lsn);
    }

    #[test]
    fn clock_replacer_drives_the_pool_too() {
        let disk = Arc::new(MemStorage::new());
        let pool =
            BufferPoolManager::with_replacer(2, disk, Box::new(ClockReplacer::new(2)));

        let p1 = pool.new_page(AccessType::Unknown).unwrap().page_id();
        let _p2 = pool.new_page(AccessType::Unknown).unwrap().page_id();
        let _p3 = pool.new_page(AccessType::Unknown).unwrap().page_id();
        assert!(pool.pin_count(p1).is_none());
    }

    #[test]
    fn high_contention_scenario() {
        let disk = Arc::new(MemStorage::new());
        // fewer frames than pages so eviction and writeback race the readers
        let pool = Arc::new(BufferPoolManager::new(4, disk));

        let mut page_ids = vec![];
        for _ in 0..8 {
            page_ids.push(pool.new_page(AccessType::Unknown).unwrap().page_id());
        }
        let page_ids = Arc::new(page_ids);

        let mut handles = vec![];
        for thread_id in 0..8usize {
            let pool = pool.clone();
            let page_ids = page_ids.clone();
            let handle = std::thread::spawn(move || {
                for i in 0..200usize {
                    let page_id = page_ids[(thread_id + i) % page_ids.len()];
                    match thread_id % 4 {
                        0 => {
                            if let Ok(mut guard) =
                                pool.fetch_page_write(page_id, AccessType::Unknown)
                            {
                                guard.data_mut().data[thread_id] = i as u8;
                            }
                        }
                        1 => {
                            if let Ok(guard) = pool.fetch_page_read(page_id, AccessType::Unknown)
                            {
                                let _ = guard.data().data[0];
                            }
                        }
                        2 => {
                            let _ = pool.flush_page(page_id);
                        }
                        _ => {
                            let _ = pool.fetch_page(page_id, AccessType::Unknown);
                        }
                    }
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // quiescent: no guard outstanding, every pin released
        for &page_id in page_ids.iter() {
            if let Some(pins) = pool.pin_count(page_id) {
                assert_eq!(pins, 0);
            }
        }
    }
}
