//! Page cache: fixed-capacity LRU residency over the pager, with pinning,
//! dirty tracking, and the write-ahead hookup to the undo log.
//!
//! Every page read or mutation in the engine flows through this cache; the
//! pager underneath is raw I/O and the header page is reached only through
//! the header accessors here. A fetched page is pinned for as long as its
//! guard lives, and a pinned page is never an eviction victim. Dirty victims
//! are written back before their slot is reused, which is safe because
//! `mark_dirty` has already fenced the page's undo record by then.
//!
//! # Transaction protocol
//!
//! ```text
//! begin_txn(id)      → WAL begin marker, header wal_valid set
//! mark_dirty(page)   → first time per page: pre-image appended + fenced
//! commit_txn()       → flush dirty → fence data file → persist header
//!                      → clear WAL (the atomic switch point)
//! abort_txn()        → restore pre-images in reverse → clear WAL
//! recover()          → abort of whatever the WAL says was in progress
//! ```
//!
//! Pages allocated inside a transaction get no undo record; if the
//! transaction aborts, the header pre-image rolls the high-water mark back
//! and the page numbers are handed out again later.


use ahash::RandomState;
use common::{DbError, DbResult, PageId, TxnId};
use hashbrown::HashSet;
use lru::LruCache;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;
use storage::{DbHeader, PAGE_SIZE, PageBuf, Pager};
use wal::Wal;

const HEADER_PAGE: PageId = PageId(1);

type PageSet = HashSet<PageId, RandomState>;

/// Shared, single-threaded page cache over one pager and one undo log.
///
/// Interior mutability lets tree handles and cursors hold plain shared
/// references while guards stay alive; all bookkeeping lives behind one
/// `RefCell` and pin counts are `Cell`s on the individual frames.
#[derive(Debug)]
pub struct PageCache {
    inner: RefCell<Inner>,
}

#[derive(Debug)]
struct Inner {
    pager: Pager,
    wal: Wal,
    capacity: usize,
    frames: LruCache<PageId, Rc<Frame>>,
    /// Pages whose undo record has been fenced in the current transaction.
    logged: PageSet,
    /// Pages allocated by the current transaction; they have no on-disk
    /// pre-image and therefore get no undo record.
    fresh: PageSet,
    txn: Option<TxnId>,
}

#[derive(Debug)]
struct Frame {
    data: RefCell<Box<PageBuf>>,
    pins: Cell<u32>,
    dirty: Cell<bool>,
    owner: Cell<Option<TxnId>>,
}

impl Frame {
    fn new(data: Box<PageBuf>, dirty: bool, owner: Option<TxnId>) -> Rc<Self> {
        Rc::new(Self {
            data: RefCell::new(data),
            pins: Cell::new(1),
            dirty: Cell::new(dirty),
            owner: Cell::new(owner),
        })
    }
}

/// Scoped pin on a resident page. The pin is released when the guard drops,
/// on every control-flow path.
#[derive(Debug)]
pub struct PageGuard {
    page: PageId,
    frame: Rc<Frame>,
}

impl PageGuard {
    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn read(&self) -> Ref<'_, PageBuf> {
        Ref::map(self.frame.data.borrow(), |data| &**data)
    }

    /// Mutable view of the page bytes. The page must already have been
    /// passed to [`PageCache::mark_dirty`]; writing first would let the new
    /// image reach disk before its undo record exists.
    pub fn write(&self) -> RefMut<'_, PageBuf> {
        debug_assert!(self.frame.dirty.get(), "page written before mark_dirty");
        RefMut::map(self.frame.data.borrow_mut(), |data| &mut **data)
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let pins = self.frame.pins.get();
        debug_assert!(pins > 0);
        self.frame.pins.set(pins.saturating_sub(1));
    }
}

impl PageCache {
    /// Build a cache over an opened pager and log.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(pager: Pager, wal: Wal, capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be > 0");
        Self {
            inner: RefCell::new(Inner {
                pager,
                wal,
                capacity,
                frames: LruCache::unbounded(),
                logged: PageSet::default(),
                fresh: PageSet::default(),
                txn: None,
            }),
        }
    }

    /// Roll back whatever transaction the log says was in progress when the
    /// process last died. Idempotent; a no-op on a clean log.
    pub fn recover(&self) -> DbResult<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.wal.is_idle() {
            if inner.pager.header().wal_valid {
                inner.pager.update_header(|h| h.wal_valid = false)?;
            }
            return Ok(());
        }
        inner.undo_all()
    }

    pub fn txn(&self) -> Option<TxnId> {
        self.inner.borrow().txn
    }

    pub fn begin_txn(&self, txn_id: TxnId) -> DbResult<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(active) = inner.txn {
            return Err(DbError::Resource(format!(
                "transaction {active} already in progress"
            )));
        }
        inner.wal.begin(txn_id)?;
        inner.pager.update_header(|h| h.wal_valid = true)?;
        inner.txn = Some(txn_id);
        Ok(())
    }

    /// Make the current transaction durable: flush dirty pages, fence the
    /// data file, persist the header, then clear the log. The clear is the
    /// atomic switch point; a crash anywhere before it rolls the
    /// transaction back on the next open.
    pub fn commit_txn(&self) -> DbResult<()> {
        let mut inner = self.inner.borrow_mut();
        let Some(txn_id) = inner.txn else {
            return Err(DbError::Resource("commit without a transaction".into()));
        };
        debug_assert_eq!(inner.pinned(), 0, "commit with outstanding page pins");

        inner.flush_dirty()?;
        inner.pager.sync()?;
        inner.pager.update_header(|h| {
            h.last_txn_id = txn_id;
            h.wal_valid = false;
        })?;
        inner.wal.clear()?;

        inner.txn = None;
        inner.logged.clear();
        inner.fresh.clear();
        Ok(())
    }

    /// Undo the current transaction: restore every logged pre-image in
    /// reverse order, discard dirty buffers, and clear the log.
    pub fn abort_txn(&self) -> DbResult<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.txn.is_none() {
            return Err(DbError::Resource("abort without a transaction".into()));
        }
        inner.undo_all()
    }

    /// Fetch a page, pinning it for the lifetime of the returned guard.
    pub fn get_page(&self, page: PageId) -> DbResult<PageGuard> {
        let mut inner = self.inner.borrow_mut();

        if let Some(frame) = inner.frames.get(&page) {
            let frame = Rc::clone(frame);
            frame.pins.set(frame.pins.get() + 1);
            return Ok(PageGuard { page, frame });
        }

        inner.evict_for_room()?;

        let mut data = Box::new([0u8; PAGE_SIZE]);
        inner.pager.read_page(page, &mut data)?;
        let frame = Frame::new(data, false, None);
        inner.frames.push(page, Rc::clone(&frame));

        Ok(PageGuard { page, frame })
    }

    /// Allocate a fresh page and return it pinned, zero-filled, and dirty.
    pub fn allocate_page(&self) -> DbResult<PageGuard> {
        let mut inner = self.inner.borrow_mut();

        // Allocation moves the high-water mark, so the header pre-image
        // must be fenced first.
        inner.log_header_undo()?;
        let page = inner.pager.allocate_page()?;

        inner.evict_for_room()?;
        let owner = inner.txn;
        let frame = Frame::new(Box::new([0u8; PAGE_SIZE]), true, owner);
        inner.frames.push(page, Rc::clone(&frame));
        if inner.txn.is_some() {
            inner.fresh.insert(page);
        }

        Ok(PageGuard { page, frame })
    }

    /// Declare an imminent mutation of a pinned page.
    ///
    /// The first call for a given already-persistent page inside a
    /// transaction appends that page's current image to the undo log and
    /// fences it; later calls for the same page are free.
    pub fn mark_dirty(&self, guard: &PageGuard) -> DbResult<()> {
        let mut inner = self.inner.borrow_mut();
        let Some(txn_id) = inner.txn else {
            return Err(DbError::Resource(
                "page mutation outside a transaction".into(),
            ));
        };
        debug_assert!(guard.frame.pins.get() > 0, "mark_dirty on unpinned page");

        if !inner.logged.contains(&guard.page) && !inner.fresh.contains(&guard.page) {
            let image = guard.frame.data.borrow();
            inner.wal.append_undo(guard.page, &image, txn_id)?;
            drop(image);
            inner.logged.insert(guard.page);
        }

        guard.frame.dirty.set(true);
        guard.frame.owner.set(Some(txn_id));
        Ok(())
    }

    /// Write all dirty pages back through the pager and mark them clean.
    pub fn flush(&self) -> DbResult<()> {
        self.inner.borrow_mut().flush_dirty()
    }

    /// Copy of the database header.
    pub fn header(&self) -> DbHeader {
        *self.inner.borrow().pager.header()
    }

    /// Apply a header change and persist it, logging the header pre-image
    /// first when a transaction is in progress.
    pub fn update_header(&self, f: impl FnOnce(&mut DbHeader)) -> DbResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.log_header_undo()?;
        inner.pager.update_header(f)
    }

    /// Number of dirty resident pages. With no transaction in progress and
    /// no outstanding guards this must be zero.
    pub fn dirty_pages(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty.get())
            .count()
    }

    /// Number of currently pinned pages.
    pub fn pinned_pages(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .frames
            .iter()
            .filter(|(_, frame)| frame.pins.get() > 0)
            .count()
    }

    pub fn resident_pages(&self) -> usize {
        self.inner.borrow().frames.len()
    }

    /// True when the undo log holds no transaction.
    pub fn wal_idle(&self) -> bool {
        self.inner.borrow().wal.is_idle()
    }

    /// Number of undo records currently in the log.
    pub fn wal_records(&self) -> DbResult<usize> {
        Ok(self.inner.borrow_mut().wal.undo_records()?.len())
    }
}

impl Inner {
    fn pinned(&self) -> usize {
        self.frames
            .iter()
            .filter(|(_, frame)| frame.pins.get() > 0)
            .count()
    }

    /// Ensure a free slot exists, evicting the least-recently-used unpinned
    /// page. Dirty victims are written back first; their undo records were
    /// fenced when they were marked dirty.
    fn evict_for_room(&mut self) -> DbResult<()> {
        while self.frames.len() >= self.capacity {
            // Iteration runs most- to least-recently-used; the last unpinned
            // entry is the LRU victim.
            let mut victim = None;
            for (page, frame) in self.frames.iter() {
                if frame.pins.get() == 0 {
                    victim = Some(*page);
                }
            }

            let Some(page) = victim else {
                return Err(DbError::Resource(
                    "page cache exhausted: every slot is pinned".into(),
                ));
            };

            if let Some(frame) = self.frames.pop(&page) {
                if frame.dirty.get() {
                    self.pager.write_page(page, &frame.data.borrow())?;
                }
            }
        }
        Ok(())
    }

    fn flush_dirty(&mut self) -> DbResult<()> {
        let dirty: Vec<(PageId, Rc<Frame>)> = self
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty.get())
            .map(|(page, frame)| (*page, Rc::clone(frame)))
            .collect();

        for (page, frame) in dirty {
            self.pager.write_page(page, &frame.data.borrow())?;
            frame.dirty.set(false);
            frame.owner.set(None);
        }
        Ok(())
    }

    /// Fence the header pre-image once per transaction, before the first
    /// header change.
    fn log_header_undo(&mut self) -> DbResult<()> {
        let Some(txn_id) = self.txn else {
            return Ok(());
        };
        if self.logged.contains(&HEADER_PAGE) {
            return Ok(());
        }
        let image = self.pager.header_image();
        self.wal.append_undo(HEADER_PAGE, &image, txn_id)?;
        self.logged.insert(HEADER_PAGE);
        Ok(())
    }

    /// Shared abort/recovery path: restore pre-images newest-first, discard
    /// buffers the transaction dirtied, fence, then clear the log.
    fn undo_all(&mut self) -> DbResult<()> {
        let records = self.wal.undo_records()?;

        for record in records.iter().rev() {
            if record.page == HEADER_PAGE {
                self.pager.restore_header(&record.image)?;
            } else {
                self.pager.write_page(record.page, &record.image)?;
                if let Some(frame) = self.frames.peek(&record.page) {
                    *frame.data.borrow_mut() = record.image.clone();
                    frame.dirty.set(false);
                    frame.owner.set(None);
                }
            }
        }

        // Pages the transaction allocated have no pre-image; their buffers
        // hold discarded content and must never be written back.
        for (_, frame) in self.frames.iter() {
            if frame.dirty.get() {
                frame.dirty.set(false);
                frame.owner.set(None);
            }
        }

        self.pager.sync()?;
        if self.pager.header().wal_valid {
            self.pager.update_header(|h| h.wal_valid = false)?;
        }
        self.wal.clear()?;

        self.txn = None;
        self.logged.clear();
        self.fresh.clear();
        Ok(())
    }
}
