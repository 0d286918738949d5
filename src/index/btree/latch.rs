use std::collections::VecDeque;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{MutexGuard, RawRwLock};

use crate::common::types::{Page, PageId};
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::Transaction;

pub(crate) type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// A write-latched, pinned node page held during a structural operation.
pub(crate) struct LatchedPage {
    pub page_id: PageId,
    pub guard: PageWriteGuard,
    pub dirty: bool,
}

/// The set of latches a write operation is holding while crabbing down the
/// tree: the tree-wide root latch (until a safe node releases it) and the
/// retained ancestor chain, oldest first. Page ids are mirrored on the
/// transaction's page-latch queue for the duration.
pub(crate) struct LatchStack<'a> {
    bpm: &'a BufferPoolManager,
    txn: &'a Transaction,
    root_guard: Option<MutexGuard<'a, PageId>>,
    pages: VecDeque<LatchedPage>,
}

impl<'a> LatchStack<'a> {
    pub fn new(
        bpm: &'a BufferPoolManager,
        txn: &'a Transaction,
        root_guard: MutexGuard<'a, PageId>,
    ) -> Self {
        Self {
            bpm,
            txn,
            root_guard: Some(root_guard),
            pages: VecDeque::new(),
        }
    }

    pub fn push(&mut self, page_id: PageId, guard: PageWriteGuard) {
        self.txn.record_page_latch(page_id);
        self.pages.push_back(LatchedPage {
            page_id,
            guard,
            dirty: false,
        });
    }

    pub fn top(&self) -> &LatchedPage {
        self.pages.back().expect("latch stack is empty")
    }

    pub fn top_mut(&mut self) -> &mut LatchedPage {
        self.pages.back_mut().expect("latch stack is empty")
    }

    pub fn pop(&mut self) -> Option<LatchedPage> {
        self.pages.pop_back()
    }

    pub fn holds_root(&self) -> bool {
        self.root_guard.is_some()
    }

    /// Point the tree at a new root page. Only legal while the root latch
    /// is still held.
    pub fn set_root(&mut self, page_id: PageId) {
        **self
            .root_guard
            .as_mut()
            .expect("root change without the tree latch") = page_id;
    }

    /// Unlatch and unpin a page this operation was holding.
    pub fn release_page(&self, latched: LatchedPage) {
        let LatchedPage {
            page_id,
            guard,
            dirty,
        } = latched;
        drop(guard);
        self.txn.forget_page_latch(page_id);
        self.bpm
            .unpin_page(page_id, dirty)
            .expect("latched tree node must be pinned");
    }

    /// Unlatch, unpin and delete a node page emptied by a merge. Deletion
    /// can lose the race with an iterator that still pins the page; the
    /// page is then simply left to age out.
    pub fn discard_page(&self, latched: LatchedPage) {
        let LatchedPage { page_id, guard, .. } = latched;
        drop(guard);
        self.txn.forget_page_latch(page_id);
        self.bpm
            .unpin_page(page_id, false)
            .expect("latched tree node must be pinned");
        if let Err(e) = self.bpm.delete_page(page_id) {
            log::debug!("merged node {page_id} not deleted: {e}");
        }
    }

    /// The current node proved safe: release every ancestor latch (FIFO)
    /// and the tree-wide latch.
    pub fn release_ancestors(&mut self) {
        while self.pages.len() > 1 {
            let latched = self.pages.pop_front().expect("len checked");
            self.release_page(latched);
        }
        self.root_guard = None;
    }

    /// Release everything still held, oldest latch first.
    pub fn release_all(&mut self) {
        while let Some(latched) = self.pages.pop_front() {
            self.release_page(latched);
        }
        self.root_guard = None;
    }
}

impl Drop for LatchStack<'_> {
    fn drop(&mut self) {
        // Best-effort cleanup on early exit; normal paths release
        // explicitly.
        while let Some(latched) = self.pages.pop_front() {
            let LatchedPage {
                page_id,
                guard,
                dirty,
            } = latched;
            drop(guard);
            self.txn.forget_page_latch(page_id);
            let _ = self.bpm.unpin_page(page_id, dirty);
        }
        self.root_guard = None;
    }
}
