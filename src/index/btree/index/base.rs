use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{self, InternalRef, LeafRef, PageType};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{HeaderPage, HEADER_PAGE_ID};
use crate::transaction::Transaction;

/// Disk-resident, latch-coupled B+Tree over fixed-length typed keys.
///
/// Every node access goes through the buffer pool: pin the page, read or
/// write it through a typed view, unpin on exit. The tree-wide mutex
/// guards only the root page id; traversals rely on per-page latch
/// crabbing, releasing ancestors as soon as the current node proves safe
/// for the operation.
pub struct BPlusTree<K: IndexKey> {
    name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root_page_id: Mutex<PageId>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Open or create the index named `name`, registering its root in the
    /// header page.
    pub fn new(
        name: &str,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(
            leaf_max_size >= 2 && leaf_max_size <= LeafRef::<K>::capacity(),
            "leaf order out of range"
        );
        assert!(
            internal_max_size >= 3 && internal_max_size < InternalRef::<K>::capacity(),
            "internal order out of range"
        );

        let page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let (root, registered) = {
            let mut guard = page.write();
            let mut header = HeaderPage::new(&mut guard.data);
            match header.get_record(name) {
                Some(root) => (root, false),
                None => {
                    if !header.insert_record(name, INVALID_PAGE_ID) {
                        drop(guard);
                        buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
                        return Err(BTreeError::HeaderFull);
                    }
                    (INVALID_PAGE_ID, true)
                }
            }
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, registered)?;

        Ok(Self {
            name: name.to_string(),
            buffer_pool,
            root_page_id: Mutex::new(root),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    /// Open or create an index with orders derived from the page size.
    pub fn new_with_default_order(
        name: &str,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let leaf_max = LeafRef::<K>::capacity();
        let internal_max = InternalRef::<K>::capacity() - 1;
        Self::new(name, buffer_pool, leaf_max, internal_max)
    }

    pub fn get_root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.get_root_page_id() == INVALID_PAGE_ID
    }

    /// Point query: the record id stored under `key`, if any. Descends
    /// with read latches, releasing each parent as soon as the child latch
    /// is held.
    pub fn get_value(&self, key: &K, txn: &Transaction) -> Option<Rid> {
        let root_guard = self.root_page_id.lock();
        let mut pid = *root_guard;
        if pid == INVALID_PAGE_ID {
            return None;
        }
        let page = self.fetch_node(pid);
        let mut guard = page.read_arc();
        txn.record_page_latch(pid);
        drop(root_guard);

        loop {
            match node::page_type(&guard.data) {
                PageType::Leaf => {
                    let result = LeafRef::<K>::new(&guard.data).lookup(key);
                    drop(guard);
                    txn.forget_page_latch(pid);
                    self.unpin_node(pid, false);
                    return result;
                }
                PageType::Internal => {
                    let child_pid = InternalRef::<K>::new(&guard.data).lookup(key);
                    let child_page = self.fetch_node(child_pid);
                    let child_guard = child_page.read_arc();
                    txn.record_page_latch(child_pid);
                    drop(guard);
                    txn.forget_page_latch(pid);
                    self.unpin_node(pid, false);
                    guard = child_guard;
                    pid = child_pid;
                }
                PageType::Invalid => unreachable!("descended into an uninitialized page"),
            }
        }
    }

    /// Fetch a node page. Buffer pool exhaustion here is unrecoverable:
    /// the tree cannot complete a traversal or structural modification
    /// without the page.
    pub(crate) fn fetch_node(&self, page_id: PageId) -> PagePtr {
        self.buffer_pool
            .fetch_page(page_id)
            .expect("buffer pool exhausted while fetching a tree node")
    }

    pub(crate) fn unpin_node(&self, page_id: PageId, dirty: bool) {
        self.buffer_pool
            .unpin_page(page_id, dirty)
            .expect("tree node must be pinned");
    }

    /// Allocate a page for a new node; exhaustion mid-modification is
    /// fatal.
    pub(crate) fn new_node(&self) -> (PagePtr, PageId) {
        self.buffer_pool
            .new_page()
            .expect("buffer pool exhausted while allocating a tree node")
    }

    /// Rewrite a child's parent pointer after it changed owner.
    pub(crate) fn reparent(&self, page_id: PageId, new_parent: PageId) {
        let page = self.fetch_node(page_id);
        {
            let mut guard = page.write();
            node::set_parent_page_id(&mut guard.data, new_parent);
        }
        self.unpin_node(page_id, true);
    }

    pub(crate) fn adopt_children(&self, children: &[PageId], new_parent: PageId) {
        for &child in children {
            self.reparent(child, new_parent);
        }
    }

    /// Record the new root in the header page. Callers hold the tree-wide
    /// latch.
    pub(crate) fn persist_root_page_id(&self, root: PageId) {
        let page = self
            .buffer_pool
            .fetch_page(HEADER_PAGE_ID)
            .expect("header page must be fetchable");
        {
            let mut guard = page.write();
            let mut header = HeaderPage::new(&mut guard.data);
            let updated = header.update_record(&self.name, root);
            assert!(updated, "index was never registered in the header page");
        }
        self.unpin_node(HEADER_PAGE_ID, true);
    }
}
