use std::sync::Arc;

use crate::common::types::{PageId, PagePtr, Rid, INVALID_PAGE_ID};
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{self, InternalRef, LeafRef, PageType};
use crate::index::btree::BPlusTree;
use crate::storage::buffer::BufferPoolManager;

/// Forward, single-pass iterator over leaf entries in key order, crossing
/// leaves through their forward pointers. The current leaf stays pinned
/// between steps; each step takes the page's read latch only briefly.
pub struct TreeIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    page: Option<PagePtr>,
    page_id: PageId,
    index: usize,
    _marker: std::marker::PhantomData<K>,
}

impl<K: IndexKey> TreeIterator<K> {
    fn new(buffer_pool: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId, index: usize) -> Self {
        Self {
            buffer_pool,
            page: Some(page),
            page_id,
            index,
            _marker: std::marker::PhantomData,
        }
    }

    fn exhausted(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            page: None,
            page_id: INVALID_PAGE_ID,
            index: 0,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<K: IndexKey> Iterator for TreeIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            let page = self.page.as_ref()?;
            let (item, next_pid) = {
                let guard = page.read();
                let leaf = LeafRef::<K>::new(&guard.data);
                if self.index < leaf.size() {
                    (
                        Some((leaf.key_at(self.index), leaf.rid_at(self.index))),
                        INVALID_PAGE_ID,
                    )
                } else {
                    (None, leaf.next_page_id())
                }
            };

            if let Some(item) = item {
                self.index += 1;
                return Some(item);
            }

            // This leaf is exhausted; move along the chain.
            self.buffer_pool
                .unpin_page(self.page_id, false)
                .expect("iterator leaf must be pinned");
            if next_pid == INVALID_PAGE_ID {
                self.page = None;
                return None;
            }
            let next_page = self
                .buffer_pool
                .fetch_page(next_pid)
                .expect("buffer pool exhausted while crossing to the next leaf");
            self.page = Some(next_page);
            self.page_id = next_pid;
            self.index = 0;
        }
    }
}

impl<K: IndexKey> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        if self.page.take().is_some() {
            let _ = self.buffer_pool.unpin_page(self.page_id, false);
        }
    }
}

impl<K: IndexKey> BPlusTree<K> {
    /// Iterate every entry from the leftmost leaf.
    pub fn iter(&self) -> TreeIterator<K> {
        self.leaf_scan(None)
    }

    /// Iterate entries starting from the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> TreeIterator<K> {
        self.leaf_scan(Some(key))
    }

    /// Read-crab down to the starting leaf and hand its pin to the
    /// iterator.
    fn leaf_scan(&self, start_key: Option<&K>) -> TreeIterator<K> {
        let root_guard = self.root_page_id.lock();
        let mut pid = *root_guard;
        if pid == INVALID_PAGE_ID {
            return TreeIterator::exhausted(self.buffer_pool.clone());
        }
        let mut page = self.fetch_node(pid);
        let mut guard = page.read_arc();
        drop(root_guard);

        loop {
            match node::page_type(&guard.data) {
                PageType::Leaf => {
                    let index = match start_key {
                        Some(key) => LeafRef::<K>::new(&guard.data).key_index(key),
                        None => 0,
                    };
                    drop(guard);
                    return TreeIterator::new(self.buffer_pool.clone(), page, pid, index);
                }
                PageType::Internal => {
                    let inner = InternalRef::<K>::new(&guard.data);
                    let child_pid = match start_key {
                        Some(key) => inner.lookup(key),
                        None => inner.child_at(0),
                    };
                    let child_page = self.fetch_node(child_pid);
                    let child_guard = child_page.read_arc();
                    drop(guard);
                    self.unpin_node(pid, false);
                    page = child_page;
                    guard = child_guard;
                    pid = child_pid;
                }
                PageType::Invalid => unreachable!("descended into an uninitialized page"),
            }
        }
    }
}
