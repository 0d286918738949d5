use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::key::IndexKey;
use crate::index::btree::latch::{LatchStack, LatchedPage};
use crate::index::btree::node::{self, InternalMut, InternalRef, LeafMut, PageType};
use crate::transaction::Transaction;

use super::base::BPlusTree;

impl<K: IndexKey> BPlusTree<K> {
    /// Remove a key; a no-op when the key is absent.
    ///
    /// Write crabbing mirrors insert with the inverse safety rule: a node
    /// is safe when losing one entry keeps it at or above its minimum, so
    /// ancestors that cannot underflow are released on the way down.
    pub fn remove(&self, key: &K, txn: &Transaction) {
        let root_guard = self.root_page_id.lock();
        if *root_guard == INVALID_PAGE_ID {
            return;
        }
        let mut pid = *root_guard;
        let mut stack = LatchStack::new(&self.buffer_pool, txn, root_guard);
        loop {
            let page = self.fetch_node(pid);
            let guard = page.write_arc();
            let is_leaf = node::page_type(&guard.data) == PageType::Leaf;
            let is_safe = Self::remove_safe(&guard.data);
            let next_pid = if is_leaf {
                INVALID_PAGE_ID
            } else {
                InternalRef::<K>::new(&guard.data).lookup(key)
            };
            stack.push(pid, guard);
            if is_safe {
                stack.release_ancestors();
            }
            if is_leaf {
                break;
            }
            pid = next_pid;
        }

        let (removed, underflow) = {
            let top = stack.top_mut();
            let removed = LeafMut::<K>::new(&mut top.guard.data).remove(key);
            if removed {
                top.dirty = true;
            }
            let data = &top.guard.data[..];
            let is_root = node::parent_page_id(data) == INVALID_PAGE_ID;
            let underflow =
                !is_root && node::size(data) < node::leaf_min_size(node::max_size(data));
            (removed, underflow)
        };

        if !removed || !underflow {
            stack.release_all();
            return;
        }

        let leaf_latched = stack.pop().expect("leaf must be on the stack");
        self.rebalance(&mut stack, leaf_latched);
    }

    /// Can this node lose one entry without violating its minimum? The
    /// root has no minimum; a root internal node is unsafe only when a
    /// merge below could leave it a single child.
    fn remove_safe(data: &[u8]) -> bool {
        let is_root = node::parent_page_id(data) == INVALID_PAGE_ID;
        match node::page_type(data) {
            PageType::Leaf => {
                is_root || node::size(data) > node::leaf_min_size(node::max_size(data))
            }
            PageType::Internal => {
                if is_root {
                    node::size(data) > 2
                } else {
                    node::size(data) > node::internal_min_size(node::max_size(data))
                }
            }
            PageType::Invalid => unreachable!("descended into an uninitialized page"),
        }
    }

    /// Fix an underflowing node: borrow from a sibling when one can spare
    /// an entry, otherwise merge, walking up through the retained
    /// ancestors while the underflow propagates.
    fn rebalance(&self, stack: &mut LatchStack<'_>, mut current: LatchedPage) {
        loop {
            let mut parent_latched = stack
                .pop()
                .expect("underflowing node must have a latched parent");
            let idx = InternalRef::<K>::new(&parent_latched.guard.data)
                .value_index(current.page_id)
                .expect("child missing from its parent");

            if self.try_borrow(&mut parent_latched, &mut current, idx) {
                current.dirty = true;
                parent_latched.dirty = true;
                stack.release_page(current);
                stack.release_page(parent_latched);
                stack.release_all();
                return;
            }

            self.merge(stack, &mut parent_latched, current, idx);
            parent_latched.dirty = true;

            let data = &parent_latched.guard.data[..];
            let parent_is_root = node::parent_page_id(data) == INVALID_PAGE_ID;
            let size = node::size(data);
            if parent_is_root {
                if size == 1 {
                    // The root lost its last separator; its only child
                    // becomes the new root.
                    let new_root = InternalRef::<K>::new(data).child_at(0);
                    self.reparent(new_root, INVALID_PAGE_ID);
                    stack.set_root(new_root);
                    self.persist_root_page_id(new_root);
                    log::debug!("tree shrank a level, new root {new_root}");
                    stack.discard_page(parent_latched);
                } else {
                    stack.release_page(parent_latched);
                }
                stack.release_all();
                return;
            }
            if size >= node::internal_min_size(node::max_size(data)) {
                stack.release_page(parent_latched);
                stack.release_all();
                return;
            }
            current = parent_latched;
        }
    }

    /// Try to pull one entry from a sibling, left first. Returns whether a
    /// borrow happened; the parent separator is rewritten on success.
    fn try_borrow(
        &self,
        parent: &mut LatchedPage,
        current: &mut LatchedPage,
        idx: usize,
    ) -> bool {
        let is_leaf = node::page_type(&current.guard.data) == PageType::Leaf;

        if idx > 0 {
            let sibling_pid = InternalRef::<K>::new(&parent.guard.data).child_at(idx - 1);
            let sibling_page = self.fetch_node(sibling_pid);
            let mut sibling_guard = sibling_page.write_arc();
            let spare =
                node::size(&sibling_guard.data) > node::min_size(&sibling_guard.data[..]);
            if spare {
                if is_leaf {
                    let mut sibling = LeafMut::<K>::new(&mut sibling_guard.data);
                    let mut node_view = LeafMut::<K>::new(&mut current.guard.data);
                    sibling.move_last_to_front_of(&mut node_view);
                    let first = node_view.key_at(0);
                    InternalMut::<K>::new(&mut parent.guard.data).set_key_at(idx, &first);
                } else {
                    let middle = InternalRef::<K>::new(&parent.guard.data).key_at(idx);
                    let (last_key, last_child) =
                        InternalMut::<K>::new(&mut sibling_guard.data).pop_last();
                    {
                        let mut node_view = InternalMut::<K>::new(&mut current.guard.data);
                        node_view.push_front_child(last_child);
                        node_view.set_key_at(1, &middle);
                    }
                    InternalMut::<K>::new(&mut parent.guard.data).set_key_at(idx, &last_key);
                    self.reparent(last_child, current.page_id);
                }
                drop(sibling_guard);
                self.unpin_node(sibling_pid, true);
                return true;
            }
            drop(sibling_guard);
            self.unpin_node(sibling_pid, false);
        }

        let parent_size = InternalRef::<K>::new(&parent.guard.data).size();
        if idx + 1 < parent_size {
            let sibling_pid = InternalRef::<K>::new(&parent.guard.data).child_at(idx + 1);
            let sibling_page = self.fetch_node(sibling_pid);
            let mut sibling_guard = sibling_page.write_arc();
            let spare =
                node::size(&sibling_guard.data) > node::min_size(&sibling_guard.data[..]);
            if spare {
                if is_leaf {
                    let mut sibling = LeafMut::<K>::new(&mut sibling_guard.data);
                    let mut node_view = LeafMut::<K>::new(&mut current.guard.data);
                    sibling.move_first_to_end_of(&mut node_view);
                    let new_first = sibling.key_at(0);
                    InternalMut::<K>::new(&mut parent.guard.data).set_key_at(idx + 1, &new_first);
                } else {
                    let middle = InternalRef::<K>::new(&parent.guard.data).key_at(idx + 1);
                    let (moved_child, new_separator) = {
                        let mut sibling = InternalMut::<K>::new(&mut sibling_guard.data);
                        let moved_child = sibling.child_at(0);
                        let new_separator = sibling.key_at(1);
                        sibling.remove_at(0);
                        (moved_child, new_separator)
                    };
                    InternalMut::<K>::new(&mut current.guard.data).push_back(&middle, moved_child);
                    InternalMut::<K>::new(&mut parent.guard.data)
                        .set_key_at(idx + 1, &new_separator);
                    self.reparent(moved_child, current.page_id);
                }
                drop(sibling_guard);
                self.unpin_node(sibling_pid, true);
                return true;
            }
            drop(sibling_guard);
            self.unpin_node(sibling_pid, false);
        }

        false
    }

    /// Neither sibling can spare an entry: merge into the left sibling, or
    /// absorb the right one when there is no left. The emptied page is
    /// deleted and the separator removed from the parent.
    fn merge(
        &self,
        stack: &LatchStack<'_>,
        parent: &mut LatchedPage,
        current: LatchedPage,
        idx: usize,
    ) {
        let mut current = current;
        let is_leaf = node::page_type(&current.guard.data) == PageType::Leaf;

        if idx > 0 {
            // Merge `current` into its left sibling.
            let sibling_pid = InternalRef::<K>::new(&parent.guard.data).child_at(idx - 1);
            let sibling_page = self.fetch_node(sibling_pid);
            let sibling_guard = sibling_page.write_arc();
            let mut sibling_latched = LatchedPage {
                page_id: sibling_pid,
                guard: sibling_guard,
                dirty: true,
            };
            if is_leaf {
                let mut recipient = LeafMut::<K>::new(&mut sibling_latched.guard.data);
                let mut donor = LeafMut::<K>::new(&mut current.guard.data);
                donor.move_all_to(&mut recipient);
            } else {
                let middle = InternalRef::<K>::new(&parent.guard.data).key_at(idx);
                let moved = InternalRef::<K>::new(&current.guard.data).children();
                {
                    let mut recipient = InternalMut::<K>::new(&mut sibling_latched.guard.data);
                    let mut donor = InternalMut::<K>::new(&mut current.guard.data);
                    donor.move_all_to(&mut recipient, &middle);
                }
                self.adopt_children(&moved, sibling_pid);
            }
            InternalMut::<K>::new(&mut parent.guard.data).remove_at(idx);
            stack.release_page(sibling_latched);
            stack.discard_page(current);
        } else {
            // No left sibling: absorb the right sibling into `current`.
            let sibling_pid = InternalRef::<K>::new(&parent.guard.data).child_at(idx + 1);
            let sibling_page = self.fetch_node(sibling_pid);
            let sibling_guard = sibling_page.write_arc();
            let mut sibling_latched = LatchedPage {
                page_id: sibling_pid,
                guard: sibling_guard,
                dirty: false,
            };
            if is_leaf {
                let mut recipient = LeafMut::<K>::new(&mut current.guard.data);
                let mut donor = LeafMut::<K>::new(&mut sibling_latched.guard.data);
                donor.move_all_to(&mut recipient);
            } else {
                let middle = InternalRef::<K>::new(&parent.guard.data).key_at(idx + 1);
                let moved = InternalRef::<K>::new(&sibling_latched.guard.data).children();
                {
                    let mut recipient = InternalMut::<K>::new(&mut current.guard.data);
                    let mut donor = InternalMut::<K>::new(&mut sibling_latched.guard.data);
                    donor.move_all_to(&mut recipient, &middle);
                }
                self.adopt_children(&moved, current.page_id);
            }
            InternalMut::<K>::new(&mut parent.guard.data).remove_at(idx + 1);
            current.dirty = true;
            stack.release_page(current);
            stack.discard_page(sibling_latched);
        }
    }
}
