use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::key::IndexKey;
use crate::index::btree::latch::LatchStack;
use crate::index::btree::node::{self, InternalMut, InternalRef, LeafMut, LeafRef, PageType};
use crate::transaction::Transaction;

use super::base::BPlusTree;

impl<K: IndexKey> BPlusTree<K> {
    /// Insert a unique key. Returns false, without modifying the tree,
    /// when the key is already present.
    ///
    /// Write crabbing: the descent write-latches each node on the path and
    /// releases all retained ancestors (and the tree-wide latch) once the
    /// current node cannot split, i.e. has room for one more entry.
    pub fn insert(&self, key: K, rid: Rid, txn: &Transaction) -> bool {
        let mut root_guard = self.root_page_id.lock();

        if *root_guard == INVALID_PAGE_ID {
            // Empty tree: the first insert starts a root leaf.
            let (page, pid) = self.new_node();
            {
                let mut guard = page.write();
                let mut leaf =
                    LeafMut::<K>::init(&mut guard.data, pid, INVALID_PAGE_ID, self.leaf_max_size);
                leaf.insert(&key, rid);
            }
            self.unpin_node(pid, true);
            *root_guard = pid;
            self.persist_root_page_id(pid);
            return true;
        }

        let mut pid = *root_guard;
        let mut stack = LatchStack::new(&self.buffer_pool, txn, root_guard);
        loop {
            let page = self.fetch_node(pid);
            let guard = page.write_arc();
            let is_leaf = node::page_type(&guard.data) == PageType::Leaf;
            let is_safe = node::size(&guard.data) < node::max_size(&guard.data);
            let next_pid = if is_leaf {
                INVALID_PAGE_ID
            } else {
                InternalRef::<K>::new(&guard.data).lookup(&key)
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

        // The stack now holds the target leaf plus every ancestor that
        // might split.
        {
            let top = stack.top_mut();
            let leaf = LeafRef::<K>::new(&top.guard.data);
            if leaf.lookup(&key).is_some() {
                stack.release_all();
                return false;
            }
            if leaf.size() < self.leaf_max_size {
                let mut leaf = LeafMut::<K>::new(&mut top.guard.data);
                leaf.insert(&key, rid);
                top.dirty = true;
                stack.release_all();
                return true;
            }
        }

        self.split_leaf_and_propagate(&mut stack, key, rid);
        true
    }

    /// The target leaf is full: split it, place the new key, and push the
    /// separator up through the retained ancestors.
    fn split_leaf_and_propagate(&self, stack: &mut LatchStack<'_>, key: K, rid: Rid) {
        let mut leaf_latched = stack.pop().expect("leaf must be on the stack");
        let leaf_pid = leaf_latched.page_id;
        let parent_pid = node::parent_page_id(&leaf_latched.guard.data);

        let (new_page, new_pid) = self.new_node();
        let mut new_guard = new_page.write_arc();
        let separator = {
            let mut new_leaf =
                LeafMut::<K>::init(&mut new_guard.data, new_pid, parent_pid, self.leaf_max_size);
            let mut leaf = LeafMut::<K>::new(&mut leaf_latched.guard.data);
            leaf.move_half_to(&mut new_leaf);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_pid);

            let separator = new_leaf.key_at(0);
            if key < separator {
                leaf.insert(&key, rid);
            } else {
                new_leaf.insert(&key, rid);
            }
            separator
        };
        drop(new_guard);
        self.unpin_node(new_pid, true);
        leaf_latched.dirty = true;
        stack.release_page(leaf_latched);

        self.propagate_split(stack, leaf_pid, separator, new_pid);
    }

    /// Insert `(separator, right)` into the lowest retained ancestor,
    /// splitting full ancestors on the way up. Runs out of ancestors only
    /// when the root itself split, in which case the tree grows a level.
    fn propagate_split(
        &self,
        stack: &mut LatchStack<'_>,
        mut left_pid: PageId,
        mut separator: K,
        mut right_pid: PageId,
    ) {
        loop {
            let Some(mut parent_latched) = stack.pop() else {
                // Grew past the old root.
                let (root_page, root_pid) = self.new_node();
                {
                    let mut guard = root_page.write_arc();
                    let mut root = InternalMut::<K>::init(
                        &mut guard.data,
                        root_pid,
                        INVALID_PAGE_ID,
                        self.internal_max_size,
                    );
                    root.populate_new_root(left_pid, &separator, right_pid);
                }
                self.unpin_node(root_pid, true);
                self.reparent(left_pid, root_pid);
                self.reparent(right_pid, root_pid);
                stack.set_root(root_pid);
                self.persist_root_page_id(root_pid);
                log::debug!("tree grew a level, new root {root_pid}");
                stack.release_all();
                return;
            };

            let parent_pid = parent_latched.page_id;
            let parent_full =
                node::size(&parent_latched.guard.data) >= node::max_size(&parent_latched.guard.data);

            if !parent_full {
                // The lowest retained ancestor was kept precisely because
                // it can absorb the separator.
                let mut parent = InternalMut::<K>::new(&mut parent_latched.guard.data);
                parent.insert_node_after(left_pid, &separator, right_pid);
                parent_latched.dirty = true;
                stack.release_page(parent_latched);
                stack.release_all();
                return;
            }

            // Split the full parent as well.
            let grandparent_pid = node::parent_page_id(&parent_latched.guard.data);
            let (new_page, new_pid) = self.new_node();
            let mut new_guard = new_page.write_arc();
            let (new_separator, moved_children) = {
                let mut new_inner = InternalMut::<K>::init(
                    &mut new_guard.data,
                    new_pid,
                    grandparent_pid,
                    self.internal_max_size,
                );
                let mut parent = InternalMut::<K>::new(&mut parent_latched.guard.data);
                parent.insert_node_after(left_pid, &separator, right_pid);
                parent.move_half_to(&mut new_inner);
                // The separator pushed up is the key stranded in the new
                // node's dummy slot.
                (new_inner.as_ref().dummy_key(), new_inner.children())
            };
            drop(new_guard);

            self.adopt_children(&moved_children, new_pid);
            self.unpin_node(new_pid, true);
            parent_latched.dirty = true;
            stack.release_page(parent_latched);

            left_pid = parent_pid;
            separator = new_separator;
            right_pid = new_pid;
        }
    }
}
