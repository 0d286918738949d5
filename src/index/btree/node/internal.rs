use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use super::{PageType, NODE_HEADER_SIZE};
use crate::common::types::{PageId, PAGE_SIZE};
use crate::index::btree::key::IndexKey;

const SLOTS_OFFSET: usize = NODE_HEADER_SIZE;
const CHILD_LEN: usize = 4;

fn slot_size<K: IndexKey>() -> usize {
    K::ENCODED_LEN + CHILD_LEN
}

fn slot_offset<K: IndexKey>(index: usize) -> usize {
    SLOTS_OFFSET + index * slot_size::<K>()
}

/// Read-only view of an internal node: `(key, child)` slots where `size`
/// counts children and the slot-0 key is a dummy. The subtree at slot `i`
/// holds keys in `[key_at(i), key_at(i + 1))`.
pub struct InternalRef<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalRef<'a, K> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(super::page_type(data), PageType::Internal);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Largest number of slots an internal page can physically hold.
    pub fn capacity() -> usize {
        (PAGE_SIZE - SLOTS_OFFSET) / slot_size::<K>()
    }

    pub fn size(&self) -> usize {
        super::size(self.data)
    }

    pub fn max_size(&self) -> usize {
        super::max_size(self.data)
    }

    pub fn min_size(&self) -> usize {
        super::internal_min_size(self.max_size())
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index >= 1 && index < self.size(), "slot 0 key is a dummy");
        K::decode(&self.data[slot_offset::<K>(index)..])
    }

    pub fn child_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        LittleEndian::read_u32(&self.data[slot_offset::<K>(index) + K::ENCODED_LEN..])
    }

    /// The slot-0 key. Meaningless in a live node, but after
    /// `move_half_to` it holds the separator stranded there for the
    /// caller to push up.
    pub fn dummy_key(&self) -> K {
        K::decode(&self.data[slot_offset::<K>(0)..])
    }

    /// Slot index of the given child page, if it is one of ours.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == child)
    }

    /// Child to descend into for `key`. The scan starts at slot 1 since
    /// slot 0 carries no key.
    pub fn lookup(&self, key: &K) -> PageId {
        let n = self.size();
        for i in 1..n {
            if *key < self.key_at(i) {
                return self.child_at(i - 1);
            }
        }
        self.child_at(n - 1)
    }

    /// All child page ids, in slot order.
    pub fn children(&self) -> Vec<PageId> {
        (0..self.size()).map(|i| self.child_at(i)).collect()
    }
}

/// Mutable view of an internal node.
pub struct InternalMut<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalMut<'a, K> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(super::page_type(data), PageType::Internal);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Stamp a fresh internal-node header onto the page and return the
    /// view. `max_size` must leave one spare physical slot: splits insert
    /// before dividing, transiently holding `max_size + 1` children.
    pub fn init(data: &'a mut [u8], page_id: PageId, parent: PageId, max_size: usize) -> Self {
        assert!(max_size >= 3, "internal max size too small");
        assert!(
            max_size < InternalRef::<K>::capacity(),
            "internal max size leaves no overflow slot"
        );
        super::set_page_type(data, PageType::Internal);
        super::set_size(data, 0);
        super::set_max_size(data, max_size);
        super::set_parent_page_id(data, parent);
        super::set_node_page_id(data, page_id);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn as_ref(&self) -> InternalRef<'_, K> {
        InternalRef::new(self.data)
    }

    pub fn size(&self) -> usize {
        super::size(self.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        self.as_ref().key_at(index)
    }

    pub fn child_at(&self, index: usize) -> PageId {
        self.as_ref().child_at(index)
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        debug_assert!(index >= 1 && index < self.size());
        let off = slot_offset::<K>(index);
        key.encode(&mut self.data[off..off + K::ENCODED_LEN]);
    }

    fn set_child_at(&mut self, index: usize, child: PageId) {
        let off = slot_offset::<K>(index) + K::ENCODED_LEN;
        LittleEndian::write_u32(&mut self.data[off..], child);
    }

    fn write_slot(&mut self, index: usize, key: &K, child: PageId) {
        let off = slot_offset::<K>(index);
        key.encode(&mut self.data[off..off + K::ENCODED_LEN]);
        LittleEndian::write_u32(&mut self.data[off + K::ENCODED_LEN..], child);
    }

    /// Turn an empty node into a root over exactly two children.
    pub fn populate_new_root(&mut self, left: PageId, key: &K, right: PageId) {
        debug_assert_eq!(self.size(), 0);
        self.set_child_at(0, left);
        self.write_slot(1, key, right);
        super::set_size(self.data, 2);
    }

    /// Insert `(key, new_child)` immediately after the slot holding
    /// `old_child`.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &K, new_child: PageId) {
        let n = self.size();
        assert!(n < InternalRef::<K>::capacity(), "internal page overflow");
        let pos = self
            .as_ref()
            .value_index(old_child)
            .expect("split child must be present in its parent");
        let width = slot_size::<K>();
        self.data.copy_within(
            slot_offset::<K>(pos + 1)..slot_offset::<K>(n),
            slot_offset::<K>(pos + 1) + width,
        );
        self.write_slot(pos + 1, key, new_child);
        super::set_size(self.data, n + 1);
    }

    /// Remove the slot at `index` (separator key and child together).
    pub fn remove_at(&mut self, index: usize) {
        let n = self.size();
        debug_assert!(index < n);
        self.data
            .copy_within(slot_offset::<K>(index + 1)..slot_offset::<K>(n), slot_offset::<K>(index));
        super::set_size(self.data, n - 1);
    }

    /// Move the upper half of the slots to an empty recipient. The
    /// recipient's slot-0 key ends up holding the separator to push up.
    pub fn move_half_to(&mut self, recipient: &mut InternalMut<'_, K>) {
        debug_assert_eq!(recipient.size(), 0);
        let n = self.size();
        let mid = n / 2;
        let count = n - mid;
        recipient.data[slot_offset::<K>(0)..slot_offset::<K>(count)]
            .copy_from_slice(&self.data[slot_offset::<K>(mid)..slot_offset::<K>(n)]);
        super::set_size(self.data, mid);
        super::set_size(recipient.data, count);
    }

    /// Append every slot to `recipient`, reviving this node's dummy slot-0
    /// key with `middle_key` (the separator taken from the parent). Used on
    /// merge.
    pub fn move_all_to(&mut self, recipient: &mut InternalMut<'_, K>, middle_key: &K) {
        let n = self.size();
        let m = recipient.size();
        debug_assert!(m + n <= InternalRef::<K>::capacity());
        let off = slot_offset::<K>(0);
        middle_key.encode(&mut self.data[off..off + K::ENCODED_LEN]);
        recipient.data[slot_offset::<K>(m)..slot_offset::<K>(m + n)]
            .copy_from_slice(&self.data[slot_offset::<K>(0)..slot_offset::<K>(n)]);
        super::set_size(recipient.data, m + n);
        super::set_size(self.data, 0);
    }

    /// Detach and return the last `(key, child)` pair.
    pub fn pop_last(&mut self) -> (K, PageId) {
        let n = self.size();
        debug_assert!(n > 1);
        let key = K::decode(&self.data[slot_offset::<K>(n - 1)..]);
        let child = self.child_at(n - 1);
        super::set_size(self.data, n - 1);
        (key, child)
    }

    /// Shift every slot right and install `child` at slot 0. The caller
    /// must follow up with `set_key_at(1, ..)` to restore the separator of
    /// the slot that moved off the dummy position.
    pub fn push_front_child(&mut self, child: PageId) {
        let n = self.size();
        assert!(n < InternalRef::<K>::capacity(), "internal page overflow");
        let width = slot_size::<K>();
        self.data
            .copy_within(slot_offset::<K>(0)..slot_offset::<K>(n), slot_offset::<K>(0) + width);
        super::set_size(self.data, n + 1);
        self.set_child_at(0, child);
    }

    /// Append `(key, child)` as the new last slot.
    pub fn push_back(&mut self, key: &K, child: PageId) {
        let n = self.size();
        assert!(n < InternalRef::<K>::capacity(), "internal page overflow");
        self.write_slot(n, key, child);
        super::set_size(self.data, n + 1);
    }

    pub fn children(&self) -> Vec<PageId> {
        self.as_ref().children()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    fn new_internal(buf: &mut [u8; PAGE_SIZE]) -> InternalMut<'_, u64> {
        InternalMut::init(buf, 1, INVALID_PAGE_ID, 4)
    }

    #[test]
    fn test_populate_and_lookup() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut node = new_internal(&mut buf);
        node.populate_new_root(100, &10, 101);
        node.insert_node_after(101, &20, 102);
        node.insert_node_after(102, &30, 103);

        let view = node.as_ref();
        assert_eq!(view.size(), 4);
        assert_eq!(view.lookup(&5), 100);
        assert_eq!(view.lookup(&10), 101);
        assert_eq!(view.lookup(&15), 101);
        assert_eq!(view.lookup(&25), 102);
        assert_eq!(view.lookup(&35), 103);
        assert_eq!(view.value_index(102), Some(2));
        assert_eq!(view.value_index(999), None);
    }

    #[test]
    fn test_remove_at() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut node = new_internal(&mut buf);
        node.populate_new_root(100, &10, 101);
        node.insert_node_after(101, &20, 102);

        node.remove_at(1);
        let view = node.as_ref();
        assert_eq!(view.size(), 2);
        assert_eq!(view.child_at(0), 100);
        assert_eq!(view.child_at(1), 102);
        assert_eq!(view.key_at(1), 20);
    }

    #[test]
    fn test_move_half_keeps_separator_in_dummy_slot() {
        let mut left_buf = [0u8; PAGE_SIZE];
        let mut right_buf = [0u8; PAGE_SIZE];
        let mut left = new_internal(&mut left_buf);
        let mut right = InternalMut::<u64>::init(&mut right_buf, 2, INVALID_PAGE_ID, 4);
        left.populate_new_root(100, &10, 101);
        left.insert_node_after(101, &20, 102);
        left.insert_node_after(102, &30, 103);
        left.insert_node_after(103, &40, 104);

        left.move_half_to(&mut right);
        assert_eq!(left.size(), 2);
        assert_eq!(right.size(), 3);
        // The separator that moves up is the key stranded in right's
        // dummy slot.
        assert_eq!(right.as_ref().dummy_key(), 20);
        assert_eq!(right.child_at(0), 102);
        assert_eq!(right.key_at(1), 30);
    }

    #[test]
    fn test_borrow_primitives() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut node = new_internal(&mut buf);
        node.populate_new_root(100, &10, 101);
        node.insert_node_after(101, &20, 102);

        let (key, child) = node.pop_last();
        assert_eq!((key, child), (20, 102));
        assert_eq!(node.size(), 2);

        node.push_front_child(99);
        node.set_key_at(1, &5);
        assert_eq!(node.size(), 3);
        assert_eq!(node.child_at(0), 99);
        assert_eq!(node.key_at(1), 5);
        assert_eq!(node.child_at(1), 100);

        node.push_back(&30, 103);
        assert_eq!(node.size(), 4);
        assert_eq!(node.key_at(3), 30);
        assert_eq!(node.child_at(3), 103);
    }
}
