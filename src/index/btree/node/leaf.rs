use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use super::{PageType, NODE_HEADER_SIZE};
use crate::common::types::{PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::key::IndexKey;

const NEXT_PAGE_ID_OFFSET: usize = NODE_HEADER_SIZE;
const SLOTS_OFFSET: usize = NODE_HEADER_SIZE + 4;
const RID_LEN: usize = 8;

fn slot_size<K: IndexKey>() -> usize {
    K::ENCODED_LEN + RID_LEN
}

fn slot_offset<K: IndexKey>(index: usize) -> usize {
    SLOTS_OFFSET + index * slot_size::<K>()
}

/// Read-only view of a leaf node: sorted `(key, rid)` slots plus a forward
/// pointer to the next leaf.
pub struct LeafRef<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> LeafRef<'a, K> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(super::page_type(data), PageType::Leaf);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Largest number of slots a leaf page can physically hold.
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
        super::leaf_min_size(self.max_size())
    }

    pub fn next_page_id(&self) -> PageId {
        LittleEndian::read_u32(&self.data[NEXT_PAGE_ID_OFFSET..])
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        K::decode(&self.data[slot_offset::<K>(index)..])
    }

    pub fn rid_at(&self, index: usize) -> Rid {
        debug_assert!(index < self.size());
        let off = slot_offset::<K>(index) + K::ENCODED_LEN;
        Rid::new(
            LittleEndian::read_u32(&self.data[off..]),
            LittleEndian::read_u32(&self.data[off + 4..]),
        )
    }

    /// Binary-search the slots for an exact key match.
    pub fn lookup(&self, key: &K) -> Option<Rid> {
        self.search(key).ok().map(|i| self.rid_at(i))
    }

    /// Index of the first slot whose key is >= `key`; `size()` when every
    /// key is smaller. Entry point for range iteration.
    pub fn key_index(&self, key: &K) -> usize {
        match self.search(key) {
            Ok(i) | Err(i) => i,
        }
    }

    fn search(&self, key: &K) -> Result<usize, usize> {
        let mut lo = 0;
        let mut hi = self.size();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.key_at(mid).cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }
}

/// Mutable view of a leaf node.
pub struct LeafMut<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> LeafMut<'a, K> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(super::page_type(data), PageType::Leaf);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Stamp a fresh leaf header onto the page and return the view.
    pub fn init(data: &'a mut [u8], page_id: PageId, parent: PageId, max_size: usize) -> Self {
        assert!(max_size >= 2, "leaf max size too small");
        assert!(
            max_size <= LeafRef::<K>::capacity(),
            "leaf max size exceeds page capacity"
        );
        super::set_page_type(data, PageType::Leaf);
        super::set_size(data, 0);
        super::set_max_size(data, max_size);
        super::set_parent_page_id(data, parent);
        super::set_node_page_id(data, page_id);
        LittleEndian::write_u32(&mut data[NEXT_PAGE_ID_OFFSET..], INVALID_PAGE_ID);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn as_ref(&self) -> LeafRef<'_, K> {
        LeafRef::new(self.data)
    }

    pub fn size(&self) -> usize {
        super::size(self.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        self.as_ref().key_at(index)
    }

    pub fn next_page_id(&self) -> PageId {
        self.as_ref().next_page_id()
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_u32(&mut self.data[NEXT_PAGE_ID_OFFSET..], page_id);
    }

    fn write_slot(&mut self, index: usize, key: &K, rid: Rid) {
        let off = slot_offset::<K>(index);
        key.encode(&mut self.data[off..off + K::ENCODED_LEN]);
        LittleEndian::write_u32(&mut self.data[off + K::ENCODED_LEN..], rid.page_id);
        LittleEndian::write_u32(&mut self.data[off + K::ENCODED_LEN + 4..], rid.slot_num);
    }

    /// Insert a new key in sorted position. The key must not already be
    /// present and the page must have room for one more slot.
    pub fn insert(&mut self, key: &K, rid: Rid) {
        let n = self.size();
        assert!(n < LeafRef::<K>::capacity(), "leaf page overflow");
        let pos = match self.as_ref().search(key) {
            Ok(_) => unreachable!("duplicate key inserted into leaf"),
            Err(pos) => pos,
        };
        let width = slot_size::<K>();
        self.data
            .copy_within(slot_offset::<K>(pos)..slot_offset::<K>(n), slot_offset::<K>(pos) + width);
        self.write_slot(pos, key, rid);
        super::set_size(self.data, n + 1);
    }

    /// Remove a key if present, keeping the slots contiguous.
    pub fn remove(&mut self, key: &K) -> bool {
        let n = self.size();
        let Ok(pos) = self.as_ref().search(key) else {
            return false;
        };
        self.data
            .copy_within(slot_offset::<K>(pos + 1)..slot_offset::<K>(n), slot_offset::<K>(pos));
        super::set_size(self.data, n - 1);
        true
    }

    /// Move the upper half of this node's entries into `recipient`, which
    /// must be empty. Used on split; next-pointer surgery is the caller's.
    pub fn move_half_to(&mut self, recipient: &mut LeafMut<'_, K>) {
        debug_assert_eq!(recipient.size(), 0);
        let n = self.size();
        let mid = n / 2;
        let count = n - mid;
        recipient.data[slot_offset::<K>(0)..slot_offset::<K>(count)]
            .copy_from_slice(&self.data[slot_offset::<K>(mid)..slot_offset::<K>(n)]);
        super::set_size(self.data, mid);
        super::set_size(recipient.data, count);
    }

    /// Append every entry to `recipient` and chain the recipient to this
    /// node's successor. Used on merge.
    pub fn move_all_to(&mut self, recipient: &mut LeafMut<'_, K>) {
        let n = self.size();
        let m = recipient.size();
        debug_assert!(m + n <= LeafRef::<K>::capacity());
        recipient.data[slot_offset::<K>(m)..slot_offset::<K>(m + n)]
            .copy_from_slice(&self.data[slot_offset::<K>(0)..slot_offset::<K>(n)]);
        recipient.set_next_page_id(self.next_page_id());
        super::set_size(recipient.data, m + n);
        super::set_size(self.data, 0);
    }

    /// Borrow helper: this node's last entry becomes the recipient's first.
    pub fn move_last_to_front_of(&mut self, recipient: &mut LeafMut<'_, K>) {
        let n = self.size();
        debug_assert!(n > 0);
        let m = recipient.size();
        let width = slot_size::<K>();
        recipient
            .data
            .copy_within(slot_offset::<K>(0)..slot_offset::<K>(m), slot_offset::<K>(0) + width);
        recipient.data[slot_offset::<K>(0)..slot_offset::<K>(1)]
            .copy_from_slice(&self.data[slot_offset::<K>(n - 1)..slot_offset::<K>(n)]);
        super::set_size(self.data, n - 1);
        super::set_size(recipient.data, m + 1);
    }

    /// Borrow helper: this node's first entry becomes the recipient's last.
    pub fn move_first_to_end_of(&mut self, recipient: &mut LeafMut<'_, K>) {
        let n = self.size();
        debug_assert!(n > 0);
        let m = recipient.size();
        recipient.data[slot_offset::<K>(m)..slot_offset::<K>(m + 1)]
            .copy_from_slice(&self.data[slot_offset::<K>(0)..slot_offset::<K>(1)]);
        self.data
            .copy_within(slot_offset::<K>(1)..slot_offset::<K>(n), slot_offset::<K>(0));
        super::set_size(self.data, n - 1);
        super::set_size(recipient.data, m + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_leaf(buf: &mut [u8; PAGE_SIZE], page_id: PageId) -> LeafMut<'_, u64> {
        LeafMut::init(buf, page_id, INVALID_PAGE_ID, 4)
    }

    #[test]
    fn test_insert_keeps_sorted_order() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut leaf = new_leaf(&mut buf, 1);
        leaf.insert(&30, Rid::new(1, 30));
        leaf.insert(&10, Rid::new(1, 10));
        leaf.insert(&20, Rid::new(1, 20));

        let view = leaf.as_ref();
        assert_eq!(view.size(), 3);
        assert_eq!(view.key_at(0), 10);
        assert_eq!(view.key_at(1), 20);
        assert_eq!(view.key_at(2), 30);
        assert_eq!(view.lookup(&20), Some(Rid::new(1, 20)));
        assert_eq!(view.lookup(&25), None);
    }

    #[test]
    fn test_remove_shifts_slots() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut leaf = new_leaf(&mut buf, 1);
        for k in [5u64, 10, 15] {
            leaf.insert(&k, Rid::new(1, k as u32));
        }

        assert!(leaf.remove(&10));
        assert!(!leaf.remove(&10));
        let view = leaf.as_ref();
        assert_eq!(view.size(), 2);
        assert_eq!(view.key_at(0), 5);
        assert_eq!(view.key_at(1), 15);
    }

    #[test]
    fn test_move_half_to() {
        let mut left_buf = [0u8; PAGE_SIZE];
        let mut right_buf = [0u8; PAGE_SIZE];
        let mut left = new_leaf(&mut left_buf, 1);
        let mut right = new_leaf(&mut right_buf, 2);
        for k in [1u64, 2, 3, 4] {
            left.insert(&k, Rid::new(1, k as u32));
        }

        left.move_half_to(&mut right);
        assert_eq!(left.size(), 2);
        assert_eq!(right.size(), 2);
        assert_eq!(left.key_at(0), 1);
        assert_eq!(right.key_at(0), 3);
        assert_eq!(right.key_at(1), 4);
    }

    #[test]
    fn test_borrow_moves() {
        let mut left_buf = [0u8; PAGE_SIZE];
        let mut right_buf = [0u8; PAGE_SIZE];
        let mut left = new_leaf(&mut left_buf, 1);
        let mut right = new_leaf(&mut right_buf, 2);
        for k in [1u64, 2, 3] {
            left.insert(&k, Rid::new(1, k as u32));
        }
        right.insert(&9, Rid::new(2, 9));

        left.move_last_to_front_of(&mut right);
        assert_eq!(left.size(), 2);
        assert_eq!(right.key_at(0), 3);
        assert_eq!(right.key_at(1), 9);

        right.move_first_to_end_of(&mut left);
        assert_eq!(left.size(), 3);
        assert_eq!(left.key_at(2), 3);
        assert_eq!(right.key_at(0), 9);
    }

    #[test]
    fn test_merge_chains_next_pointer() {
        let mut left_buf = [0u8; PAGE_SIZE];
        let mut right_buf = [0u8; PAGE_SIZE];
        let mut left = new_leaf(&mut left_buf, 1);
        let mut right = new_leaf(&mut right_buf, 2);
        left.insert(&1, Rid::new(1, 1));
        left.set_next_page_id(2);
        right.insert(&5, Rid::new(2, 5));
        right.set_next_page_id(7);

        right.move_all_to(&mut left);
        assert_eq!(left.size(), 2);
        assert_eq!(left.next_page_id(), 7);
        assert_eq!(right.size(), 0);
    }
}
