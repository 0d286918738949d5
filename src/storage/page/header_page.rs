use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PAGE_SIZE};

/// The header page always lives at page id 0.
pub const HEADER_PAGE_ID: PageId = 0;

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_LEN: usize = 32;
const RECORD_SIZE: usize = NAME_LEN + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// View over the database header page, which stores one
/// `(index_name, root_page_id)` record per index. A freshly zeroed page is
/// a valid empty header.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        LittleEndian::read_u32(&self.data[RECORD_COUNT_OFFSET..]) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        LittleEndian::write_u32(&mut self.data[RECORD_COUNT_OFFSET..], count as u32);
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_SIZE
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let off = Self::record_offset(index);
        let name = &self.data[off..off + NAME_LEN];
        let end = name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &name[..end]
    }

    fn find(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name.as_bytes())
    }

    /// Root page id recorded for `name`.
    pub fn get_record(&self, name: &str) -> Option<PageId> {
        let i = self.find(name)?;
        let off = Self::record_offset(i) + NAME_LEN;
        Some(LittleEndian::read_u32(&self.data[off..]))
    }

    /// Add a record for a new index. Returns false when the name is already
    /// present or the page is out of record slots.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        assert!(
            name.len() <= NAME_LEN,
            "index name longer than {NAME_LEN} bytes"
        );
        let count = self.record_count();
        if count >= MAX_RECORDS || self.find(name).is_some() {
            return false;
        }
        let off = Self::record_offset(count);
        self.data[off..off + NAME_LEN].fill(0);
        self.data[off..off + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(&mut self.data[off + NAME_LEN..], root_page_id);
        self.set_record_count(count + 1);
        true
    }

    /// Update an existing record's root page id. Returns false when the
    /// name is unknown.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let Some(i) = self.find(name) else {
            return false;
        };
        let off = Self::record_offset(i) + NAME_LEN;
        LittleEndian::write_u32(&mut self.data[off..], root_page_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_page_has_no_records() {
        let mut data = [0u8; PAGE_SIZE];
        let header = HeaderPage::new(&mut data);
        assert_eq!(header.record_count(), 0);
        assert_eq!(header.get_record("idx"), None);
    }

    #[test]
    fn test_insert_get_update() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(header.insert_record("orders_pk", 7));
        assert!(header.insert_record("users_pk", 9));
        assert_eq!(header.get_record("orders_pk"), Some(7));
        assert_eq!(header.get_record("users_pk"), Some(9));

        assert!(header.update_record("orders_pk", 12));
        assert_eq!(header.get_record("orders_pk"), Some(12));

        assert!(!header.insert_record("orders_pk", 1));
        assert!(!header.update_record("missing", 1));
        assert_eq!(header.record_count(), 2);
    }
}
