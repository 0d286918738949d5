//! On-page B+Tree node format.
//!
//! Every node page starts with a 24-byte common header; the payload differs
//! by node kind and is accessed through a typed view over the page bytes.
//! Callers dispatch by reading the `page_type` tag, never through trait
//! objects.
//!
//! ```text
//! offset  0..4   page_type (0 invalid, 1 internal, 2 leaf)
//! offset  4..8   size            (leaf: entries; internal: children)
//! offset  8..12  max_size
//! offset 12..16  parent_page_id
//! offset 16..20  page_id
//! offset 20..24  reserved
//! leaf:   24..28 next_page_id, slots from 28
//! internal:              slots from 24
//! ```

pub mod internal;
pub mod leaf;

pub use internal::{InternalMut, InternalRef};
pub use leaf::{LeafMut, LeafRef};

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::PageId;

pub const NODE_HEADER_SIZE: usize = 24;

const PAGE_TYPE_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 4;
const MAX_SIZE_OFFSET: usize = 8;
const PARENT_OFFSET: usize = 12;
const PAGE_ID_OFFSET: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid,
    Internal,
    Leaf,
}

pub fn page_type(data: &[u8]) -> PageType {
    match LittleEndian::read_u32(&data[PAGE_TYPE_OFFSET..]) {
        1 => PageType::Internal,
        2 => PageType::Leaf,
        _ => PageType::Invalid,
    }
}

pub(crate) fn set_page_type(data: &mut [u8], page_type: PageType) {
    let tag = match page_type {
        PageType::Invalid => 0,
        PageType::Internal => 1,
        PageType::Leaf => 2,
    };
    LittleEndian::write_u32(&mut data[PAGE_TYPE_OFFSET..], tag);
}

pub fn size(data: &[u8]) -> usize {
    LittleEndian::read_u32(&data[SIZE_OFFSET..]) as usize
}

pub(crate) fn set_size(data: &mut [u8], size: usize) {
    LittleEndian::write_u32(&mut data[SIZE_OFFSET..], size as u32);
}

pub fn max_size(data: &[u8]) -> usize {
    LittleEndian::read_u32(&data[MAX_SIZE_OFFSET..]) as usize
}

pub(crate) fn set_max_size(data: &mut [u8], max_size: usize) {
    LittleEndian::write_u32(&mut data[MAX_SIZE_OFFSET..], max_size as u32);
}

pub fn parent_page_id(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[PARENT_OFFSET..])
}

pub(crate) fn set_parent_page_id(data: &mut [u8], parent: PageId) {
    LittleEndian::write_u32(&mut data[PARENT_OFFSET..], parent);
}

pub fn node_page_id(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[PAGE_ID_OFFSET..])
}

pub(crate) fn set_node_page_id(data: &mut [u8], page_id: PageId) {
    LittleEndian::write_u32(&mut data[PAGE_ID_OFFSET..], page_id);
}

/// Minimum size a leaf must keep: ceil(max / 2).
pub const fn leaf_min_size(max_size: usize) -> usize {
    max_size.div_ceil(2)
}

/// Minimum number of children an internal node must keep:
/// ceil((max + 1) / 2).
pub const fn internal_min_size(max_size: usize) -> usize {
    (max_size + 1).div_ceil(2)
}

/// Minimum occupancy for the node behind `data`, by its kind.
pub fn min_size(data: &[u8]) -> usize {
    match page_type(data) {
        PageType::Leaf => leaf_min_size(max_size(data)),
        PageType::Internal => internal_min_size(max_size(data)),
        PageType::Invalid => unreachable!("min_size of an uninitialized page"),
    }
}
