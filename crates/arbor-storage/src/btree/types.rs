//! Entry type and page capacity arithmetic.

use std::fmt;

use arbor_common::{Field, PageIdentity};

use crate::record::RecordId;

/// A separator key with its two flanking child pointers inside an internal
/// page.
///
/// `rid` names the key slot the entry occupies; it is assigned when the entry
/// is read out of or inserted into a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Separator key.
    pub key: Field,
    /// Child holding keys at or below the separator.
    pub left_child: PageIdentity,
    /// Child holding keys above the separator.
    pub right_child: PageIdentity,
    /// Slot this entry occupies in its page, if placed.
    pub rid: Option<RecordId>,
}

impl Entry {
    /// Creates an unplaced entry.
    pub fn new(key: Field, left_child: PageIdentity, right_child: PageIdentity) -> Self {
        Self {
            key,
            left_child,
            right_child,
            rid: None,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} | {}]", self.key, self.left_child, self.right_child)
    }
}

/// Number of record slots in a leaf page.
///
/// The 12-byte sibling header is followed by one bitmap byte plus
/// `record_width` bytes per slot.
pub fn leaf_max_slots(page_size: usize, record_width: usize) -> usize {
    (page_size - 12) / (record_width + 1)
}

/// Number of keyed entries an internal page can hold.
///
/// Slot 0 carries only a child pointer, so a page with `n` entries occupies
/// `n + 1` slots.
pub fn internal_max_entries(page_size: usize, key_width: usize) -> usize {
    (page_size - 10) / (key_width + 5)
}

/// Number of slots in an internal page, counting slot 0.
pub fn internal_max_slots(page_size: usize, key_width: usize) -> usize {
    internal_max_entries(page_size, key_width) + 1
}

/// Number of page-state bytes a header page tracks.
pub fn header_capacity(page_size: usize) -> usize {
    page_size - 8
}

/// Minimum occupancy bound. Pages at or above this slot count are left
/// alone; a page that drops strictly below it is refilled or merged away.
pub fn low_threshold(max_slots: usize) -> usize {
    max_slots - max_slots / 2
}
